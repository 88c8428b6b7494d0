//! Storage abstraction consumed by the [`crate::manager::Manager`].
//!
//! The manager only talks to this trait, so a transactional backend can replace
//! [`crate::file_storage::FileStorage`] without touching certificate logic.

use crate::certificate_info::CertificateRecord;
use crate::error::Result;

/// Which records a search returns, by parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentFilter {
    #[default]
    All,
    RootsOnly,
    ChildrenOf(u64),
}

impl ParentFilter {
    /// Map the integer convention used at the HTTP boundary: negative means
    /// all records, `0` roots only, and a positive value the children of that id.
    pub fn from_sentinel(parent: i64) -> Self {
        match parent {
            p if p < 0 => ParentFilter::All,
            0 => ParentFilter::RootsOnly,
            p => ParentFilter::ChildrenOf(p as u64),
        }
    }

    pub fn accepts(&self, record: &CertificateRecord) -> bool {
        match self {
            ParentFilter::All => true,
            ParentFilter::RootsOnly => record.is_root(),
            ParentFilter::ChildrenOf(parent_id) => record.parent_id == *parent_id,
        }
    }
}

pub trait Storage: Send + Sync {
    /// Assign the next identifier to `record`, index it and persist.
    ///
    /// Returns the assigned id. A non-root record whose parent is not stored
    /// fails with `NotFound` and consumes no id. On a persistence error the
    /// record is already visible in memory but may not survive a restart.
    fn store(&self, record: &mut CertificateRecord) -> Result<u64>;

    /// Fetch a record by id. Fails with `NotFound` when absent.
    fn load(&self, id: u64) -> Result<CertificateRecord>;

    /// Records matching `query` (case-insensitive, common name and DNS
    /// names; empty matches all) and `filter`, in creation order.
    fn search(&self, query: &str, filter: ParentFilter) -> Result<Vec<CertificateRecord>>;
}
