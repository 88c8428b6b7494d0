//! Error types shared by the key generator, factory, store and manager.
//!
//! Every operation in the core returns [`Result`]. Errors are propagated to the
//! immediate caller unchanged; nothing here is retried internally.

use std::path::PathBuf;

use openssl::error::ErrorStack;
use thiserror::Error;

/// Result alias used throughout the crate's core modules.
pub type Result<T> = std::result::Result<T, PkiError>;

#[derive(Debug, Error)]
pub enum PkiError {
    /// The requested identifier is absent from the store.
    #[error("certificate {id} not found")]
    NotFound { id: u64 },

    /// An index entry disagrees with the record data it describes.
    #[error("certificate index corrupted: {0}")]
    IndexCorruption(String),

    /// Writing the snapshot to stable storage failed.
    ///
    /// The in-memory store has already been mutated when this is returned from
    /// a `store` call, so the record may be visible until the process restarts.
    #[error("failed to persist snapshot {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored or supplied bytes could not be parsed.
    #[error("failed to decode {what}: {reason}")]
    Decoding { what: String, reason: String },

    /// Key generation or signing failed inside OpenSSL.
    #[error("{context}: {source}")]
    Crypto {
        context: String,
        #[source]
        source: ErrorStack,
    },

    /// Certificate metadata is malformed or incomplete.
    #[error("invalid certificate info: {0}")]
    Validation(String),

    /// Building an export archive failed.
    #[error("failed to build export archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl PkiError {
    pub(crate) fn crypto(context: impl Into<String>, source: ErrorStack) -> Self {
        PkiError::Crypto {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn decoding(what: impl Into<String>, reason: impl ToString) -> Self {
        PkiError::Decoding {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PkiError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for [`PkiError::NotFound`], the one kind boundary code may surface
    /// to users distinctly.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PkiError::NotFound { .. })
    }
}
