//! File-backed certificate store.
//!
//! The whole data set lives in memory behind a read/write lock and is rewritten
//! to a single JSON snapshot after every successful `store`. The snapshot only
//! carries `max_id` and the records in creation order; the id and parent
//! indices are rebuilt when it is loaded.
//!
//! Writes go to a temporary file in the snapshot's directory which is synced and
//! then atomically renamed over the previous snapshot, so an interrupted write
//! never leaves a truncated file behind.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::certificate_info::CertificateRecord;
use crate::error::{PkiError, Result};
use crate::storage::{ParentFilter, Storage};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    version: u32,
    max_id: u64,
    records: &'a [CertificateRecord],
}

#[derive(Deserialize)]
struct SnapshotFile {
    version: u32,
    max_id: u64,
    #[serde(default)]
    records: Vec<CertificateRecord>,
}

/// In-memory store state. Both indices are derived from `records`.
#[derive(Debug, Default)]
struct Snapshot {
    max_id: u64,
    records: Vec<CertificateRecord>,
    id_index: HashMap<u64, usize>,
    child_index: HashMap<u64, Vec<u64>>,
}

impl Snapshot {
    fn from_file(file: SnapshotFile) -> Result<Self> {
        if file.version != SNAPSHOT_VERSION {
            return Err(PkiError::decoding(
                "snapshot",
                format!("unsupported snapshot version {}", file.version),
            ));
        }
        let mut snapshot = Snapshot {
            max_id: file.max_id,
            ..Snapshot::default()
        };
        for record in file.records {
            if record.id == 0 || record.id > file.max_id {
                return Err(PkiError::IndexCorruption(format!(
                    "record id {} outside assigned range 1..={}",
                    record.id, file.max_id
                )));
            }
            if snapshot.id_index.contains_key(&record.id) {
                return Err(PkiError::IndexCorruption(format!(
                    "duplicate record id {}",
                    record.id
                )));
            }
            if !record.is_root() && !snapshot.id_index.contains_key(&record.parent_id) {
                return Err(PkiError::IndexCorruption(format!(
                    "record {} references unknown parent {}",
                    record.id, record.parent_id
                )));
            }
            snapshot.index(record);
        }
        Ok(snapshot)
    }

    fn index(&mut self, record: CertificateRecord) {
        self.id_index.insert(record.id, self.records.len());
        if !record.is_root() {
            self.child_index
                .entry(record.parent_id)
                .or_default()
                .push(record.id);
        }
        self.records.push(record);
    }

    fn insert(&mut self, record: &mut CertificateRecord) -> u64 {
        self.max_id += 1;
        record.id = self.max_id;
        self.index(record.clone());
        record.id
    }

    fn get(&self, id: u64) -> Result<&CertificateRecord> {
        let position = *self.id_index.get(&id).ok_or(PkiError::NotFound { id })?;
        self.records.get(position).ok_or_else(|| {
            PkiError::IndexCorruption(format!(
                "id {} maps to position {} but only {} records exist",
                id,
                position,
                self.records.len()
            ))
        })
    }
}

pub struct FileStorage {
    path: PathBuf,
    state: RwLock<Snapshot>,
}

impl FileStorage {
    /// Load the snapshot at `path`, or start empty when it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => {
                let file: SnapshotFile = serde_json::from_slice(&bytes)
                    .map_err(|e| PkiError::decoding("snapshot", e))?;
                Snapshot::from_file(file)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no snapshot found, starting empty store");
                Snapshot::default()
            }
            Err(e) => return Err(PkiError::persistence(&path, e)),
        };
        info!(
            path = %path.display(),
            records = snapshot.records.len(),
            max_id = snapshot.max_id,
            "opened certificate store"
        );
        Ok(Self {
            path,
            state: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest identifier ever assigned.
    pub fn max_id(&self) -> u64 {
        self.read().max_id
    }

    /// Ids of the direct children of `parent_id`, in creation order.
    pub fn children(&self, parent_id: u64) -> Result<Vec<u64>> {
        let state = self.read();
        if !state.id_index.contains_key(&parent_id) {
            return Err(PkiError::NotFound { id: parent_id });
        }
        Ok(state
            .child_index
            .get(&parent_id)
            .cloned()
            .unwrap_or_default())
    }

    // Records are append-only, so a writer that panicked cannot have left a
    // half-removed entry behind; recover the guard instead of failing reads.
    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory).map_err(|e| PkiError::persistence(&directory, e))?;

        let file = SnapshotFileRef {
            version: SNAPSHOT_VERSION,
            max_id: snapshot.max_id,
            records: &snapshot.records,
        };
        let write_temp = || -> io::Result<NamedTempFile> {
            let mut temp = NamedTempFile::new_in(&directory)?;
            serde_json::to_writer_pretty(&mut temp, &file)?;
            temp.write_all(b"\n")?;
            temp.as_file().sync_all()?;
            Ok(temp)
        };
        let temp = write_temp().map_err(|e| PkiError::persistence(&self.path, e))?;
        temp.persist(&self.path)
            .map_err(|e| PkiError::persistence(&self.path, e.error))?;
        debug!(path = %self.path.display(), records = snapshot.records.len(), "snapshot persisted");
        Ok(())
    }
}

impl Storage for FileStorage {
    fn store(&self, record: &mut CertificateRecord) -> Result<u64> {
        if record.id != 0 {
            return Err(PkiError::Validation(format!(
                "record already has id {}",
                record.id
            )));
        }
        // Held until the snapshot is on disk so persists are serialized.
        let mut state = self.write();
        if !record.is_root() && !state.id_index.contains_key(&record.parent_id) {
            return Err(PkiError::NotFound {
                id: record.parent_id,
            });
        }
        let id = state.insert(record);
        if let Err(e) = self.persist(&state) {
            warn!(id, error = %e, "record stored in memory but snapshot persist failed");
            return Err(e);
        }
        info!(id, parent_id = record.parent_id, common_name = %record.info.common_name, "stored certificate record");
        Ok(id)
    }

    fn load(&self, id: u64) -> Result<CertificateRecord> {
        self.read().get(id).cloned()
    }

    fn search(&self, query: &str, filter: ParentFilter) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .read()
            .records
            .iter()
            .filter(|record| filter.accepts(record) && record.info.matches(query))
            .cloned()
            .collect())
    }
}
