//! Durable record store for Atelier environments.
//!
//! One JSON file holds the array of environment records, guarded by a
//! sibling lock file of the same name. Every read and every write acquires a
//! timeout-bounded exclusive lock; writes go through a temp file in the same
//! directory and are renamed into place. The store knows nothing about
//! containers beyond the status strings it persists.

pub mod lock;
pub mod records;

pub use lock::FileLock;
pub use records::{RecordStore, RECORDS_FILE};

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out waiting for lock on {} after {waited_ms} ms", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("record store {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fsync a directory so a just-renamed file inside it survives a crash.
pub fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let handle = File::open(dir)?;
    handle.sync_all()
}
