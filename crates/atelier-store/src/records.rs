use crate::lock::FileLock;
use crate::{fsync_dir, StoreError};
use atelier_schema::EnvironmentRecord;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;

/// File name of the record table inside the store directory.
pub const RECORDS_FILE: &str = "records.json";

/// Lock-guarded JSON table of environment records.
///
/// The lock is scoped to one read or one write. Callers doing
/// read-modify-write reacquire it per step, so two concurrent operations can
/// each read a pre-update snapshot and overwrite each other's unrelated
/// field changes. That race is accepted: holding the lock across
/// container-engine calls would serialize every operation behind the slowest
/// engine request.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl RecordStore {
    pub fn new(dir: &Path, lock_timeout: Duration) -> Self {
        let path = dir.join(RECORDS_FILE);
        let lock_path = dir.join(format!("{RECORDS_FILE}.lock"));
        Self {
            path,
            lock_path,
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. A missing or empty file is the empty table; an
    /// unparsable file is surfaced as [`StoreError::Corrupt`], never silently
    /// reset.
    pub fn read(&self) -> Result<Vec<EnvironmentRecord>, StoreError> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        self.read_unlocked()
    }

    /// Replace the whole table: serialize to a temp file in the store
    /// directory, fsync, rename over the record file.
    pub fn write(&self, records: &[EnvironmentRecord]) -> Result<(), StoreError> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        self.write_unlocked(records)
    }

    /// Read-modify-write the table under a single lock hold. `apply` runs
    /// with the lock held, so it must stay local (no engine calls).
    pub fn update<T>(
        &self,
        apply: impl FnOnce(&mut Vec<EnvironmentRecord>) -> T,
    ) -> Result<T, StoreError> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut records = self.read_unlocked()?;
        let out = apply(&mut records);
        self.write_unlocked(&records)?;
        Ok(out)
    }

    fn read_unlocked(&self) -> Result<Vec<EnvironmentRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            source: e,
        })
    }

    fn write_unlocked(&self, records: &[EnvironmentRecord]) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(records)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;

        debug!(path = %self.path.display(), count = records.len(), "records persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_schema::{EnvStatus, MountSpec};

    fn store(dir: &Path) -> RecordStore {
        RecordStore::new(dir, Duration::from_secs(1))
    }

    fn record(id: &str, name: &str) -> EnvironmentRecord {
        EnvironmentRecord {
            id: id.to_owned(),
            name: name.to_owned(),
            image: "studio-runtime:cu12".to_owned(),
            status: EnvStatus::Created,
            content_path: PathBuf::from("/srv/studio"),
            mount_spec: MountSpec::default(),
            command: None,
            launch_options: atelier_schema::LaunchOptions::default(),
            folder_ids: Vec::new(),
            duplicate: false,
            metadata: atelier_schema::RecordMetadata::default(),
        }
    }

    #[test]
    fn missing_file_reads_as_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).read().unwrap().is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let records = vec![record("aaa", "one"), record("bbb", "two")];
        store.write(&records).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn corrupt_file_is_surfaced_not_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.path(), "{not json").unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        // The broken file must still be there for inspection.
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[test]
    fn read_fails_with_lock_timeout_while_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), Duration::from_millis(60));
        store.write(&[record("aaa", "one")]).unwrap();

        let lock_path = dir.path().join(format!("{RECORDS_FILE}.lock"));
        let _held = FileLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }

    #[test]
    fn write_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.write(&[record("aaa", "one")]).unwrap();
        store.write(&[record("bbb", "two")]).unwrap();

        let loaded = store.read().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "bbb");
    }

    #[test]
    fn update_applies_in_place_and_returns_closure_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write(&[record("aaa", "one")]).unwrap();

        let seen = store
            .update(|records| {
                records.push(record("bbb", "two"));
                records.len()
            })
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(store.read().unwrap().len(), 2);
    }
}
