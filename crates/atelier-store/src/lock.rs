use crate::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exclusive advisory lock on a lock file, released on drop.
///
/// Held only for the duration of a single file read or write, never across a
/// container-engine call.
#[derive(Debug)]
pub struct FileLock {
    lock_file: File,
}

impl FileLock {
    /// Acquire the lock, polling until `timeout` elapses. Exceeding the
    /// timeout is a reported failure, not a deadlock.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { lock_file: file }),
                Err(_) if start.elapsed() < timeout => std::thread::sleep(POLL_INTERVAL),
                Err(_) => {
                    return Err(StoreError::LockTimeout {
                        path: lock_path.to_path_buf(),
                        waited_ms: start.elapsed().as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Single non-blocking attempt; `None` when another holder has it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, StoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
