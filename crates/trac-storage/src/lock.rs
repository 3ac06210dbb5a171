use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use trac_error::{Result, TracError};

const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// An advisory OS file lock, held for the lifetime of this guard. Acquired
/// with a 1-second timeout and a 50ms retry interval (spec §4.3); a failed
/// acquisition within the timeout fails with `LockTimeout`.
pub struct FileLockGuard {
    file: File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquires an advisory lock on `path`, blocking the calling thread with
/// retries. Intended to be run via `tokio::task::spawn_blocking`.
///
/// `path` is expected to be a lock sidecar, not the data file it guards, so
/// that taking an exclusive lock ahead of a `create_new` write never
/// pre-creates the target. The sidecar itself is created on demand for
/// both lock modes.
pub fn acquire_blocking(path: &Path, mode: LockMode) -> Result<FileLockGuard> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(TracError::from)?;
    let deadline = Instant::now() + LOCK_TIMEOUT;

    loop {
        let outcome = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match outcome {
            Ok(()) => return Ok(FileLockGuard { file }),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(_) => {
                return Err(TracError::LockTimeout(format!(
                    "LOCK_TIMEOUT: could not acquire {:?} lock on {}",
                    mode,
                    path.display()
                )))
            }
        }
    }
}

pub async fn acquire(path: std::path::PathBuf, mode: LockMode) -> Result<FileLockGuard> {
    tokio::task::spawn_blocking(move || acquire_blocking(&path, mode))
        .await
        .map_err(|e| TracError::Unexpected(format!("lock task panicked: {e}")))?
}
