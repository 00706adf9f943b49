//! Per-network run lock so two runs never touch the same network directory at once.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, info};

pub const LOCK_FILE: &str = "ftngate.lck";
const RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("unable to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },
}

/// Exclusive lock on `<dir>/ftngate.lck`, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock, retrying every 250 ms until `timeout` has passed.
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open { path: path.clone(), source })?;
        let start = Instant::now();
        let mut announced = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired run lock {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(e) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout { path, waited });
                    }
                    if !announced {
                        info!("Waiting for run lock {} ({})", path.display(), e);
                        announced = true;
                    }
                    thread::sleep(RETRY_INTERVAL.min(timeout - waited));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("Released run lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLock::acquire(dir.path(), Duration::from_secs(1)).unwrap();
        assert!(first.path().ends_with(LOCK_FILE));
        let err = RunLock::acquire(dir.path(), Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        drop(first);
        RunLock::acquire(dir.path(), Duration::from_millis(300)).unwrap();
    }

    #[test]
    fn missing_network_dir_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("fsxnet");
        let err = RunLock::acquire(&missing, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, LockError::Open { .. }));
        assert!(!missing.exists());
    }
}
