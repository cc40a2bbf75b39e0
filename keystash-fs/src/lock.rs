//! Advisory file locks with a bounded wait.
//!
//! The lock is taken on a sibling `<file>.lock` rather than the data file
//! itself, because atomic writes replace the data file's inode.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use keystash_core::{KeyStoreError, Result};
use tracing::debug;

use crate::atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock `<target>.lock`, retrying every `retry` until `timeout` elapses.
    pub fn acquire(target: &Path, kind: LockKind, timeout: Duration, retry: Duration) -> Result<Self> {
        let path = lock_path(target);
        if let Some(dir) = path.parent() {
            atomic::create_dir_all(dir)?;
        }
        let ctx = || format!("open lock file {}", path.display());

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(atomic::SHARED_FILE_MODE);
        }
        let file = options
            .open(&path)
            .map_err(|e| KeyStoreError::from_io(ctx(), e))?;

        let deadline = Instant::now() + timeout;
        loop {
            let attempt = match kind {
                LockKind::Shared => FileExt::try_lock_shared(&file),
                LockKind::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => {
                    debug!(path = %path.display(), ?kind, "acquired lock");
                    return Ok(Self { file, path });
                }
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(KeyStoreError::LockTimeout { path });
                    }
                    std::thread::sleep(retry);
                }
                Err(e) => {
                    return Err(KeyStoreError::from_io(
                        format!("lock {}", path.display()),
                        e,
                    ));
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    target.with_file_name(name)
}
