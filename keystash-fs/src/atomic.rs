//! Crash-safe file helpers.
//!
//! Every write goes to a temp file in the destination directory, is synced,
//! and is then renamed over the target, so readers see either the old or the
//! new content.  Temp files are created owner-only from the start.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use keystash_core::{KeyStoreError, Result};
use tempfile::NamedTempFile;
use tracing::debug;

/// Private keys and certificates.
pub const KEY_FILE_MODE: u32 = 0o600;
/// Known hosts and CA bundles.
pub const SHARED_FILE_MODE: u32 = 0o640;
pub const DIR_MODE: u32 = 0o700;

pub fn create_dir_all(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder
        .create(path)
        .map_err(|e| KeyStoreError::from_io(format!("create directory {}", path.display()), e))
}

/// Atomically replace `path` with `data`, creating parent directories.
pub fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let ctx = || format!("write {}", path.display());
    let dir = path
        .parent()
        .ok_or_else(|| KeyStoreError::InvalidIndex(format!("{} has no parent", path.display())))?;
    create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| KeyStoreError::from_io(ctx(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| KeyStoreError::from_io(ctx(), e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.write_all(data)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| KeyStoreError::from_io(ctx(), e))?;
    tmp.persist(path)
        .map_err(|e| KeyStoreError::from_io(ctx(), e.error))?;

    debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| KeyStoreError::from_io(format!("read {}", path.display()), e))
}

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeyStoreError::from_io(format!("read {}", path.display()), e)),
    }
}

/// Metadata for `path`, or `None` when nothing is there.
pub fn metadata_optional(path: &Path) -> Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeyStoreError::from_io(format!("stat {}", path.display()), e)),
    }
}

/// Remove a file; an absent file is not an error.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KeyStoreError::from_io(format!("remove {}", path.display()), e)),
    }
}

/// Remove a file or directory tree; an absent path is not an error.
pub fn remove_all(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(KeyStoreError::from_io(format!("stat {}", path.display()), e)),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KeyStoreError::from_io(format!("remove {}", path.display()), e)),
    }
}

/// Entries of `dir` sorted by file name.
pub fn read_dir_sorted(dir: &Path) -> Result<Vec<(String, PathBuf, fs::FileType)>> {
    let ctx = || format!("read directory {}", dir.display());
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| KeyStoreError::from_io(ctx(), e))? {
        let entry = entry.map_err(|e| KeyStoreError::from_io(ctx(), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| KeyStoreError::from_io(ctx(), e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
            continue;
        };
        entries.push((name, entry.path(), file_type));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
