use std::path::{Path, PathBuf};

use keystash_core::{KeyIndex, KeyMaterial, Result};

/// An extra key file written alongside the private key on platforms or
/// configurations that want one (e.g. a PuTTY `.ppk`).
///
/// [`FsKeyStore`](crate::FsKeyStore) calls [`render`](Self::render) after
/// every successful `add_key` and removes [`path`](Self::path) on
/// `delete_key`, both only when `write_aux_key_files` is enabled.  Failures
/// while removing are logged and ignored.
pub trait KeyFileHook: Send + Sync {
    /// Where the auxiliary file lives.
    fn path(&self, root: &Path, idx: &KeyIndex) -> PathBuf;

    /// File content for `key`, or `None` to write nothing for this key.
    fn render(&self, key: &KeyMaterial) -> Result<Option<Vec<u8>>>;
}
