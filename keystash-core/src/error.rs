//! Error taxonomy shared by every key store implementation.
//!
//! Callers branch on the variant: `NotFound` means "log in again",
//! `MalformedData` / `Io` mean something on disk needs attention, and
//! `LockTimeout` means another process holds the known-hosts file and the
//! operation can be retried later.

use std::path::PathBuf;

pub type Result<T, E = KeyStoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    /// The key index is missing fields required by the operation.
    #[error("invalid key index: {0}")]
    InvalidIndex(String),

    #[error("{0}: not found")]
    NotFound(String),

    #[error("malformed {what}: {reason}")]
    MalformedData { what: String, reason: String },

    /// A proxy, user, cluster or protocol name failed the path-safety check.
    #[error("unsafe name {0:?}")]
    UnsafeName(String),

    #[error("timed out acquiring lock on {}", path.display())]
    LockTimeout { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A cert option was asked to do something its certificate class cannot.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("there is no local keystore")]
    NoLocalKeyStore,

    /// An error from a nested operation with additional context.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<KeyStoreError>,
    },
}

impl KeyStoreError {
    /// Translate an OS error, keeping "not found" distinct from everything else.
    pub fn from_io(context: impl Into<String>, err: std::io::Error) -> Self {
        let context = context.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(context)
        } else {
            Self::Io {
                context,
                source: err,
            }
        }
    }

    pub fn malformed(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MalformedData {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap the error with extra context without changing its class.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &KeyStoreError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_) | Self::NoLocalKeyStore)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self.root(), Self::MalformedData { .. })
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self.root(), Self::LockTimeout { .. })
    }

    /// OS error code of the underlying I/O failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self.root() {
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_becomes_not_found() {
        let err = KeyStoreError::from_io(
            "read /tmp/x",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "read /tmp/x: not found");
    }

    #[test]
    fn permission_denied_keeps_os_code() {
        let err = KeyStoreError::from_io("write key", std::io::Error::from_raw_os_error(13));
        assert!(!err.is_not_found());
        assert_eq!(err.raw_os_error(), Some(13));
    }

    #[test]
    fn context_preserves_class() {
        let err = KeyStoreError::malformed("certificate", "bad base64").with_context("load certs");
        assert!(err.is_malformed());
        assert!(err.to_string().starts_with("load certs: "));
    }

    #[test]
    fn null_store_error_counts_as_not_found() {
        assert!(KeyStoreError::NoLocalKeyStore.is_not_found());
    }
}
