//! Filesystem-backed keystash stores.
//!
//! [`FsKeyStore`] keeps session keys and certificates under
//! `<root>/keys/<proxy>/`; [`FsNonSessionStore`] keeps profiles, the shared
//! `known_hosts` file and trusted CA bundles.  See
//! [`keystash_core::keypaths`] for the full layout.
//!
//! Every file is replaced atomically (temp file + rename).  Only the
//! `known_hosts` file is guarded against concurrent processes, by an advisory
//! lock with a bounded wait.

pub mod atomic;
pub mod hook;
pub mod lock;
pub mod non_session;
pub mod store;

pub use hook::KeyFileHook;
pub use non_session::FsNonSessionStore;
pub use store::FsKeyStore;
