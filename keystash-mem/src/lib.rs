//! In-memory keystash stores, for sessions that must not touch disk and for
//! tests.
//!
//! Neither store synchronises access; wrap in a lock to share across threads.

pub mod non_session;
pub mod store;

pub use non_session::MemNonSessionStore;
pub use store::MemKeyStore;
