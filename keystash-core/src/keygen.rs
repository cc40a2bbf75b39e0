//! Ed25519 key generation with an optional pre-generated pool.
//!
//! [`KeyPool`] owns one background thread that keeps a bounded queue topped
//! up.  [`KeyPool::take`] never waits for it: an empty queue falls back to
//! generating a key on the caller's thread.

use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use rand::RngCore;
use ssh_key::private::{Ed25519Keypair, KeypairData};
use tracing::debug;
use zeroize::Zeroizing;

use crate::PrivateKey;
use crate::error::{KeyStoreError, Result};

/// Generate a fresh Ed25519 private key.
pub fn generate() -> Result<PrivateKey> {
    let mut seed = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(seed.as_mut());
    let keypair = Ed25519Keypair::from_seed(&seed);
    ssh_key::PrivateKey::new(KeypairData::from(keypair), "")
        .map(PrivateKey::new)
        .map_err(|e| KeyStoreError::malformed("generated key", e))
}

pub struct KeyPool {
    rx: Option<Mutex<Receiver<PrivateKey>>>,
    worker: Option<JoinHandle<()>>,
}

impl KeyPool {
    /// Start a pool holding up to `capacity` ready keys.
    pub fn new(capacity: usize) -> Result<Self> {
        let (tx, rx) = sync_channel(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("keystash-keygen".into())
            .spawn(move || fill(tx))
            .map_err(|e| KeyStoreError::from_io("spawn key generator", e))?;
        Ok(Self {
            rx: Some(Mutex::new(rx)),
            worker: Some(worker),
        })
    }

    /// A pre-generated key, or a freshly generated one if none is ready.
    pub fn take(&self) -> Result<PrivateKey> {
        if let Some(rx) = &self.rx
            && let Ok(rx) = rx.lock()
            && let Ok(key) = rx.try_recv()
        {
            return Ok(key);
        }
        debug!("key pool empty, generating synchronously");
        generate()
    }
}

fn fill(tx: SyncSender<PrivateKey>) {
    loop {
        let key = match generate() {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "key generator stopping");
                return;
            }
        };
        // Blocks while the queue is full; fails once the pool is dropped.
        if tx.send(key).is_err() {
            return;
        }
    }
}

impl Drop for KeyPool {
    fn drop(&mut self) {
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
