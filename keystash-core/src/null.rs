use ssh_key::PublicKey;

use crate::error::{KeyStoreError, Result};
use crate::{
    CertOption, KeyIndex, KeyMaterial, KeyStore, NonSessionKeyStore, Profile, ProfileStore,
    TrustedCertBundle,
};

/// A store that fails every call with [`KeyStoreError::NoLocalKeyStore`].
///
/// Lets callers hold a `KeyStore` unconditionally and branch on the error
/// only where a missing store matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullKeyStore;

impl ProfileStore for NullKeyStore {
    fn current_profile(&self) -> Result<String> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn list_profiles(&self) -> Result<Vec<String>> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn get_profile(&self, _name: &str) -> Result<Profile> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn save_profile(&mut self, _profile: &Profile, _make_current: bool) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }
}

impl NonSessionKeyStore for NullKeyStore {
    fn get_known_hosts_file(&self) -> Result<Vec<u8>> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn add_known_host_keys(&mut self, _: &str, _: &str, _: &[PublicKey]) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn get_known_host_keys(&self, _hostname: &str) -> Result<Vec<PublicKey>> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn save_trusted_certs(&mut self, _: &str, _: &[TrustedCertBundle]) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn get_trusted_certs_pem(&self, _proxy_host: &str) -> Result<Vec<Vec<u8>>> {
        Err(KeyStoreError::NoLocalKeyStore)
    }
}

impl KeyStore for NullKeyStore {
    fn add_key(&mut self, _key: &KeyMaterial) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn get_key(&self, _idx: &KeyIndex, _opts: &[CertOption]) -> Result<KeyMaterial> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn delete_key(&mut self, _idx: &KeyIndex) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn delete_user_certs(&mut self, _idx: &KeyIndex, _opts: &[CertOption]) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn delete_keys(&mut self) -> Result<()> {
        Err(KeyStoreError::NoLocalKeyStore)
    }

    fn get_ssh_certificates(&self, _: &str, _: &str) -> Result<Vec<ssh_key::Certificate>> {
        Err(KeyStoreError::NoLocalKeyStore)
    }
}
