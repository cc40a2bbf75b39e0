use std::collections::BTreeMap;

use keystash_core::naming::is_safe_cluster_name;
use keystash_core::{
    KeyStoreError, NonSessionKeyStore, Profile, ProfileStore, Result, TrustedCertBundle,
    known_hosts, pem_blocks,
};
use ssh_key::PublicKey;
use tracing::warn;

/// Profile, known hosts and trusted CAs held in memory.
///
/// Holds at most one profile, which is always the current one.
#[derive(Debug, Clone, Default)]
pub struct MemNonSessionStore {
    profile: Option<Profile>,
    known_hosts: Vec<u8>,
    trusted_cas: BTreeMap<String, Vec<TrustedCertBundle>>,
}

impl MemNonSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: Profile) -> Self {
        Self {
            profile: Some(profile),
            ..Self::default()
        }
    }

    fn profile(&self) -> Result<&Profile> {
        self.profile
            .as_ref()
            .ok_or_else(|| KeyStoreError::NotFound("in-memory profile".into()))
    }
}

impl ProfileStore for MemNonSessionStore {
    fn current_profile(&self) -> Result<String> {
        Ok(self.profile()?.name().to_string())
    }

    fn list_profiles(&self) -> Result<Vec<String>> {
        Ok(self
            .profile
            .iter()
            .map(|p| p.name().to_string())
            .collect())
    }

    fn get_profile(&self, name: &str) -> Result<Profile> {
        let profile = self.profile()?;
        if profile.name() != name {
            return Err(KeyStoreError::NotFound(format!("profile {name:?}")));
        }
        Ok(profile.clone())
    }

    fn save_profile(&mut self, profile: &Profile, _make_current: bool) -> Result<()> {
        self.profile = Some(profile.clone());
        Ok(())
    }
}

impl NonSessionKeyStore for MemNonSessionStore {
    fn get_known_hosts_file(&self) -> Result<Vec<u8>> {
        Ok(self.known_hosts.clone())
    }

    fn add_known_host_keys(
        &mut self,
        hostname: &str,
        proxy_host: &str,
        keys: &[PublicKey],
    ) -> Result<()> {
        self.known_hosts = known_hosts::merge(&self.known_hosts, proxy_host, hostname, keys)?;
        Ok(())
    }

    fn get_known_host_keys(&self, hostname: &str) -> Result<Vec<PublicKey>> {
        known_hosts::host_keys(&self.known_hosts, hostname)
    }

    fn save_trusted_certs(&mut self, proxy_host: &str, cas: &[TrustedCertBundle]) -> Result<()> {
        let bundles = self.trusted_cas.entry(proxy_host.to_string()).or_default();
        for ca in cas {
            if !is_safe_cluster_name(&ca.cluster_name) {
                warn!(cluster = ?ca.cluster_name, "skipped unsafe cluster name");
                continue;
            }
            match bundles.iter_mut().find(|b| b.cluster_name == ca.cluster_name) {
                Some(existing) => *existing = ca.clone(),
                None => bundles.push(ca.clone()),
            }
        }
        Ok(())
    }

    fn get_trusted_certs_pem(&self, proxy_host: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .trusted_cas
            .get(proxy_host)
            .into_iter()
            .flatten()
            .flat_map(|ca| &ca.tls_certificates)
            .flat_map(|cert| pem_blocks::certificate_blocks(cert))
            .map(<[u8]>::to_vec)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystash_core::fixtures;

    #[test]
    fn profile_lifecycle() {
        let mut store = MemNonSessionStore::new();
        assert!(store.current_profile().unwrap_err().is_not_found());
        assert!(store.list_profiles().unwrap().is_empty());

        let profile = Profile {
            web_proxy_addr: "px.example.com:443".into(),
            ..Default::default()
        };
        store.save_profile(&profile, false).unwrap();
        assert_eq!(store.current_profile().unwrap(), "px.example.com");
        assert_eq!(store.list_profiles().unwrap(), ["px.example.com"]);
        assert_eq!(store.get_profile("px.example.com").unwrap(), profile);
        assert!(store.get_profile("other").unwrap_err().is_not_found());
    }

    #[test]
    fn known_hosts_merge_in_memory() {
        let mut store = MemNonSessionStore::new();
        let key = fixtures::private_key(5).public_key();
        store.add_known_host_keys("h1", "p1", &[key.clone()]).unwrap();
        store.add_known_host_keys("h1", "p1", &[key.clone()]).unwrap();
        let content = String::from_utf8(store.get_known_hosts_file().unwrap()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("@cert-authority p1,h1,*.h1 "));
        assert_eq!(store.get_known_host_keys("h1").unwrap(), vec![key]);
    }

    #[test]
    fn trusted_certs_skip_unsafe_and_replace_by_cluster() {
        let mut store = MemNonSessionStore::new();
        let old = fixtures::tls_cert("old");
        let new = fixtures::tls_cert("new");
        store
            .save_trusted_certs(
                "px",
                &[
                    TrustedCertBundle::new("../evil", vec![fixtures::tls_cert("evil")]),
                    TrustedCertBundle::new("root", vec![old]),
                ],
            )
            .unwrap();
        store
            .save_trusted_certs("px", &[TrustedCertBundle::new("root", vec![new.clone()])])
            .unwrap();

        assert_eq!(store.get_trusted_certs_pem("px").unwrap(), vec![new]);
        assert!(store.get_trusted_certs_pem("other").unwrap().is_empty());
    }
}
