use std::collections::BTreeMap;

use keystash_core::{
    CertOption, KeyIndex, KeyMaterial, KeyStore, KeyStoreError, NonSessionKeyStore, Profile,
    ProfileStore, Result, TrustedCertBundle, certs,
};
use ssh_key::PublicKey;
use tracing::debug;

use crate::MemNonSessionStore;

type Clusters = BTreeMap<String, KeyMaterial>;
type Users = BTreeMap<String, Clusters>;

/// Session keys held in memory, keyed `proxy -> user -> cluster`.
///
/// Non-session calls are forwarded to `N`, so a session-only memory store can
/// still share the profile directory's known hosts and CAs through
/// `MemKeyStore<FsNonSessionStore>`.
///
/// Lookups with an empty cluster name return the lexicographically first
/// cluster stored for the user.
#[derive(Debug, Clone, Default)]
pub struct MemKeyStore<N = MemNonSessionStore> {
    keys: BTreeMap<String, Users>,
    non_session: N,
}

impl<N: NonSessionKeyStore> MemKeyStore<N> {
    pub fn new(non_session: N) -> Self {
        Self {
            keys: BTreeMap::new(),
            non_session,
        }
    }

    /// A store holding exactly `key`.
    pub fn preloaded(non_session: N, key: &KeyMaterial) -> Result<Self> {
        let mut store = Self::new(non_session);
        store.add_key(key)?;
        Ok(store)
    }

    pub fn non_session(&self) -> &N {
        &self.non_session
    }

    pub fn non_session_mut(&mut self) -> &mut N {
        &mut self.non_session
    }

    fn clusters(&self, proxy_host: &str, username: &str) -> Option<&Clusters> {
        self.keys.get(proxy_host)?.get(username)
    }

    fn lookup(&self, idx: &KeyIndex) -> Result<&KeyMaterial> {
        let clusters = self.clusters(&idx.proxy_host, &idx.username);
        let key = if idx.cluster_name.is_empty() {
            clusters.and_then(|c| c.values().next())
        } else {
            clusters.and_then(|c| c.get(&idx.cluster_name))
        };
        key.ok_or_else(|| KeyStoreError::NotFound(format!("key for {idx}")))
    }
}

impl<N: NonSessionKeyStore> ProfileStore for MemKeyStore<N> {
    fn current_profile(&self) -> Result<String> {
        self.non_session.current_profile()
    }

    fn list_profiles(&self) -> Result<Vec<String>> {
        self.non_session.list_profiles()
    }

    fn get_profile(&self, name: &str) -> Result<Profile> {
        self.non_session.get_profile(name)
    }

    fn save_profile(&mut self, profile: &Profile, make_current: bool) -> Result<()> {
        self.non_session.save_profile(profile, make_current)
    }
}

impl<N: NonSessionKeyStore> NonSessionKeyStore for MemKeyStore<N> {
    fn get_known_hosts_file(&self) -> Result<Vec<u8>> {
        self.non_session.get_known_hosts_file()
    }

    fn add_known_host_keys(
        &mut self,
        hostname: &str,
        proxy_host: &str,
        keys: &[PublicKey],
    ) -> Result<()> {
        self.non_session.add_known_host_keys(hostname, proxy_host, keys)
    }

    fn get_known_host_keys(&self, hostname: &str) -> Result<Vec<PublicKey>> {
        self.non_session.get_known_host_keys(hostname)
    }

    fn save_trusted_certs(&mut self, proxy_host: &str, cas: &[TrustedCertBundle]) -> Result<()> {
        self.non_session.save_trusted_certs(proxy_host, cas)
    }

    fn get_trusted_certs_pem(&self, proxy_host: &str) -> Result<Vec<Vec<u8>>> {
        self.non_session.get_trusted_certs_pem(proxy_host)
    }
}

impl<N: NonSessionKeyStore> KeyStore for MemKeyStore<N> {
    fn add_key(&mut self, key: &KeyMaterial) -> Result<()> {
        let idx = &key.index;
        idx.check()?;
        self.keys
            .entry(idx.proxy_host.clone())
            .or_default()
            .entry(idx.username.clone())
            .or_default()
            .insert(idx.cluster_name.clone(), key.clone());
        debug!(index = %idx, "added key to memory store");
        Ok(())
    }

    fn get_key(&self, idx: &KeyIndex, opts: &[CertOption]) -> Result<KeyMaterial> {
        if opts.is_empty() {
            idx.check_user()?;
        } else {
            idx.check()
                .map_err(|e| e.with_context("loading certificates requires a fully specified key index"))?;
        }
        let stored = self.lookup(idx)?;
        let tls_cert = stored
            .tls_cert
            .as_deref()
            .ok_or_else(|| KeyStoreError::NotFound(format!("TLS certificate for {idx}")))?;
        certs::check_tls_cert(&format!("TLS certificate for {idx}"), tls_cert)?;

        let mut key = stored.without_certs();
        for opt in opts {
            opt.copy_into(stored, &mut key);
            opt.check(&key)
                .map_err(|e| e.with_context(format!("load {} certificates for {idx}", opt.kind())))?;
        }
        Ok(key)
    }

    fn delete_key(&mut self, idx: &KeyIndex) -> Result<()> {
        idx.check_user()?;
        if let Some(users) = self.keys.get_mut(&idx.proxy_host) {
            users.remove(&idx.username);
            if users.is_empty() {
                self.keys.remove(&idx.proxy_host);
            }
        }
        Ok(())
    }

    fn delete_user_certs(&mut self, idx: &KeyIndex, opts: &[CertOption]) -> Result<()> {
        idx.check_user()?;
        let Some(clusters) = self
            .keys
            .get_mut(&idx.proxy_host)
            .and_then(|users| users.get_mut(&idx.username))
        else {
            return Ok(());
        };
        let targets: Vec<&mut KeyMaterial> = if idx.cluster_name.is_empty() {
            clusters.values_mut().collect()
        } else {
            clusters.get_mut(&idx.cluster_name).into_iter().collect()
        };
        for key in targets {
            for opt in opts {
                opt.strip_from(key);
            }
        }
        Ok(())
    }

    fn delete_keys(&mut self) -> Result<()> {
        self.keys.clear();
        Ok(())
    }

    fn get_ssh_certificates(
        &self,
        proxy_host: &str,
        username: &str,
    ) -> Result<Vec<ssh_key::Certificate>> {
        KeyIndex::new(proxy_host, username, "").check_user()?;
        let clusters = self
            .clusters(proxy_host, username)
            .ok_or_else(|| KeyStoreError::NotFound(format!("SSH certificates for {username}@{proxy_host}")))?;
        clusters
            .values()
            .filter_map(|key| key.ssh_cert.as_deref())
            .map(certs::parse_ssh_cert)
            .collect()
    }
}
