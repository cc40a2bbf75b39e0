//! Core model for keystash: the local credential store of a certificate-based
//! access broker client.
//!
//! A client holds one private key per proxy and user, plus short-lived
//! certificates issued for that key: an SSH certificate and a base TLS
//! identity certificate per cluster, and TLS certificates for individual
//! Kubernetes clusters, databases and applications.  This crate defines that
//! model ([`KeyIndex`], [`KeyMaterial`]), the certificate classes that can be
//! selectively loaded and removed ([`CertOption`]), the on-disk layout
//! ([`keypaths`]) and the store traits implemented by `keystash-fs` and
//! `keystash-mem`.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────── KeyStore ───────────┐
//!  caller ───────────►  │ add/get/delete keys, certs      │
//!                       │        NonSessionKeyStore       │
//!                       │ known hosts, trusted CAs,       │
//!                       │ profiles (ProfileStore)         │
//!                       └─────────────────────────────────┘
//!                         ▲            ▲             ▲
//!                    FsKeyStore   MemKeyStore<N>  NullKeyStore
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ssh_key::{HashAlg, LineEnding, PublicKey};
use zeroize::Zeroizing;

pub mod cert_option;
pub mod certs;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
pub mod keygen;
pub mod keypaths;
pub mod known_hosts;
pub mod naming;
pub mod null;
pub mod pem_blocks;

pub use cert_option::{ALL_CERTS, CertOption};
pub use config::Config;
pub use error::{KeyStoreError, Result};
pub use null::NullKeyStore;

/// Crate-wide mutex used by tests that mutate `KEYSTASH_HOME` / `HOME`.
#[cfg(test)]
pub(crate) static TEST_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

// ---------------------------------------------------------------------------
// Key index
// ---------------------------------------------------------------------------

/// Identity of one stored credential set.
///
/// `cluster_name` may be empty for lookups and deletions, where it means "any
/// cluster" / "every cluster".  Writes always require all three fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyIndex {
    pub proxy_host: String,
    pub username: String,
    pub cluster_name: String,
}

impl KeyIndex {
    pub fn new(
        proxy_host: impl Into<String>,
        username: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            username: username.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Require a fully specified, path-safe index.
    pub fn check(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("proxy host", &self.proxy_host),
            ("username", &self.username),
            ("cluster name", &self.cluster_name),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect();
        if !missing.is_empty() {
            return Err(KeyStoreError::InvalidIndex(format!(
                "missing {} in {self:?}",
                missing.join(", ")
            )));
        }
        self.check_components()
    }

    /// Require proxy host and username; the cluster name may be empty.
    pub fn check_user(&self) -> Result<()> {
        if self.proxy_host.is_empty() || self.username.is_empty() {
            return Err(KeyStoreError::InvalidIndex(format!(
                "proxy host and username are required in {self:?}"
            )));
        }
        self.check_components()
    }

    /// Reject components that cannot be used verbatim in a path.
    /// Empty components are allowed here; use [`check`](Self::check) for those.
    pub fn check_components(&self) -> Result<()> {
        for part in [&self.proxy_host, &self.username, &self.cluster_name] {
            if !part.is_empty() && !naming::is_safe_component(part) {
                return Err(KeyStoreError::UnsafeName(part.clone()));
            }
        }
        Ok(())
    }

    /// Same proxy and user, any cluster.
    pub fn any_cluster(&self) -> Self {
        Self {
            cluster_name: String::new(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for KeyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.username, self.proxy_host)?;
        if !self.cluster_name.is_empty() {
            write!(f, "/{}", self.cluster_name)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// The user's private key.
///
/// Stored on disk in OpenSSH PEM format.  Key material is zeroized on drop by
/// `ssh_key::PrivateKey`; the PEM rendering is handed out as [`Zeroizing`].
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(ssh_key::PrivateKey);

impl PrivateKey {
    pub fn new(key: ssh_key::PrivateKey) -> Self {
        Self(key)
    }

    /// Parse an OpenSSH-format private key.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        ssh_key::PrivateKey::from_openssh(pem)
            .map(Self)
            .map_err(|e| KeyStoreError::malformed("private key", e))
    }

    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        self.0
            .to_openssh(LineEnding::LF)
            .map_err(|e| KeyStoreError::malformed("private key", e))
    }

    /// Public half, without the key comment.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.0.public_key().key_data().clone(), "")
    }

    /// `authorized_keys`-style public key line (`<alg> <base64>`).
    pub fn public_key_openssh(&self) -> Result<String> {
        self.public_key()
            .to_openssh()
            .map_err(|e| KeyStoreError::malformed("public key", e))
    }

    /// SHA-256 fingerprint string (e.g. `"SHA256:abc123…"`).
    pub fn fingerprint(&self) -> String {
        self.0.public_key().fingerprint(HashAlg::Sha256).to_string()
    }

    pub fn as_ssh_key(&self) -> &ssh_key::PrivateKey {
        &self.0
    }
}

impl From<ssh_key::PrivateKey> for PrivateKey {
    fn from(key: ssh_key::PrivateKey) -> Self {
        Self(key)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.fingerprint())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Trusted CAs
// ---------------------------------------------------------------------------

/// One cluster's CA certificates, each a PEM block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedCertBundle {
    pub cluster_name: String,
    pub tls_certificates: Vec<Vec<u8>>,
}

impl TrustedCertBundle {
    pub fn new(cluster_name: impl Into<String>, tls_certificates: Vec<Vec<u8>>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            tls_certificates,
        }
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// A private key and every certificate issued for it under one proxy, user
/// and cluster.
///
/// Certificate maps are keyed by the Kubernetes cluster, database service or
/// application name.  Expired certificates are kept; freshness is the
/// caller's decision.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub index: KeyIndex,
    pub private_key: PrivateKey,
    /// OpenSSH-format user certificate.
    pub ssh_cert: Option<Vec<u8>>,
    /// PEM-encoded base TLS identity certificate.
    pub tls_cert: Option<Vec<u8>>,
    pub trusted_cas: Vec<TrustedCertBundle>,
    pub kube_certs: BTreeMap<String, Vec<u8>>,
    pub db_certs: BTreeMap<String, Vec<u8>>,
    pub app_certs: BTreeMap<String, Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(index: KeyIndex, private_key: PrivateKey) -> Self {
        Self {
            index,
            private_key,
            ssh_cert: None,
            tls_cert: None,
            trusted_cas: Vec::new(),
            kube_certs: BTreeMap::new(),
            db_certs: BTreeMap::new(),
            app_certs: BTreeMap::new(),
        }
    }

    /// Parse the SSH certificate, if one is attached.
    pub fn ssh_certificate(&self) -> Result<Option<ssh_key::Certificate>> {
        self.ssh_cert
            .as_deref()
            .map(certs::parse_ssh_cert)
            .transpose()
    }

    /// Validate the attached SSH certificate, tolerating expiry.
    pub fn check_ssh_cert(&self) -> Result<()> {
        match &self.ssh_cert {
            Some(bytes) => certs::check_ssh_cert(bytes).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Copy of this key with every optional certificate group removed.
    pub fn without_certs(&self) -> Self {
        let mut key = self.clone();
        for opt in ALL_CERTS.iter() {
            opt.strip_from(&mut key);
        }
        key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("index", &self.index)
            .field("private_key", &self.private_key)
            .field("ssh_cert", &self.ssh_cert.is_some())
            .field("tls_cert", &self.tls_cert.is_some())
            .field("trusted_cas", &self.trusted_cas.len())
            .field("kube_certs", &self.kube_certs.keys().collect::<Vec<_>>())
            .field("db_certs", &self.db_certs.keys().collect::<Vec<_>>())
            .field("app_certs", &self.app_certs.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Connection settings remembered for one proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub web_proxy_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_proxy_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_proxy_addr: String,
    #[serde(default)]
    pub username: String,
    /// Cluster the profile was last logged into.
    #[serde(default)]
    pub site_name: String,
}

impl Profile {
    /// Profile name: the host part of the web proxy address.
    pub fn name(&self) -> &str {
        let addr = self.web_proxy_addr.as_str();
        let addr = addr
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(addr);
        let addr = addr.split('/').next().unwrap_or(addr);
        if let Some(bracketed) = addr.strip_prefix('[') {
            return bracketed.split(']').next().unwrap_or(bracketed);
        }
        match addr.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => addr,
        }
    }
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Access to saved profiles.
pub trait ProfileStore {
    /// Name of the active profile.
    fn current_profile(&self) -> Result<String>;

    fn list_profiles(&self) -> Result<Vec<String>>;

    fn get_profile(&self, name: &str) -> Result<Profile>;

    /// Save `profile` under its name, optionally making it the active one.
    fn save_profile(&mut self, profile: &Profile, make_current: bool) -> Result<()>;
}

/// Everything a store keeps besides session keys: known host keys, trusted
/// CA certificates and profiles.
pub trait NonSessionKeyStore: ProfileStore {
    /// Raw known-hosts content (empty if there is none yet).
    fn get_known_hosts_file(&self) -> Result<Vec<u8>>;

    /// Record `keys` as trusted host CAs for `hostname`, reached via `proxy_host`.
    fn add_known_host_keys(
        &mut self,
        hostname: &str,
        proxy_host: &str,
        keys: &[PublicKey],
    ) -> Result<()>;

    /// All known host keys whose host patterns match `hostname`.
    fn get_known_host_keys(&self, hostname: &str) -> Result<Vec<PublicKey>>;

    fn save_trusted_certs(&mut self, proxy_host: &str, cas: &[TrustedCertBundle]) -> Result<()>;

    /// Trusted CA certificates, one PEM block per entry.
    fn get_trusted_certs_pem(&self, proxy_host: &str) -> Result<Vec<Vec<u8>>>;
}

/// Session key storage.
///
/// Implementations do not serialise concurrent callers; operations on the
/// same index must be sequenced by the caller.
pub trait KeyStore: NonSessionKeyStore {
    fn add_key(&mut self, key: &KeyMaterial) -> Result<()>;

    /// Load the key for `idx` with the certificate groups named in `opts`.
    fn get_key(&self, idx: &KeyIndex, opts: &[CertOption]) -> Result<KeyMaterial>;

    /// Remove the private key and every certificate for the index's user,
    /// across all clusters.
    fn delete_key(&mut self, idx: &KeyIndex) -> Result<()>;

    /// Remove the certificate groups named in `opts`, keeping the private key.
    /// An empty cluster name applies to every cluster.
    fn delete_user_certs(&mut self, idx: &KeyIndex, opts: &[CertOption]) -> Result<()>;

    /// Remove every session key (full logout).
    fn delete_keys(&mut self) -> Result<()>;

    /// SSH certificates for every cluster under one proxy and user.
    fn get_ssh_certificates(
        &self,
        proxy_host: &str,
        username: &str,
    ) -> Result<Vec<ssh_key::Certificate>>;
}
