//! Certificate classes that can be loaded into, or stripped from, a key.
//!
//! Each [`CertOption`] variant owns exactly one group of [`KeyMaterial`]
//! fields:
//!
//! | variant | field        | on disk                                   |
//! |---------|--------------|-------------------------------------------|
//! | `Ssh`   | `ssh_cert`   | `<user>-ssh/<cluster>-cert.pub` (one file) |
//! | `Kube`  | `kube_certs` | `<user>-kube/<cluster>/` (directory)       |
//! | `Db`    | `db_certs`   | `<user>-db/<cluster>/` (directory or file) |
//! | `App`   | `app_certs`  | `<user>-app/<cluster>/` (directory or file)|
//!
//! Stores dispatch by `match`, never by inspecting the key's contents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{KeyStoreError, Result};
use crate::{KeyIndex, KeyMaterial, certs, keypaths};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CertOption {
    /// The per-cluster SSH user certificate.
    Ssh,
    /// TLS certificates for Kubernetes clusters.
    Kube,
    /// TLS certificates for database services; `name` narrows to one service.
    Db { name: Option<String> },
    /// TLS certificates for applications; `name` narrows to one application.
    App { name: Option<String> },
}

/// Every certificate class.
pub const ALL_CERTS: [CertOption; 4] = [
    CertOption::Ssh,
    CertOption::Kube,
    CertOption::Db { name: None },
    CertOption::App { name: None },
];

impl CertOption {
    pub fn db(name: impl Into<String>) -> Self {
        Self::Db {
            name: Some(name.into()),
        }
    }

    pub fn app(name: impl Into<String>) -> Self {
        Self::App {
            name: Some(name.into()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Kube => "kube",
            Self::Db { .. } => "db",
            Self::App { .. } => "app",
        }
    }

    /// Path of the certificate file or directory this option reads and
    /// deletes.  An empty cluster name selects the per-user directory that
    /// holds every cluster.
    pub fn cert_path(&self, root: &Path, idx: &KeyIndex) -> PathBuf {
        let (proxy, user, cluster) = (
            idx.proxy_host.as_str(),
            idx.username.as_str(),
            idx.cluster_name.as_str(),
        );
        match self {
            Self::Ssh if cluster.is_empty() => keypaths::ssh_dir(root, proxy, user),
            Self::Ssh => keypaths::ssh_cert_path(root, proxy, user, cluster),
            Self::Kube if cluster.is_empty() => keypaths::kube_dir(root, proxy, user),
            Self::Kube => keypaths::kube_cert_dir(root, proxy, user, cluster),
            Self::Db { .. } if cluster.is_empty() => keypaths::database_dir(root, proxy, user),
            Self::Db { name: None } => keypaths::database_cert_dir(root, proxy, user, cluster),
            Self::Db { name: Some(db) } => {
                keypaths::database_cert_path(root, proxy, user, cluster, db)
            }
            Self::App { .. } if cluster.is_empty() => keypaths::app_dir(root, proxy, user),
            Self::App { name: None } => keypaths::app_cert_dir(root, proxy, user, cluster),
            Self::App { name: Some(app) } => {
                keypaths::app_cert_path(root, proxy, user, cluster, app)
            }
        }
    }

    /// Inject a single certificate read from a file.
    pub fn load_bytes(&self, key: &mut KeyMaterial, bytes: Vec<u8>) -> Result<()> {
        match self {
            Self::Ssh => key.ssh_cert = Some(bytes),
            Self::Db { name: Some(name) } => {
                key.db_certs = BTreeMap::from([(name.clone(), bytes)]);
            }
            Self::App { name: Some(name) } => {
                key.app_certs = BTreeMap::from([(name.clone(), bytes)]);
            }
            Self::Kube | Self::Db { name: None } | Self::App { name: None } => {
                return Err(KeyStoreError::NotImplemented(format!(
                    "{} certificates cannot be loaded from a single file",
                    self.kind()
                )));
            }
        }
        self.check(key)
    }

    /// Inject a directory's worth of certificates, keyed by name.
    pub fn load_map(&self, key: &mut KeyMaterial, certs: BTreeMap<String, Vec<u8>>) -> Result<()> {
        match self {
            Self::Ssh => {
                return Err(KeyStoreError::NotImplemented(
                    "ssh certificates cannot be loaded from a directory".into(),
                ));
            }
            Self::Kube => key.kube_certs = certs,
            Self::Db { .. } => key.db_certs = certs,
            Self::App { .. } => key.app_certs = certs,
        }
        self.check(key)
    }

    /// Validate this option's certificates in `key`.
    ///
    /// SSH certificates may be expired; anything that does not parse, or whose
    /// signature does not verify, is an error.
    pub fn check(&self, key: &KeyMaterial) -> Result<()> {
        let group = match self {
            Self::Ssh => return key.check_ssh_cert(),
            Self::Kube => &key.kube_certs,
            Self::Db { .. } => &key.db_certs,
            Self::App { .. } => &key.app_certs,
        };
        for (name, cert) in group {
            certs::check_tls_cert(&format!("{} certificate {name:?}", self.kind()), cert)?;
        }
        Ok(())
    }

    /// Remove this option's certificates from `key`.  Named DB/App options
    /// remove only that entry.
    pub fn strip_from(&self, key: &mut KeyMaterial) {
        match self {
            Self::Ssh => key.ssh_cert = None,
            Self::Kube => key.kube_certs.clear(),
            Self::Db { name: None } => key.db_certs.clear(),
            Self::Db { name: Some(name) } => {
                key.db_certs.remove(name);
            }
            Self::App { name: None } => key.app_certs.clear(),
            Self::App { name: Some(name) } => {
                key.app_certs.remove(name);
            }
        }
    }

    /// Copy this option's certificates from `source` into `target`.
    pub fn copy_into(&self, source: &KeyMaterial, target: &mut KeyMaterial) {
        match self {
            Self::Ssh => target.ssh_cert = source.ssh_cert.clone(),
            Self::Kube => target.kube_certs = source.kube_certs.clone(),
            Self::Db { name: None } => target.db_certs = source.db_certs.clone(),
            Self::Db { name: Some(name) } => {
                if let Some(cert) = source.db_certs.get(name) {
                    target.db_certs.insert(name.clone(), cert.clone());
                }
            }
            Self::App { name: None } => target.app_certs = source.app_certs.clone(),
            Self::App { name: Some(name) } => {
                if let Some(cert) = source.app_certs.get(name) {
                    target.app_certs.insert(name.clone(), cert.clone());
                }
            }
        }
    }
}
