//! Profiles, known hosts and trusted CA bundles on disk.

use std::path::{Path, PathBuf};

use keystash_core::naming::{is_safe_cluster_name, is_safe_component};
use keystash_core::{
    Config, KeyStoreError, NonSessionKeyStore, Profile, ProfileStore, Result, TrustedCertBundle,
    keypaths, known_hosts, pem_blocks,
};
use ssh_key::PublicKey;
use tracing::{debug, warn};

use crate::atomic::{self, KEY_FILE_MODE, SHARED_FILE_MODE};
use crate::lock::{FileLock, LockKind};

/// Non-session data stored under a profile directory.
#[derive(Debug, Clone)]
pub struct FsNonSessionStore {
    root: PathBuf,
    config: Config,
}

impl FsNonSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, Config::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock_known_hosts(&self, kind: LockKind) -> Result<FileLock> {
        FileLock::acquire(
            &keypaths::known_hosts_path(&self.root),
            kind,
            self.config.lock_timeout(),
            self.config.lock_retry_interval(),
        )
        .map_err(|e| e.with_context("could not acquire lock for the known_hosts file"))
    }

    fn save_cas_dir(&self, proxy_host: &str, cas: &[TrustedCertBundle]) -> Result<()> {
        atomic::create_dir_all(&keypaths::cas_dir(&self.root, proxy_host))?;
        for ca in cas.iter().filter(|ca| is_safe_cluster_name(&ca.cluster_name)) {
            let path = keypaths::tls_cas_path_cluster(&self.root, proxy_host, &ca.cluster_name);
            atomic::write_file(&path, &concat_pem(std::slice::from_ref(ca)), SHARED_FILE_MODE)?;
        }
        Ok(())
    }

    fn save_legacy_cas_file(&self, proxy_host: &str, cas: &[TrustedCertBundle]) -> Result<()> {
        let safe: Vec<TrustedCertBundle> = cas
            .iter()
            .filter(|ca| is_safe_cluster_name(&ca.cluster_name))
            .cloned()
            .collect();
        atomic::write_file(
            &keypaths::tls_cas_path(&self.root, proxy_host),
            &concat_pem(&safe),
            SHARED_FILE_MODE,
        )
    }
}

fn concat_pem(cas: &[TrustedCertBundle]) -> Vec<u8> {
    let mut out = Vec::new();
    for cert in cas.iter().flat_map(|ca| &ca.tls_certificates) {
        out.extend_from_slice(cert);
        if !cert.ends_with(b"\n") {
            out.push(b'\n');
        }
    }
    out
}

fn check_proxy(proxy_host: &str) -> Result<()> {
    if proxy_host.is_empty() {
        return Err(KeyStoreError::InvalidIndex("proxy host is required".into()));
    }
    if !is_safe_component(proxy_host) {
        return Err(KeyStoreError::UnsafeName(proxy_host.to_string()));
    }
    Ok(())
}

/// Every regular file under `dir`, depth first, in name order.
fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for (_, path, file_type) in atomic::read_dir_sorted(dir)? {
        if file_type.is_dir() {
            walk_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

impl ProfileStore for FsNonSessionStore {
    fn current_profile(&self) -> Result<String> {
        let path = keypaths::current_profile_path(&self.root);
        let data = atomic::read_file(&path)?;
        let name = String::from_utf8_lossy(&data).trim().to_string();
        if name.is_empty() {
            return Err(KeyStoreError::NotFound(format!(
                "current profile in {}",
                path.display()
            )));
        }
        Ok(name)
    }

    fn list_profiles(&self) -> Result<Vec<String>> {
        let entries = match atomic::read_dir_sorted(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .filter(|(_, _, ft)| ft.is_file())
            .filter_map(|(name, _, _)| {
                name.strip_suffix(&format!(".{}", keypaths::PROFILE_EXT))
                    .map(str::to_string)
            })
            .filter(|name| !name.is_empty())
            .collect())
    }

    fn get_profile(&self, name: &str) -> Result<Profile> {
        if !is_safe_component(name) {
            return Err(KeyStoreError::UnsafeName(name.to_string()));
        }
        let path = keypaths::profile_path(&self.root, name);
        let data = atomic::read_file(&path)?;
        let text = String::from_utf8(data)
            .map_err(|e| KeyStoreError::malformed(format!("profile {}", path.display()), e))?;
        toml::from_str(&text)
            .map_err(|e| KeyStoreError::malformed(format!("profile {}", path.display()), e))
    }

    fn save_profile(&mut self, profile: &Profile, make_current: bool) -> Result<()> {
        let name = profile.name();
        if !is_safe_component(name) {
            return Err(KeyStoreError::UnsafeName(name.to_string()));
        }
        let text = toml::to_string(profile)
            .map_err(|e| KeyStoreError::malformed(format!("profile {name}"), e))?;
        atomic::write_file(
            &keypaths::profile_path(&self.root, name),
            text.as_bytes(),
            KEY_FILE_MODE,
        )?;
        if make_current {
            atomic::write_file(
                &keypaths::current_profile_path(&self.root),
                format!("{name}\n").as_bytes(),
                KEY_FILE_MODE,
            )?;
        }
        debug!(profile = name, make_current, "saved profile");
        Ok(())
    }
}

impl NonSessionKeyStore for FsNonSessionStore {
    fn get_known_hosts_file(&self) -> Result<Vec<u8>> {
        let _lock = self.lock_known_hosts(LockKind::Shared)?;
        Ok(atomic::read_optional(&keypaths::known_hosts_path(&self.root))?.unwrap_or_default())
    }

    fn add_known_host_keys(
        &mut self,
        hostname: &str,
        proxy_host: &str,
        keys: &[PublicKey],
    ) -> Result<()> {
        let _lock = self.lock_known_hosts(LockKind::Exclusive)?;
        let path = keypaths::known_hosts_path(&self.root);
        let existing = atomic::read_optional(&path)?.unwrap_or_default();
        let merged = known_hosts::merge(&existing, proxy_host, hostname, keys)?;
        atomic::write_file(&path, &merged, SHARED_FILE_MODE)
    }

    fn get_known_host_keys(&self, hostname: &str) -> Result<Vec<PublicKey>> {
        let content = self.get_known_hosts_file()?;
        known_hosts::host_keys(&content, hostname)
    }

    fn save_trusted_certs(&mut self, proxy_host: &str, cas: &[TrustedCertBundle]) -> Result<()> {
        check_proxy(proxy_host)?;
        for ca in cas.iter().filter(|ca| !is_safe_cluster_name(&ca.cluster_name)) {
            warn!(cluster = ?ca.cluster_name, "skipped unsafe cluster name");
        }

        // Both formats are attempted; the first failure is reported.
        let per_cluster = self
            .save_cas_dir(proxy_host, cas)
            .map_err(|e| e.with_context("save per-cluster CA bundles"));
        let legacy = self
            .save_legacy_cas_file(proxy_host, cas)
            .map_err(|e| e.with_context("save legacy CA bundle"));
        per_cluster.and(legacy)
    }

    fn get_trusted_certs_pem(&self, proxy_host: &str) -> Result<Vec<Vec<u8>>> {
        check_proxy(proxy_host)?;
        let dir = keypaths::cas_dir(&self.root, proxy_host);
        let mut files = Vec::new();
        match walk_files(&dir, &mut files) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut blocks = Vec::new();
        for path in files {
            let data = atomic::read_file(&path)?;
            blocks.extend(
                pem_blocks::certificate_blocks(&data)
                    .into_iter()
                    .map(<[u8]>::to_vec),
            );
        }
        Ok(blocks)
    }
}
