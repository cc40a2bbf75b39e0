//! Session keys on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use keystash_core::config::CONFIG_FILE;
use keystash_core::naming::unescape_segment;
use keystash_core::{
    ALL_CERTS, CertOption, Config, KeyIndex, KeyMaterial, KeyStore, KeyStoreError,
    NonSessionKeyStore, PrivateKey, Profile, ProfileStore, Result, TrustedCertBundle, certs,
    keypaths,
};
use ssh_key::PublicKey;
use tracing::debug;

use crate::atomic::{self, KEY_FILE_MODE};
use crate::hook::KeyFileHook;
use crate::non_session::FsNonSessionStore;

/// A [`KeyStore`] rooted at one profile directory.
///
/// Individual files are replaced atomically, but a key bundle as a whole is
/// not: a failure part-way through [`add_key`](KeyStore::add_key) leaves the
/// files already written in place.
pub struct FsKeyStore {
    non_session: FsNonSessionStore,
    hook: Option<Box<dyn KeyFileHook>>,
}

impl FsKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, Config::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            non_session: FsNonSessionStore::with_config(root, config),
            hook: None,
        }
    }

    /// Open `root`, reading `config/keystash.toml` if present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Config::load(&keypaths::config_dir(&root).join(CONFIG_FILE))?;
        debug!(root = %root.display(), ?config, "opened key store");
        Ok(Self::with_config(root, config))
    }

    /// Install an auxiliary key-file hook.  It only runs when the config's
    /// `write_aux_key_files` is set.
    pub fn with_key_file_hook(mut self, hook: impl KeyFileHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn root(&self) -> &Path {
        self.non_session.root()
    }

    pub fn non_session(&self) -> &FsNonSessionStore {
        &self.non_session
    }

    fn active_hook(&self) -> Option<&dyn KeyFileHook> {
        if self.non_session.config().write_aux_key_files {
            self.hook.as_deref()
        } else {
            None
        }
    }

    fn read_key_pair(&self, idx: &KeyIndex) -> Result<PrivateKey> {
        let root = self.root();
        let private_path = keypaths::user_key_path(root, &idx.proxy_host, &idx.username);
        let private_key = PrivateKey::from_pem(&atomic::read_file(&private_path)?)
            .map_err(|e| e.with_context(private_path.display().to_string()))?;

        let public_path = keypaths::public_key_path(root, &idx.proxy_host, &idx.username);
        let public_text = String::from_utf8(atomic::read_file(&public_path)?)
            .map_err(|e| KeyStoreError::malformed(public_path.display().to_string(), e))?;
        let public_key = PublicKey::from_openssh(public_text.trim())
            .map_err(|e| KeyStoreError::malformed(public_path.display().to_string(), e))?;
        if public_key.key_data() != private_key.public_key().key_data() {
            return Err(KeyStoreError::malformed(
                public_path.display().to_string(),
                "public key does not match private key",
            ));
        }
        Ok(private_key)
    }

    /// Load the certificates selected by `opt` into `key`.  Absent paths
    /// leave the key untouched.  A regular file loads as a single blob and a
    /// directory as a map; `opt` rejects whichever shape it does not accept.
    fn load_certs(&self, opt: &CertOption, key: &mut KeyMaterial) -> Result<()> {
        let path = opt.cert_path(self.root(), &key.index);
        let Some(meta) = atomic::metadata_optional(&path)? else {
            debug!(path = %path.display(), kind = opt.kind(), "no certificates");
            return Ok(());
        };
        if !meta.is_dir() {
            return opt.load_bytes(key, atomic::read_file(&path)?);
        }

        let mut certs = BTreeMap::new();
        for (file_name, file_path, file_type) in atomic::read_dir_sorted(&path)? {
            let Some(stem) = keypaths::trim_cert_path_suffix(&file_name)
                .filter(|_| file_type.is_file())
            else {
                debug!(path = %file_path.display(), "ignoring unexpected file");
                continue;
            };
            certs.insert(unescape_segment(stem), atomic::read_file(&file_path)?);
        }
        opt.load_map(key, certs)
    }
}

impl std::fmt::Debug for FsKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsKeyStore")
            .field("root", &self.root())
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl ProfileStore for FsKeyStore {
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

impl NonSessionKeyStore for FsKeyStore {
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

impl KeyStore for FsKeyStore {
    fn add_key(&mut self, key: &KeyMaterial) -> Result<()> {
        let idx = &key.index;
        idx.check()?;
        let root = self.root();
        let (proxy, user, cluster) = (
            idx.proxy_host.as_str(),
            idx.username.as_str(),
            idx.cluster_name.as_str(),
        );

        let write = |path: PathBuf, data: &[u8]| atomic::write_file(&path, data, KEY_FILE_MODE);

        let pem = key.private_key.to_pem()?;
        write(keypaths::user_key_path(root, proxy, user), pem.as_bytes())?;
        let public = format!("{}\n", key.private_key.public_key_openssh()?);
        write(keypaths::public_key_path(root, proxy, user), public.as_bytes())?;

        if let Some(tls) = &key.tls_cert {
            write(keypaths::tls_cert_path(root, proxy, user), tls)?;
        }
        if let Some(ssh) = &key.ssh_cert {
            write(keypaths::ssh_cert_path(root, proxy, user, cluster), ssh)?;
        }
        for (name, cert) in &key.kube_certs {
            write(keypaths::kube_cert_path(root, proxy, user, cluster, name), cert)?;
        }
        for (name, cert) in &key.db_certs {
            write(keypaths::database_cert_path(root, proxy, user, cluster, name), cert)?;
        }
        for (name, cert) in &key.app_certs {
            write(keypaths::app_cert_path(root, proxy, user, cluster, name), cert)?;
        }

        if let Some(hook) = self.active_hook()
            && let Some(data) = hook.render(key)?
        {
            write(hook.path(root, idx), &data)?;
        }

        debug!(index = %idx, fingerprint = %key.private_key.fingerprint(), "added key");
        Ok(())
    }

    fn get_key(&self, idx: &KeyIndex, opts: &[CertOption]) -> Result<KeyMaterial> {
        if opts.is_empty() {
            idx.check_user()?;
        } else {
            idx.check()
                .map_err(|e| e.with_context("loading certificates requires a fully specified key index"))?;
        }
        let root = self.root();

        let private_key = self.read_key_pair(idx)?;
        let tls_path = keypaths::tls_cert_path(root, &idx.proxy_host, &idx.username);
        let tls_cert = atomic::read_file(&tls_path)?;
        certs::check_tls_cert(&tls_path.display().to_string(), &tls_cert)?;

        let mut key = KeyMaterial::new(idx.clone(), private_key);
        key.tls_cert = Some(tls_cert);
        let cas = self.get_trusted_certs_pem(&idx.proxy_host)?;
        if !cas.is_empty() {
            key.trusted_cas = vec![TrustedCertBundle::new("", cas)];
        }

        for opt in opts {
            self.load_certs(opt, &mut key)
                .map_err(|e| e.with_context(format!("load {} certificates for {idx}", opt.kind())))?;
        }
        Ok(key)
    }

    fn delete_key(&mut self, idx: &KeyIndex) -> Result<()> {
        idx.check_user()?;
        let root = self.root();
        for path in [
            keypaths::user_key_path(root, &idx.proxy_host, &idx.username),
            keypaths::public_key_path(root, &idx.proxy_host, &idx.username),
            keypaths::tls_cert_path(root, &idx.proxy_host, &idx.username),
        ] {
            atomic::remove_file(&path)?;
        }

        if let Some(hook) = self.active_hook() {
            let path = hook.path(root, idx);
            if let Err(e) = atomic::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "could not remove auxiliary key file");
            }
        }

        self.delete_user_certs(&idx.any_cluster(), &ALL_CERTS)?;
        debug!(index = %idx, "deleted key");
        Ok(())
    }

    fn delete_user_certs(&mut self, idx: &KeyIndex, opts: &[CertOption]) -> Result<()> {
        idx.check_user()?;
        for opt in opts {
            atomic::remove_all(&opt.cert_path(self.root(), idx))?;
        }
        Ok(())
    }

    fn delete_keys(&mut self) -> Result<()> {
        let entries = match atomic::read_dir_sorted(self.root()) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        for (name, path, _) in entries {
            if name == keypaths::CONFIG_DIR {
                continue;
            }
            atomic::remove_all(&path)?;
        }
        debug!(root = %self.root().display(), "deleted all keys");
        Ok(())
    }

    fn get_ssh_certificates(
        &self,
        proxy_host: &str,
        username: &str,
    ) -> Result<Vec<ssh_key::Certificate>> {
        KeyIndex::new(proxy_host, username, "").check_user()?;
        let dir = keypaths::ssh_dir(self.root(), proxy_host, username);
        let mut out = Vec::new();
        for (name, path, file_type) in atomic::read_dir_sorted(&dir)? {
            if !file_type.is_file() || !name.ends_with(keypaths::FILE_EXT_SSH_CERT) {
                debug!(path = %path.display(), "ignoring unexpected file");
                continue;
            }
            let cert = certs::parse_ssh_cert(&atomic::read_file(&path)?)
                .map_err(|e| e.with_context(path.display().to_string()))?;
            out.push(cert);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystash_core::fixtures;

    const PROXY: &str = "px.example.com";

    fn store() -> (tempfile::TempDir, FsKeyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsKeyStore::new(dir.path());
        (dir, store)
    }

    fn idx(cluster: &str) -> KeyIndex {
        KeyIndex::new(PROXY, "alice", cluster)
    }

    #[test]
    fn add_then_get_roundtrips() {
        let (_dir, mut store) = store();
        let key = fixtures::key_material(&idx("root"), 1);
        store.add_key(&key).unwrap();
        assert_eq!(store.get_key(&key.index, &ALL_CERTS).unwrap(), key);
    }

    #[test]
    fn get_without_options_has_base_only() {
        let (_dir, mut store) = store();
        let key = fixtures::key_material(&idx("root"), 1);
        store.add_key(&key).unwrap();
        let got = store.get_key(&idx(""), &[]).unwrap();
        assert_eq!(got.private_key, key.private_key);
        assert_eq!(got.tls_cert, key.tls_cert);
        assert!(got.ssh_cert.is_none() && got.db_certs.is_empty());
    }

    #[test]
    fn options_need_full_index() {
        let (_dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        let err = store.get_key(&idx(""), &[CertOption::Ssh]).unwrap_err();
        assert!(matches!(err.root(), KeyStoreError::InvalidIndex(_)));
    }

    #[test]
    fn add_rejects_partial_index() {
        let (_dir, mut store) = store();
        let key = fixtures::key_material(&idx(""), 1);
        assert!(matches!(store.add_key(&key).unwrap_err(), KeyStoreError::InvalidIndex(_)));
    }

    #[test]
    fn missing_key_is_not_found() {
        let (_dir, store) = store();
        assert!(store.get_key(&idx("root"), &[]).unwrap_err().is_not_found());
    }

    #[test]
    fn missing_tls_cert_is_not_found() {
        let (dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        std::fs::remove_file(keypaths::tls_cert_path(dir.path(), PROXY, "alice")).unwrap();
        assert!(store.get_key(&idx("root"), &[]).unwrap_err().is_not_found());
    }

    #[test]
    fn mismatched_public_key_is_malformed() {
        let (dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        let other = fixtures::private_key(2).public_key_openssh().unwrap();
        std::fs::write(keypaths::public_key_path(dir.path(), PROXY, "alice"), other).unwrap();
        assert!(store.get_key(&idx("root"), &[]).unwrap_err().is_malformed());
    }

    #[test]
    fn database_cert_scenario() {
        let (_dir, mut store) = store();
        let mut key = KeyMaterial::new(idx("root"), fixtures::private_key(1));
        key.tls_cert = Some(fixtures::tls_cert("alice"));
        let pg1 = fixtures::tls_cert("pg1");
        key.db_certs.insert("pg1".into(), pg1.clone());
        store.add_key(&key).unwrap();

        let got = store.get_key(&idx("root"), &[CertOption::Db { name: None }]).unwrap();
        assert_eq!(got.db_certs["pg1"], pg1);
        let got = store.get_key(&idx("root"), &[CertOption::db("pg1")]).unwrap();
        assert_eq!(got.db_certs["pg1"], pg1);
    }

    #[test]
    fn cert_shape_on_disk_decides_the_load() {
        let (dir, mut store) = store();
        let mut key = KeyMaterial::new(idx("root"), fixtures::private_key(1));
        key.tls_cert = Some(fixtures::tls_cert("alice"));
        store.add_key(&key).unwrap();

        let kube_path = CertOption::Kube.cert_path(dir.path(), &idx("root"));
        std::fs::create_dir_all(kube_path.parent().unwrap()).unwrap();
        std::fs::write(&kube_path, fixtures::tls_cert("k8s")).unwrap();
        let err = store.get_key(&idx("root"), &[CertOption::Kube]).unwrap_err();
        assert!(matches!(err.root(), KeyStoreError::NotImplemented(_)), "{err}");

        let ssh_path = CertOption::Ssh.cert_path(dir.path(), &idx("root"));
        std::fs::create_dir_all(&ssh_path).unwrap();
        let err = store.get_key(&idx("root"), &[CertOption::Ssh]).unwrap_err();
        assert!(matches!(err.root(), KeyStoreError::NotImplemented(_)), "{err}");
    }

    #[test]
    fn traversal_names_roundtrip_inside_root() {
        let (dir, mut store) = store();
        let mut key = fixtures::key_material(&idx("root"), 1);
        key.db_certs.insert("../../etc/passwd".into(), fixtures::tls_cert("evil"));
        store.add_key(&key).unwrap();

        assert!(!dir.path().join("keys/etc").exists());
        let got = store.get_key(&idx("root"), &[CertOption::Db { name: None }]).unwrap();
        assert_eq!(got.db_certs, key.db_certs);
    }

    #[test]
    fn unsafe_index_is_rejected() {
        let (_dir, mut store) = store();
        let key = fixtures::key_material(&KeyIndex::new(PROXY, "../bob", "root"), 1);
        assert!(matches!(store.add_key(&key).unwrap_err(), KeyStoreError::UnsafeName(_)));
        assert!(matches!(
            store.delete_key(&KeyIndex::new("..", "alice", "")).unwrap_err(),
            KeyStoreError::UnsafeName(_)
        ));
    }

    #[test]
    fn delete_key_is_idempotent() {
        let (dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        store.add_key(&fixtures::key_material(&idx("leaf"), 1)).unwrap();
        store.delete_key(&idx("root")).unwrap();
        store.delete_key(&idx("root")).unwrap();

        assert!(store.get_key(&idx("leaf"), &[]).unwrap_err().is_not_found());
        let proxy_dir = keypaths::proxy_key_dir(dir.path(), PROXY);
        assert_eq!(std::fs::read_dir(proxy_dir).unwrap().count(), 0);
    }

    #[test]
    fn delete_user_certs_isolates_clusters() {
        let (_dir, mut store) = store();
        let c1 = fixtures::key_material(&idx("c1"), 1);
        let c2 = fixtures::key_material(&idx("c2"), 1);
        store.add_key(&c1).unwrap();
        store.add_key(&c2).unwrap();

        store.delete_user_certs(&idx("c1"), &[CertOption::Ssh]).unwrap();
        assert!(store.get_key(&idx("c1"), &[CertOption::Ssh]).unwrap().ssh_cert.is_none());
        assert_eq!(store.get_key(&idx("c2"), &[CertOption::Ssh]).unwrap().ssh_cert, c2.ssh_cert);
        // Other groups and the key itself survive.
        assert_eq!(store.get_key(&idx("c1"), &[CertOption::Kube]).unwrap().kube_certs, c1.kube_certs);
    }

    #[test]
    fn delete_user_certs_empty_cluster_covers_all() {
        let (_dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("c1"), 1)).unwrap();
        store.add_key(&fixtures::key_material(&idx("c2"), 1)).unwrap();
        store.delete_user_certs(&idx(""), &[CertOption::App { name: None }]).unwrap();
        for cluster in ["c1", "c2"] {
            let got = store.get_key(&idx(cluster), &ALL_CERTS).unwrap();
            assert!(got.app_certs.is_empty());
            assert!(!got.db_certs.is_empty());
        }
    }

    #[test]
    fn expired_ssh_cert_is_returned() {
        let (_dir, mut store) = store();
        let mut key = fixtures::key_material(&idx("root"), 1);
        key.ssh_cert = Some(fixtures::ssh_cert(&key.private_key, "alice", fixtures::EXPIRED));
        store.add_key(&key).unwrap();
        let got = store.get_key(&idx("root"), &[CertOption::Ssh]).unwrap();
        assert_eq!(got.ssh_cert, key.ssh_cert);
    }

    #[test]
    fn corrupt_ssh_cert_fails() {
        let (dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        std::fs::write(
            keypaths::ssh_cert_path(dir.path(), PROXY, "alice", "root"),
            b"ssh-ed25519-cert-v01@openssh.com AAAAgarbage",
        )
        .unwrap();
        assert!(store.get_key(&idx("root"), &[CertOption::Ssh]).unwrap_err().is_malformed());
    }

    #[test]
    fn get_key_carries_trusted_cas() {
        let (_dir, mut store) = store();
        let ca = fixtures::tls_cert("ca");
        store
            .save_trusted_certs(PROXY, &[TrustedCertBundle::new("root", vec![ca.clone()])])
            .unwrap();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        let got = store.get_key(&idx("root"), &[]).unwrap();
        assert_eq!(got.trusted_cas, vec![TrustedCertBundle::new("", vec![ca])]);
    }

    #[test]
    fn ssh_certificates_listed_in_order() {
        let (dir, mut store) = store();
        assert!(store.get_ssh_certificates(PROXY, "alice").unwrap_err().is_not_found());

        for cluster in ["zeta", "alpha"] {
            store.add_key(&fixtures::key_material(&idx(cluster), 1)).unwrap();
        }
        let certs = store.get_ssh_certificates(PROXY, "alice").unwrap();
        assert_eq!(certs.len(), 2);

        std::fs::write(
            keypaths::ssh_cert_path(dir.path(), PROXY, "alice", "broken"),
            b"nonsense",
        )
        .unwrap();
        assert!(store.get_ssh_certificates(PROXY, "alice").unwrap_err().is_malformed());
    }

    #[test]
    fn delete_keys_preserves_config() {
        let (dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        let key = fixtures::private_key(3).public_key();
        store.add_known_host_keys("h1", PROXY, &[key]).unwrap();
        let config_file = keypaths::config_dir(dir.path()).join(CONFIG_FILE);
        std::fs::create_dir_all(config_file.parent().unwrap()).unwrap();
        std::fs::write(&config_file, "write_aux_key_files = false\n").unwrap();

        store.delete_keys().unwrap();
        let left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, [keypaths::CONFIG_DIR]);
        assert!(config_file.exists());
    }

    #[test]
    fn open_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = keypaths::config_dir(dir.path()).join(CONFIG_FILE);
        std::fs::create_dir_all(config_file.parent().unwrap()).unwrap();
        std::fs::write(&config_file, "known_hosts_lock_timeout_ms = 10\n").unwrap();
        let store = FsKeyStore::open(dir.path()).unwrap();
        assert_eq!(store.non_session().config().known_hosts_lock_timeout_ms, 10);
    }

    struct PubCopyHook;

    impl KeyFileHook for PubCopyHook {
        fn path(&self, root: &Path, idx: &KeyIndex) -> PathBuf {
            keypaths::ppk_file_path(root, &idx.proxy_host, &idx.username)
        }

        fn render(&self, key: &KeyMaterial) -> Result<Option<Vec<u8>>> {
            Ok(Some(key.private_key.public_key_openssh()?.into_bytes()))
        }
    }

    #[test]
    fn hook_runs_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let ppk = keypaths::ppk_file_path(dir.path(), PROXY, "alice");
        let key = fixtures::key_material(&idx("root"), 1);

        let mut disabled = FsKeyStore::new(dir.path()).with_key_file_hook(PubCopyHook);
        disabled.add_key(&key).unwrap();
        assert!(!ppk.exists());

        let config = Config {
            write_aux_key_files: true,
            ..Config::default()
        };
        let mut enabled = FsKeyStore::with_config(dir.path(), config).with_key_file_hook(PubCopyHook);
        enabled.add_key(&key).unwrap();
        assert!(ppk.exists());
        enabled.delete_key(&idx("root")).unwrap();
        assert!(!ppk.exists());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, mut store) = store();
        store.add_key(&fixtures::key_material(&idx("root"), 1)).unwrap();
        let path = keypaths::user_key_path(dir.path(), PROXY, "alice");
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
