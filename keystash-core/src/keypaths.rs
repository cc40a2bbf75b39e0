//! On-disk layout of a profile directory.
//!
//! ```text
//! <root>/
//!   keys/<proxy>/
//!     <user>                               private key (0600)
//!     <user>.pub                           public key
//!     <user>-x509.pem                      TLS certificate
//!     <user>.ppk                           auxiliary key file (optional)
//!     certs.pem                            legacy concatenated CA bundle
//!     cas/<cluster>.pem                    per-cluster CA bundle
//!     <user>-ssh/<cluster>-cert.pub        SSH certificates
//!     <user>-kube/<cluster>/<kube>-x509.pem
//!     <user>-db/<cluster>/<db>-x509.pem
//!     <user>-app/<cluster>/<app>-x509.pem
//!   known_hosts
//!   current-profile
//!   <profile>.toml
//!   config/                                preserved by a full wipe
//! ```
//!
//! Every function here is pure.  Proxy, user and cluster components must be
//! validated by the caller; protocol-specific names (kube/db/app) are escaped
//! into a single segment here via [`crate::naming::escape_segment`].

use std::path::{Path, PathBuf};

use crate::naming::escape_segment;

pub const KEYS_DIR: &str = "keys";
pub const CONFIG_DIR: &str = "config";
pub const KNOWN_HOSTS: &str = "known_hosts";
pub const CURRENT_PROFILE: &str = "current-profile";
pub const PROFILE_EXT: &str = "toml";
pub const CAS_DIR: &str = "cas";
pub const LEGACY_CAS_FILE: &str = "certs.pem";

const FILE_EXT_PUB: &str = ".pub";
const FILE_EXT_PPK: &str = ".ppk";
const FILE_EXT_PEM: &str = ".pem";
const FILE_EXT_TLS_CERT: &str = "-x509.pem";
pub const FILE_EXT_SSH_CERT: &str = "-cert.pub";
const SSH_DIR_SUFFIX: &str = "-ssh";
const KUBE_DIR_SUFFIX: &str = "-kube";
const DB_DIR_SUFFIX: &str = "-db";
const APP_DIR_SUFFIX: &str = "-app";

/// `<root>/keys`
pub fn keys_dir(root: &Path) -> PathBuf {
    root.join(KEYS_DIR)
}

/// `<root>/keys/<proxy>`
pub fn proxy_key_dir(root: &Path, proxy: &str) -> PathBuf {
    keys_dir(root).join(proxy)
}

/// `<root>/keys/<proxy>/<user>`
pub fn user_key_path(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(user)
}

/// `<root>/keys/<proxy>/<user>.pub`
pub fn public_key_path(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{FILE_EXT_PUB}"))
}

/// `<root>/keys/<proxy>/<user>-x509.pem`
pub fn tls_cert_path(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{FILE_EXT_TLS_CERT}"))
}

/// `<root>/keys/<proxy>/<user>.ppk`
pub fn ppk_file_path(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{FILE_EXT_PPK}"))
}

/// `<root>/keys/<proxy>/certs.pem`
pub fn tls_cas_path(root: &Path, proxy: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(LEGACY_CAS_FILE)
}

/// `<root>/keys/<proxy>/cas`
pub fn cas_dir(root: &Path, proxy: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(CAS_DIR)
}

/// `<root>/keys/<proxy>/cas/<cluster>.pem`
pub fn tls_cas_path_cluster(root: &Path, proxy: &str, cluster: &str) -> PathBuf {
    cas_dir(root, proxy).join(format!("{cluster}{FILE_EXT_PEM}"))
}

/// `<root>/keys/<proxy>/<user>-ssh`
pub fn ssh_dir(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{SSH_DIR_SUFFIX}"))
}

/// `<root>/keys/<proxy>/<user>-ssh/<cluster>-cert.pub`
pub fn ssh_cert_path(root: &Path, proxy: &str, user: &str, cluster: &str) -> PathBuf {
    ssh_dir(root, proxy, user).join(format!("{cluster}{FILE_EXT_SSH_CERT}"))
}

/// `<root>/keys/<proxy>/<user>-kube`
pub fn kube_dir(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{KUBE_DIR_SUFFIX}"))
}

/// `<root>/keys/<proxy>/<user>-kube/<cluster>`
pub fn kube_cert_dir(root: &Path, proxy: &str, user: &str, cluster: &str) -> PathBuf {
    kube_dir(root, proxy, user).join(cluster)
}

/// `<root>/keys/<proxy>/<user>-kube/<cluster>/<kube>-x509.pem`
pub fn kube_cert_path(root: &Path, proxy: &str, user: &str, cluster: &str, kube: &str) -> PathBuf {
    kube_cert_dir(root, proxy, user, cluster).join(tls_cert_file_name(kube))
}

/// `<root>/keys/<proxy>/<user>-db`
pub fn database_dir(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{DB_DIR_SUFFIX}"))
}

/// `<root>/keys/<proxy>/<user>-db/<cluster>`
pub fn database_cert_dir(root: &Path, proxy: &str, user: &str, cluster: &str) -> PathBuf {
    database_dir(root, proxy, user).join(cluster)
}

/// `<root>/keys/<proxy>/<user>-db/<cluster>/<db>-x509.pem`
pub fn database_cert_path(
    root: &Path,
    proxy: &str,
    user: &str,
    cluster: &str,
    db: &str,
) -> PathBuf {
    database_cert_dir(root, proxy, user, cluster).join(tls_cert_file_name(db))
}

/// `<root>/keys/<proxy>/<user>-app`
pub fn app_dir(root: &Path, proxy: &str, user: &str) -> PathBuf {
    proxy_key_dir(root, proxy).join(format!("{user}{APP_DIR_SUFFIX}"))
}

/// `<root>/keys/<proxy>/<user>-app/<cluster>`
pub fn app_cert_dir(root: &Path, proxy: &str, user: &str, cluster: &str) -> PathBuf {
    app_dir(root, proxy, user).join(cluster)
}

/// `<root>/keys/<proxy>/<user>-app/<cluster>/<app>-x509.pem`
pub fn app_cert_path(root: &Path, proxy: &str, user: &str, cluster: &str, app: &str) -> PathBuf {
    app_cert_dir(root, proxy, user, cluster).join(tls_cert_file_name(app))
}

/// `<root>/known_hosts`
pub fn known_hosts_path(root: &Path) -> PathBuf {
    root.join(KNOWN_HOSTS)
}

/// `<root>/current-profile`
pub fn current_profile_path(root: &Path) -> PathBuf {
    root.join(CURRENT_PROFILE)
}

/// `<root>/<name>.toml`
pub fn profile_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.{PROFILE_EXT}"))
}

/// `<root>/config`
pub fn config_dir(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR)
}

fn tls_cert_file_name(name: &str) -> String {
    format!("{}{FILE_EXT_TLS_CERT}", escape_segment(name))
}

/// Strip a certificate file suffix (`-x509.pem` or `-cert.pub`).
///
/// Returns `None` when the file name carries neither suffix, i.e. it is not
/// a certificate this layout produced.
pub fn trim_cert_path_suffix(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(FILE_EXT_TLS_CERT)
        .or_else(|| file_name.strip_suffix(FILE_EXT_SSH_CERT))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/home/alice/.keystash";

    #[test]
    fn base_key_files() {
        let root = Path::new(ROOT);
        assert_eq!(
            user_key_path(root, "px.example.com", "alice"),
            Path::new("/home/alice/.keystash/keys/px.example.com/alice")
        );
        assert_eq!(
            public_key_path(root, "px.example.com", "alice"),
            Path::new("/home/alice/.keystash/keys/px.example.com/alice.pub")
        );
        assert_eq!(
            tls_cert_path(root, "px.example.com", "alice"),
            Path::new("/home/alice/.keystash/keys/px.example.com/alice-x509.pem")
        );
    }

    #[test]
    fn per_cluster_cert_files() {
        let root = Path::new(ROOT);
        assert_eq!(
            ssh_cert_path(root, "px", "alice", "root"),
            Path::new("/home/alice/.keystash/keys/px/alice-ssh/root-cert.pub")
        );
        assert_eq!(
            kube_cert_path(root, "px", "alice", "root", "k8s"),
            Path::new("/home/alice/.keystash/keys/px/alice-kube/root/k8s-x509.pem")
        );
        assert_eq!(
            database_cert_path(root, "px", "alice", "root", "pg1"),
            Path::new("/home/alice/.keystash/keys/px/alice-db/root/pg1-x509.pem")
        );
        assert_eq!(
            app_cert_path(root, "px", "alice", "root", "grafana"),
            Path::new("/home/alice/.keystash/keys/px/alice-app/root/grafana-x509.pem")
        );
    }

    #[test]
    fn traversal_names_stay_inside_cert_dir() {
        let root = Path::new(ROOT);
        let dir = database_cert_dir(root, "px", "alice", "root");
        let path = database_cert_path(root, "px", "alice", "root", "../../etc/passwd");
        assert_eq!(path.parent(), Some(dir.as_path()));
        assert!(path.starts_with(root));
        assert!(
            path.components()
                .all(|c| c != std::path::Component::ParentDir)
        );
    }

    #[test]
    fn distinct_names_map_to_distinct_paths() {
        let root = Path::new(ROOT);
        let a = kube_cert_path(root, "px", "alice", "root", "a/b");
        let b = kube_cert_path(root, "px", "alice", "root", "a_b");
        let c = kube_cert_path(root, "px", "alice", "root", "a%2Fb");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, kube_cert_path(root, "px", "alice", "root", "a/b"));
    }

    #[test]
    fn trims_known_suffixes_only() {
        assert_eq!(trim_cert_path_suffix("pg1-x509.pem"), Some("pg1"));
        assert_eq!(trim_cert_path_suffix("root-cert.pub"), Some("root"));
        assert_eq!(trim_cert_path_suffix("notes.txt"), None);
    }

    #[test]
    fn shared_files() {
        let root = Path::new(ROOT);
        assert_eq!(
            known_hosts_path(root),
            Path::new("/home/alice/.keystash/known_hosts")
        );
        assert_eq!(
            tls_cas_path_cluster(root, "px", "leaf"),
            Path::new("/home/alice/.keystash/keys/px/cas/leaf.pem")
        );
        assert_eq!(
            tls_cas_path(root, "px"),
            Path::new("/home/alice/.keystash/keys/px/certs.pem")
        );
    }
}
