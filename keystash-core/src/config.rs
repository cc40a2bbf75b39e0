use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeyStoreError, Result};

/// Name of the config file inside `<root>/config/`.
pub const CONFIG_FILE: &str = "keystash.toml";

const PROFILE_DIR_NAME: &str = ".keystash";
const HOME_ENV: &str = "KEYSTASH_HOME";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Bound on waiting for the known-hosts lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub known_hosts_lock_timeout_ms: u64,
    /// Sleep between non-blocking lock attempts.
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
    /// Write auxiliary key files (e.g. `.ppk`) through the installed hook.
    #[serde(default)]
    pub write_aux_key_files: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            known_hosts_lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            write_aux_key_files: false,
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(KeyStoreError::from_io(
                    format!("read {}", path.display()),
                    e,
                ));
            }
        };
        toml::from_str(&text)
            .map_err(|e| KeyStoreError::malformed(format!("config {}", path.display()), e))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.known_hosts_lock_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms.max(1))
    }
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_lock_retry_interval_ms() -> u64 {
    25
}

/// Resolve the profile directory: `explicit` if given, else `$KEYSTASH_HOME`,
/// else `$HOME/.keystash`.
pub fn full_profile_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit
        && !path.as_os_str().is_empty()
    {
        return Ok(path.to_path_buf());
    }
    if let Some(home) = std::env::var_os(HOME_ENV)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    if let Some(home) = std::env::var_os("HOME")
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home).join(PROFILE_DIR_NAME));
    }
    Err(KeyStoreError::NotFound(format!(
        "profile directory: neither {HOME_ENV} nor HOME is set"
    )))
}
