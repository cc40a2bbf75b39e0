//! OpenSSH-compatible known-hosts content.
//!
//! Entries written here have the form
//!
//! ```text
//! @cert-authority <proxy>,<host>,*.<host> <alg> <base64> type=host
//! ```
//!
//! so OpenSSH clients match the CA through the proxy name, the cluster name,
//! or any node under it.  The functions in this module are pure; locking and
//! persistence are the store's business.

use std::collections::HashSet;

use ssh_key::{HashAlg, PublicKey};
use tracing::debug;
use wildmatch::WildMatch;

use crate::error::{KeyStoreError, Result};

const CERT_AUTHORITY: &str = "@cert-authority";

/// One parsed known-hosts line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<'a> {
    /// `@cert-authority`, `@revoked`, or `None` for a plain host key.
    pub marker: Option<&'a str>,
    pub hosts: Vec<&'a str>,
    /// `<alg> <base64>` with single-space separation.
    pub key_text: String,
    pub comment: Option<&'a str>,
}

impl Entry<'_> {
    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_openssh(&self.key_text)
            .map_err(|e| KeyStoreError::malformed("known_hosts key", e))
    }

    /// Whether `hostname` matches this entry's host patterns.
    ///
    /// Any matching negated pattern (`!pattern`) excludes the host outright.
    pub fn matches(&self, hostname: &str) -> bool {
        let hostname = hostname.to_ascii_lowercase();
        let mut matched = false;
        for pattern in &self.hosts {
            let (negated, pattern) = match pattern.strip_prefix('!') {
                Some(p) => (true, p),
                None => (false, *pattern),
            };
            if !WildMatch::new(&pattern.to_ascii_lowercase()).matches(&hostname) {
                continue;
            }
            if negated {
                return false;
            }
            matched = true;
        }
        matched
    }
}

/// Parse a single non-blank, non-comment line.
pub fn parse_line(line: &str) -> Result<Entry<'_>> {
    let mut fields = line.split_whitespace().peekable();
    let marker = match fields.peek() {
        Some(f) if f.starts_with('@') => fields.next(),
        _ => None,
    };
    let (Some(hosts), Some(alg), Some(b64)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(KeyStoreError::malformed(
            "known_hosts line",
            format!("too few fields in {line:?}"),
        ));
    };
    // `b64` borrows from `line`, so its end offset locates the comment.
    let key_end = b64.as_ptr() as usize - line.as_ptr() as usize + b64.len();
    let comment = Some(line[key_end..].trim()).filter(|c| !c.is_empty());
    Ok(Entry {
        marker,
        hosts: hosts.split(',').collect(),
        key_text: format!("{alg} {b64}"),
        comment,
    })
}

fn entries(content: &str) -> impl Iterator<Item = Result<Entry<'_>>> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(parse_line)
}

/// Render the line recording `key` as a host CA for `hostname` via `proxy_host`.
pub fn format_line(proxy_host: &str, hostname: &str, key: &PublicKey) -> Result<String> {
    let key_text = PublicKey::new(key.key_data().clone(), "")
        .to_openssh()
        .map_err(|e| KeyStoreError::malformed("host key", e))?;
    Ok(format!(
        "{CERT_AUTHORITY} {proxy_host},{hostname},*.{hostname} {key_text} type=host"
    ))
}

/// Merge `keys` into `existing` known-hosts content.
///
/// Existing lines are deduplicated by exact match, new lines are appended
/// unless already present, and single-host CA lines superseded by a
/// multi-host line for the same key are pruned.  The result always ends in
/// a newline.
pub fn merge(existing: &[u8], proxy_host: &str, hostname: &str, keys: &[PublicKey]) -> Result<Vec<u8>> {
    let existing = std::str::from_utf8(existing)
        .map_err(|e| KeyStoreError::malformed("known_hosts file", e))?;

    let mut seen = HashSet::new();
    let mut lines: Vec<String> = Vec::new();
    for line in existing.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        if seen.insert(line.to_string()) {
            lines.push(line.to_string());
        }
    }

    for key in keys {
        debug!(
            host = hostname,
            proxy = proxy_host,
            fingerprint = %key.fingerprint(HashAlg::Sha256),
            "adding known host"
        );
        let line = format_line(proxy_host, hostname, key)?;
        if seen.insert(line.clone()) {
            lines.push(line);
        }
    }

    let lines = prune_superseded(lines);

    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in &lines {
        out.push_str(line);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Drop `@cert-authority <host> <key>` lines when another CA line with the
/// same key lists `<host>` among several patterns.
fn prune_superseded(lines: Vec<String>) -> Vec<String> {
    let mut covered: HashSet<(String, String)> = HashSet::new();
    for line in &lines {
        if let Ok(entry) = parse_line(line)
            && entry.marker == Some(CERT_AUTHORITY)
            && entry.hosts.len() > 1
        {
            for host in &entry.hosts {
                covered.insert((host.to_string(), entry.key_text.clone()));
            }
        }
    }

    lines
        .into_iter()
        .filter(|line| {
            let Ok(entry) = parse_line(line) else {
                return true;
            };
            let superseded = entry.marker == Some(CERT_AUTHORITY)
                && entry.hosts.len() == 1
                && covered.contains(&(entry.hosts[0].to_string(), entry.key_text.clone()));
            if superseded {
                debug!(host = entry.hosts[0], "pruning superseded known host line");
            }
            !superseded
        })
        .collect()
}

/// Public keys whose host patterns match `hostname`; an empty hostname
/// returns every key.  Hashed (`|1|`) entries never match by name.
pub fn host_keys(content: &[u8], hostname: &str) -> Result<Vec<PublicKey>> {
    let content = std::str::from_utf8(content)
        .map_err(|e| KeyStoreError::malformed("known_hosts file", e))?;
    let mut keys = Vec::new();
    for entry in entries(content) {
        let entry = entry?;
        if entry.marker == Some("@revoked") {
            continue;
        }
        if hostname.is_empty() || entry.matches(hostname) {
            keys.push(entry.public_key()?);
        }
    }
    Ok(keys)
}
