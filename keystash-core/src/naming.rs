//! Path-segment escaping for names that end up in file paths.
//!
//! Kubernetes cluster, database and application names come from the broker
//! and are not under our control.  Before one is joined onto a directory it is
//! folded into a single, reversible path segment so that a crafted name such
//! as `../../etc/passwd` cannot climb out of the profile directory.
//!
//! The escaping is percent-style and injective: two different names never
//! escape to the same segment, and [`unescape_segment`] recovers the original
//! name exactly, so certificates read back from disk keep the names they were
//! stored under.

/// Escape `name` into a single safe path segment.
///
/// Rules:
/// - `%` → `%25` (so escaped output is unambiguous)
/// - `/` → `%2F`, `\` → `%5C`, NUL → `%00`
/// - A segment that is exactly `.` or `..` has every dot escaped (`%2E`)
///
/// Empty names escape to the empty string; callers reject them first.
///
/// # Examples
/// ```
/// # use keystash_core::naming::escape_segment;
/// assert_eq!(escape_segment("pg-main"), "pg-main");
/// assert_eq!(escape_segment("../../etc/passwd"), "..%2F..%2Fetc%2Fpasswd");
/// assert_eq!(escape_segment(".."), "%2E%2E");
/// ```
pub fn escape_segment(name: &str) -> String {
    if name == "." || name == ".." {
        return "%2E".repeat(name.len());
    }
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '\0' => out.push_str("%00"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_segment`].
///
/// Unknown or truncated escapes are kept verbatim; such names can only come
/// from files we did not write ourselves.
pub fn unescape_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(b) = decode_hex_pair(bytes[i + 1], bytes[i + 2])
        {
            out.push(b);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn decode_hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// True if `name` may be used verbatim as a path component.
///
/// Used for proxy hosts, usernames and cluster names, which form directory
/// and file names directly.  Rejects empty names, `..` anywhere in the name,
/// path separators and NUL bytes.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}

/// Cluster-name check used when persisting CA bundles.
///
/// Nested names (`a/b`) are allowed and land in a subdirectory of `cas/`;
/// `..`, absolute names and NUL bytes are not.
pub fn is_safe_cluster_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.starts_with(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_are_untouched() {
        assert_eq!(escape_segment("postgres"), "postgres");
        assert_eq!(escape_segment("my.app-1"), "my.app-1");
    }

    #[test]
    fn traversal_is_flattened_into_one_segment() {
        let escaped = escape_segment("../../etc/passwd");
        assert!(!escaped.contains('/'));
        assert_eq!(escaped, "..%2F..%2Fetc%2Fpasswd");
    }

    #[test]
    fn dot_segments_are_escaped() {
        assert_eq!(escape_segment("."), "%2E");
        assert_eq!(escape_segment(".."), "%2E%2E");
        assert_eq!(escape_segment("..."), "...");
    }

    #[test]
    fn escaping_is_reversible() {
        for name in ["a/b", "a%2Fb", "..", "c:\\win", "x\0y", "100%", "plain"] {
            assert_eq!(unescape_segment(&escape_segment(name)), name, "{name:?}");
        }
    }

    #[test]
    fn escaping_is_injective_for_lookalikes() {
        assert_ne!(escape_segment("a/b"), escape_segment("a%2Fb"));
        assert_ne!(escape_segment("a/b"), escape_segment("a_b"));
    }

    #[test]
    fn component_safety() {
        assert!(is_safe_component("proxy.example.com"));
        assert!(is_safe_component("alice@corp"));
        assert!(!is_safe_component(""));
        assert!(!is_safe_component("../evil"));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component("a\\b"));
    }

    #[test]
    fn cluster_name_safety() {
        assert!(is_safe_cluster_name("root"));
        assert!(is_safe_cluster_name("leaf/sub"));
        assert!(!is_safe_cluster_name("../evil"));
        assert!(!is_safe_cluster_name("/etc/evil"));
        assert!(!is_safe_cluster_name(""));
    }
}
