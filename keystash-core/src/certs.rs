//! Certificate parsing and validity checks.
//!
//! Only structure and signatures are hard failures.  An expired certificate
//! still parses and is returned to the caller, who decides whether to log in
//! again.

use std::time::{SystemTime, UNIX_EPOCH};

use ssh_key::{Certificate, HashAlg};
use tracing::debug;
use x509_parser::time::ASN1Time;

use crate::error::{KeyStoreError, Result};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parse an OpenSSH-format certificate (`<alg>-cert-v01@openssh.com <b64> ...`).
pub fn parse_ssh_cert(bytes: &[u8]) -> Result<Certificate> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| KeyStoreError::malformed("SSH certificate", e))?;
    Certificate::from_openssh(text.trim())
        .map_err(|e| KeyStoreError::malformed("SSH certificate", e))
}

/// Parse and validate an SSH certificate.
///
/// Checks that it names at least one principal, that the CA signature
/// verifies, and that it is already valid.  A certificate past its
/// `valid_before` is accepted and logged.
pub fn check_ssh_cert(bytes: &[u8]) -> Result<Certificate> {
    let cert = parse_ssh_cert(bytes)?;

    if cert.valid_principals().is_empty() {
        return Err(KeyStoreError::malformed(
            "SSH certificate",
            "certificate is not valid for any principals",
        ));
    }

    if cert.valid_after() >= cert.valid_before() {
        return Err(KeyStoreError::malformed(
            "SSH certificate",
            "empty validity window",
        ));
    }

    // Validating at `valid_after` against the certificate's own signing key
    // checks the signature alone; the time window is checked below.
    let ca_fingerprint = cert.signature_key().fingerprint(HashAlg::Sha256);
    cert.validate_at(cert.valid_after(), [&ca_fingerprint])
        .map_err(|e| KeyStoreError::malformed("SSH certificate", e))?;

    let now = now_unix();
    if now < cert.valid_after() {
        return Err(KeyStoreError::malformed(
            "SSH certificate",
            "certificate is not yet valid",
        ));
    }
    if now >= cert.valid_before() {
        debug!(
            key_id = %cert.key_id(),
            valid_before = cert.valid_before(),
            "returning expired SSH certificate"
        );
    }

    Ok(cert)
}

/// Parse a PEM-encoded X.509 certificate and return its `notAfter` time.
pub fn tls_cert_not_after(pem_bytes: &[u8]) -> Result<ASN1Time> {
    let block = ::pem::parse(pem_bytes).map_err(|e| KeyStoreError::malformed("TLS certificate", e))?;
    if block.tag() != "CERTIFICATE" {
        return Err(KeyStoreError::malformed(
            "TLS certificate",
            format!("unexpected PEM block type {:?}", block.tag()),
        ));
    }
    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| KeyStoreError::malformed("TLS certificate", e))?;
    Ok(cert.validity().not_after)
}

/// Validate a PEM-encoded X.509 certificate, logging its expiry.
pub fn check_tls_cert(what: &str, pem_bytes: &[u8]) -> Result<()> {
    let not_after = tls_cert_not_after(pem_bytes).map_err(|e| e.with_context(what.to_string()))?;
    debug!(cert = what, valid_until = %not_after, "loaded TLS certificate");
    Ok(())
}
