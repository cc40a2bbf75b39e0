//! Deterministic keys and freshly minted certificates for tests.
//!
//! Compiled for this crate's tests and, through the `test-util` feature, for
//! the store crates' tests.  Panics on failure.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use ssh_key::certificate::{Builder, CertType};
use ssh_key::private::{Ed25519Keypair, KeypairData};

use crate::{KeyIndex, KeyMaterial, PrivateKey};

const CA_SEED: u8 = 0xca;

/// Certificate validity window, in seconds relative to now.
#[derive(Debug, Clone, Copy)]
pub struct Validity {
    pub from: i64,
    pub until: i64,
}

pub const VALID: Validity = Validity {
    from: -60,
    until: 3600,
};
pub const EXPIRED: Validity = Validity {
    from: -7200,
    until: -3600,
};
pub const NOT_YET_VALID: Validity = Validity {
    from: 3600,
    until: 7200,
};

/// An Ed25519 key derived from a repeated `seed` byte.
pub fn private_key(seed: u8) -> PrivateKey {
    let keypair = Ed25519Keypair::from_seed(&[seed; 32]);
    PrivateKey::new(ssh_key::PrivateKey::new(KeypairData::from(keypair), "").unwrap())
}

/// A self-signed PEM certificate for `name`.
pub fn tls_cert(name: &str) -> Vec<u8> {
    rcgen::generate_simple_self_signed(vec![name.to_string()])
        .unwrap()
        .cert
        .pem()
        .into_bytes()
}

/// An OpenSSH user certificate for `key`, signed by a fixed test CA.
pub fn ssh_cert(key: &PrivateKey, principal: &str, validity: Validity) -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let ca = private_key(CA_SEED);

    let mut builder = Builder::new(
        vec![0x42; 32],
        key.public_key().key_data().clone(),
        (now + validity.from) as u64,
        (now + validity.until) as u64,
    )
    .unwrap();
    builder.serial(1).unwrap();
    builder.key_id(format!("{principal}-test")).unwrap();
    builder.cert_type(CertType::User).unwrap();
    builder.valid_principal(principal).unwrap();
    let cert = builder.sign(ca.as_ssh_key()).unwrap();
    cert.to_openssh().unwrap().into_bytes()
}

/// Key material for `idx` with every certificate group populated.
pub fn key_material(idx: &KeyIndex, seed: u8) -> KeyMaterial {
    let private_key = private_key(seed);
    let mut key = KeyMaterial::new(idx.clone(), private_key);
    key.ssh_cert = Some(ssh_cert(&key.private_key, &idx.username, VALID));
    key.tls_cert = Some(tls_cert(&idx.username));
    key.kube_certs = BTreeMap::from([("k8s".to_string(), tls_cert("k8s"))]);
    key.db_certs = BTreeMap::from([("pg1".to_string(), tls_cert("pg1"))]);
    key.app_certs = BTreeMap::from([("grafana".to_string(), tls_cert("grafana"))]);
    key
}
