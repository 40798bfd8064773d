//! Device identity for Photon.
//!
//! Two independent identities live here:
//!
//! - **Signing key**: a per-installation Ed25519 keypair used to sign frame
//!   metadata. Generated lazily, sealed in [`SecurePrefs`](crate::storage::SecurePrefs),
//!   cached in memory after first load.
//! - **Device certificate**: a keypair plus X.509 certificate presented as the
//!   client identity during mutual TLS. Produced by a [`HardwareKeyStore`]
//!   backend; absence degrades the transport to server-only TLS.
//!
//! ## Properties
//!
//! - Exactly one signing keypair per installation, never rotated here
//! - The private signing key never leaves [`SigningKeyPair`] except sealed at rest
//! - Concurrent first access generates one key, not two
//! - Certificate alias is fixed per installation

mod device_cert;
mod signing_keys;
mod software;

pub use device_cert::{
    DeviceCertificateIdentity, DeviceCertificateStore, DigestAlgorithm, HardwareKeyStore,
    KeyGenSpec, KeyPurpose, SignaturePadding, DEVICE_KEY_ALIAS,
};
pub use signing_keys::{SigningKeyPair, SigningKeyStore};
pub use software::SoftwareKeyStore;

use sha2::{Digest, Sha256};

/// Compute the SHA-256 fingerprint of a public key, hex encoded.
pub fn compute_fingerprint(public_key: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key))
}

/// Format a fingerprint for human-readable display.
///
/// Splits into groups of 4 characters for easier verbal comparison.
pub fn format_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}
