//! Cryptographic primitives for Photon.
//!
//! All cryptography uses well-audited primitives:
//!
//! - **Ed25519**: Metadata signatures
//! - **ChaCha20-Poly1305**: Encryption of key material at rest
//! - **PBKDF2-HMAC-SHA256**: Device storage key derivation
//! - **SHA-256**: Certificate pins and key fingerprints
//!
//! ## Forbidden
//!
//! - Custom cryptography
//! - Logging of secret material (see [`crate::logging`])

mod aead;
mod buffer;
mod signature;

pub use aead::{open, seal, NONCE_SIZE, TAG_SIZE};
pub use buffer::SecureBuffer;
pub use signature::{sign_payload, verify, SIGNATURE_SIZE};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Key size for ChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

/// PBKDF2 iterations for the device storage key.
pub const KEY_DERIVATION_ITERATIONS: u32 = 100_000;

/// Derive a 256-bit storage key using PBKDF2-HMAC-SHA256.
pub fn derive_storage_key(secret: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    use hmac::Hmac;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);

    // PBKDF2 only fails for output lengths beyond 2^32 - 1 blocks.
    if pbkdf2::pbkdf2::<Hmac<Sha256>>(secret, salt, KEY_DERIVATION_ITERATIONS, key.as_mut())
        .is_err()
    {
        tracing::error!("PBKDF2 rejected a 32-byte output length");
    }

    key
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Hex-encoded SHA-256 fingerprint, for out-of-band key comparison.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Constant-time comparison of byte slices.
///
/// Prevents timing attacks when comparing pins and keys.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
