//! Sealing of data at rest using ChaCha20-Poly1305.
//!
//! Sealed output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The associated data binds a blob to its purpose (for example the store
//! file name) so a sealed file cannot be swapped for another one.

use super::{random_bytes, KEY_SIZE};
use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use zeroize::Zeroizing;

/// Size of nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let nonce: [u8; NONCE_SIZE] = random_bytes();

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data produced by [`seal`].
///
/// Returns a generic error on failure to prevent oracle attacks.
pub fn open(
    key: &[u8; KEY_SIZE],
    sealed: &[u8],
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("ciphertext too short".into()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| Error::Crypto("decryption failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = [42u8; KEY_SIZE];
        let sealed = seal(&key, b"ed25519_priv=...", b"signing.prefs").expect("seal");
        assert_eq!(sealed.len(), NONCE_SIZE + 16 + TAG_SIZE);

        let opened = open(&key, &sealed, b"signing.prefs").expect("open");
        assert_eq!(&*opened, b"ed25519_priv=...");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&[1u8; KEY_SIZE], b"secret", b"").expect("seal");
        assert!(open(&[2u8; KEY_SIZE], &sealed, b"").is_err());
    }

    #[test]
    fn test_swapped_file_fails() {
        let key = [7u8; KEY_SIZE];
        let sealed = seal(&key, b"secret", b"signing.prefs").expect("seal");
        assert!(open(&key, &sealed, b"device_cert.prefs").is_err());
    }

    #[test]
    fn test_tampered_and_truncated_fail() {
        let key = [9u8; KEY_SIZE];
        let mut sealed = seal(&key, b"secret", b"").expect("seal");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(&key, &sealed, b"").is_err());
        assert!(open(&key, &sealed[..NONCE_SIZE], b"").is_err());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = [3u8; KEY_SIZE];
        let a = seal(&key, b"same", b"").expect("seal");
        let b = seal(&key, b"same", b"").expect("seal");
        assert_ne!(a, b);
    }
}
