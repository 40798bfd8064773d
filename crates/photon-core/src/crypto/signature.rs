//! Ed25519 signatures over serialized metadata.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Sign `payload` and return the signature as standard base64.
pub fn sign_payload(key: &SigningKey, payload: &[u8]) -> String {
    let signature: Signature = key.sign(payload);
    STANDARD.encode(signature.to_bytes())
}

/// Verify a base64 signature produced by [`sign_payload`].
///
/// Returns `Ok(false)` for a well-formed signature that does not match, and
/// an error for malformed keys or signatures.
pub fn verify(public_key: &[u8], payload: &[u8], signature_b64: &str) -> Result<bool> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| Error::InvalidKey("public key must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::InvalidKey(format!("invalid public key: {}", e)))?;

    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|e| Error::Encoding(format!("signature is not base64: {}", e)))?;
    let sig_bytes: [u8; SIGNATURE_SIZE] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Encoding("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    Ok(verifying_key.verify(payload, &signature).is_ok())
}
