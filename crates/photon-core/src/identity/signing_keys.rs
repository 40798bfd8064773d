//! Ed25519 signing keypair and its sealed store.

use crate::crypto;
use crate::error::{Error, Result};
use crate::storage::SecurePrefs;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;
use zeroize::Zeroizing;

const KEY_PRIVATE: &str = "ed25519_priv";
const KEY_PUBLIC: &str = "ed25519_pub";

/// The installation's metadata signing keypair.
///
/// The secret half is zeroized on drop and only ever used inside [`sign`](Self::sign).
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from stored bytes, checking that both halves agree.
    fn from_parts(secret: &[u8], public: &[u8]) -> Result<Self> {
        let secret: Zeroizing<[u8; 32]> = Zeroizing::new(
            secret
                .try_into()
                .map_err(|_| Error::InvalidKey("stored private key has wrong length".into()))?,
        );
        let signing_key = SigningKey::from_bytes(&secret);

        if !crypto::constant_time_eq(signing_key.verifying_key().as_bytes(), public) {
            return Err(Error::InvalidKey("stored public key does not match".into()));
        }

        Ok(Self { signing_key })
    }

    /// Raw public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Verifying half of the pair.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign `payload`, returning a base64 signature.
    pub fn sign(&self, payload: &[u8]) -> String {
        crypto::sign_payload(&self.signing_key, payload)
    }

    fn secret_base64(&self) -> Zeroizing<String> {
        let secret = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(STANDARD.encode(secret.as_slice()))
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Owner of the single signing keypair for this installation.
///
/// The pair is loaded or generated on first use and cached. The cache lock is
/// held across generation so two concurrent first callers get the same key.
pub struct SigningKeyStore {
    prefs: Arc<SecurePrefs>,
    cached: Mutex<Option<Arc<SigningKeyPair>>>,
}

impl SigningKeyStore {
    /// Create a store backed by `prefs`.
    pub fn new(prefs: Arc<SecurePrefs>) -> Self {
        Self {
            prefs,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached pair, else the stored one, else a newly generated one.
    ///
    /// A new pair is persisted before it is returned. Any failure of the
    /// sealed store surfaces as [`Error::KeyStoreUnavailable`].
    pub fn get_or_create_key_pair(&self) -> Result<Arc<SigningKeyPair>> {
        let mut guard = self
            .cached
            .lock()
            .map_err(|_| Error::KeyStoreUnavailable("lock poisoned".into()))?;

        if let Some(pair) = guard.as_ref() {
            return Ok(Arc::clone(pair));
        }

        let pair = match self.load()? {
            Some(pair) => pair,
            None => {
                let pair = SigningKeyPair::generate();
                let public = STANDARD.encode(pair.public_key_bytes());
                let secret = pair.secret_base64();
                self.prefs
                    .put_all(&[(KEY_PRIVATE, secret.as_str()), (KEY_PUBLIC, public.as_str())])?;

                info!(
                    fingerprint = %crypto::fingerprint(&pair.public_key_bytes()),
                    "Generated new signing keypair"
                );
                pair
            }
        };

        let pair = Arc::new(pair);
        *guard = Some(Arc::clone(&pair));
        Ok(pair)
    }

    /// Public key of the installation's pair.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        Ok(self.get_or_create_key_pair()?.public_key_bytes())
    }

    /// Public key as standard base64.
    pub fn public_key_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(self.public_key_bytes()?))
    }

    /// Sign `payload` with the installation's pair.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        Ok(self.get_or_create_key_pair()?.sign(payload))
    }

    fn load(&self) -> Result<Option<SigningKeyPair>> {
        let (secret, public) = match (self.prefs.get(KEY_PRIVATE)?, self.prefs.get(KEY_PUBLIC)?) {
            (Some(secret), Some(public)) => (secret, public),
            _ => return Ok(None),
        };

        let secret = Zeroizing::new(
            STANDARD
                .decode(secret.as_bytes())
                .map_err(|_| Error::InvalidKey("stored private key is not base64".into()))?,
        );
        let public = STANDARD
            .decode(public.as_bytes())
            .map_err(|_| Error::InvalidKey("stored public key is not base64".into()))?;

        SigningKeyPair::from_parts(&secret, &public).map(Some)
    }
}
