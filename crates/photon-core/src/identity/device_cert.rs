//! Device certificate identity for mutual TLS.

use crate::error::Result;
use rustls::pki_types::CertificateDer;
use rustls::sign::{CertifiedKey, SigningKey};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Fixed alias of the mTLS key for this installation.
pub const DEVICE_KEY_ALIAS: &str = "photon_mtls_key";

/// What the generated key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Produce signatures (TLS client authentication).
    Sign,
    /// Decrypt or agree on keys.
    Decrypt,
}

/// Digests the key must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

/// Signature padding requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePadding {
    /// PKCS#1 v1.5 class padding. Backends with elliptic-curve keys ignore it.
    Pkcs1,
}

/// Parameters for generating the device key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenSpec {
    /// Allowed key purposes.
    pub purposes: Vec<KeyPurpose>,
    /// Supported digests.
    pub digests: Vec<DigestAlgorithm>,
    /// Signature padding.
    pub padding: SignaturePadding,
    /// Minimum strength, in RSA-equivalent bits.
    pub strength_bits: u32,
}

impl KeyGenSpec {
    /// Key parameters for the mTLS identity: sign and decrypt, SHA-256/512,
    /// PKCS#1 padding, 2048-bit equivalent.
    pub fn mtls_default() -> Self {
        Self {
            purposes: vec![KeyPurpose::Sign, KeyPurpose::Decrypt],
            digests: vec![DigestAlgorithm::Sha256, DigestAlgorithm::Sha512],
            padding: SignaturePadding::Pkcs1,
            strength_bits: 2048,
        }
    }
}

/// A client certificate and the opaque key that signs for it.
///
/// The private key is never exported; TLS only sees it through
/// [`rustls::sign::SigningKey`].
#[derive(Clone)]
pub struct DeviceCertificateIdentity {
    certificate_der: Vec<u8>,
    signing_key: Arc<dyn SigningKey>,
}

impl DeviceCertificateIdentity {
    /// Pair a DER certificate with its signing key.
    pub fn new(certificate_der: Vec<u8>, signing_key: Arc<dyn SigningKey>) -> Self {
        Self {
            certificate_der,
            signing_key,
        }
    }

    /// DER-encoded certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Certificate chain plus key, in the shape rustls presents.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::new(CertifiedKey::new(
            vec![CertificateDer::from(self.certificate_der.clone())],
            Arc::clone(&self.signing_key),
        ))
    }
}

impl fmt::Debug for DeviceCertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCertificateIdentity")
            .field("certificate", &crate::crypto::fingerprint(&self.certificate_der))
            .field("algorithm", &self.signing_key.algorithm())
            .finish()
    }
}

/// Platform secure-key facility.
///
/// Implementations keep the private key non-exportable where the platform
/// allows it. Generating for an alias that already exists returns the
/// existing identity.
pub trait HardwareKeyStore: Send + Sync {
    /// Load the identity for `alias`, generating it per `spec` if absent.
    fn generate_if_absent(&self, alias: &str, spec: &KeyGenSpec) -> Result<DeviceCertificateIdentity>;
}

/// Lazily produces the device's mTLS identity.
pub struct DeviceCertificateStore {
    backend: Arc<dyn HardwareKeyStore>,
    alias: String,
    spec: KeyGenSpec,
    cached: Mutex<Option<DeviceCertificateIdentity>>,
}

impl DeviceCertificateStore {
    /// Create a store for the fixed installation alias.
    pub fn new(backend: Arc<dyn HardwareKeyStore>) -> Self {
        Self {
            backend,
            alias: DEVICE_KEY_ALIAS.to_string(),
            spec: KeyGenSpec::mtls_default(),
            cached: Mutex::new(None),
        }
    }

    /// The identity, or `None` when the backend cannot produce one.
    ///
    /// Failures are logged, not returned; callers fall back to server-only TLS.
    pub fn get_identity(&self) -> Option<DeviceCertificateIdentity> {
        let mut guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Device certificate cache poisoned");
                return None;
            }
        };

        if let Some(identity) = guard.as_ref() {
            return Some(identity.clone());
        }

        match self.backend.generate_if_absent(&self.alias, &self.spec) {
            Ok(identity) => {
                debug!(alias = %self.alias, "Device certificate ready");
                *guard = Some(identity.clone());
                Some(identity)
            }
            Err(e) => {
                warn!(alias = %self.alias, error = %e, "Device certificate unavailable");
                None
            }
        }
    }
}
