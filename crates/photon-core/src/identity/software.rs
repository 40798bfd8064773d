//! Software fallback for the hardware key store.
//!
//! Generates an ECDSA key and a self-signed client certificate and keeps
//! both sealed in a [`SecurePrefs`] file. P-256 stands in for 2048-bit
//! strength requests, P-384 for anything stronger.

use super::device_cert::{DeviceCertificateIdentity, HardwareKeyStore, KeyGenSpec, KeyPurpose};
use crate::error::{Error, Result};
use crate::storage::SecurePrefs;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::{Arc, Mutex};
use tracing::info;
use zeroize::Zeroizing;

/// [`HardwareKeyStore`] backed by a sealed preferences file.
pub struct SoftwareKeyStore {
    prefs: Arc<SecurePrefs>,
    generate_lock: Mutex<()>,
}

impl SoftwareKeyStore {
    /// Create a backend storing identities in `prefs`.
    pub fn new(prefs: Arc<SecurePrefs>) -> Self {
        Self {
            prefs,
            generate_lock: Mutex::new(()),
        }
    }

    fn load(&self, alias: &str) -> Result<Option<DeviceCertificateIdentity>> {
        let key = self.prefs.get(&key_entry(alias))?;
        let cert = self.prefs.get(&cert_entry(alias))?;
        let (key, cert) = match (key, cert) {
            (Some(key), Some(cert)) => (key, cert),
            _ => return Ok(None),
        };

        let pkcs8 = Zeroizing::new(
            STANDARD
                .decode(key.as_bytes())
                .map_err(|_| Error::InvalidKey("stored device key is not base64".into()))?,
        );
        let cert = STANDARD
            .decode(cert.as_bytes())
            .map_err(|_| Error::InvalidKey("stored device certificate is not base64".into()))?;

        identity_from_parts(&pkcs8, cert).map(Some)
    }

    fn generate(&self, alias: &str, spec: &KeyGenSpec) -> Result<DeviceCertificateIdentity> {
        let algorithm = if spec.strength_bits > 3072 {
            &rcgen::PKCS_ECDSA_P384_SHA384
        } else {
            &rcgen::PKCS_ECDSA_P256_SHA256
        };

        let key_pair = KeyPair::generate_for(algorithm).map_err(cert_error)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(cert_error)?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, alias.to_string());
        name.push(DnType::OrganizationName, "Photon Device".to_string());
        params.distinguished_name = name;
        params.key_usages = spec
            .purposes
            .iter()
            .map(|purpose| match purpose {
                KeyPurpose::Sign => KeyUsagePurpose::DigitalSignature,
                KeyPurpose::Decrypt => KeyUsagePurpose::KeyAgreement,
            })
            .collect();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let certificate = params.self_signed(&key_pair).map_err(cert_error)?;
        let cert_der = certificate.der().to_vec();
        let pkcs8 = Zeroizing::new(key_pair.serialize_der());

        let key_b64 = Zeroizing::new(STANDARD.encode(pkcs8.as_slice()));
        let cert_b64 = STANDARD.encode(&cert_der);
        self.prefs.put_all(&[
            (key_entry(alias).as_str(), key_b64.as_str()),
            (cert_entry(alias).as_str(), cert_b64.as_str()),
        ])?;

        info!(
            alias,
            fingerprint = %crate::crypto::fingerprint(&cert_der),
            "Generated device certificate"
        );

        identity_from_parts(&pkcs8, cert_der)
    }
}

impl HardwareKeyStore for SoftwareKeyStore {
    fn generate_if_absent(&self, alias: &str, spec: &KeyGenSpec) -> Result<DeviceCertificateIdentity> {
        let _guard = self
            .generate_lock
            .lock()
            .map_err(|_| Error::CertificateUnavailable("lock poisoned".into()))?;

        match self.load(alias)? {
            Some(identity) => Ok(identity),
            None => self.generate(alias, spec),
        }
    }
}

fn identity_from_parts(pkcs8: &[u8], cert_der: Vec<u8>) -> Result<DeviceCertificateIdentity> {
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8.to_vec()));
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)
        .map_err(|e| Error::CertificateUnavailable(format!("unusable device key: {}", e)))?;

    Ok(DeviceCertificateIdentity::new(cert_der, signing_key))
}

fn key_entry(alias: &str) -> String {
    format!("{}.pkcs8", alias)
}

fn cert_entry(alias: &str) -> String {
    format!("{}.cert", alias)
}

fn cert_error(e: rcgen::Error) -> Error {
    Error::CertificateUnavailable(e.to_string())
}
