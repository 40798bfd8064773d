//! Public-key pinning on top of WebPKI validation.
//!
//! A pin is the SHA-256 of the leaf certificate's SubjectPublicKeyInfo,
//! keyed by host. Chain validation always runs first; the pin is an extra
//! check, never a replacement.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Prefix used by pins written in the `sha256/<base64>` form.
const PIN_PREFIX: &str = "sha256/";

/// A `(host, SPKI SHA-256)` pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePin {
    host: String,
    digest: [u8; 32],
}

impl CertificatePin {
    /// Parse a pin for `host`.
    ///
    /// `pin` may be base64 (optionally prefixed `sha256/`) or 64 hex
    /// characters. `host` may start with `*.` to match one extra label.
    pub fn new(host: &str, pin: &str) -> Result<Self> {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return Err(Error::ConfigurationMissing("pinned host".into()));
        }

        let pin = pin.trim();
        let pin = pin.strip_prefix(PIN_PREFIX).unwrap_or(pin);
        let decoded = if pin.len() == 64 && pin.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(pin).ok()
        } else {
            STANDARD.decode(pin).ok()
        };

        let digest: [u8; 32] = decoded
            .and_then(|d| d.try_into().ok())
            .ok_or_else(|| Error::InvalidKey("certificate pin must be a SHA-256 digest".into()))?;

        Ok(Self { host, digest })
    }

    /// Host pattern this pin applies to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Pin in `sha256/<base64>` form.
    pub fn to_pin_string(&self) -> String {
        format!("{}{}", PIN_PREFIX, STANDARD.encode(self.digest))
    }

    /// Whether this pin applies to `hostname`.
    pub fn matches_host(&self, hostname: &str) -> bool {
        let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();

        match self.host.strip_prefix("*.") {
            Some(suffix) => hostname
                .strip_suffix(suffix)
                .and_then(|rest| rest.strip_suffix('.'))
                .map_or(false, |label| !label.is_empty() && !label.contains('.')),
            None => hostname == self.host,
        }
    }
}

/// SHA-256 of a certificate's DER SubjectPublicKeyInfo.
pub fn spki_sha256(cert_der: &[u8]) -> Result<[u8; 32]> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::Protocol(format!("unparseable certificate: {}", e)))?;
    Ok(Sha256::digest(cert.public_key().raw).into())
}

/// Check `leaf_der` against every pin that applies to `hostname`.
///
/// Hosts without pins pass.
pub fn check_pins(pins: &[CertificatePin], hostname: &str, leaf_der: &[u8]) -> Result<()> {
    let applicable: Vec<&CertificatePin> = pins.iter().filter(|p| p.matches_host(hostname)).collect();
    if applicable.is_empty() {
        return Ok(());
    }

    let presented = spki_sha256(leaf_der)?;
    if applicable
        .iter()
        .any(|pin| crate::crypto::constant_time_eq(&pin.digest, &presented))
    {
        Ok(())
    } else {
        Err(Error::Protocol("certificate pin mismatch".into()))
    }
}

/// WebPKI verification followed by a pin check.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pins: Vec<CertificatePin>,
}

impl PinnedServerVerifier {
    /// Build over the bundled WebPKI roots.
    pub fn new(provider: Arc<CryptoProvider>, pins: Vec<CertificatePin>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build verifier: {}", e)))?;

        Ok(Self { inner, pins })
    }
}

fn server_name_str(server_name: &ServerName<'_>) -> String {
    match server_name {
        ServerName::DnsName(name) => name.as_ref().to_string(),
        ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verified =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let host = server_name_str(server_name);
        check_pins(&self.pins, &host, end_entity.as_ref()).map_err(|_| {
            warn!(host = %host, "Rejected server certificate: pin mismatch");
            rustls::Error::General("certificate pin mismatch".into())
        })?;

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(host: &str) -> (Vec<u8>, [u8; 32]) {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![host.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        let pin: [u8; 32] = Sha256::digest(key.public_key_der()).into();
        (cert.der().to_vec(), pin)
    }

    #[test]
    fn test_pin_formats() {
        let digest = [0xabu8; 32];
        let b64 = STANDARD.encode(digest);

        let a = CertificatePin::new("api.example.com", &b64).unwrap();
        let b = CertificatePin::new("API.example.com.", &format!("sha256/{}", b64)).unwrap();
        let c = CertificatePin::new("api.example.com", &hex::encode(digest)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_pin_string(), format!("sha256/{}", b64));

        assert!(CertificatePin::new("api.example.com", "REPLACE_ME").is_err());
        assert!(CertificatePin::new("api.example.com", &STANDARD.encode([1u8; 20])).is_err());
        assert!(CertificatePin::new("", &b64).is_err());
    }

    #[test]
    fn test_host_matching() {
        let pin = CertificatePin::new("*.example.com", &hex::encode([0u8; 32])).unwrap();
        assert!(pin.matches_host("api.example.com"));
        assert!(!pin.matches_host("example.com"));
        assert!(!pin.matches_host("a.b.example.com"));
        assert!(!pin.matches_host("apiexample.com"));

        let exact = CertificatePin::new("api.example.com", &hex::encode([0u8; 32])).unwrap();
        assert!(exact.matches_host("API.example.com"));
        assert!(!exact.matches_host("www.example.com"));
    }

    #[test]
    fn test_spki_hash_matches_key() {
        let (der, pin) = self_signed("api.example.com");
        assert_eq!(spki_sha256(&der).unwrap(), pin);
    }

    #[test]
    fn test_check_pins() {
        let (der, pin) = self_signed("api.example.com");
        let good = CertificatePin::new("api.example.com", &STANDARD.encode(pin)).unwrap();
        let bad = CertificatePin::new("api.example.com", &STANDARD.encode([9u8; 32])).unwrap();

        assert!(check_pins(&[good.clone()], "api.example.com", &der).is_ok());
        assert!(check_pins(&[bad.clone()], "api.example.com", &der).is_err());
        // Any matching pin for the host is enough (backup pins).
        assert!(check_pins(&[bad.clone(), good], "api.example.com", &der).is_ok());
        // Unpinned hosts such as the object store pass.
        assert!(check_pins(&[bad], "bucket.s3.amazonaws.com", &der).is_ok());
    }

    #[test]
    fn test_verifier_builds() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinnedServerVerifier::new(provider, Vec::new()).unwrap();
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
