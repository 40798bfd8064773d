//! The single place outbound HTTP clients are built.

use super::pinning::{CertificatePin, PinnedServerVerifier};
use super::transport::{HttpTransport, PinnedHttpClient};
use crate::config::NetConfig;
use crate::error::{Error, Result};
use crate::identity::{DeviceCertificateIdentity, DeviceCertificateStore};
use rustls::client::ResolvesClientCert;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, SignatureScheme};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Hardening settings for the shared client.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Server key pins.
    pub pins: Vec<CertificatePin>,
    /// TCP + TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let net = NetConfig::default();
        Self {
            pins: Vec::new(),
            connect_timeout: net.connect_timeout(),
            request_timeout: net.request_timeout(),
        }
    }
}

impl TransportSettings {
    /// Settings from network config. A configured but malformed pin is an error.
    pub fn from_config(net: &NetConfig) -> Result<Self> {
        let pins = if net.has_pin() {
            vec![CertificatePin::new(&net.pinned_host, &net.pinned_cert_sha256)?]
        } else {
            warn!("No certificate pin configured; relying on WebPKI validation only");
            Vec::new()
        };

        Ok(Self {
            pins,
            connect_timeout: net.connect_timeout(),
            request_timeout: net.request_timeout(),
        })
    }
}

/// Presents the device certificate whenever the server asks for one.
#[derive(Debug)]
struct DeviceCertResolver {
    key: Arc<CertifiedKey>,
}

impl ResolvesClientCert for DeviceCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.key
            .key
            .choose_scheme(sigschemes)
            .map(|_| Arc::clone(&self.key))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Build the rustls configuration: TLS 1.3 or 1.2 only, WebPKI roots plus
/// pins, and the device certificate when there is one.
pub fn build_tls_config(
    pins: Vec<CertificatePin>,
    identity: Option<&DeviceCertificateIdentity>,
) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinnedServerVerifier::new(Arc::clone(&provider), pins)?;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Error::Transport(format!("unsupported TLS versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let config = match identity {
        Some(identity) => builder.with_client_cert_resolver(Arc::new(DeviceCertResolver {
            key: identity.certified_key(),
        })),
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// Builds and memoizes the one outbound client.
///
/// The first successful [`get_client`](Self::get_client) wins; the lock is
/// held while building so concurrent callers never construct two clients.
pub struct TransportFactory {
    settings: TransportSettings,
    certificates: Option<Arc<DeviceCertificateStore>>,
    cached: Mutex<Option<Arc<dyn HttpTransport>>>,
}

impl TransportFactory {
    /// Factory for pinned clients, presenting a certificate from `certificates` when available.
    pub fn new(settings: TransportSettings, certificates: Option<Arc<DeviceCertificateStore>>) -> Self {
        Self {
            settings,
            certificates,
            cached: Mutex::new(None),
        }
    }

    /// Factory that always hands out `transport`.
    pub fn from_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            settings: TransportSettings::default(),
            certificates: None,
            cached: Mutex::new(Some(transport)),
        }
    }

    /// The shared client, built on first call.
    pub fn get_client(&self) -> Result<Arc<dyn HttpTransport>> {
        let mut guard = self
            .cached
            .lock()
            .map_err(|_| Error::Transport("transport lock poisoned".into()))?;

        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }

        let client: Arc<dyn HttpTransport> = Arc::new(self.build()?);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    fn build(&self) -> Result<PinnedHttpClient> {
        let identity = self.certificates.as_ref().and_then(|store| store.get_identity());
        if identity.is_none() {
            warn!("No client certificate available; using server-authenticated TLS");
        }

        let tls = build_tls_config(self.settings.pins.clone(), identity.as_ref())?;

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .https_only(true)
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .user_agent(format!("photon/{}", crate::VERSION))
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

        info!(
            pins = self.settings.pins.len(),
            mtls = identity.is_some(),
            "Secure transport ready"
        );

        Ok(PinnedHttpClient::new(client))
    }
}
