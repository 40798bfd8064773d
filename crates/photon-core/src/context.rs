//! Process-wide wiring.
//!
//! [`PhotonContext`] is built once at startup and owns the shared pieces:
//! key stores, the transport factory, and the persisted stores. Clients and
//! the orchestrator borrow them by `Arc`.

use crate::capture::{CaptureComponents, CaptureOrchestrator, FrameSource, LocationProvider};
use crate::config::{ConfigProvider, PhotonConfig};
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::identity::{
    DeviceCertificateStore, HardwareKeyStore, SigningKeyStore, SoftwareKeyStore,
};
use crate::net::{
    DeviceRegistrationClient, HttpTransport, TransportFactory, TransportSettings, UploadClient,
};
use crate::storage::{
    device_storage_key, PlainPrefs, SecurePrefs, UploadHistory, DEVICE_CERT_PREFS_FILE,
    HISTORY_FILE, REGISTRATION_FILE, SIGNING_PREFS_FILE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// Builder for [`PhotonContext`].
pub struct PhotonContextBuilder {
    data_dir: PathBuf,
    config: PhotonConfig,
    storage_key: Option<Zeroizing<[u8; KEY_SIZE]>>,
    transport: Option<Arc<dyn HttpTransport>>,
    hardware: Option<Arc<dyn HardwareKeyStore>>,
}

impl PhotonContextBuilder {
    /// Use `config` instead of defaults.
    pub fn config(mut self, config: PhotonConfig) -> Self {
        self.config = config;
        self
    }

    /// Seal stores under `key` instead of the device-derived key.
    pub fn storage_key(mut self, key: Zeroizing<[u8; KEY_SIZE]>) -> Self {
        self.storage_key = Some(key);
        self
    }

    /// Route all HTTP through `transport` instead of the pinned client.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a platform key store for the device certificate.
    pub fn hardware_key_store(mut self, store: Arc<dyn HardwareKeyStore>) -> Self {
        self.hardware = Some(store);
        self
    }

    /// Open the stores and assemble the context.
    pub fn build(self) -> Result<PhotonContext> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            Error::KeyStoreUnavailable(format!("failed to create data dir: {}", e))
        })?;

        let key = match self.storage_key {
            Some(key) => key,
            None => device_storage_key(&self.data_dir),
        };

        let signing_prefs = Arc::new(SecurePrefs::open(
            self.data_dir.join(SIGNING_PREFS_FILE),
            key.clone(),
        ));
        let signing_keys = Arc::new(SigningKeyStore::new(signing_prefs));

        let hardware = match self.hardware {
            Some(hardware) => hardware,
            None => {
                let prefs = Arc::new(SecurePrefs::open(
                    self.data_dir.join(DEVICE_CERT_PREFS_FILE),
                    key,
                ));
                Arc::new(SoftwareKeyStore::new(prefs)) as Arc<dyn HardwareKeyStore>
            }
        };
        let certificates = Arc::new(DeviceCertificateStore::new(hardware));

        let transport = Arc::new(match self.transport {
            Some(transport) => TransportFactory::from_transport(transport),
            None => TransportFactory::new(
                TransportSettings::from_config(&self.config.net)?,
                Some(Arc::clone(&certificates)),
            ),
        });

        info!(data_dir = %self.data_dir.display(), "Photon context ready");

        Ok(PhotonContext {
            registration_prefs: Arc::new(PlainPrefs::open(self.data_dir.join(REGISTRATION_FILE))),
            history: Arc::new(UploadHistory::open(self.data_dir.join(HISTORY_FILE))),
            data_dir: self.data_dir,
            config: self.config,
            signing_keys,
            certificates,
            transport,
        })
    }
}

/// Shared state for one Photon process.
pub struct PhotonContext {
    data_dir: PathBuf,
    config: PhotonConfig,
    signing_keys: Arc<SigningKeyStore>,
    certificates: Arc<DeviceCertificateStore>,
    transport: Arc<TransportFactory>,
    registration_prefs: Arc<PlainPrefs>,
    history: Arc<UploadHistory>,
}

impl PhotonContext {
    /// Start building a context rooted at `data_dir`.
    pub fn builder(data_dir: impl Into<PathBuf>) -> PhotonContextBuilder {
        PhotonContextBuilder {
            data_dir: data_dir.into(),
            config: PhotonConfig::default(),
            storage_key: None,
            transport: None,
            hardware: None,
        }
    }

    /// Data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Loaded configuration.
    pub fn config(&self) -> &PhotonConfig {
        &self.config
    }

    /// Signing key store.
    pub fn signing_keys(&self) -> &Arc<SigningKeyStore> {
        &self.signing_keys
    }

    /// Device certificate store.
    pub fn certificates(&self) -> &Arc<DeviceCertificateStore> {
        &self.certificates
    }

    /// Shared transport factory.
    pub fn transport(&self) -> &Arc<TransportFactory> {
        &self.transport
    }

    /// Upload history.
    pub fn history(&self) -> &Arc<UploadHistory> {
        &self.history
    }

    /// Upload client for the configured broker.
    pub fn upload_client(&self) -> UploadClient {
        UploadClient::new(Arc::clone(&self.transport), self.config.net.broker_url.clone())
    }

    /// Registration client for the configured endpoint.
    pub fn registration_client(&self) -> DeviceRegistrationClient {
        DeviceRegistrationClient::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.registration_prefs),
            self.config.net.register_url.clone(),
            self.config.net.environment.clone(),
        )
    }

    /// Register this device's signing key and certificate, if not already done.
    pub async fn register_if_needed(&self) -> Result<bool> {
        let public_key = self.signing_keys.public_key_bytes()?;
        let identity = self.certificates.get_identity();
        let cert_der = identity.as_ref().map(|i| i.certificate_der());

        Ok(self
            .registration_client()
            .register_if_needed(&public_key, cert_der)
            .await)
    }

    /// Orchestrator over the given host collaborators.
    pub fn orchestrator(
        &self,
        frames: Arc<dyn FrameSource>,
        location: Arc<dyn LocationProvider>,
        config: Arc<dyn ConfigProvider>,
    ) -> CaptureOrchestrator {
        CaptureOrchestrator::new(CaptureComponents {
            frames,
            location,
            signer: Arc::clone(&self.signing_keys),
            uploader: Arc::new(self.upload_client()),
            history: Arc::clone(&self.history),
            config,
            advertiser_id: self.config.advertiser_id.clone(),
        })
    }
}
