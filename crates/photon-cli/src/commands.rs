//! CLI command implementations.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use photon_core::{
    capture::{
        CaptureEvent, CaptureState, DirectoryFrameSource, FixedLocation, LocationProvider,
        NoLocation,
    },
    config::{ConfigProvider, FileConfigProvider, PhotonConfig, StaticConfigProvider},
    context::PhotonContext,
    crypto::SecureBuffer,
    identity::{compute_fingerprint, format_fingerprint},
    logging::RedactedToken,
    metadata::{FrameMetadata, Location},
    net::{spki_sha256, ProgressFn},
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Config file looked up in the data directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "photon.json";

/// Resolved locations shared by every command.
pub struct Env {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Explicit config file, if any.
    pub config_path: Option<PathBuf>,
}

impl Env {
    /// The config file in effect, if one exists.
    fn config_file(&self) -> Option<PathBuf> {
        match &self.config_path {
            Some(path) => Some(path.clone()),
            None => {
                let fallback = self.data_dir.join(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        }
    }
}

/// Load configuration and open the context.
fn open_context(env: &Env) -> Result<PhotonContext> {
    let config = match env.config_file() {
        Some(path) => PhotonConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            debug!("No config file; uploads stay disabled until a broker is configured");
            PhotonConfig::default()
        }
    };

    PhotonContext::builder(&env.data_dir)
        .config(config)
        .build()
        .context("Failed to open Photon data directory")
}

/// Show the signing key and device certificate.
pub fn show_identity(env: &Env) -> Result<()> {
    let ctx = open_context(env)?;

    let public_key = ctx
        .signing_keys()
        .public_key_bytes()
        .context("Signing key unavailable")?;
    let registration = ctx.registration_client();

    println!("\nPhoton Device Identity:");
    println!("  Device ID:    {}", registration.device_id());
    println!("  Signing key:  {}", STANDARD.encode(public_key));
    println!(
        "  Fingerprint:  {}",
        format_fingerprint(&compute_fingerprint(&public_key))
    );

    match ctx.certificates().get_identity() {
        Some(identity) => {
            let der = identity.certificate_der();
            let spki = spki_sha256(der).context("Device certificate is unreadable")?;
            println!("  Certificate:  SHA-256 {}", hex::encode(Sha256::digest(der)));
            println!("  Key pin:      sha256/{}", STANDARD.encode(spki));
        }
        None => println!("  Certificate:  unavailable"),
    }

    println!(
        "  Registered:   {}",
        if registration.is_registered() { "yes" } else { "no" }
    );
    println!("\nData directory: {}", ctx.data_dir().display());
    Ok(())
}

/// Register the device with the backend.
pub async fn register(env: &Env) -> Result<()> {
    let ctx = open_context(env)?;

    if ctx.config().net.register_url.trim().is_empty() {
        bail!("No registration endpoint configured (net.register_url)");
    }

    if ctx.register_if_needed().await? {
        println!("Device registered.");
        Ok(())
    } else {
        bail!("Registration failed; see log for details")
    }
}

/// Capture and upload from `dir` until Ctrl+C or the session ends.
pub async fn run(env: &Env, dir: &str, location: Option<Location>) -> Result<()> {
    let ctx = open_context(env)?;

    if !ctx.register_if_needed().await? {
        warn!("Device is not registered; uploads may be rejected");
    }

    let frames = Arc::new(DirectoryFrameSource::new(dir));
    let location: Arc<dyn LocationProvider> = match location {
        Some(fix) => Arc::new(FixedLocation(fix)),
        None => Arc::new(NoLocation),
    };
    let remote = ctx.config().remote;
    let config: Arc<dyn ConfigProvider> = match env.config_file() {
        Some(path) => Arc::new(FileConfigProvider::new(path, remote)),
        None => Arc::new(StaticConfigProvider::new(remote)),
    };

    let orchestrator = ctx.orchestrator(frames, location, config);
    let mut events = orchestrator.subscribe();

    println!("\nStarting capture from {}", dir);
    println!("Press Ctrl+C to stop.\n");
    orchestrator.start();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                println!("\n\nShutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(CaptureEvent::StateChanged(CaptureState::Idle)) => {
                    println!("Capture ended.");
                    break;
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.stop().await;
    Ok(())
}

fn print_event(event: &CaptureEvent) {
    match event {
        CaptureEvent::StatusChanged(status) => println!("{}", status),
        CaptureEvent::ErrorRaised(error) => eprintln!("[ERROR] {}", error),
        CaptureEvent::IndicatorShown(text) => println!("[*] {}", text),
        CaptureEvent::IndicatorRetired => println!("[*] Capture indicator cleared"),
        CaptureEvent::ProgressUpdated(pct) => debug!(progress = pct, "Upload progress"),
        CaptureEvent::StateChanged(state) => debug!(?state, "Capture state changed"),
    }
}

/// Upload a single frame without location.
pub async fn upload_file(env: &Env, file: &str) -> Result<()> {
    let ctx = open_context(env)?;

    let bytes = tokio::fs::read(Path::new(file))
        .await
        .with_context(|| format!("Failed to read {}", file))?;
    let mut frame = SecureBuffer::new(bytes);

    let metadata = FrameMetadata::fresh(None, ctx.config().advertiser_id.as_deref());
    let json = metadata.to_json()?;
    let signature = ctx
        .signing_keys()
        .sign(json.as_bytes())
        .context("Signing key unavailable")?;
    debug!(signature = %RedactedToken(&signature), "Metadata signed");

    let progress: ProgressFn = Arc::new(|pct| debug!(progress = pct, "Upload progress"));
    println!("Uploading {} ({} bytes)...", file, frame.len());
    let result = ctx
        .upload_client()
        .upload(&frame, &json, &signature, progress)
        .await;
    frame.zero();

    if result.reached_server() {
        ctx.history().record(&result)?;
    }

    match result.error() {
        None => {
            println!("Upload OK (code {})", result.code);
            Ok(())
        }
        Some(e) if e.is_retryable() => {
            bail!("Upload failed (code {}): {}; try again later", result.code, e)
        }
        Some(e) => bail!("Upload failed (code {}): {}", result.code, e),
    }
}

/// Print or clear the upload history.
pub fn show_history(env: &Env, clear: bool) -> Result<()> {
    let ctx = open_context(env)?;

    if clear {
        ctx.history().clear()?;
        println!("Upload history cleared.");
        return Ok(());
    }

    let entries = ctx.history().load();
    if entries.is_empty() {
        println!("No uploads recorded.");
        return Ok(());
    }

    println!("Recent uploads (newest first):");
    for entry in entries {
        let when = chrono::DateTime::from_timestamp_millis(entry.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| entry.timestamp.to_string());
        let outcome = if entry.success { "ok" } else { "failed" };
        println!("  {}  {:>4}  {}", when, entry.code, outcome);
    }
    Ok(())
}
