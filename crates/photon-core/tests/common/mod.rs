//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use photon_core::capture::{CaptureEvent, FrameSource};
use photon_core::config::{NetConfig, PhotonConfig};
use photon_core::context::PhotonContext;
use photon_core::crypto::SecureBuffer;
use photon_core::net::{progress_percent, HttpResponse, HttpTransport, ProgressFn};
use photon_core::{Error, Result};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use zeroize::Zeroizing;

pub const BROKER_URL: &str = "https://broker.test/v1/upload";
pub const REGISTER_URL: &str = "https://broker.test/v1/register";

pub fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
    }
}

pub fn broker_ok() -> HttpResponse {
    response(
        200,
        r#"{"upload_url":"https://store/x","headers":{"x-amz-foo":"bar"}}"#,
    )
}

#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub url: String,
    pub body: Vec<u8>,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct RecordedPut {
    pub url: String,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Parsed broker request, keeping the metadata bytes exactly as sent.
#[derive(Debug, Deserialize)]
pub struct BrokerBody {
    pub metadata: Box<RawValue>,
    pub signature: String,
}

impl RecordedPost {
    pub fn broker_body(&self) -> BrokerBody {
        serde_json::from_slice(&self.body).expect("broker body")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

/// Scripted in-process transport.
///
/// POSTs pop scripted responses in order, then fall back to a default.
pub struct MockTransport {
    post_script: Mutex<VecDeque<HttpResponse>>,
    post_default: HttpResponse,
    put_response: HttpResponse,
    posts: Mutex<Vec<RecordedPost>>,
    puts: Mutex<Vec<RecordedPut>>,
}

impl MockTransport {
    pub fn new(post_default: HttpResponse) -> Arc<Self> {
        Self::scripted(Vec::new(), post_default)
    }

    pub fn scripted(script: Vec<HttpResponse>, post_default: HttpResponse) -> Arc<Self> {
        Arc::new(Self {
            post_script: Mutex::new(script.into()),
            post_default,
            put_response: response(200, ""),
            posts: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
        })
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<RecordedPut> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse> {
        self.posts.lock().unwrap().push(RecordedPost {
            url: url.to_string(),
            body,
            at: Instant::now(),
        });

        let scripted = self.post_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.post_default.clone()))
    }

    async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        headers: &[(String, String)],
        body: &[u8],
        progress: ProgressFn,
    ) -> Result<HttpResponse> {
        let half = body.len() / 2;
        progress(progress_percent(half, body.len()));
        progress(progress_percent(body.len(), body.len()));

        self.puts.lock().unwrap().push(RecordedPut {
            url: url.to_string(),
            content_type: content_type.to_string(),
            headers: headers.to_vec(),
            body: body.to_vec(),
        });
        Ok(self.put_response.clone())
    }
}

/// Which request a [`StalledTransport`] never answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAt {
    Broker,
    Storage,
}

/// Transport whose broker POST or storage PUT never completes.
///
/// When stalling the PUT, the broker answers with [`broker_ok`] and the PUT
/// reports partial progress before hanging.
pub struct StalledTransport {
    at: StallAt,
    pub posts: AtomicUsize,
    pub puts: AtomicUsize,
}

impl StalledTransport {
    pub fn new(at: StallAt) -> Arc<Self> {
        Arc::new(Self {
            at,
            posts: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HttpTransport for StalledTransport {
    async fn post_json(&self, _url: &str, _body: Vec<u8>) -> Result<HttpResponse> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        if self.at == StallAt::Broker {
            return std::future::pending().await;
        }
        Ok(broker_ok())
    }

    async fn put_bytes(
        &self,
        _url: &str,
        _content_type: &str,
        _headers: &[(String, String)],
        body: &[u8],
        progress: ProgressFn,
    ) -> Result<HttpResponse> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        progress(progress_percent(body.len() / 2, body.len()));
        std::future::pending().await
    }
}

/// Frame source returning the same bytes every capture.
pub struct StaticFrames {
    frame: Vec<u8>,
    fail_open: bool,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub captures: AtomicUsize,
}

impl StaticFrames {
    pub fn new(frame: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            frame: frame.to_vec(),
            fail_open: false,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            frame: Vec::new(),
            fail_open: true,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FrameSource for StaticFrames {
    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(Error::Capture("camera in use".into()));
        }
        Ok(())
    }

    async fn capture(&self) -> Result<SecureBuffer> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(SecureBuffer::from_slice(&self.frame))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn net_config() -> NetConfig {
    NetConfig {
        broker_url: BROKER_URL.to_string(),
        register_url: REGISTER_URL.to_string(),
        environment: "test".to_string(),
        ..NetConfig::default()
    }
}

pub fn context_with(
    dir: &Path,
    net: NetConfig,
    transport: Arc<dyn HttpTransport>,
) -> PhotonContext {
    PhotonContext::builder(dir)
        .config(PhotonConfig {
            net,
            ..PhotonConfig::default()
        })
        .storage_key(Zeroizing::new([7u8; 32]))
        .transport(transport)
        .build()
        .expect("build context")
}

pub fn context(dir: &Path, transport: Arc<dyn HttpTransport>) -> PhotonContext {
    context_with(dir, net_config(), transport)
}

/// Wait for the first event matching `pred`.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<CaptureEvent>,
    pred: impl Fn(&CaptureEvent) -> bool,
) -> CaptureEvent {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn is_status(prefix: &'static str) -> impl Fn(&CaptureEvent) -> bool {
    move |event| matches!(event, CaptureEvent::StatusChanged(s) if s.starts_with(prefix))
}

pub fn is_error(prefix: &'static str) -> impl Fn(&CaptureEvent) -> bool {
    move |event| matches!(event, CaptureEvent::ErrorRaised(s) if s.starts_with(prefix))
}
