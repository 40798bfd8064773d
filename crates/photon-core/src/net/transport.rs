//! HTTP transport seam.
//!
//! Every outbound request goes through [`HttpTransport`]. The production
//! implementation wraps a `reqwest` client carrying the pinned TLS
//! configuration built by [`TransportFactory`](super::TransportFactory).

use crate::error::{Error, Result};
use crate::logging::{RedactedBytes, RedactedUrl};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::Arc;
use tracing::debug;

/// Upload progress callback, receiving a percentage in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Size of each chunk handed to the connection during a PUT.
pub const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP operations used by the registration and upload clients.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body.
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse>;

    /// PUT raw bytes, reporting write progress.
    async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        headers: &[(String, String)],
        body: &[u8],
        progress: ProgressFn,
    ) -> Result<HttpResponse>;
}

/// Write progress as a clamped percentage.
pub fn progress_percent(written: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((written.saturating_mul(100)) / total).min(100) as u8
}

/// [`HttpTransport`] over a `reqwest` client.
///
/// Connection failures are retried once; a request that reached the server
/// is never replayed.
#[derive(Debug, Clone)]
pub struct PinnedHttpClient {
    client: reqwest::Client,
}

impl PinnedHttpClient {
    /// Wrap a configured client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> Result<reqwest::RequestBuilder>,
    ) -> Result<reqwest::Response> {
        match build()?.send().await {
            Err(e) if e.is_connect() => {
                debug!(error = %e.without_url(), "Connection failed, retrying once");
                Ok(build()?.send().await?)
            }
            other => Ok(other?),
        }
    }

    async fn finish(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

fn header_map(content_type: &str, headers: &[(String, String)], len: usize) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    map.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .map_err(|_| Error::Protocol("invalid content type".into()))?,
    );

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Protocol(format!("invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::Protocol(format!("invalid value for header {}", name)))?;
        if name == CONTENT_TYPE || name == CONTENT_LENGTH {
            map.insert(name, value);
        } else {
            map.append(name, value);
        }
    }

    map.insert(CONTENT_LENGTH, HeaderValue::from(len));
    Ok(map)
}

#[async_trait]
impl HttpTransport for PinnedHttpClient {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse> {
        debug!(url = %RedactedUrl(url), body = %RedactedBytes(&body), "POST");
        let body = Bytes::from(body);
        let response = self
            .send_with_retry(|| {
                Ok(self
                    .client
                    .post(url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone()))
            })
            .await?;

        Self::finish(response).await
    }

    async fn put_bytes(
        &self,
        url: &str,
        content_type: &str,
        headers: &[(String, String)],
        body: &[u8],
        progress: ProgressFn,
    ) -> Result<HttpResponse> {
        let total = body.len();
        let header_map = header_map(content_type, headers, total)?;

        let response = self
            .send_with_retry(|| {
                let chunks: Vec<Bytes> = body
                    .chunks(UPLOAD_CHUNK_SIZE)
                    .map(Bytes::copy_from_slice)
                    .collect();
                let progress = Arc::clone(&progress);
                let mut written = 0usize;

                let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
                    written += chunk.len();
                    progress(progress_percent(written, total));
                    Ok::<_, std::io::Error>(chunk)
                }));

                Ok(self
                    .client
                    .put(url)
                    .headers(header_map.clone())
                    .body(reqwest::Body::wrap_stream(stream)))
            })
            .await?;

        Self::finish(response).await
    }
}
