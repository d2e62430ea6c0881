// src/core/probes/mod.rs

// Every built-in check lives in its own module and implements `Probe`.
// New checks are added by implementing the trait and registering the probe;
// the orchestrator never needs to know about them.
pub mod directory_listing;
pub mod dns;
pub mod fingerprint;
pub mod headers;
pub mod sensitive_files;
pub mod tls;

use crate::core::config::ScanConfig;
use crate::core::error::ProbeError;
use crate::core::models::{Finding, Target};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Upper bound on how much of a response body a probe ever holds in memory.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A single, independent check against one target.
///
/// Implementations must not mutate shared state and must be safe to run
/// concurrently against the same or different targets. An empty `Vec` is a
/// clean result.
#[async_trait]
pub trait Probe: Send + Sync + fmt::Debug {
    /// Stable identifier, unique within a registry (e.g. `"headers"`).
    fn id(&self) -> &str;

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError>;
}

/// Per-invocation resources handed to a probe by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    http: reqwest::Client,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ProbeContext {
    pub fn new(http: reqwest::Client, timeout: Duration, cancel: CancellationToken) -> Self {
        Self { http, timeout, cancel }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The effective timeout of this probe run.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Error returned when the probe notices cancellation.
    pub fn cancelled_error(&self) -> ProbeError {
        ProbeError::Timeout { after: self.timeout }
    }

    /// Maps a `reqwest` error onto the probe error taxonomy.
    pub fn classify(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout { after: self.timeout }
        } else if e.is_decode() || e.is_body() {
            ProbeError::InvalidResponse(e.to_string())
        } else {
            ProbeError::Network(e.to_string())
        }
    }

    /// Issues a GET request and reads up to [`MAX_BODY_BYTES`] of the body,
    /// aborting promptly on cancellation.
    pub async fn fetch(&self, url: Url) -> Result<HttpSnapshot, ProbeError> {
        self.fetch_limited(url, MAX_BODY_BYTES).await
    }

    /// Like [`fetch`](Self::fetch), but keeps at most `max_body` bytes of the
    /// body. The rest is never downloaded; `0` reads status and headers only.
    pub async fn fetch_limited(&self, url: Url, max_body: usize) -> Result<HttpSnapshot, ProbeError> {
        debug!(url = %url, max_body, "Fetching.");
        let request = async {
            let mut response = self
                .http
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| self.classify(e))?;
            let final_url = response.url().clone();
            let status = response.status();
            let headers = response.headers().clone();

            let mut body = Vec::new();
            while body.len() < max_body {
                let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? else { break };
                let room = max_body - body.len();
                if chunk.len() > room {
                    body.extend_from_slice(&chunk[..room]);
                    debug!(url = %final_url, max_body, "Response body truncated.");
                    break;
                }
                body.extend_from_slice(&chunk);
            }

            let body = String::from_utf8_lossy(&body).into_owned();
            Ok(HttpSnapshot { url: final_url, status, headers, body })
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.cancelled_error()),
            result = request => result,
        }
    }

    /// Fetches several site-relative paths concurrently, keeping at most
    /// `max_body` bytes of each body.
    ///
    /// Individual failures are tolerated (a missing path is normal); only when
    /// every request failed is the first error returned.
    pub async fn fetch_paths(
        &self,
        target: &Target,
        paths: &[&str],
        max_body: usize,
    ) -> Result<Vec<HttpSnapshot>, ProbeError> {
        let mut urls = Vec::with_capacity(paths.len());
        for path in paths {
            let url = target
                .resolve(path)
                .map_err(|e| ProbeError::InvalidResponse(format!("cannot build URL for '{path}': {e}")))?;
            urls.push(url);
        }

        let results = futures::future::join_all(urls.into_iter().map(|url| self.fetch_limited(url, max_body))).await;

        let mut snapshots = Vec::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    debug!(error = %e, "Path fetch failed.");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if snapshots.is_empty() => Err(e),
            _ => Ok(snapshots),
        }
    }
}

/// An HTTP response with its body read up to the fetch limit.
#[derive(Debug, Clone)]
pub struct HttpSnapshot {
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpSnapshot {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All `Set-Cookie` values that are valid UTF-8.
    pub fn cookies(&self) -> Vec<&str> {
        self.headers.get_all("set-cookie").into_iter().filter_map(|v| v.to_str().ok()).collect()
    }
}

/// Builds the HTTP client shared by all probes of one orchestrator.
pub fn build_http_client(config: &ScanConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.probe_timeout)
        .build()
}

/// The built-in probes, in registration order.
pub fn default_probes() -> Vec<Arc<dyn Probe>> {
    vec![
        Arc::new(headers::HeadersProbe),
        Arc::new(tls::TlsProbe),
        Arc::new(dns::DnsProbe),
        Arc::new(fingerprint::FingerprintProbe),
        Arc::new(directory_listing::DirectoryListingProbe::default()),
        Arc::new(sensitive_files::SensitiveFilesProbe),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn context() -> ProbeContext {
        ProbeContext::new(reqwest::Client::new(), Duration::from_secs(5), CancellationToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with_large_body(len: usize) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/zip")
                    .set_body_bytes(vec![b'a'; len]),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn bodies_are_capped_at_the_limit() {
        let server = server_with_large_body(3 * MAX_BODY_BYTES).await;
        let url = Url::parse(&format!("{}/big", server.uri())).unwrap();

        let snapshot = test_support::context().fetch(url).await.unwrap();

        assert_eq!(snapshot.status, StatusCode::OK);
        assert_eq!(snapshot.body.len(), MAX_BODY_BYTES);
    }

    #[tokio::test]
    async fn zero_limit_keeps_headers_only() {
        let server = server_with_large_body(2 * MAX_BODY_BYTES).await;
        let url = Url::parse(&format!("{}/big", server.uri())).unwrap();

        let snapshot = test_support::context().fetch_limited(url, 0).await.unwrap();

        assert_eq!(snapshot.header("content-type"), Some("application/zip"));
        assert!(snapshot.body.is_empty());
    }

    #[tokio::test]
    async fn small_bodies_are_read_whole() {
        let server = server_with_large_body(10).await;
        let url = Url::parse(&format!("{}/big", server.uri())).unwrap();

        let snapshot = test_support::context().fetch_limited(url, 64).await.unwrap();

        assert_eq!(snapshot.body, "aaaaaaaaaa");
    }
}
