//! HTTP client for the cluster REST API.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, trace};

use super::error::{TransportError, TransportResult};
use super::protocol::{ErrorEnvelope, Method};
use super::ClusterTransport;
use crate::config::ClusterSettings;

/// Default timeout for requests (60 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default REST API version segment.
const DEFAULT_API_VERSION: u32 = 3;

/// Longest error body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Blocking HTTP transport to a cluster node.
///
/// Requests are sent with an async `reqwest` client driven by a private
/// current-thread runtime, so every call blocks the calling thread until
/// the cluster replies or the timeout expires. Called from inside another
/// tokio runtime, the request runs on a short-lived helper thread so the
/// caller's runtime is never blocked on re-entrantly. The transport owns a
/// runtime, so it must be dropped outside async code. GET and DELETE
/// parameters travel in the query string, POST parameters as a JSON body.
///
/// # Example
///
/// ```ignore
/// use clusterproxy::transport::{ClusterTransport, HttpTransport, Method};
///
/// let transport = HttpTransport::new("http://localhost:54321")?;
/// let frames = transport.request(Method::Get, "Frames/iris.hex", serde_json::json!({}))?;
/// ```
pub struct HttpTransport {
    /// Base URL of the cluster node, without a trailing slash.
    base_url: String,

    /// API version path segment.
    api_version: u32,

    /// The underlying HTTP client.
    client: reqwest::Client,

    /// Runtime driving the client.
    runtime: Runtime,

    /// Request timeout duration.
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport to the node at `base_url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        Self::build(base_url.into(), DEFAULT_API_VERSION, timeout)
    }

    /// Create a transport from cluster settings.
    pub fn from_settings(settings: &ClusterSettings) -> TransportResult<Self> {
        Self::build(
            settings.url.clone(),
            settings.api_version,
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn build(base_url: String, api_version: u32, timeout: Duration) -> TransportResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            client,
            runtime,
            timeout,
        })
    }

    /// Full URL for a resource path.
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: &serde_json::Value,
    ) -> TransportResult<(StatusCode, String)> {
        let builder = match method {
            Method::Get => self.client.get(url).query(&query_pairs(params)),
            Method::Delete => self.client.delete(url).query(&query_pairs(params)),
            Method::Post => self.client.post(url).json(params),
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Classify a non-success reply.
    fn classify_error(status: StatusCode, body: &str) -> TransportError {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) if envelope.msg.is_some() || envelope.exception_msg.is_some() => {
                if status.is_client_error() || status == StatusCode::INTERNAL_SERVER_ERROR {
                    TransportError::remote(envelope.code(status.as_u16()), envelope.message())
                } else {
                    TransportError::Status {
                        status: status.as_u16(),
                        body: envelope.message(),
                    }
                }
            }
            _ => TransportError::Status {
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY),
            },
        }
    }

    /// Drive `future` to completion on the private runtime.
    ///
    /// A runtime cannot be blocked on from a thread that is already driving
    /// one, so callers inside a tokio runtime are served from a scoped
    /// thread instead.
    fn block_on<F: Future>(&self, future: F) -> TransportResult<F::Output>
    where
        F: Send,
        F::Output: Send,
    {
        if Handle::try_current().is_err() {
            return Ok(self.runtime.block_on(future));
        }
        std::thread::scope(|scope| {
            scope
                .spawn(|| self.runtime.block_on(future))
                .join()
                .map_err(|_| {
                    TransportError::Runtime(std::io::Error::other("transport thread panicked"))
                })
        })
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Base URL of the cluster node.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ClusterTransport for HttpTransport {
    fn request(
        &self,
        method: Method,
        path: &str,
        params: serde_json::Value,
    ) -> TransportResult<serde_json::Value> {
        let id = uuid::Uuid::new_v4();
        let url = self.url(path);
        debug!(request_id = %id, %method, %url, "cluster request");
        trace!(request_id = %id, params = %params, "request params");

        let outcome = self.block_on(async {
            tokio::time::timeout(self.timeout, self.send(method, &url, &params)).await
        })?;

        let (status, body) = match outcome {
            Ok(result) => result.map_err(|e| match e {
                TransportError::Timeout(_) => TransportError::Timeout(self.timeout.as_secs()),
                other => other,
            })?,
            Err(_) => return Err(TransportError::Timeout(self.timeout.as_secs())),
        };

        debug!(request_id = %id, status = status.as_u16(), "cluster response");

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }

        serde_json::from_str(&body).map_err(|e| {
            TransportError::invalid_response(format!("{} returned invalid JSON: {}", path, e))
        })
    }
}

/// Flatten a JSON object into query-string pairs.
///
/// Arrays and nested objects are sent in their JSON form, which is how the
/// cluster expects list-valued arguments such as ratios.
fn query_pairs(params: &serde_json::Value) -> Vec<(String, String)> {
    match params {
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
