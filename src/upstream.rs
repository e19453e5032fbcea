//! Upstream Forwarding
//!
//! Forwards accepted requests to the JSON-RPC node and streams the response
//! back with status and headers intact.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Default upstream JSON-RPC endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8545";

/// Default forwarding deadline in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Request headers never copied to the upstream request
const DROPPED_REQUEST_HEADERS: &[header::HeaderName] = &[header::CONTENT_LENGTH, header::HOST];

/// Response headers never copied back to the client
const DROPPED_RESPONSE_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Errors that can occur while forwarding
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream request timed out after {0}ms")]
    Timeout(u64),

    #[error("Upstream connection failed: {0}")]
    Connection(String),

    #[error("Invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),
}

impl UpstreamError {
    /// HTTP status returned to the client for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Connection(_) => StatusCode::BAD_GATEWAY,
            UpstreamError::InvalidEndpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Configuration for upstream forwarding
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// JSON-RPC node URL
    pub endpoint_url: String,
    /// Deadline for a forwarded request in milliseconds
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl UpstreamConfig {
    /// Create a new config with the specified endpoint
    pub fn with_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Validate that an endpoint is an absolute http(s) URL
pub fn validate_endpoint(endpoint: &str) -> Result<Url, UpstreamError> {
    let url = Url::parse(endpoint)
        .map_err(|e| UpstreamError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UpstreamError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme '{other}'"
        ))),
    }
}

/// Copy request headers except the ones the client library recomputes
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in DROPPED_REQUEST_HEADERS {
        out.remove(name);
    }
    out
}

/// HTTP client bound to one upstream node
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    endpoint: Url,
    config: UpstreamConfig,
}

impl Upstream {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let endpoint = validate_endpoint(&config.endpoint_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| UpstreamError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Forward a request verbatim
    ///
    /// # Arguments
    /// * `method` - Method of the inbound request
    /// * `headers` - Inbound headers; `content-length` and `host` are dropped
    /// * `body` - Original body bytes
    ///
    /// # Returns
    /// The upstream response with its body streamed through
    pub async fn forward(
        &self,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, UpstreamError> {
        debug!(%method, endpoint = %self.endpoint, bytes = body.len(), "Forwarding request upstream");

        let upstream = self
            .client
            .request(method, self.endpoint.clone())
            .headers(forwarded_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(endpoint = %self.endpoint, "Request to upstream timed out");
                    UpstreamError::Timeout(self.config.timeout_ms)
                } else {
                    error!(endpoint = %self.endpoint, error = %e, "Error occurred during request to upstream");
                    UpstreamError::Connection(e.to_string())
                }
            })?;

        let mut builder = Response::builder().status(upstream.status());
        if let Some(out) = builder.headers_mut() {
            for (name, value) in upstream.headers() {
                if !DROPPED_RESPONSE_HEADERS.contains(name) {
                    out.append(name.clone(), value.clone());
                }
            }
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| UpstreamError::Connection(e.to_string()))
    }
}
