//! HTTP transport abstraction.
//!
//! The dispatcher and the voice bridge only need "POST a body, give me the
//! response bytes as they arrive". Keeping that behind a trait lets tests
//! replay scripted chunk sequences without a network.

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::debug;

/// Response body as it arrives from the network.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn json(url: impl Into<String>, body: &impl serde::Serialize) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(body).map_err(|err| TransportError::Encode(err.to_string()))?;
        Ok(Self {
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The request body could not be encoded.
    Encode(String),
    /// Connect, TLS, or timeout failure before a response arrived.
    Connect(String),
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// The connection failed while the body was streaming.
    Read(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Encode(msg) => write!(f, "Failed to encode request: {msg}"),
            TransportError::Connect(msg) => write!(f, "Request failed: {msg}"),
            TransportError::Status { status, body } => {
                write!(f, "Request failed with status {status}: {body}")
            }
            TransportError::Read(msg) => write!(f, "Connection lost while streaming: {msg}"),
        }
    }
}

impl StdError for TransportError {}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a POST and return the response body as a chunk stream.
    ///
    /// Non-success statuses are reported as [`TransportError::Status`] with the
    /// body already collected.
    async fn post_stream(&self, request: HttpRequest) -> Result<ChunkStream, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(proxy: Option<&str>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(proxy) = proxy.map(str::trim).filter(|p| !p.is_empty()) {
            let proxy =
                reqwest::Proxy::all(proxy).map_err(|err| TransportError::Connect(err.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_stream(&self, request: HttpRequest) -> Result<ChunkStream, TransportError> {
        debug!(url = %redact_query(&request.url), bytes = request.body.len(), "POST");
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TransportError::Status { status, body });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| TransportError::Read(err.to_string()))
        });
        Ok(Box::pin(stream))
    }
}

fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_requests_set_content_type() {
        let request = HttpRequest::json("https://example.test/x", &serde_json::json!({"a": 1}))
            .expect("encode")
            .with_header("x-goog-api-key", "secret");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("X-Goog-Api-Key"), Some("secret"));
        assert_eq!(request.body, br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn redact_query_hides_parameters() {
        assert_eq!(redact_query("https://h/p?key=abc"), "https://h/p");
        assert_eq!(redact_query("https://h/p"), "https://h/p");
    }

    #[test]
    fn blank_proxy_is_ignored() {
        assert!(ReqwestTransport::new(Some("   "), Duration::from_secs(1)).is_ok());
        assert!(ReqwestTransport::new(Some("http://127.0.0.1:8080"), Duration::from_secs(1)).is_ok());
    }
}
