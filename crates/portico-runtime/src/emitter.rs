//! Outbound CloudEvent construction and publishing.
//!
//! Events are serialised in structured mode (one JSON envelope) and POSTed
//! to the configured publisher proxy. Publishing is synchronous from the
//! caller's point of view and is never retried or buffered; failures are
//! returned to the invoking function.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::{header, Method, Request, Uri};
use hyper_util::rt::TokioIo;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// Content type for structured-mode CloudEvents.
pub const CLOUDEVENTS_CONTENT_TYPE: &str = "application/cloudevents+json";

const SPEC_VERSION: &str = "1.0";

/// Errors surfaced to the function when emission fails.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("publisher proxy address is not configured")]
    NotConfigured,

    #[error("invalid publisher address: {0}")]
    InvalidAddress(String),

    #[error("connection to publisher failed: {0}")]
    Connection(String),

    #[error("publish request failed: {0}")]
    Request(String),

    #[error("publish request timed out")]
    Timeout,

    #[error("publisher responded with status {0}")]
    ErrorStatus(u16),

    #[error("event serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publishes CloudEvents to the configured publisher proxy.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    address: Option<String>,
    timeout: Duration,
}

impl EventEmitter {
    /// Creates an emitter targeting `address`; `None` makes every emit
    /// fail fast with [`EmitError::NotConfigured`].
    pub fn new(address: Option<String>) -> Self {
        Self {
            address,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a publisher address is configured.
    pub fn is_configured(&self) -> bool {
        self.address.is_some()
    }

    /// Builds a structured-mode CloudEvent and POSTs it to the publisher.
    ///
    /// Caller-supplied `attributes` are merged over the generated envelope
    /// fields, so an explicit `id` or `time` wins over the generated ones.
    pub async fn emit(
        &self,
        event_type: &str,
        source: &str,
        data: Value,
        attributes: Option<HashMap<String, Value>>,
    ) -> Result<(), EmitError> {
        let address = self.address.as_deref().ok_or(EmitError::NotConfigured)?;

        let envelope = build_envelope(event_type, source, data, attributes);
        let body = serde_json::to_vec(&Value::Object(envelope))?;

        let uri: Uri = address
            .parse()
            .map_err(|e| EmitError::InvalidAddress(format!("{address}: {e}")))?;
        let (host, port) = host_port(&uri)?;
        let path = uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::HOST, format!("{host}:{port}"))
            .header(header::CONTENT_TYPE, CLOUDEVENTS_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| EmitError::Request(e.to_string()))?;

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| EmitError::Timeout)?
            .map_err(|e| EmitError::Connection(e.to_string()))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| EmitError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "publisher connection error");
            }
        });

        let response = tokio::time::timeout(self.timeout, sender.send_request(request))
            .await
            .map_err(|_| EmitError::Timeout)?
            .map_err(|e| EmitError::Request(e.to_string()))?;

        let status = response.status();

        // Drain the body so the connection can be torn down cleanly.
        let _ = response.collect().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(EmitError::ErrorStatus(status.as_u16()))
        }
    }
}

/// Builds the structured-mode envelope for one outbound event.
fn build_envelope(
    event_type: &str,
    source: &str,
    data: Value,
    attributes: Option<HashMap<String, Value>>,
) -> Map<String, Value> {
    let mut envelope = Map::new();
    envelope.insert("specversion".to_owned(), Value::from(SPEC_VERSION));
    envelope.insert("type".to_owned(), Value::from(event_type));
    envelope.insert("source".to_owned(), Value::from(source));

    if let Some(attributes) = attributes {
        for (key, value) in attributes {
            envelope.insert(key, value);
        }
    }

    if !envelope.contains_key("id") {
        envelope.insert("id".to_owned(), Value::from(uuid::Uuid::new_v4().to_string()));
    }
    if !envelope.contains_key("time") {
        envelope.insert(
            "time".to_owned(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
    }

    envelope.insert("data".to_owned(), data);
    envelope
}

fn host_port(uri: &Uri) -> Result<(&str, u16), EmitError> {
    let host = uri
        .host()
        .ok_or_else(|| EmitError::InvalidAddress("missing host".to_owned()))?;

    let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    });

    Ok((host, port))
}
