//! Request normalization: every inbound HTTP request becomes an [`Event`].
//!
//! Three shapes are recognised, in priority order:
//!
//! 1. CloudEvent: structured mode (`application/cloudevents+json` body) or
//!    binary mode (`ce-type` + `ce-source` headers with the payload in the
//!    body).
//! 2. Plain JSON: `application/json` body decoded into the `data`
//!    attribute.
//! 3. Raw: anything else; the event only carries the raw request.
//!
//! Normalization never fails a request. Malformed envelopes and bodies
//! degrade to a less specific shape and report a [`NormalizationError`]
//! for the caller to log.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderMap, Method};
use serde_json::Value;
use thiserror::Error;

use crate::emitter::{EmitError, EventEmitter, CLOUDEVENTS_CONTENT_TYPE};

const CE_REQUIRED_HEADERS: [&str; 2] = ["ce-type", "ce-source"];
const CE_OPTIONAL_HEADERS: [&str; 4] = ["ce-id", "ce-time", "ce-specversion", "ce-eventtypeversion"];

/// Non-fatal problems encountered while normalizing a request.
#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("malformed CloudEvent envelope: {0}")]
    MalformedCloudEvent(String),

    #[error("malformed JSON body: {0}")]
    MalformedJson(String),
}

/// The raw request an event was built from, kept for handlers that need
/// access beyond the normalized attributes. Read-only.
#[derive(Debug)]
pub struct RawRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Normalized input for one invocation. Immutable once constructed.
pub struct Event {
    request: Arc<RawRequest>,
    is_cloud_event: bool,
    attributes: HashMap<String, Value>,
    emitter: Arc<EventEmitter>,
}

impl Event {
    /// HTTP verb of the originating request.
    pub fn method(&self) -> &Method {
        &self.request.method
    }

    /// Whether the request carried a CloudEvent (structured or binary).
    pub fn is_cloud_event(&self) -> bool {
        self.is_cloud_event
    }

    /// Looks up a normalized attribute (`data`, `ce-type`, `ce-source`, ...).
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// The decoded payload, when the request carried one.
    pub fn data(&self) -> Option<&Value> {
        self.attributes.get("data")
    }

    /// All normalized attributes.
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// The raw request this event was built from.
    pub fn request(&self) -> &RawRequest {
        &self.request
    }

    /// Publishes a follow-up CloudEvent through the configured publisher.
    ///
    /// Fails with [`EmitError::NotConfigured`] when the runtime has no
    /// publisher address; other failures surface the publish problem
    /// directly. Never retried.
    pub async fn emit_cloud_event(
        &self,
        event_type: &str,
        source: &str,
        data: Value,
        attributes: Option<HashMap<String, Value>>,
    ) -> Result<(), EmitError> {
        self.emitter.emit(event_type, source, data, attributes).await
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("method", &self.request.method)
            .field("is_cloud_event", &self.is_cloud_event)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Builds an [`Event`] from a raw request.
///
/// Always returns a usable event; the second element reports a
/// degradation the caller may want to log.
pub fn normalize(
    request: Arc<RawRequest>,
    emitter: Arc<EventEmitter>,
) -> (Event, Option<NormalizationError>) {
    let content_type = content_type_essence(&request.headers);
    let structured = content_type.as_deref() == Some(CLOUDEVENTS_CONTENT_TYPE);

    if structured || has_ce_headers(&request.headers) {
        let parsed = if structured {
            structured_attributes(&request.body)
        } else {
            binary_attributes(&request.headers, &request.body)
        };

        return match parsed {
            Ok(attributes) => (
                Event {
                    request,
                    is_cloud_event: true,
                    attributes,
                    emitter,
                },
                None,
            ),
            // Degrade to the raw shape rather than failing the request.
            Err(err) => (
                Event {
                    request,
                    is_cloud_event: false,
                    attributes: HashMap::new(),
                    emitter,
                },
                Some(err),
            ),
        };
    }

    if content_type.as_deref() == Some("application/json") && !request.body.is_empty() {
        let (attributes, warning) = match serde_json::from_slice::<Value>(&request.body) {
            Ok(data) => {
                let mut attributes = HashMap::new();
                attributes.insert("data".to_owned(), data);
                (attributes, None)
            }
            Err(err) => (
                HashMap::new(),
                Some(NormalizationError::MalformedJson(err.to_string())),
            ),
        };

        return (
            Event {
                request,
                is_cloud_event: false,
                attributes,
                emitter,
            },
            warning,
        );
    }

    (
        Event {
            request,
            is_cloud_event: false,
            attributes: HashMap::new(),
            emitter,
        },
        None,
    )
}

/// Content type with parameters stripped, lowercased.
fn content_type_essence(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
}

fn has_ce_headers(headers: &HeaderMap) -> bool {
    CE_REQUIRED_HEADERS
        .iter()
        .all(|name| headers.contains_key(*name))
}

/// Parses a structured-mode envelope out of the request body.
fn structured_attributes(body: &Bytes) -> Result<HashMap<String, Value>, NormalizationError> {
    let envelope: Value = serde_json::from_slice(body)
        .map_err(|e| NormalizationError::MalformedCloudEvent(e.to_string()))?;

    let envelope = envelope.as_object().ok_or_else(|| {
        NormalizationError::MalformedCloudEvent("envelope is not a JSON object".to_owned())
    })?;

    let mut attributes = HashMap::new();
    for required in ["type", "source"] {
        let value = envelope.get(required).and_then(Value::as_str).ok_or_else(|| {
            NormalizationError::MalformedCloudEvent(format!(
                "missing required attribute '{required}'"
            ))
        })?;
        attributes.insert(format!("ce-{required}"), Value::from(value));
    }

    for optional in ["id", "time", "specversion", "eventtypeversion"] {
        if let Some(value) = envelope.get(optional) {
            attributes.insert(format!("ce-{optional}"), value.clone());
        }
    }

    if let Some(data) = envelope.get("data") {
        attributes.insert("data".to_owned(), data.clone());
    }

    Ok(attributes)
}

/// Reads binary-mode envelope attributes from the `ce-*` headers; the body
/// is the payload.
fn binary_attributes(
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<HashMap<String, Value>, NormalizationError> {
    let mut attributes = HashMap::new();

    for name in CE_REQUIRED_HEADERS {
        let value = headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                NormalizationError::MalformedCloudEvent(format!("unreadable header '{name}'"))
            })?;
        attributes.insert(name.to_owned(), Value::from(value));
    }

    for name in CE_OPTIONAL_HEADERS {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
            attributes.insert(name.to_owned(), Value::from(value));
        }
    }

    if !body.is_empty() {
        let data = serde_json::from_slice::<Value>(body)
            .unwrap_or_else(|_| Value::from(String::from_utf8_lossy(body).into_owned()));
        attributes.insert("data".to_owned(), data);
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: Method, headers: &[(&str, &str)], body: &[u8]) -> Arc<RawRequest> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        Arc::new(RawRequest {
            method,
            path: "/".to_owned(),
            query: HashMap::new(),
            headers: header_map,
            body: Bytes::copy_from_slice(body),
        })
    }

    fn emitter() -> Arc<EventEmitter> {
        Arc::new(EventEmitter::new(None))
    }

    #[test]
    fn structured_cloud_event() {
        let body = json!({
            "specversion": "1.0",
            "type": "com.example.order.created",
            "source": "/orders",
            "id": "abc-123",
            "time": "2024-05-01T10:00:00Z",
            "data": { "order": 42 }
        });
        let req = request(
            Method::POST,
            &[("content-type", "application/cloudevents+json")],
            &serde_json::to_vec(&body).unwrap(),
        );

        let (event, warning) = normalize(req, emitter());

        assert!(warning.is_none());
        assert!(event.is_cloud_event());
        assert_eq!(event.data(), Some(&json!({ "order": 42 })));
        assert_eq!(
            event.attribute("ce-type"),
            Some(&json!("com.example.order.created"))
        );
        assert_eq!(event.attribute("ce-source"), Some(&json!("/orders")));
        assert_eq!(event.attribute("ce-id"), Some(&json!("abc-123")));
        assert_eq!(
            event.attribute("ce-time"),
            Some(&json!("2024-05-01T10:00:00Z"))
        );
        assert_eq!(event.attribute("ce-specversion"), Some(&json!("1.0")));
        // Never synthesized when the source event lacks it.
        assert!(event.attribute("ce-eventtypeversion").is_none());
    }

    #[test]
    fn structured_content_type_with_parameters() {
        let body = json!({ "type": "t", "source": "/s" });
        let req = request(
            Method::POST,
            &[("content-type", "application/cloudevents+json; charset=utf-8")],
            &serde_json::to_vec(&body).unwrap(),
        );

        let (event, warning) = normalize(req, emitter());
        assert!(warning.is_none());
        assert!(event.is_cloud_event());
        assert!(event.data().is_none());
    }

    #[test]
    fn binary_cloud_event_from_headers() {
        let req = request(
            Method::POST,
            &[
                ("ce-type", "com.example.test"),
                ("ce-source", "/test"),
                ("ce-id", "1"),
                ("content-type", "application/json"),
            ],
            br#"{"x":1}"#,
        );

        let (event, warning) = normalize(req, emitter());

        assert!(warning.is_none());
        assert!(event.is_cloud_event());
        assert_eq!(event.attribute("ce-type"), Some(&json!("com.example.test")));
        assert_eq!(event.attribute("ce-source"), Some(&json!("/test")));
        assert_eq!(event.attribute("ce-id"), Some(&json!("1")));
        assert!(event.attribute("ce-time").is_none());
        assert_eq!(event.data(), Some(&json!({"x": 1})));
    }

    #[test]
    fn binary_cloud_event_non_json_payload() {
        let req = request(
            Method::POST,
            &[("ce-type", "t"), ("ce-source", "/s")],
            b"plain payload",
        );

        let (event, warning) = normalize(req, emitter());
        assert!(warning.is_none());
        assert_eq!(event.data(), Some(&json!("plain payload")));
    }

    #[test]
    fn malformed_structured_envelope_degrades_to_raw() {
        let req = request(
            Method::POST,
            &[("content-type", "application/cloudevents+json")],
            b"not json at all",
        );

        let (event, warning) = normalize(req, emitter());

        assert!(matches!(
            warning,
            Some(NormalizationError::MalformedCloudEvent(_))
        ));
        assert!(!event.is_cloud_event());
        assert!(event.attributes().is_empty());
    }

    #[test]
    fn envelope_without_source_is_malformed() {
        let body = json!({ "type": "t", "data": 1 });
        let req = request(
            Method::POST,
            &[("content-type", "application/cloudevents+json")],
            &serde_json::to_vec(&body).unwrap(),
        );

        let (event, warning) = normalize(req, emitter());
        assert!(warning.is_some());
        assert!(!event.is_cloud_event());
    }

    #[test]
    fn json_body() {
        let req = request(
            Method::POST,
            &[("content-type", "application/json")],
            br#"{"text":"hi"}"#,
        );

        let (event, warning) = normalize(req, emitter());

        assert!(warning.is_none());
        assert!(!event.is_cloud_event());
        assert_eq!(event.data(), Some(&json!({"text": "hi"})));
    }

    #[test]
    fn json_body_with_charset_parameter() {
        let req = request(
            Method::POST,
            &[("content-type", "application/json; charset=utf-8")],
            br#"[1,2,3]"#,
        );

        let (event, _) = normalize(req, emitter());
        assert_eq!(event.data(), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn malformed_json_body_keeps_request_alive() {
        let req = request(
            Method::POST,
            &[("content-type", "application/json")],
            b"{broken",
        );

        let (event, warning) = normalize(req, emitter());

        assert!(matches!(warning, Some(NormalizationError::MalformedJson(_))));
        assert!(event.data().is_none());
    }

    #[test]
    fn opaque_request_has_no_attributes() {
        let req = request(
            Method::POST,
            &[("content-type", "text/plain")],
            b"hello there",
        );

        let (event, warning) = normalize(req, emitter());

        assert!(warning.is_none());
        assert!(!event.is_cloud_event());
        assert!(event.attributes().is_empty());
        assert_eq!(event.request().body.as_ref(), b"hello there");
    }

    #[test]
    fn get_without_body_or_content_type() {
        let req = request(Method::GET, &[], b"");

        let (event, warning) = normalize(req, emitter());

        assert!(warning.is_none());
        assert!(!event.is_cloud_event());
        assert!(event.data().is_none());
        assert_eq!(event.method(), &Method::GET);
    }
}
