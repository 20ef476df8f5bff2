//! Live round-trip tests for CloudEvent emission against a local capture
//! server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use portico_runtime::{EmitError, EventEmitter};
use serde_json::{json, Value};
use tokio::sync::oneshot;

type Captured = (HeaderMap, Bytes);

struct CaptureState {
    sender: Mutex<Option<oneshot::Sender<Captured>>>,
    status: StatusCode,
}

async fn capture(
    State(state): State<Arc<CaptureState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(sender) = state.sender.lock().unwrap().take() {
        let _ = sender.send((headers, body));
    }
    state.status
}

/// Starts a one-request capture server; returns its publish URL and the
/// channel the captured request arrives on.
async fn capture_server(status: StatusCode) -> (String, oneshot::Receiver<Captured>) {
    let (tx, rx) = oneshot::channel();
    let state = Arc::new(CaptureState {
        sender: Mutex::new(Some(tx)),
        status,
    });

    let app = Router::new()
        .route("/publish", post(capture))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/publish"), rx)
}

#[tokio::test]
async fn emit_posts_structured_cloud_event() {
    let (url, captured) = capture_server(StatusCode::NO_CONTENT).await;
    let emitter = EventEmitter::new(Some(url));

    emitter
        .emit(
            "com.example.order.shipped",
            "/orders",
            json!({ "order": 42 }),
            None,
        )
        .await
        .expect("emit should succeed");

    let (headers, body) = tokio::time::timeout(Duration::from_secs(5), captured)
        .await
        .expect("capture server should receive the event")
        .unwrap();

    assert_eq!(
        headers.get("content-type").unwrap(),
        "application/cloudevents+json"
    );

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["specversion"], "1.0");
    assert_eq!(envelope["type"], "com.example.order.shipped");
    assert_eq!(envelope["source"], "/orders");
    assert_eq!(envelope["data"], json!({ "order": 42 }));
    assert!(envelope["id"].is_string());
    assert!(envelope["time"].is_string());
}

#[tokio::test]
async fn emit_merges_caller_attributes() {
    let (url, captured) = capture_server(StatusCode::OK).await;
    let emitter = EventEmitter::new(Some(url));

    let mut attributes = HashMap::new();
    attributes.insert("id".to_owned(), json!("caller-chosen-id"));
    attributes.insert("eventtypeversion".to_owned(), json!("v2"));

    emitter
        .emit("com.example.test", "/test", Value::Null, Some(attributes))
        .await
        .expect("emit should succeed");

    let (_headers, body) = tokio::time::timeout(Duration::from_secs(5), captured)
        .await
        .unwrap()
        .unwrap();

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["id"], "caller-chosen-id");
    assert_eq!(envelope["eventtypeversion"], "v2");
}

#[tokio::test]
async fn emit_surfaces_non_2xx_responses() {
    let (url, _captured) = capture_server(StatusCode::INTERNAL_SERVER_ERROR).await;
    let emitter = EventEmitter::new(Some(url));

    let result = emitter
        .emit("com.example.test", "/test", Value::Null, None)
        .await;

    assert!(matches!(result, Err(EmitError::ErrorStatus(500))));
}

#[tokio::test]
async fn emit_surfaces_connection_failures() {
    // Bind then drop a listener so the port is very likely unused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let emitter = EventEmitter::new(Some(format!("http://{addr}/publish")))
        .with_timeout(Duration::from_secs(2));

    let result = emitter
        .emit("com.example.test", "/test", Value::Null, None)
        .await;

    assert!(matches!(
        result,
        Err(EmitError::Connection(_) | EmitError::Timeout)
    ));
}
