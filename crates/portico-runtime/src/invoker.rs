//! Invocation orchestration: metrics bracketing, bounded concurrency,
//! timeout enforcement, and response mapping for one request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http::{header, HeaderValue};
use tokio::sync::Semaphore;

use crate::context::InvocationContext;
use crate::emitter::EventEmitter;
use crate::error::InvocationError;
use crate::event::{normalize, RawRequest};
use crate::metrics::MetricsRegistry;
use crate::registry::{FunctionMetadata, FunctionResponse, HandlerFn};

/// The resolved handler plus the metric families it reports into.
/// Created once at startup, shared read-only by every invocation.
pub struct HandlerBinding {
    name: String,
    handler: HandlerFn,
    metrics: Arc<MetricsRegistry>,
}

impl HandlerBinding {
    pub fn new(meta: &FunctionMetadata, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            name: format!("{}.{}", meta.module, meta.name),
            handler: meta.handler,
            metrics,
        }
    }

    /// Qualified `module.function` name, for logging.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs one request end to end: normalize, dispatch, record, respond.
///
/// Invocations run on a fixed-size worker pool; requests beyond capacity
/// queue for a permit. A timed-out invocation gets a best-effort abort,
/// which lands at the handler's next await point. A handler that never
/// yields keeps its worker slot occupied until it returns on its own.
pub struct InvocationService {
    binding: HandlerBinding,
    context: Arc<InvocationContext>,
    emitter: Arc<EventEmitter>,
    workers: Arc<Semaphore>,
    call_timeout: Duration,
}

impl InvocationService {
    pub fn new(
        binding: HandlerBinding,
        context: Arc<InvocationContext>,
        emitter: Arc<EventEmitter>,
        pool_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            binding,
            context,
            emitter,
            workers: Arc::new(Semaphore::new(pool_size)),
            call_timeout,
        }
    }

    /// Number of currently available worker slots.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    pub async fn invoke(&self, request: RawRequest) -> Response {
        let method = request.method.clone();
        let instruments = self.binding.metrics.instruments(&method);

        instruments.calls.increment(1);
        let started = Instant::now();

        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                instruments.failures.increment(1);
                instruments.duration.record(started.elapsed().as_secs_f64());
                return InvocationError::PoolClosed.into_response();
            }
        };

        let (event, degraded) = normalize(Arc::new(request), self.emitter.clone());
        if let Some(warning) = degraded {
            tracing::warn!(
                function = %self.binding.name,
                method = %method,
                error = %warning,
                "request normalization degraded"
            );
        }

        let handler = self.binding.handler;
        let context = self.context.clone();
        let mut task = tokio::spawn(async move {
            // The permit travels with the task: the slot frees when the
            // handler actually finishes, not when the service stops
            // waiting for it.
            let _permit = permit;
            handler(event, context).await
        });

        let outcome = tokio::time::timeout(self.call_timeout, &mut task).await;
        instruments.duration.record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(Ok(response))) => into_http_response(response),
            Ok(Ok(Err(err))) => {
                instruments.failures.increment(1);
                tracing::error!(
                    function = %self.binding.name,
                    method = %method,
                    error = %err,
                    "function returned an error"
                );
                InvocationError::Handler(err.to_string()).into_response()
            }
            Ok(Err(join_err)) => {
                instruments.failures.increment(1);
                tracing::error!(
                    function = %self.binding.name,
                    method = %method,
                    "function panicked"
                );
                if join_err.is_panic() {
                    InvocationError::Panicked.into_response()
                } else {
                    InvocationError::Handler(join_err.to_string()).into_response()
                }
            }
            Err(_elapsed) => {
                instruments.failures.increment(1);
                tracing::error!(
                    function = %self.binding.name,
                    method = %method,
                    timeout_secs = self.call_timeout.as_secs_f64(),
                    "function invocation timed out"
                );
                task.abort();
                InvocationError::Timeout.into_response()
            }
        }
    }
}

/// Maps the function's return value onto an HTTP response.
fn into_http_response(response: FunctionResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match response
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        Some(content_type) => {
            (status, [(header::CONTENT_TYPE, content_type)], response.body).into_response()
        }
        None => (status, response.body).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_mapping_defaults() {
        let mapped = into_http_response(FunctionResponse::ok(b"hi".to_vec()));
        assert_eq!(mapped.status(), StatusCode::OK);

        let mapped = into_http_response(FunctionResponse::with_status(201, b"".to_vec()));
        assert_eq!(mapped.status(), StatusCode::CREATED);

        // Out-of-range codes collapse to 500 instead of panicking.
        let mapped = into_http_response(FunctionResponse::with_status(99, b"".to_vec()));
        assert_eq!(mapped.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_mapping_content_type() {
        let mapped =
            into_http_response(FunctionResponse::json(&serde_json::json!({"ok": true})).unwrap());
        assert_eq!(
            mapped.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
