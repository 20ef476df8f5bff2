//! HTTP surface and runtime entrypoint.
//!
//! One function per process: every verb on `/` invokes it, with health,
//! metrics exposition, and favicon endpoints alongside.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, MethodFilter};
use axum::Router;
use http::header;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::InvocationContext;
use crate::emitter::EventEmitter;
use crate::error::RuntimeError;
use crate::event::RawRequest;
use crate::invoker::{HandlerBinding, InvocationService};
use crate::metrics::{MetricsRegistry, PROMETHEUS_CONTENT_TYPE};
use crate::registry;

/// Time allowed for in-flight invocations to finish after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Interval for recorder housekeeping.
const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    pub invoker: InvocationService,
    pub metrics: Arc<MetricsRegistry>,
}

/// Builds the runtime's router.
pub fn router(state: Arc<AppState>) -> Router {
    let function_methods = MethodFilter::GET
        .or(MethodFilter::POST)
        .or(MethodFilter::PUT)
        .or(MethodFilter::HEAD)
        .or(MethodFilter::OPTIONS)
        .or(MethodFilter::DELETE);

    Router::new()
        .route("/", on(function_methods, invoke_function))
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .route("/favicon.ico", get(favicon))
        .with_state(state)
}

/// Loads the configured function and serves it until `cancel` fires.
///
/// Resolution happens before the listener binds: a missing function is
/// fatal and the process never starts serving traffic.
pub async fn run(config: RuntimeConfig, cancel: CancellationToken) -> Result<(), RuntimeError> {
    let meta = registry::resolve(&config.handler_module_name, &config.handler_function_name)?;

    let metrics = Arc::new(MetricsRegistry::new()?);
    let context = Arc::new(InvocationContext::from_config(&config));
    let emitter = Arc::new(EventEmitter::new(config.publisher_proxy_address.clone()));
    let binding = HandlerBinding::new(meta, metrics.clone());

    tracing::info!(
        function = %binding.name(),
        namespace = %context.namespace(),
        workers = config.server_numthreads,
        call_timeout_secs = config.server_call_timeout,
        publisher_configured = emitter.is_configured(),
        "function loaded"
    );
    if let Some(endpoint) = &config.trace_collector_endpoint {
        tracing::info!(endpoint = %endpoint, "trace collector endpoint configured");
    }

    let invoker = InvocationService::new(
        binding,
        context,
        emitter,
        config.server_numthreads,
        config.call_timeout(),
    );

    let state = Arc::new(AppState { invoker, metrics });
    spawn_metrics_upkeep(state.metrics.clone(), cancel.clone());

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "runtime listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    let mut server_task = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server_task => {
            result.map_err(std::io::Error::other)??;
        }
        () = cancel.cancelled() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await {
                Ok(result) => result.map_err(std::io::Error::other)??,
                Err(_) => {
                    tracing::warn!(
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        "grace period elapsed, abandoning in-flight invocations"
                    );
                    server_task.abort();
                }
            }
        }
    }

    tracing::info!("runtime shutdown complete");
    Ok(())
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received Ctrl+C");
        }
        () = terminate => {
            tracing::info!("received SIGTERM");
        }
    }
}

fn spawn_metrics_upkeep(metrics: Arc<MetricsRegistry>, cancel: CancellationToken) {
    let handle = metrics.handle();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => handle.run_upkeep(),
                () = cancel.cancelled() => break,
            }
        }
    });
}

async fn invoke_function(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RawRequest {
        method,
        path: uri.path().to_owned(),
        query,
        headers,
        body,
    };

    state.invoker.invoke(request).await
}

async fn healthz() -> &'static str {
    "OK"
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}
