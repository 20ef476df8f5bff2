//! Portico: a single-function invocation gateway.
//!
//! The runtime loads exactly one registered function at startup, exposes
//! it over HTTP, and normalizes every inbound request into an [`Event`]
//! (a CloudEvent in structured or binary mode, a decoded JSON body, or a
//! raw request) before invoking the function on a bounded worker pool
//! with per-call Prometheus metrics. Functions can publish follow-up
//! CloudEvents through the configured publisher proxy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico_runtime::{
//!     register_function, Event, FunctionResponse, HandlerError, InvocationContext,
//! };
//!
//! async fn main_handler(
//!     event: Event,
//!     _ctx: Arc<InvocationContext>,
//! ) -> Result<FunctionResponse, HandlerError> {
//!     let name = event
//!         .data()
//!         .and_then(|data| data.get("name"))
//!         .and_then(|value| value.as_str())
//!         .unwrap_or("world");
//!
//!     Ok(FunctionResponse::json(&serde_json::json!({
//!         "greeting": format!("hello {name}"),
//!     }))?)
//! }
//!
//! register_function!("handler", "main", main_handler);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), portico_runtime::RuntimeError> {
//!     let config = portico_runtime::RuntimeConfig::from_env()?;
//!     let cancel = tokio_util::sync::CancellationToken::new();
//!
//!     let signal_cancel = cancel.clone();
//!     tokio::spawn(async move {
//!         portico_runtime::shutdown_signal().await;
//!         signal_cancel.cancel();
//!     });
//!
//!     portico_runtime::run(config, cancel).await
//! }
//! ```

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod event;
pub mod invoker;
pub mod metrics;
pub mod registry;
pub mod server;

pub use config::{ConfigError, RuntimeConfig};
pub use context::InvocationContext;
pub use emitter::{EmitError, EventEmitter};
pub use error::{InvocationError, RuntimeError};
pub use event::{Event, NormalizationError, RawRequest};
pub use invoker::{HandlerBinding, InvocationService};
pub use metrics::MetricsRegistry;
pub use registry::{FunctionMetadata, FunctionResponse, HandlerError, LoadError};
pub use server::{router, run, shutdown_signal, AppState};

#[doc(hidden)]
pub mod __internal {
    pub use inventory;
}
