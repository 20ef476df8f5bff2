//! Function registry and startup-time handler resolution.
//!
//! User functions are registered with [`register_function!`] and collected
//! through the `inventory` crate's distributed registry. The runtime
//! resolves exactly one of them at startup; a missing entry is fatal
//! before the server starts accepting traffic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::context::InvocationContext;
use crate::event::Event;

/// Error type user handlers may return. Anything implementing
/// `std::error::Error` converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a registered handler.
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<FunctionResponse, HandlerError>> + Send>>;

/// The statically-typed handler entry point: one event in, one response out.
pub type HandlerFn = fn(Event, Arc<InvocationContext>) -> HandlerFuture;

/// Metadata about a registered function.
pub struct FunctionMetadata {
    /// Module the function is registered under.
    pub module: &'static str,

    /// The function name within the module.
    pub name: &'static str,

    /// The handler entry point.
    pub handler: HandlerFn,
}

inventory::collect!(FunctionMetadata);

/// Failure to resolve the configured handler at startup.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no functions registered under module '{0}'")]
    ModuleNotFound(String),

    #[error("function '{name}' not found in module '{module}'")]
    FunctionNotFound { module: String, name: String },
}

/// Resolves the configured handler from the registry.
///
/// Called exactly once at startup; the environment is presumed immutable
/// for the process lifetime, so there is no fallback and no retry.
pub fn resolve(module: &str, name: &str) -> Result<&'static FunctionMetadata, LoadError> {
    let mut module_seen = false;
    for meta in inventory::iter::<FunctionMetadata> {
        if meta.module == module {
            module_seen = true;
            if meta.name == name {
                return Ok(meta);
            }
        }
    }

    if module_seen {
        Err(LoadError::FunctionNotFound {
            module: module.to_owned(),
            name: name.to_owned(),
        })
    } else {
        Err(LoadError::ModuleNotFound(module.to_owned()))
    }
}

/// Response produced by a user function.
#[derive(Debug, Clone)]
pub struct FunctionResponse {
    /// HTTP status code; defaults to 200.
    pub status: u16,

    /// The serialised response body.
    pub body: Vec<u8>,

    /// Content type of the body, if the handler declares one.
    pub content_type: Option<String>,
}

impl FunctionResponse {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::with_status(200, body)
    }

    /// A response with an explicit status code.
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: None,
        }
    }

    /// A `200 OK` JSON response serialised from `value`.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status: 200,
            body: serde_json::to_vec(value)?,
            content_type: Some("application/json".to_owned()),
        })
    }

    /// A `200 OK` plain-text response.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into().into_bytes(),
            content_type: Some("text/plain; charset=utf-8".to_owned()),
        }
    }

    /// A JSON error body of the form `{"error": message}`.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::to_vec(&serde_json::json!({ "error": message }))
            .unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            body,
            content_type: Some("application/json".to_owned()),
        }
    }

    /// Overrides the status code.
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// Registers a function with the runtime under a module and name.
///
/// The registered function must be an `async fn(Event, Arc<InvocationContext>)
/// -> Result<FunctionResponse, HandlerError>`.
///
/// ```ignore
/// async fn main_handler(
///     event: Event,
///     _ctx: Arc<InvocationContext>,
/// ) -> Result<FunctionResponse, HandlerError> {
///     Ok(FunctionResponse::text("hello"))
/// }
///
/// register_function!("handler", "main", main_handler);
/// ```
#[macro_export]
macro_rules! register_function {
    ($module:literal, $name:literal, $func:path) => {
        $crate::__internal::inventory::submit! {
            $crate::registry::FunctionMetadata {
                module: $module,
                name: $name,
                handler: |event, ctx| ::std::boxed::Box::pin($func(event, ctx)),
            }
        }
    };
}

impl std::fmt::Debug for FunctionMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionMetadata")
            .field("module", &self.module)
            .field("name", &self.name)
            .finish()
    }
}
