//! Runtime error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::LoadError;

/// Request-scoped invocation failures. These are contained to the request
/// that triggered them and never crash the server.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("function invocation failed: {0}")]
    Handler(String),

    #[error("function panicked")]
    Panicked,

    #[error("function invocation timed out")]
    Timeout,

    #[error("worker pool is shut down")]
    PoolClosed,
}

impl InvocationError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Handler(_) => "function_error",
            Self::Panicked => "function_panic",
            Self::Timeout => "timeout",
            Self::PoolClosed => "pool_closed",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Handler(_) | Self::Panicked => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for InvocationError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Responses carry the failure category only; details stay in the
        // logs.
        let message = match &self {
            Self::Handler(_) | Self::Panicked => "Function execution failed".to_owned(),
            Self::Timeout => "Function execution timed out".to_owned(),
            Self::PoolClosed => "Service shutting down".to_owned(),
        };

        (status, message).into_response()
    }
}

/// Fatal startup failures surfaced from [`crate::run`].
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("function loading failed: {0}")]
    Load(#[from] LoadError),

    #[error("metrics recorder setup failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            InvocationError::Handler("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            InvocationError::Panicked.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            InvocationError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            InvocationError::PoolClosed.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn error_types() {
        assert_eq!(
            InvocationError::Handler("boom".into()).error_type(),
            "function_error"
        );
        assert_eq!(InvocationError::Timeout.error_type(), "timeout");
    }

    #[test]
    fn responses_do_not_leak_details() {
        let response = InvocationError::Handler("secret internal detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
