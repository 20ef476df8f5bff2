//! Runtime configuration loaded from environment variables.

use figment::providers::{Env, Serialized};
use figment::{Error as FigmentError, Figment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment variables the runtime reads. Everything is optional and
/// falls back to the defaults below.
const ENV_KEYS: &[&str] = &[
    "SERVICE_NAMESPACE",
    "FUNC_NAME",
    "FUNC_RUNTIME",
    "SERVER_HOST",
    "SERVER_PORT",
    "SERVER_NUMTHREADS",
    "SERVER_CALL_TIMEOUT",
    "HANDLER_MODULE_NAME",
    "HANDLER_FUNCTION_NAME",
    "TRACE_COLLECTOR_ENDPOINT",
    "PUBLISHER_PROXY_ADDRESS",
];

/// Errors that can occur when loading the runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The configuration is invalid or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level runtime configuration.
///
/// Field names match the (lowercased) environment variables, so the
/// environment provider overrides defaults directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Namespace the function is deployed into.
    pub service_namespace: String,

    /// Name of the deployed function, for the invocation context.
    pub func_name: String,

    /// Runtime identifier reported to the function.
    pub func_runtime: String,

    /// Host to bind the HTTP server to.
    pub server_host: String,

    /// Port to bind the HTTP server to.
    pub server_port: u16,

    /// Worker pool size: the maximum number of concurrently executing
    /// invocations.
    pub server_numthreads: usize,

    /// Per-invocation timeout in seconds.
    pub server_call_timeout: u64,

    /// Registered module the handler is resolved from.
    pub handler_module_name: String,

    /// Name of the handler within the module.
    pub handler_function_name: String,

    /// Trace collector endpoint, consumed by the external tracing setup.
    pub trace_collector_endpoint: Option<String>,

    /// Address events are published to; emission fails fast when unset.
    pub publisher_proxy_address: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            service_namespace: String::new(),
            func_name: String::new(),
            func_runtime: "rust".to_owned(),
            server_host: "0.0.0.0".to_owned(),
            server_port: 8080,
            server_numthreads: 50,
            server_call_timeout: 180,
            handler_module_name: "handler".to_owned(),
            handler_function_name: "main".to_owned(),
            trace_collector_endpoint: None,
            publisher_proxy_address: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from the process environment over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::raw().only(ENV_KEYS));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The configured per-invocation timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.server_call_timeout)
    }

    /// The address the HTTP server binds to, as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server_numthreads == 0 {
            return Err(ConfigError::Invalid(
                "SERVER_NUMTHREADS must be at least 1".to_owned(),
            ));
        }
        if self.server_call_timeout == 0 {
            return Err(ConfigError::Invalid(
                "SERVER_CALL_TIMEOUT must be at least 1 second".to_owned(),
            ));
        }
        Ok(())
    }
}
