//! Per-process invocation context handed to every handler call.

use std::time::Duration;

use crate::config::RuntimeConfig;

/// Immutable description of the deployed function, created once at startup
/// and shared read-only across all concurrent invocations.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    function_name: String,
    namespace: String,
    call_timeout: Duration,
    runtime: String,
}

impl InvocationContext {
    pub fn new(
        function_name: impl Into<String>,
        namespace: impl Into<String>,
        call_timeout: Duration,
        runtime: impl Into<String>,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            namespace: namespace.into(),
            call_timeout,
            runtime: runtime.into(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.func_name.clone(),
            config.service_namespace.clone(),
            config.call_timeout(),
            config.func_runtime.clone(),
        )
    }

    /// Name of the deployed function.
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Namespace the function runs in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The invocation timeout the runtime enforces.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Runtime identifier, e.g. `rust`.
    pub fn runtime(&self) -> &str {
        &self.runtime
    }
}
