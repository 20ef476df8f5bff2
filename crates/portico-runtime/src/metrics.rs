//! Per-call metrics, exposed in the Prometheus text format.
//!
//! The registry wraps its own recorder instance rather than installing a
//! process-global one, so it can be constructed once at startup, injected
//! into the invocation path, and rendered by the exposition endpoint.

use http::Method;
use metrics::{Counter, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const CALLS_TOTAL: &str = "function_calls_total";
const FAILURES_TOTAL: &str = "function_failures_total";
const DURATION_SECONDS: &str = "function_duration_seconds";

/// Classic Prometheus duration buckets, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// The three instrument handles for one HTTP method.
pub struct MethodInstruments {
    /// Incremented once per invocation, success or failure.
    pub calls: Counter,
    /// Incremented when the function fails or times out.
    pub failures: Counter,
    /// Observed invocation duration in seconds.
    pub duration: Histogram,
}

/// Process-wide metrics registry, keyed by HTTP method.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(DURATION_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();

        recorder.describe_counter(
            KeyName::from_const_str(CALLS_TOTAL),
            None,
            SharedString::const_str("Number of calls to user function"),
        );
        recorder.describe_counter(
            KeyName::from_const_str(FAILURES_TOTAL),
            None,
            SharedString::const_str("Number of exceptions in user function"),
        );
        recorder.describe_histogram(
            KeyName::from_const_str(DURATION_SECONDS),
            None,
            SharedString::const_str("Duration of user function in seconds"),
        );

        Ok(Self { recorder, handle })
    }

    /// Instrument handles for the given request method. Handles for the
    /// same method share the underlying series, so increments accumulate.
    pub fn instruments(&self, method: &Method) -> MethodInstruments {
        let labels = vec![Label::new("method", method.as_str().to_owned())];

        MethodInstruments {
            calls: self
                .recorder
                .register_counter(&Key::from_parts(CALLS_TOTAL, labels.clone()), &METADATA),
            failures: self
                .recorder
                .register_counter(&Key::from_parts(FAILURES_TOTAL, labels.clone()), &METADATA),
            duration: self
                .recorder
                .register_histogram(&Key::from_parts(DURATION_SECONDS, labels), &METADATA),
        }
    }

    /// A handle for rendering and recorder upkeep.
    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Renders the current state in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_method() {
        let registry = MetricsRegistry::new().unwrap();

        registry.instruments(&Method::POST).calls.increment(1);
        registry.instruments(&Method::POST).calls.increment(1);
        registry.instruments(&Method::GET).calls.increment(1);

        let rendered = registry.render();
        assert!(rendered.contains(r#"function_calls_total{method="POST"} 2"#));
        assert!(rendered.contains(r#"function_calls_total{method="GET"} 1"#));
    }

    #[test]
    fn failures_are_separate_from_calls() {
        let registry = MetricsRegistry::new().unwrap();
        let instruments = registry.instruments(&Method::POST);

        instruments.calls.increment(1);
        instruments.failures.increment(1);

        let rendered = registry.render();
        assert!(rendered.contains(r#"function_calls_total{method="POST"} 1"#));
        assert!(rendered.contains(r#"function_failures_total{method="POST"} 1"#));
    }

    #[test]
    fn duration_renders_as_histogram() {
        let registry = MetricsRegistry::new().unwrap();
        registry.instruments(&Method::POST).duration.record(0.02);

        let rendered = registry.render();
        assert!(rendered.contains("function_duration_seconds_bucket"));
        assert!(rendered.contains(r#"function_duration_seconds_count{method="POST"} 1"#));
    }

    #[test]
    fn registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();

        a.instruments(&Method::POST).calls.increment(1);

        assert!(a.render().contains(r#"function_calls_total{method="POST"} 1"#));
        assert!(!b.render().contains(r#"method="POST""#));
    }
}
