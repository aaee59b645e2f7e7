//! OpenTelemetry pipeline bootstrap for a periodic span emitter with runtime
//! metrics.
//!
//! Builds a resource, OTLP/gRPC (or stdout) exporters, a tracer provider with
//! a batch span processor and a meter provider with a periodic reader. The
//! [`TelemetryGuard`] owns both providers and releases them, meter provider
//! first, when shut down or dropped.
//!
//! # Example
//!
//! ```no_run
//! use otel_runtime_metrics::{SpanEmitter, TelemetryBuilder, TelemetryError};
//! use otel_runtime_metrics::tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TelemetryError> {
//!     let mut guard = TelemetryBuilder::new()
//!         .endpoint("collector:4317")
//!         .service_name("my-service")
//!         .build()?;
//!     guard.start_runtime_metrics()?;
//!
//!     let cancel = CancellationToken::new();
//!     let emitter = SpanEmitter::new(guard.tracer(), &guard.config().emitter);
//!     emitter.run(&cancel).await;
//!
//!     guard.shutdown()
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod emitter;
mod error;
mod exporter;
mod guard;
mod resource;
mod runtime_metrics;
mod shutdown;

pub use builder::{DEPRECATED_RUNTIME_METRICS_ENV, ResourceConfigBuilder, TelemetryBuilder};
pub use config::{
    BatchConfig, DEFAULT_ENVIRONMENT, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_VERSION,
    DEFAULT_SPAN_NAME, DEFAULT_TRACER_NAME, EmitterConfig, EndpointConfig, ExporterKind,
    MetricsConfig, ResourceConfig, RuntimeMetricsConfig, TelemetryConfig, TracesConfig,
    resolve_endpoint,
};
pub use emitter::SpanEmitter;
pub use error::TelemetryError;
pub use exporter::{
    otlp_metric_exporter, otlp_span_exporter, stdout_metric_exporter, stdout_span_exporter,
};
pub use guard::TelemetryGuard;
pub use resource::{
    OTEL_RESOURCE_ATTRIBUTES, OTEL_SERVICE_NAME, RustResourceDetector, build_resource,
    parse_resource_attributes,
};
pub use runtime_metrics::{
    ProcessStatsSource, RuntimeMetrics, RuntimeStats, StatsSource, ThrottledStats,
    parse_proc_status,
};
pub use shutdown::{Release, ReleaseFailure, ShutdownReport, ShutdownStack};

/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry;
/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry_sdk;
/// Re-exported for version compatibility with this crate's dependencies.
pub use tokio_util;
/// Re-exported for version compatibility with this crate's dependencies.
pub use tracing;

/// Re-exported for users who want to construct custom configuration providers.
pub use figment;
