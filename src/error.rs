//! Error types for telemetry initialisation and lifecycle.

use crate::shutdown::ShutdownReport;
use figment::Error as FigmentError;

/// Errors from telemetry initialisation and lifecycle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// Failed to extract configuration from sources.
    #[error("configuration error: {0}")]
    Config(#[source] Box<FigmentError>),

    /// A configuration value is out of range.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting {
        /// Dotted path of the setting.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Collector endpoint could not be resolved to a usable URL.
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint {
        /// The endpoint as it was configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `OTEL_RESOURCE_ATTRIBUTES` contains an entry that is not `key=value`.
    #[error("malformed resource attribute entry {entry:?} in OTEL_RESOURCE_ATTRIBUTES")]
    ResourceAttributes {
        /// The offending entry.
        entry: String,
    },

    /// Failed to create trace exporter.
    #[error("failed to create trace exporter")]
    TraceExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create metric exporter.
    #[error("failed to create metric exporter")]
    MetricExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to initialise tracing subscriber.
    #[error("failed to initialise tracing subscriber")]
    TracingSubscriber(#[from] tracing_subscriber::util::TryInitError),

    /// Runtime instrumentation was requested but metrics are disabled.
    #[error("cannot start runtime instrumentation: no meter provider is configured")]
    MeterProviderMissing,

    /// One or more providers failed to shut down.
    #[error("telemetry shutdown failed")]
    Shutdown(#[from] ShutdownReport),
}
