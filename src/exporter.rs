//! Exporter construction.
//!
//! Each signal is exported either over OTLP/gRPC or dumped to stdout. The
//! OTLP builders are driven by a macro since the span and metric builders
//! share their whole configuration surface but no common trait.

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use std::collections::HashMap;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

/// Converts configured headers into gRPC metadata, skipping entries that are
/// not valid metadata keys or ASCII values.
pub(crate) fn build_tonic_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        match (
            key.to_ascii_lowercase().parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            (Ok(k), Ok(v)) => {
                metadata.insert(k, v);
            }
            _ => {
                tracing::warn!(target: "otel_lifecycle", header = %key, "Skipping invalid export header");
            }
        }
    }
    metadata
}

macro_rules! build_otlp_exporter {
    ($config:expr, $endpoint:expr, $exporter_type:ident, $error_variant:ident) => {{
        let mut builder = opentelemetry_otlp::$exporter_type::builder()
            .with_tonic()
            .with_endpoint($endpoint)
            .with_timeout($config.endpoint.timeout);

        if !$config.endpoint.headers.is_empty() {
            builder = builder.with_metadata(build_tonic_metadata(&$config.endpoint.headers));
        }

        builder.build().map_err(TelemetryError::$error_variant)?
    }};
}

/// Builds the OTLP/gRPC span exporter.
///
/// # Errors
///
/// Fails when the endpoint is invalid or the transport cannot be set up.
pub fn otlp_span_exporter(
    config: &TelemetryConfig,
) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
    let endpoint = config.trace_endpoint()?;
    Ok(build_otlp_exporter!(config, endpoint, SpanExporter, TraceExporter))
}

/// Builds the OTLP/gRPC metric exporter.
///
/// # Errors
///
/// Fails when the endpoint is invalid or the transport cannot be set up.
pub fn otlp_metric_exporter(
    config: &TelemetryConfig,
) -> Result<opentelemetry_otlp::MetricExporter, TelemetryError> {
    let endpoint = config.metrics_endpoint()?;
    Ok(build_otlp_exporter!(
        config,
        endpoint,
        MetricExporter,
        MetricExporter
    ))
}

/// Span exporter printing to stdout.
pub fn stdout_span_exporter() -> opentelemetry_stdout::SpanExporter {
    opentelemetry_stdout::SpanExporter::default()
}

/// Metric exporter printing to stdout.
pub fn stdout_metric_exporter() -> opentelemetry_stdout::MetricExporter {
    opentelemetry_stdout::MetricExporter::default()
}
