//! Configuration types for the telemetry pipeline.
//!
//! These types are designed to be deserialised from multiple sources using
//! figment, supporting layered configuration from defaults, files, and
//! environment variables.

use crate::error::TelemetryError;
use http::Uri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Service name reported when nothing overrides it.
pub const DEFAULT_SERVICE_NAME: &str = "client";
/// Service version reported when nothing overrides it.
pub const DEFAULT_SERVICE_VERSION: &str = "0.1.0";
/// Deployment environment reported when nothing overrides it.
pub const DEFAULT_ENVIRONMENT: &str = "dev";
/// Name of the tracer the emitter draws spans from.
pub const DEFAULT_TRACER_NAME: &str = "otelruntimemetrics.service.tracer";
/// Name of every emitted span.
pub const DEFAULT_SPAN_NAME: &str = "MyTrace";

/// Where a signal is exported to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// OTLP over gRPC to the configured collector.
    #[default]
    Otlp,
    /// Human-readable dump to stdout, for troubleshooting.
    #[serde(alias = "console")]
    Stdout,
}

impl ExporterKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ExporterKind::Otlp => "otlp",
            ExporterKind::Stdout => "stdout",
        }
    }
}

/// Complete telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Collector endpoint configuration.
    pub endpoint: EndpointConfig,

    /// Resource configuration.
    pub resource: ResourceConfig,

    /// Traces configuration.
    pub traces: TracesConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Runtime instrumentation configuration.
    pub runtime: RuntimeMetricsConfig,

    /// Span emitter configuration.
    pub emitter: EmitterConfig,

    /// Whether to initialise the tracing subscriber.
    pub init_tracing_subscriber: bool,

    /// Whether to install the providers as the process-wide defaults in
    /// `opentelemetry::global`.
    pub install_global: bool,

    /// Name for the instrumentation scope of the `tracing` bridge.
    /// Defaults to the service name.
    pub instrumentation_scope_name: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            resource: ResourceConfig::default(),
            traces: TracesConfig::default(),
            metrics: MetricsConfig::default(),
            runtime: RuntimeMetricsConfig::default(),
            emitter: EmitterConfig::default(),
            init_tracing_subscriber: true,
            install_global: false,
            instrumentation_scope_name: None,
        }
    }
}

impl TelemetryConfig {
    /// Resolved URL the trace exporter sends to.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidEndpoint`] if the address is malformed.
    pub fn trace_endpoint(&self) -> Result<String, TelemetryError> {
        resolve_endpoint(&self.endpoint.address, self.endpoint.insecure)
    }

    /// Resolved URL the metric exporter sends to. Falls back to the trace
    /// endpoint when no metrics-specific address is configured.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidEndpoint`] if the address is malformed.
    pub fn metrics_endpoint(&self) -> Result<String, TelemetryError> {
        let address = self
            .metrics
            .endpoint
            .as_deref()
            .unwrap_or(&self.endpoint.address);
        resolve_endpoint(address, self.endpoint.insecure)
    }

    /// Checks the emitter period and every endpoint that an enabled OTLP
    /// exporter will use.
    pub(crate) fn validate(&self) -> Result<(), TelemetryError> {
        if self.emitter.period.is_zero() {
            return Err(TelemetryError::InvalidSetting {
                key: "emitter.period",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.traces.enabled && self.traces.exporter == ExporterKind::Otlp {
            self.trace_endpoint()?;
        }
        if self.metrics.enabled && self.metrics.exporter == ExporterKind::Otlp {
            self.metrics_endpoint()?;
        }
        Ok(())
    }

    /// Scope name for the `tracing` bridge layer.
    pub(crate) fn scope_name(&self) -> String {
        self.instrumentation_scope_name
            .clone()
            .unwrap_or_else(|| self.resource.service_name.clone())
    }
}

/// Turns a collector address into a URL tonic can dial.
///
/// A bare `host:port` gets `http://` when insecure and `https://` otherwise.
/// An explicit `http` or `https` scheme decides the transport on its own and
/// the insecure flag is ignored.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidEndpoint`] when the address cannot be
/// used.
pub fn resolve_endpoint(address: &str, insecure: bool) -> Result<String, TelemetryError> {
    let invalid = |reason: &str| TelemetryError::InvalidEndpoint {
        url: address.to_string(),
        reason: reason.to_string(),
    };

    let address = address.trim();
    if address.is_empty() {
        return Err(invalid("address is empty"));
    }

    let url = match address.split_once("://") {
        Some(("http" | "https", _)) => address.to_string(),
        Some((scheme, _)) => {
            return Err(invalid(&format!("unsupported scheme {scheme:?}")));
        }
        None if insecure => format!("http://{address}"),
        None => format!("https://{address}"),
    };

    // Host is checked before the trailing slash goes, so `http:///` cannot
    // collapse into something that parses.
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
    match uri.authority().map(|authority| authority.host()) {
        Some(host) if !host.is_empty() => Ok(url.trim_end_matches('/').to_string()),
        _ => Err(invalid("missing host")),
    }
}

/// Collector endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Collector address, either `host:port` or a full `http(s)://` URL.
    pub address: String,

    /// Use a plaintext channel for addresses given without a scheme.
    pub insecure: bool,

    /// Export request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// gRPC metadata sent with every export request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: "localhost:4317".to_string(),
            insecure: true,
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// Resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Service name.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment (e.g., "production", "dev").
    pub deployment_environment: String,

    /// Additional resource attributes.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Run the host, OS and Rust runtime detectors.
    pub detect_host: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
            deployment_environment: DEFAULT_ENVIRONMENT.to_string(),
            attributes: HashMap::new(),
            detect_host: true,
        }
    }
}

/// Trace signal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesConfig {
    /// Whether spans are exported. When disabled, spans are dropped.
    pub enabled: bool,

    /// Where spans go.
    pub exporter: ExporterKind,

    /// Batch span processor configuration.
    pub batch: BatchConfig,
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter: ExporterKind::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Batch span processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum queue size.
    pub max_queue_size: usize,

    /// Maximum batch size for export.
    pub max_export_batch_size: usize,

    /// Scheduled delay between exports.
    #[serde(with = "humantime_serde")]
    pub scheduled_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
        }
    }
}

/// Metric signal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether a meter provider is built at all.
    pub enabled: bool,

    /// Where metrics go.
    pub exporter: ExporterKind,

    /// Collector address for metrics, if different from `endpoint.address`.
    pub endpoint: Option<String>,

    /// Periodic reader collection interval.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter: ExporterKind::default(),
            endpoint: None,
            interval: Duration::from_secs(10),
        }
    }
}

/// Runtime instrumentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeMetricsConfig {
    /// Whether the binary starts runtime instrumentation.
    pub enabled: bool,

    /// Process statistics are read no more often than this.
    #[serde(with = "humantime_serde")]
    pub min_read_interval: Duration,

    /// Also publish the legacy `process.runtime.rust.*` instrument names.
    pub deprecated_names: bool,
}

impl Default for RuntimeMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_read_interval: Duration::from_secs(10),
            deprecated_names: true,
        }
    }
}

/// Span emitter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Tracer (instrumentation scope) name.
    pub tracer_name: String,

    /// Name given to each emitted span.
    pub span_name: String,

    /// Time between two emitted spans.
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            tracer_name: DEFAULT_TRACER_NAME.to_string(),
            span_name: DEFAULT_SPAN_NAME.to_string(),
            period: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_gets_http_when_insecure() {
        assert_eq!(
            resolve_endpoint("collector:4317", true).unwrap(),
            "http://collector:4317"
        );
    }

    #[test]
    fn bare_address_gets_https_when_secure() {
        assert_eq!(
            resolve_endpoint("collector:4317", false).unwrap(),
            "https://collector:4317"
        );
    }

    #[test]
    fn explicit_scheme_is_kept_and_trailing_slash_stripped() {
        assert_eq!(
            resolve_endpoint("http://collector:4317/", true).unwrap(),
            "http://collector:4317"
        );
        assert_eq!(
            resolve_endpoint("https://collector.example.com", false).unwrap(),
            "https://collector.example.com"
        );
    }

    #[test]
    fn explicit_scheme_overrides_insecure_flag() {
        assert_eq!(
            resolve_endpoint("https://collector:4317", true).unwrap(),
            "https://collector:4317"
        );
        assert_eq!(
            resolve_endpoint("http://collector:4317", false).unwrap(),
            "http://collector:4317"
        );
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for address in [
            "",
            "   ",
            "not a url",
            "ftp://collector:21",
            "http://",
            "http:///",
            "https:///v1/traces",
        ] {
            let result = resolve_endpoint(address, true);
            assert!(
                matches!(result, Err(TelemetryError::InvalidEndpoint { .. })),
                "{address:?} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn metrics_endpoint_falls_back_to_trace_endpoint() {
        let mut config = TelemetryConfig::default();
        assert_eq!(config.metrics_endpoint().unwrap(), "http://localhost:4317");

        config.metrics.endpoint = Some("metrics-collector:4317".to_string());
        assert_eq!(
            config.metrics_endpoint().unwrap(),
            "http://metrics-collector:4317"
        );
        assert_eq!(config.trace_endpoint().unwrap(), "http://localhost:4317");
    }

    #[test]
    fn validate_ignores_endpoints_of_stdout_exporters() {
        let mut config = TelemetryConfig::default();
        config.endpoint.address = "not a url".to_string();
        assert!(config.validate().is_err());

        config.traces.exporter = ExporterKind::Stdout;
        config.metrics.exporter = ExporterKind::Stdout;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_emitter_period_is_rejected() {
        let mut config = TelemetryConfig::default();
        config.emitter.period = Duration::ZERO;

        assert!(matches!(
            config.validate(),
            Err(TelemetryError::InvalidSetting { key: "emitter.period", .. })
        ));
    }

    #[test]
    fn scope_name_defaults_to_service_name() {
        let mut config = TelemetryConfig::default();
        assert_eq!(config.scope_name(), DEFAULT_SERVICE_NAME);

        config.instrumentation_scope_name = Some("custom-scope".to_string());
        assert_eq!(config.scope_name(), "custom-scope");
    }

    #[test]
    fn defaults_match_the_demo_program() {
        let config = TelemetryConfig::default();
        assert_eq!(config.resource.service_name, "client");
        assert_eq!(config.resource.service_version, "0.1.0");
        assert_eq!(config.resource.deployment_environment, "dev");
        assert_eq!(config.metrics.interval, Duration::from_secs(10));
        assert_eq!(config.runtime.min_read_interval, Duration::from_secs(10));
        assert_eq!(config.emitter.period, Duration::from_secs(30));
        assert_eq!(config.emitter.span_name, "MyTrace");
        assert!(config.endpoint.insecure);
        assert!(!config.install_global);
    }

    #[test]
    fn test_batch_config_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_queue_size, 2048);
        assert_eq!(config.max_export_batch_size, 512);
        assert_eq!(config.scheduled_delay, Duration::from_secs(5));
    }
}
