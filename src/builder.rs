//! Builder for telemetry configuration.
//!
//! The builder supports layered configuration from multiple sources:
//! 1. Compiled defaults
//! 2. Configuration files (TOML)
//! 3. Environment variables
//! 4. Programmatic overrides
//!
//! Sources are merged in order, with later sources taking precedence.

use crate::TelemetryError;
use crate::config::{ExporterKind, ResourceConfig, TelemetryConfig};
use crate::guard::TelemetryGuard;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use humantime_serde::re::humantime;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Switch for the legacy runtime instrument names.
pub const DEPRECATED_RUNTIME_METRICS_ENV: &str = "OTEL_RUST_X_DEPRECATED_RUNTIME_METRICS";

/// Builder for configuring and starting the telemetry pipeline.
///
/// # Example
///
/// ```no_run
/// use otel_runtime_metrics::{TelemetryBuilder, TelemetryError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), TelemetryError> {
///     let guard = TelemetryBuilder::new()
///         .with_file("otel-runtime-metrics.toml")
///         .with_standard_env()
///         .endpoint("collector:4317")
///         .service_name("my-service")
///         .build()?;
///
///     guard.shutdown()
/// }
/// ```
#[must_use = "builders do nothing unless .build() is called"]
pub struct TelemetryBuilder {
    figment: Figment,
    resource_attributes: HashMap<String, String>,
}

impl TelemetryBuilder {
    /// Creates a new builder with default configuration.
    ///
    /// Defaults include:
    /// - Endpoint: `localhost:4317` over an insecure gRPC channel
    /// - Traces and metrics exported over OTLP
    /// - Runtime metrics read at most every 10 seconds
    /// - One `MyTrace` span every 30 seconds
    pub fn new() -> Self {
        Self::from_figment(Figment::from(Serialized::defaults(
            TelemetryConfig::default(),
        )))
    }

    /// Creates a builder from an existing figment.
    ///
    /// The figment should start from `Serialized::defaults(TelemetryConfig::default())`
    /// or otherwise provide every key.
    pub fn from_figment(figment: Figment) -> Self {
        Self {
            figment,
            resource_attributes: HashMap::new(),
        }
    }

    /// Merges configuration from a TOML file.
    ///
    /// If the file doesn't exist, it's silently skipped.
    ///
    /// ```toml
    /// [endpoint]
    /// address = "collector:4317"
    ///
    /// [metrics]
    /// exporter = "stdout"
    /// interval = "15s"
    /// ```
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            self.figment = self.figment.merge(Toml::file(path));
        }
        self
    }

    /// Merges configuration from environment variables with the given prefix.
    ///
    /// Nested keys are separated by a double underscore. With prefix
    /// `OTEL_RUNTIME_METRICS_`:
    /// - `OTEL_RUNTIME_METRICS_ENDPOINT__ADDRESS` → `endpoint.address`
    /// - `OTEL_RUNTIME_METRICS_METRICS__EXPORTER` → `metrics.exporter`
    /// - `OTEL_RUNTIME_METRICS_EMITTER__PERIOD` → `emitter.period`
    pub fn with_env(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(prefix).split("__"));
        self
    }

    /// Merges configuration from standard OpenTelemetry environment variables.
    ///
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT` → endpoint address
    /// - `OTEL_EXPORTER_OTLP_METRICS_ENDPOINT` → metrics endpoint address
    /// - `OTEL_EXPORTER_OTLP_INSECURE` → plaintext channel
    /// - `OTEL_EXPORTER_OTLP_TIMEOUT` → export timeout in milliseconds
    /// - `OTEL_TRACES_EXPORTER` → `otlp`, `console`/`stdout`, or `none`
    /// - `OTEL_METRICS_EXPORTER` → `otlp`, `console`/`stdout`, or `none`
    /// - `OTEL_METRIC_EXPORT_INTERVAL` → reader interval in milliseconds
    /// - `OTEL_RUST_X_DEPRECATED_RUNTIME_METRICS` → legacy runtime instrument names
    ///
    /// `OTEL_SERVICE_NAME` and `OTEL_RESOURCE_ATTRIBUTES` are applied when the
    /// resource is built.
    pub fn with_standard_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.address", endpoint));
        }

        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT") {
            self.figment = self
                .figment
                .merge(Serialized::default("metrics.endpoint", endpoint));
        }

        if let Some(insecure) = env_bool("OTEL_EXPORTER_OTLP_INSECURE") {
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.insecure", insecure));
        }

        if let Some(timeout) = env_millis("OTEL_EXPORTER_OTLP_TIMEOUT") {
            self = self.timeout(timeout);
        }

        if let Ok(exporter) = std::env::var("OTEL_TRACES_EXPORTER") {
            self = self.apply_exporter_env("traces", &exporter);
        }

        if let Ok(exporter) = std::env::var("OTEL_METRICS_EXPORTER") {
            self = self.apply_exporter_env("metrics", &exporter);
        }

        if let Some(interval) = env_millis("OTEL_METRIC_EXPORT_INTERVAL") {
            self = self.metric_interval(interval);
        }

        if let Some(enabled) = env_bool(DEPRECATED_RUNTIME_METRICS_ENV) {
            self = self.deprecated_runtime_metrics(enabled);
        }

        self
    }

    fn apply_exporter_env(mut self, signal: &str, value: &str) -> Self {
        let kind = match value.trim().to_ascii_lowercase().as_str() {
            "none" => {
                self.figment = self
                    .figment
                    .merge(Serialized::default(&format!("{signal}.enabled"), false));
                return self;
            }
            "console" | "stdout" => ExporterKind::Stdout,
            "otlp" => ExporterKind::Otlp,
            other => {
                tracing::warn!(target: "otel_lifecycle", signal, exporter = other, "Unknown exporter, keeping configured one");
                return self;
            }
        };
        self.figment = self
            .figment
            .merge(Serialized::default(&format!("{signal}.enabled"), true))
            .merge(Serialized::default(&format!("{signal}.exporter"), kind.as_str()));
        self
    }

    /// Sets the collector address, `host:port` or a full URL.
    ///
    /// This overrides any configuration from files or environment variables.
    pub fn endpoint(mut self, address: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.address", address.into()));
        self
    }

    /// Chooses between a plaintext (`true`) and a TLS (`false`) channel.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.insecure", insecure));
        self
    }

    /// Sends metrics to a different collector address than traces.
    pub fn metrics_endpoint(mut self, address: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics.endpoint", address.into()));
        self
    }

    /// Sets the export request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.timeout", humantime_string(timeout)));
        self
    }

    /// Adds a gRPC metadata entry to all export requests.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let header_key = format!("endpoint.headers.{}", key.into());
        self.figment = self
            .figment
            .merge(Serialized::default(&header_key, value.into()));
        self
    }

    /// Sets the service name resource attribute.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("resource.service_name", name.into()));
        self
    }

    /// Sets the service version resource attribute.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "resource.service_version",
            version.into(),
        ));
        self
    }

    /// Sets the deployment environment resource attribute.
    pub fn deployment_environment(mut self, env: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "resource.deployment_environment",
            env.into(),
        ));
        self
    }

    /// Adds a resource attribute.
    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    /// Configures the resource using a builder function.
    ///
    /// ```no_run
    /// use otel_runtime_metrics::{TelemetryBuilder, TelemetryError};
    ///
    /// let _guard = TelemetryBuilder::new()
    ///     .resource(|r| r
    ///         .service_name("my-service")
    ///         .service_version(env!("CARGO_PKG_VERSION"))
    ///         .deployment_environment("production"))
    ///     .build()?;
    /// # Ok::<(), TelemetryError>(())
    /// ```
    pub fn resource<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ResourceConfigBuilder) -> ResourceConfigBuilder,
    {
        let builder = f(ResourceConfigBuilder::new());

        if let Some(name) = builder.service_name {
            self = self.service_name(name);
        }
        if let Some(version) = builder.service_version {
            self = self.service_version(version);
        }
        if let Some(env) = builder.deployment_environment {
            self = self.deployment_environment(env);
        }
        if let Some(detect) = builder.detect_host {
            self.figment = self
                .figment
                .merge(Serialized::default("resource.detect_host", detect));
        }
        self.resource_attributes.extend(builder.attributes);

        self
    }

    /// Enables or disables span export.
    ///
    /// Default: enabled
    pub fn traces(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("traces.enabled", enabled));
        self
    }

    /// Enables or disables the meter provider.
    ///
    /// Default: enabled
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics.enabled", enabled));
        self
    }

    /// Selects where spans are exported.
    pub fn trace_exporter(mut self, kind: ExporterKind) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("traces.exporter", kind.as_str()));
        self
    }

    /// Selects where metrics are exported.
    pub fn metric_exporter(mut self, kind: ExporterKind) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics.exporter", kind.as_str()));
        self
    }

    /// Sets the periodic reader interval.
    pub fn metric_interval(mut self, interval: Duration) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics.interval", humantime_string(interval)));
        self
    }

    /// Enables or disables runtime instrumentation in the binary.
    pub fn runtime_metrics(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("runtime.enabled", enabled));
        self
    }

    /// Sets how often process statistics may be read at most.
    pub fn min_read_interval(mut self, interval: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "runtime.min_read_interval",
            humantime_string(interval),
        ));
        self
    }

    /// Publishes the legacy runtime instrument names as well.
    pub fn deprecated_runtime_metrics(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("runtime.deprecated_names", enabled));
        self
    }

    /// Sets the tracer the emitter draws spans from.
    pub fn tracer_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("emitter.tracer_name", name.into()));
        self
    }

    /// Sets the name of every emitted span.
    pub fn span_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("emitter.span_name", name.into()));
        self
    }

    /// Sets the time between emitted spans.
    pub fn span_period(mut self, period: Duration) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("emitter.period", humantime_string(period)));
        self
    }

    /// Also installs the providers in `opentelemetry::global`.
    ///
    /// Off by default; the guard hands out tracers and meters directly.
    pub fn install_global(mut self, install: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("install_global", install));
        self
    }

    /// Disables automatic tracing subscriber initialisation.
    ///
    /// By default, a `tracing-subscriber` registry with an `EnvFilter`, a fmt
    /// layer and a `tracing-opentelemetry` layer is installed.
    pub fn without_tracing_subscriber(mut self) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("init_tracing_subscriber", false));
        self
    }

    /// Sets the instrumentation scope name of the `tracing` bridge.
    ///
    /// If not set, defaults to the service name.
    pub fn instrumentation_scope_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "instrumentation_scope_name",
            name.into(),
        ));
        self
    }

    /// Extracts the configuration for inspection or debugging.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails or if an endpoint
    /// used by an OTLP exporter is invalid.
    pub fn extract_config(&self) -> Result<TelemetryConfig, TelemetryError> {
        let mut config: TelemetryConfig = self
            .figment
            .extract()
            .map_err(|e| TelemetryError::Config(Box::new(e)))?;

        // Merge resource attributes that couldn't go through figment
        config
            .resource
            .attributes
            .extend(self.resource_attributes.clone());

        config.validate()?;
        Ok(config)
    }

    /// Builds and starts the telemetry pipeline.
    ///
    /// Returns a [`TelemetryGuard`] that owns the providers. When the guard
    /// is dropped, all providers are flushed and shut down.
    ///
    /// Must be called from within a Tokio runtime when an OTLP exporter is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction or validation fails
    /// - `OTEL_RESOURCE_ATTRIBUTES` is malformed
    /// - An exporter cannot be created
    /// - Tracing subscriber initialisation fails
    pub fn build(self) -> Result<TelemetryGuard, TelemetryError> {
        let config = self.extract_config()?;
        TelemetryGuard::from_config(config)
    }
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn humantime_string(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

/// Builder for resource configuration.
///
/// Used with [`TelemetryBuilder::resource`] for fluent configuration.
#[derive(Default)]
#[must_use = "builders do nothing unless passed to TelemetryBuilder::resource"]
pub struct ResourceConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    deployment_environment: Option<String>,
    attributes: HashMap<String, String>,
    detect_host: Option<bool>,
}

impl ResourceConfigBuilder {
    /// Creates a new resource config builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Sets the service version.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Sets the deployment environment.
    pub fn deployment_environment(mut self, env: impl Into<String>) -> Self {
        self.deployment_environment = Some(env.into());
        self
    }

    /// Adds a resource attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Turns host, OS and Rust runtime detection on or off.
    pub fn detect_host(mut self, detect: bool) -> Self {
        self.detect_host = Some(detect);
        self
    }

    /// Builds a standalone resource configuration, filling unset fields with
    /// defaults.
    pub fn build(self) -> ResourceConfig {
        let defaults = ResourceConfig::default();
        ResourceConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            service_version: self.service_version.unwrap_or(defaults.service_version),
            deployment_environment: self
                .deployment_environment
                .unwrap_or(defaults.deployment_environment),
            attributes: self.attributes,
            detect_host: self.detect_host.unwrap_or(defaults.detect_host),
        }
    }
}
