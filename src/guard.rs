//! Telemetry pipeline assembly and lifecycle management.
//!
//! The [`TelemetryGuard`] is the composition root: it owns the tracer and
//! meter providers, hands out tracers and meters explicitly, and releases the
//! providers in reverse order of acquisition when shut down or dropped.

use crate::config::{ExporterKind, TelemetryConfig};
use crate::emitter::SpanEmitter;
use crate::error::TelemetryError;
use crate::exporter::{
    otlp_metric_exporter, otlp_span_exporter, stdout_metric_exporter, stdout_span_exporter,
};
use crate::resource::build_resource;
use crate::runtime_metrics::RuntimeMetrics;
use crate::shutdown::ShutdownStack;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Scope name of the meter carrying runtime instruments.
const RUNTIME_METER_NAME: &str = env!("CARGO_PKG_NAME");

/// Guard that owns the telemetry providers.
///
/// On drop, flushes pending telemetry and shuts down providers.
/// Use [`shutdown()`](Self::shutdown) for explicit error handling.
#[derive(Debug)]
pub struct TelemetryGuard {
    config: TelemetryConfig,
    resource: Resource,
    tracer_provider: SdkTracerProvider,
    meter_provider: Option<SdkMeterProvider>,
    runtime_metrics: Option<RuntimeMetrics>,
    releases: ShutdownStack,
}

impl TelemetryGuard {
    /// Creates a TelemetryGuard from configuration.
    ///
    /// This is typically called by [`TelemetryBuilder::build`](super::TelemetryBuilder::build).
    /// Providers built before a later step fails are released before the
    /// error is returned.
    pub(crate) fn from_config(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let resource = build_resource(&config.resource)?;
        let mut releases = ShutdownStack::new();

        let tracer_provider = build_tracer_provider(&config, resource.clone())?;
        releases.push(tracer_provider.clone());

        let meter_provider = if config.metrics.enabled {
            let provider = build_meter_provider(&config, resource.clone())?;
            releases.push(provider.clone());
            Some(provider)
        } else {
            None
        };

        if config.install_global {
            opentelemetry::global::set_tracer_provider(tracer_provider.clone());
            if let Some(provider) = &meter_provider {
                opentelemetry::global::set_meter_provider(provider.clone());
            }
        }

        if config.init_tracing_subscriber {
            init_subscriber(&tracer_provider, config.scope_name())?;
        }

        tracing::info!(
            target: "otel_lifecycle",
            traces = config.traces.enabled.then_some(config.traces.exporter.as_str()),
            metrics = config.metrics.enabled.then_some(config.metrics.exporter.as_str()),
            "Telemetry pipeline started"
        );

        Ok(Self {
            config,
            resource,
            tracer_provider,
            meter_provider,
            runtime_metrics: None,
            releases,
        })
    }

    /// The configuration the pipeline was built from.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// The resource attached to all telemetry.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Returns the tracer provider.
    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Returns the meter provider if metrics are enabled.
    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.meter_provider.as_ref()
    }

    /// Tracer named by `emitter.tracer_name`.
    pub fn tracer(&self) -> SdkTracer {
        self.tracer_provider
            .tracer(self.config.emitter.tracer_name.clone())
    }

    /// Meter with the given scope name, if metrics are enabled.
    pub fn meter(&self, name: &'static str) -> Option<Meter> {
        self.meter_provider.as_ref().map(|p| p.meter(name))
    }

    /// Registers the runtime instruments against this guard's meter provider.
    ///
    /// Calling it again once started does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::MeterProviderMissing`] when metrics are
    /// disabled.
    pub fn start_runtime_metrics(&mut self) -> Result<(), TelemetryError> {
        if self.runtime_metrics.is_some() {
            return Ok(());
        }
        let meter = self
            .meter(RUNTIME_METER_NAME)
            .ok_or(TelemetryError::MeterProviderMissing)?;

        self.runtime_metrics = Some(RuntimeMetrics::start(&meter, &self.config.runtime));
        Ok(())
    }

    /// Whether runtime instruments are registered.
    pub fn runtime_metrics_started(&self) -> bool {
        self.runtime_metrics.is_some()
    }

    /// Starts runtime instrumentation when `runtime.enabled` is set, then
    /// emits spans until `cancel` fires. Returns the number of spans emitted.
    ///
    /// The guard is left intact on every path; call
    /// [`shutdown()`](Self::shutdown) afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::MeterProviderMissing`] when runtime
    /// instrumentation is enabled but metrics are not. No span is emitted.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<u64, TelemetryError> {
        if self.config.runtime.enabled {
            tracing::info!("Starting runtime instrumentation");
            self.start_runtime_metrics()?;
        }

        let emitter = SpanEmitter::new(self.tracer(), &self.config.emitter);
        Ok(emitter.run(cancel).await)
    }

    /// Flushes all providers. Errors are logged but not returned.
    pub fn flush(&self) {
        if let Err(e) = self.tracer_provider.force_flush() {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush tracer provider");
        }

        if let Some(provider) = &self.meter_provider
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush meter provider");
        }
    }

    /// Shuts down the meter provider, then the tracer provider.
    ///
    /// Both are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Shutdown`] listing every provider that
    /// failed to flush or shut down.
    pub fn shutdown(mut self) -> Result<(), TelemetryError> {
        tracing::info!(target: "otel_lifecycle", "Shutting down telemetry");
        self.releases.unwind()?;
        Ok(())
    }
}

fn build_tracer_provider(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<SdkTracerProvider, TelemetryError> {
    let builder = SdkTracerProvider::builder().with_resource(resource);

    if !config.traces.enabled {
        return Ok(builder.build());
    }

    let batch_config = BatchConfigBuilder::default()
        .with_max_queue_size(config.traces.batch.max_queue_size)
        .with_max_export_batch_size(config.traces.batch.max_export_batch_size)
        .with_scheduled_delay(config.traces.batch.scheduled_delay)
        .build();

    let span_processor = match config.traces.exporter {
        ExporterKind::Otlp => BatchSpanProcessor::builder(otlp_span_exporter(config)?)
            .with_batch_config(batch_config)
            .build(),
        ExporterKind::Stdout => BatchSpanProcessor::builder(stdout_span_exporter())
            .with_batch_config(batch_config)
            .build(),
    };

    Ok(builder.with_span_processor(span_processor).build())
}

fn build_meter_provider(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let builder = SdkMeterProvider::builder().with_resource(resource);
    let interval = config.metrics.interval;

    let builder = match config.metrics.exporter {
        ExporterKind::Otlp => builder.with_reader(
            PeriodicReader::builder(otlp_metric_exporter(config)?)
                .with_interval(interval)
                .build(),
        ),
        ExporterKind::Stdout => builder.with_reader(
            PeriodicReader::builder(stdout_metric_exporter())
                .with_interval(interval)
                .build(),
        ),
    };

    Ok(builder.build())
}

fn init_subscriber(
    tracer_provider: &SdkTracerProvider,
    scope_name: String,
) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let telemetry_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(scope_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds with the resource variables cleared, serialised against the
    /// resource tests that set them.
    fn build(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
        temp_env::with_vars_unset(["OTEL_RESOURCE_ATTRIBUTES", "OTEL_SERVICE_NAME"], || {
            TelemetryGuard::from_config(config)
        })
    }

    fn offline_config() -> TelemetryConfig {
        let mut config = TelemetryConfig::default();
        config.traces.exporter = ExporterKind::Stdout;
        config.metrics.exporter = ExporterKind::Stdout;
        config.resource.detect_host = false;
        config.init_tracing_subscriber = false;
        config
    }

    #[test]
    fn acquires_tracer_then_meter_provider() {
        let guard = build(offline_config()).unwrap();

        assert!(guard.meter_provider().is_some());
        assert_eq!(
            guard.releases.pending(),
            vec!["tracer provider", "meter provider"]
        );
        assert!(guard.shutdown().is_ok());
    }

    #[test]
    fn releases_meter_provider_before_tracer_provider_once_each() {
        let mut guard = build(offline_config()).unwrap();
        let tracer_provider = guard.tracer_provider().clone();
        let meter_provider = guard.meter_provider().cloned().unwrap();

        assert!(guard.releases.unwind().is_ok());
        assert!(guard.releases.unwind().is_ok());

        assert_eq!(
            guard.releases.released(),
            ["meter provider", "tracer provider"]
        );
        // Both were really shut down by the unwind.
        assert!(tracer_provider.shutdown().is_err());
        assert!(meter_provider.shutdown().is_err());

        assert!(guard.shutdown().is_ok());
    }

    #[tokio::test]
    async fn run_fails_before_emitting_when_runtime_metrics_lack_a_meter() {
        let mut config = offline_config();
        config.metrics.enabled = false;
        let mut guard = build(config).unwrap();

        let cancel = CancellationToken::new();
        let result = guard.run(&cancel).await;

        assert!(matches!(result, Err(TelemetryError::MeterProviderMissing)));
        assert!(!guard.runtime_metrics_started());

        assert!(guard.releases.unwind().is_ok());
        assert_eq!(guard.releases.released(), ["tracer provider"]);
    }

    #[tokio::test]
    async fn run_starts_runtime_metrics_and_stops_on_cancel() {
        let mut guard = build(offline_config()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let emitted = guard.run(&cancel).await.unwrap();

        assert_eq!(emitted, 0);
        assert!(guard.runtime_metrics_started());
        assert!(guard.shutdown().is_ok());
    }

    #[test]
    fn disabled_metrics_build_no_meter_provider() {
        let mut config = offline_config();
        config.metrics.enabled = false;

        let mut guard = build(config).unwrap();

        assert!(guard.meter_provider().is_none());
        assert!(guard.meter("any").is_none());
        assert!(matches!(
            guard.start_runtime_metrics(),
            Err(TelemetryError::MeterProviderMissing)
        ));
        assert!(!guard.runtime_metrics_started());
        assert!(guard.shutdown().is_ok());
    }

    #[test]
    fn start_runtime_metrics_is_idempotent() {
        let mut guard = build(offline_config()).unwrap();

        guard.start_runtime_metrics().unwrap();
        guard.start_runtime_metrics().unwrap();

        assert!(guard.runtime_metrics_started());
        assert!(guard.shutdown().is_ok());
    }

    #[test]
    fn disabled_traces_still_hand_out_tracers() {
        let mut config = offline_config();
        config.traces.enabled = false;

        let guard = build(config).unwrap();
        let _tracer = guard.tracer();

        assert!(guard.shutdown().is_ok());
    }

    #[test]
    fn resource_reflects_configuration() {
        let mut config = offline_config();
        config.resource.service_name = "guard-test".to_string();

        let guard = build(config).unwrap();

        let service_name = guard
            .resource()
            .iter()
            .find(|(k, _)| k.as_str() == "service.name")
            .map(|(_, v)| v.to_string());
        assert_eq!(service_name.as_deref(), Some("guard-test"));
    }

    #[tokio::test]
    async fn invalid_metrics_endpoint_fails_before_guard_exists() {
        let mut config = offline_config();
        config.metrics.exporter = ExporterKind::Otlp;
        config.metrics.endpoint = Some("ftp://nowhere:21".to_string());

        let result = build(config);
        assert!(matches!(result, Err(TelemetryError::InvalidEndpoint { .. })));
    }
}
