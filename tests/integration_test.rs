//! Integration tests exercising the full pipeline: configuration, provider
//! assembly, runtime instrumentation, span emission and shutdown.
//!
//! Note: Since the tracing subscriber can only be initialised once per process,
//! these tests build the pipeline without it.

use otel_runtime_metrics::tokio_util::sync::CancellationToken;
use otel_runtime_metrics::{
    ExporterKind, SpanEmitter, TelemetryBuilder, TelemetryError, TelemetryGuard,
};
use std::time::Duration;

const RESOURCE_VARS: [&str; 2] = ["OTEL_RESOURCE_ATTRIBUTES", "OTEL_SERVICE_NAME"];

/// Builds with the resource variables cleared, serialised against the test
/// that sets them.
fn build(builder: TelemetryBuilder) -> Result<TelemetryGuard, TelemetryError> {
    temp_env::with_vars_unset(RESOURCE_VARS, || builder.build())
}

fn stdout_builder() -> TelemetryBuilder {
    TelemetryBuilder::new()
        .trace_exporter(ExporterKind::Stdout)
        .metric_exporter(ExporterKind::Stdout)
        .resource(|r| r.service_name("integration-test-service").detect_host(false))
        .without_tracing_subscriber()
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_runs_until_cancelled_and_shuts_down() -> Result<(), TelemetryError> {
    let mut guard = build(
        stdout_builder()
            .span_period(Duration::from_millis(20))
            .min_read_interval(Duration::from_millis(10)),
    )?;

    guard.start_runtime_metrics()?;
    assert!(guard.runtime_metrics_started());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(110)).await;
        trigger.cancel();
    });

    let emitter = SpanEmitter::new(guard.tracer(), &guard.config().emitter);
    let emitted = emitter.run(&cancel).await;

    // One span per 20ms period over ~110ms; scheduling jitter only delays.
    assert!((1..=6).contains(&emitted), "emitted {emitted} spans");

    tokio::task::block_in_place(|| guard.flush());
    tokio::task::block_in_place(|| guard.shutdown())?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn otlp_pipeline_builds_against_unreachable_collector() -> Result<(), TelemetryError> {
    // Exporters connect lazily, so an absent collector is not a startup error.
    let guard = build(
        TelemetryBuilder::new()
            .endpoint("127.0.0.1:1")
            .timeout(Duration::from_millis(100))
            .resource(|r| r.detect_host(false))
            .without_tracing_subscriber(),
    )?;

    assert!(guard.meter_provider().is_some());
    drop(guard);
    Ok(())
}

#[tokio::test]
async fn malformed_endpoint_fails_fast() {
    let result = build(
        TelemetryBuilder::new()
            .endpoint("::not an endpoint::")
            .without_tracing_subscriber(),
    );

    assert!(matches!(result, Err(TelemetryError::InvalidEndpoint { .. })));
}

#[test]
fn runtime_metrics_require_a_meter_provider() {
    let mut guard = build(stdout_builder().metrics(false)).expect("pipeline builds without metrics");

    assert!(matches!(
        guard.start_runtime_metrics(),
        Err(TelemetryError::MeterProviderMissing)
    ));
    assert!(guard.shutdown().is_ok());
}

#[test]
fn malformed_resource_attributes_abort_startup() {
    temp_env::with_var("OTEL_RESOURCE_ATTRIBUTES", Some("no-equals-sign"), || {
        let result = stdout_builder().build();
        assert!(matches!(
            result,
            Err(TelemetryError::ResourceAttributes { .. })
        ));
    });
}
