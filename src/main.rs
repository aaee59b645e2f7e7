//! Emits a `MyTrace` span every period and publishes runtime metrics until
//! interrupted with Ctrl-C.
//!
//! Configuration is read from `otel-runtime-metrics.toml` (if present), the
//! standard `OTEL_*` variables and `OTEL_RUNTIME_METRICS_*` overrides.

use otel_runtime_metrics::tokio_util::sync::CancellationToken;
use otel_runtime_metrics::{TelemetryBuilder, TelemetryError};
use std::error::Error;
use std::process::ExitCode;

const CONFIG_FILE: &str = "otel-runtime-metrics.toml";
const ENV_PREFIX: &str = "OTEL_RUNTIME_METRICS_";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {}", report(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), TelemetryError> {
    let mut guard = TelemetryBuilder::new()
        .with_file(CONFIG_FILE)
        .with_standard_env()
        .with_env(ENV_PREFIX)
        .build()?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_interrupt(cancel.clone()));

    let outcome = guard.run(&cancel).await;
    let shutdown = tokio::task::block_in_place(|| guard.shutdown());

    outcome.and(shutdown)
}

async fn watch_interrupt(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, shutting down");
            cancel.cancel();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    }
}

fn report(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
