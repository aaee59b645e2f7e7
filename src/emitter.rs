//! Periodic span emission.

use crate::config::EmitterConfig;
use opentelemetry::Context;
use opentelemetry::trace::{Span, Tracer};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Emits one zero-duration root span per period until cancelled.
#[derive(Debug)]
pub struct SpanEmitter<T> {
    tracer: T,
    span_name: String,
    period: Duration,
}

impl<T: Tracer> SpanEmitter<T> {
    /// Creates an emitter drawing spans from `tracer`.
    pub fn new(tracer: T, config: &EmitterConfig) -> Self {
        Self {
            tracer,
            span_name: config.span_name.clone(),
            period: config.period,
        }
    }

    /// Starts and immediately ends a single root span.
    pub fn emit_once(&self) {
        tracing::info!(span = %self.span_name, "Sending trace");
        let mut span = self
            .tracer
            .start_with_context(self.span_name.clone(), &Context::new());
        span.end();
    }

    /// Runs until `cancel` fires, returning the number of spans emitted.
    ///
    /// Cancellation is checked before every emission and interrupts the
    /// wait between emissions.
    pub async fn run(&self, cancel: &CancellationToken) -> u64 {
        let mut emitted = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.emit_once();
            emitted += 1;

            tracing::debug!(period = ?self.period, "Sleeping");
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.period) => {}
            }
        }

        tracing::info!(emitted, "Span emitter stopped");
        emitted
    }
}
