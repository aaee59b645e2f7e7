//! Ordered release of telemetry providers.
//!
//! Providers are pushed onto a [`ShutdownStack`] as they are acquired and
//! released last-in-first-out. A failing release never prevents the ones
//! after it from running; every failure ends up in the [`ShutdownReport`].

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::fmt;

/// Something that owns exporters and must be flushed and shut down once.
pub trait Release: Send {
    /// Component name used in logs and reports.
    fn component(&self) -> &'static str;

    /// Flushes pending data and shuts the component down.
    fn release(&self) -> OTelSdkResult;
}

impl Release for SdkTracerProvider {
    fn component(&self) -> &'static str {
        "tracer provider"
    }

    fn release(&self) -> OTelSdkResult {
        let flushed = self.force_flush();
        self.shutdown().and(flushed)
    }
}

impl Release for SdkMeterProvider {
    fn component(&self) -> &'static str {
        "meter provider"
    }

    fn release(&self) -> OTelSdkResult {
        let flushed = self.force_flush();
        self.shutdown().and(flushed)
    }
}

/// A single failed release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    /// Which component failed.
    pub component: &'static str,
    /// The error it reported.
    pub error: String,
}

/// Every release that failed during one unwind, in the order attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    failures: Vec<ReleaseFailure>,
}

impl ShutdownReport {
    /// The failures, in the order they happened.
    pub fn failures(&self) -> &[ReleaseFailure] {
        &self.failures
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let described: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.component, failure.error))
            .collect();
        write!(f, "failed to shut down {}", described.join("; "))
    }
}

impl std::error::Error for ShutdownReport {}

/// Acquired components, released in reverse order of acquisition.
///
/// Dropping the stack unwinds whatever has not been released yet, so a
/// partially built pipeline is still torn down on early returns.
#[derive(Default)]
pub struct ShutdownStack {
    entries: Vec<Box<dyn Release>>,
    released: Vec<&'static str>,
}

impl ShutdownStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly acquired component.
    pub fn push(&mut self, component: impl Release + 'static) {
        self.entries.push(Box::new(component));
    }

    /// Number of components not yet released.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether everything has been released.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Components not yet released, in order of acquisition.
    pub fn pending(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.component()).collect()
    }

    /// Components already released, in the order they were released.
    pub fn released(&self) -> &[&'static str] {
        &self.released
    }

    /// Releases every component, most recently acquired first.
    ///
    /// # Errors
    ///
    /// Returns a report listing each component whose release failed. All
    /// components are attempted regardless.
    pub fn unwind(&mut self) -> Result<(), ShutdownReport> {
        let mut report = ShutdownReport::default();

        while let Some(entry) = self.entries.pop() {
            let component = entry.component();
            self.released.push(component);
            match entry.release() {
                Ok(()) => {
                    tracing::debug!(target: "otel_lifecycle", component, "Released");
                }
                Err(e) => {
                    tracing::error!(target: "otel_lifecycle", component, error = %e, "Failed to shut down");
                    report.failures.push(ReleaseFailure {
                        component,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.failures.is_empty() {
            Ok(())
        } else {
            Err(report)
        }
    }
}

impl fmt::Debug for ShutdownStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownStack")
            .field("pending", &self.pending())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ShutdownStack {
    fn drop(&mut self) {
        // Failures are already logged by unwind.
        let _ = self.unwind();
    }
}
