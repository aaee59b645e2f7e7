//! Process and async runtime instrumentation.
//!
//! Statistics are read through [`ThrottledStats`], so however often the
//! periodic reader collects, the underlying source is consulted at most once
//! per minimum read interval.

use crate::config::RuntimeMetricsConfig;
use opentelemetry::metrics::{Meter, ObservableGauge};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One reading of process and runtime statistics. Fields the platform cannot
/// provide are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Resident set size in bytes.
    pub resident_memory_bytes: Option<u64>,
    /// Virtual memory size in bytes.
    pub virtual_memory_bytes: Option<u64>,
    /// OS threads in the process.
    pub threads: Option<u64>,
    /// Tokio worker threads.
    pub runtime_workers: Option<u64>,
    /// Tasks alive on the Tokio runtime.
    pub alive_tasks: Option<u64>,
    /// Tasks waiting in the Tokio global queue.
    pub global_queue_depth: Option<u64>,
    /// Time since the source was created, in milliseconds.
    pub uptime_ms: Option<u64>,
}

/// Where statistics come from.
pub trait StatsSource: Send + Sync + 'static {
    /// Takes a fresh reading.
    fn read(&self) -> RuntimeStats;
}

/// Reads `/proc/self/status` and the Tokio runtime the source was created in.
#[derive(Debug)]
pub struct ProcessStatsSource {
    runtime: Option<tokio::runtime::Handle>,
    started: Instant,
}

impl ProcessStatsSource {
    /// Captures the current Tokio runtime, if any.
    pub fn current() -> Self {
        Self {
            runtime: tokio::runtime::Handle::try_current().ok(),
            started: Instant::now(),
        }
    }
}

impl StatsSource for ProcessStatsSource {
    fn read(&self) -> RuntimeStats {
        let mut stats = std::fs::read_to_string("/proc/self/status")
            .map(|status| parse_proc_status(&status))
            .unwrap_or_default();

        if let Some(handle) = &self.runtime {
            let metrics = handle.metrics();
            stats.runtime_workers = Some(metrics.num_workers() as u64);
            stats.alive_tasks = Some(metrics.num_alive_tasks() as u64);
            stats.global_queue_depth = Some(metrics.global_queue_depth() as u64);
        }
        stats.uptime_ms = Some(self.started.elapsed().as_millis() as u64);

        stats
    }
}

/// Extracts memory and thread figures from the contents of
/// `/proc/<pid>/status`.
pub fn parse_proc_status(status: &str) -> RuntimeStats {
    let mut stats = RuntimeStats::default();

    for line in status.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let mut parts = value.split_whitespace();
        let Some(number) = parts.next().and_then(|n| n.parse::<u64>().ok()) else {
            continue;
        };
        let bytes = match parts.next() {
            Some("kB") => number.saturating_mul(1024),
            _ => number,
        };

        match field {
            "VmRSS" => stats.resident_memory_bytes = Some(bytes),
            "VmSize" => stats.virtual_memory_bytes = Some(bytes),
            "Threads" => stats.threads = Some(number),
            _ => {}
        }
    }

    stats
}

/// Caches readings from a [`StatsSource`] for a minimum interval.
pub struct ThrottledStats<S> {
    source: S,
    min_interval: Duration,
    cached: Mutex<Option<(Instant, RuntimeStats)>>,
}

impl<S: StatsSource> ThrottledStats<S> {
    /// Wraps `source` so it is read at most once per `min_interval`.
    pub fn new(source: S, min_interval: Duration) -> Self {
        Self {
            source,
            min_interval,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached reading, refreshing it if it is older than the
    /// minimum interval.
    pub fn snapshot(&self) -> RuntimeStats {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match *cached {
            Some((read_at, stats)) if read_at.elapsed() < self.min_interval => stats,
            _ => {
                let stats = self.source.read();
                *cached = Some((Instant::now(), stats));
                stats
            }
        }
    }
}

type Extract = fn(&RuntimeStats) -> Option<u64>;

struct GaugeSpec {
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    extract: Extract,
}

const GAUGES: &[GaugeSpec] = &[
    GaugeSpec {
        name: "process.memory.usage",
        description: "Resident memory of the process",
        unit: "By",
        extract: |s| s.resident_memory_bytes,
    },
    GaugeSpec {
        name: "process.memory.virtual",
        description: "Virtual memory of the process",
        unit: "By",
        extract: |s| s.virtual_memory_bytes,
    },
    GaugeSpec {
        name: "process.thread.count",
        description: "OS threads in the process",
        unit: "{thread}",
        extract: |s| s.threads,
    },
    GaugeSpec {
        name: "tokio.runtime.workers",
        description: "Worker threads of the async runtime",
        unit: "{thread}",
        extract: |s| s.runtime_workers,
    },
    GaugeSpec {
        name: "tokio.runtime.alive_tasks",
        description: "Tasks currently alive on the async runtime",
        unit: "{task}",
        extract: |s| s.alive_tasks,
    },
    GaugeSpec {
        name: "tokio.runtime.global_queue_depth",
        description: "Tasks waiting in the async runtime's global queue",
        unit: "{task}",
        extract: |s| s.global_queue_depth,
    },
];

const DEPRECATED_GAUGES: &[GaugeSpec] = &[
    GaugeSpec {
        name: "process.runtime.rust.mem.rss",
        description: "Resident memory of the process (deprecated, use process.memory.usage)",
        unit: "By",
        extract: |s| s.resident_memory_bytes,
    },
    GaugeSpec {
        name: "process.runtime.rust.threads",
        description: "OS threads in the process (deprecated, use process.thread.count)",
        unit: "{thread}",
        extract: |s| s.threads,
    },
    GaugeSpec {
        name: "runtime.uptime",
        description: "Milliseconds since instrumentation started (deprecated)",
        unit: "ms",
        extract: |s| s.uptime_ms,
    },
];

/// Registered runtime instruments. Callbacks stay registered for the life of
/// the meter provider.
pub struct RuntimeMetrics {
    gauges: Vec<ObservableGauge<u64>>,
}

impl RuntimeMetrics {
    /// Registers the runtime gauges on `meter`, reading the current process.
    pub fn start(meter: &Meter, config: &RuntimeMetricsConfig) -> Self {
        Self::start_with_source(meter, config, ProcessStatsSource::current())
    }

    /// Registers the runtime gauges on `meter`, reading from `source`.
    pub fn start_with_source<S: StatsSource>(
        meter: &Meter,
        config: &RuntimeMetricsConfig,
        source: S,
    ) -> Self {
        let stats = Arc::new(ThrottledStats::new(source, config.min_read_interval));

        let deprecated: &[GaugeSpec] = if config.deprecated_names {
            DEPRECATED_GAUGES
        } else {
            &[]
        };

        let gauges = GAUGES
            .iter()
            .chain(deprecated)
            .map(|spec| {
                let stats = Arc::clone(&stats);
                let extract = spec.extract;
                meter
                    .u64_observable_gauge(spec.name)
                    .with_description(spec.description)
                    .with_unit(spec.unit)
                    .with_callback(move |observer| {
                        if let Some(value) = extract(&stats.snapshot()) {
                            observer.observe(value, &[]);
                        }
                    })
                    .build()
            })
            .collect::<Vec<_>>();

        tracing::info!(
            target: "otel_lifecycle",
            instruments = gauges.len(),
            min_read_interval = ?config.min_read_interval,
            "Runtime instrumentation started"
        );

        Self { gauges }
    }

    /// Number of registered instruments.
    pub fn instrument_count(&self) -> usize {
        self.gauges.len()
    }
}

impl std::fmt::Debug for RuntimeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeMetrics")
            .field("instruments", &self.gauges.len())
            .finish()
    }
}
