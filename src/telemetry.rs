use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "prometheus")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "prometheus")]
use std::sync::Mutex;
#[cfg(feature = "prometheus")]
use std::thread::JoinHandle;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
pub trait DbEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: DbEvent);
}

/// Structured events emitted by segments.
#[derive(Debug, Clone)]
pub enum DbEvent {
    SegmentLoaded {
        segment: String,
        series: usize,
        skipped_tokens: usize,
        elapsed: Duration,
    },
    /// The segment stays unloaded and answers queries with an empty index. Worth an alarm.
    SegmentLoadFailed { segment: String, error: String },

    SegmentMarshaled {
        series: usize,
        data_bytes: usize,
        meta_bytes: usize,
    },

    SegmentClosed { segment: String },

    /// A row was not stored. Ingest carries on with the next row.
    InsertRejected { metric: String, error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl DbEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: DbEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn DbEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Emitting is effectively a no-op until a recorder is installed. With the `prometheus`
/// feature, [`db_metrics::InProcessPrometheus`] installs one and renders the exposition text
/// in-process.
pub mod db_metrics {
    use super::*;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const INGEST_ROWS: &str = "strata_ingest_rows";
    pub const INGEST_REJECTED_ROWS: &str = "strata_ingest_rejected_rows";

    pub const SEGMENT_LOADS: &str = "strata_segment_loads";
    pub const SEGMENT_LOAD_FAILURES: &str = "strata_segment_load_failures";
    pub const SEGMENT_LOAD_DURATION_SECONDS: &str = "strata_segment_load_duration_seconds";
    pub const SKIPPED_LABEL_TOKENS: &str = "strata_skipped_label_tokens";

    pub const MARSHAL_DURATION_SECONDS: &str = "strata_marshal_duration_seconds";
    pub const MARSHAL_BYTES: &str = "strata_marshal_bytes";

    pub const QUERY_RANGE_DURATION_SECONDS: &str = "strata_query_range_duration_seconds";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep
        /// thread that keeps histogram state bounded.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("strata-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_ingest(accepted: u64, rejected: u64) {
        if accepted > 0 {
            ::metrics::counter!(INGEST_ROWS).increment(accepted);
        }
        if rejected > 0 {
            ::metrics::counter!(INGEST_REJECTED_ROWS).increment(rejected);
        }
    }

    #[inline]
    pub fn record_segment_load(duration: Duration, skipped_tokens: u64) {
        ::metrics::counter!(SEGMENT_LOADS).increment(1);
        ::metrics::histogram!(SEGMENT_LOAD_DURATION_SECONDS).record(duration.as_secs_f64());
        if skipped_tokens > 0 {
            ::metrics::counter!(SKIPPED_LABEL_TOKENS).increment(skipped_tokens);
        }
    }

    #[inline]
    pub fn record_segment_load_failure() {
        ::metrics::counter!(SEGMENT_LOAD_FAILURES).increment(1);
    }

    #[inline]
    pub fn record_marshal(duration: Duration, bytes: u64) {
        ::metrics::histogram!(MARSHAL_DURATION_SECONDS).record(duration.as_secs_f64());
        ::metrics::counter!(MARSHAL_BYTES).increment(bytes);
    }

    #[inline]
    pub fn record_query_range(duration: Duration) {
        ::metrics::histogram!(QUERY_RANGE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Registers descriptions with whatever recorder is installed.
    pub fn describe_all() {
        describe_counter!(
            INGEST_ROWS,
            Unit::Count,
            "Rows accepted by memory segments."
        );
        describe_counter!(
            INGEST_REJECTED_ROWS,
            Unit::Count,
            "Rows rejected by memory segments (sealed segment or out-of-order sample)."
        );
        describe_counter!(
            SEGMENT_LOADS,
            Unit::Count,
            "Disk segments whose metadata was parsed successfully."
        );
        describe_counter!(
            SEGMENT_LOAD_FAILURES,
            Unit::Count,
            "Disk segment loads that failed and left the segment unloaded."
        );
        describe_counter!(
            SKIPPED_LABEL_TOKENS,
            Unit::Count,
            "Malformed label tokens skipped while loading disk segments."
        );
        describe_counter!(
            MARSHAL_BYTES,
            Unit::Bytes,
            "Bytes (data + metadata) produced by marshaling memory segments."
        );

        describe_histogram!(
            SEGMENT_LOAD_DURATION_SECONDS,
            Unit::Seconds,
            "Time to parse a disk segment's metadata and build its index."
        );
        describe_histogram!(
            MARSHAL_DURATION_SECONDS,
            Unit::Seconds,
            "Time to marshal a memory segment."
        );
        describe_histogram!(
            QUERY_RANGE_DURATION_SECONDS,
            Unit::Seconds,
            "Range query latency on a single segment."
        );
    }
}
