//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub fanout_requests: IntCounter,
    pub endpoint_success: IntCounterVec,
    pub endpoint_failure: IntCounterVec,
    pub retry_attempts: IntCounter,
    pub listings_dropped: IntCounter,

    // Histograms
    pub endpoint_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let fanout_requests = IntCounter::with_opts(Opts::new(
            "indexer_fanout_requests_total",
            "Number of fan-out calls issued",
        ))?;

        let endpoint_success = IntCounterVec::new(
            Opts::new(
                "indexer_endpoint_success_total",
                "Projects that reached a successful terminal state",
            ),
            &["project"],
        )?;

        let endpoint_failure = IntCounterVec::new(
            Opts::new(
                "indexer_endpoint_failure_total",
                "Projects that reached a failed terminal state",
            ),
            &["project"],
        )?;

        let retry_attempts = IntCounter::with_opts(Opts::new(
            "indexer_retry_attempts_total",
            "Retries performed after a failed attempt",
        ))?;

        let listings_dropped = IntCounter::with_opts(Opts::new(
            "marketplace_listings_dropped_total",
            "Listings removed by ownership verification",
        ))?;

        let endpoint_latency = Histogram::with_opts(
            HistogramOpts::new(
                "indexer_endpoint_latency_seconds",
                "Time for one project to reach a terminal state",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(fanout_requests.clone()))?;
        registry.register(Box::new(endpoint_success.clone()))?;
        registry.register(Box::new(endpoint_failure.clone()))?;
        registry.register(Box::new(retry_attempts.clone()))?;
        registry.register(Box::new(listings_dropped.clone()))?;
        registry.register(Box::new(endpoint_latency.clone()))?;

        Ok(Self {
            registry,
            fanout_requests,
            endpoint_success,
            endpoint_failure,
            retry_attempts,
            listings_dropped,
            endpoint_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Record one project's terminal state
    pub fn record_endpoint(&self, project: &str, success: bool, elapsed: Duration) {
        self.endpoint_latency.observe(elapsed.as_secs_f64());
        if success {
            self.endpoint_success.with_label_values(&[project]).inc();
        } else {
            self.endpoint_failure.with_label_values(&[project]).inc();
        }
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}
