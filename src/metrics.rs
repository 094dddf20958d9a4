//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub purchases_started: IntCounter,
    pub purchases_succeeded: IntCounter,
    pub purchases_failed: IntCounterVec,
    pub listings_created: IntCounter,
    pub envelopes_sent: IntCounter,

    // Gauges
    pub active_attempts: IntGauge,

    // Histograms
    pub purchase_latency: Histogram,
    pub oracle_latency: Histogram,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let purchases_started = IntCounter::with_opts(Opts::new(
            "purchases_started_total",
            "Purchase attempts started",
        ))?;

        let purchases_succeeded = IntCounter::with_opts(Opts::new(
            "purchases_succeeded_total",
            "Purchase attempts confirmed on the ledger",
        ))?;

        let purchases_failed = IntCounterVec::new(
            Opts::new("purchases_failed_total", "Purchase attempts failed, by kind"),
            &["kind"],
        )?;

        let listings_created = IntCounter::with_opts(Opts::new(
            "listings_created_total",
            "Listings created and confirmed",
        ))?;

        let envelopes_sent = IntCounter::with_opts(Opts::new(
            "envelopes_sent_total",
            "Transaction envelopes accepted by the ledger RPC",
        ))?;

        let active_attempts = IntGauge::with_opts(Opts::new(
            "active_purchase_attempts",
            "Purchase attempts currently in flight",
        ))?;

        let purchase_latency = Histogram::with_opts(
            HistogramOpts::new("purchase_latency_seconds", "End-to-end purchase latency")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let oracle_latency = Histogram::with_opts(
            HistogramOpts::new("oracle_latency_seconds", "Price attestation fetch latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Broadcast-to-confirmation latency per envelope",
            )
            .buckets(vec![0.4, 0.8, 1.5, 3.0, 6.0, 15.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(purchases_started.clone()))?;
        registry.register(Box::new(purchases_succeeded.clone()))?;
        registry.register(Box::new(purchases_failed.clone()))?;
        registry.register(Box::new(listings_created.clone()))?;
        registry.register(Box::new(envelopes_sent.clone()))?;
        registry.register(Box::new(active_attempts.clone()))?;
        registry.register(Box::new(purchase_latency.clone()))?;
        registry.register(Box::new(oracle_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            purchases_started,
            purchases_succeeded,
            purchases_failed,
            listings_created,
            envelopes_sent,
            active_attempts,
            purchase_latency,
            oracle_latency,
            confirmation_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Count a failed attempt under its failure category
    pub fn record_failure(&self, kind: &str) {
        self.purchases_failed.with_label_values(&[kind]).inc();
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
