//! Prometheus metrics for the assembly pipeline

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::time::Instant;

/// Pipeline metrics, registered in their own registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub transactions_assembled: IntCounterVec,
    pub simulations_rejected: IntCounterVec,
    pub anchor_retries: IntCounter,
    pub asset_lookup_failures: IntCounter,

    // Histograms
    pub assembly_latency_ms: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transactions_assembled = IntCounterVec::new(
            Opts::new(
                "transactions_assembled",
                "Transactions assembled and serialized, by operation",
            ),
            &["operation"],
        )?;

        let simulations_rejected = IntCounterVec::new(
            Opts::new(
                "simulations_rejected",
                "Dry runs rejected, by matched failure signature",
            ),
            &["signature"],
        )?;

        let anchor_retries = IntCounter::with_opts(Opts::new(
            "anchor_retries",
            "Blockhash acquisition retries",
        ))?;

        let asset_lookup_failures = IntCounter::with_opts(Opts::new(
            "asset_lookup_failures",
            "Registry lookups that failed and aborted an operation",
        ))?;

        let assembly_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "assembly_latency_ms",
                "End-to-end latency of a public operation in milliseconds",
            )
            .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
        )?;

        registry.register(Box::new(transactions_assembled.clone()))?;
        registry.register(Box::new(simulations_rejected.clone()))?;
        registry.register(Box::new(anchor_retries.clone()))?;
        registry.register(Box::new(asset_lookup_failures.clone()))?;
        registry.register(Box::new(assembly_latency_ms.clone()))?;

        Ok(Self {
            registry,
            transactions_assembled,
            simulations_rejected,
            anchor_retries,
            asset_lookup_failures,
            assembly_latency_ms,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Process-wide metrics instance, `None` if registration failed
pub fn metrics() -> Option<&'static Metrics> {
    static METRICS: once_cell::sync::Lazy<Option<Metrics>> =
        once_cell::sync::Lazy::new(|| match Metrics::new() {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics disabled: registration failed");
                None
            }
        });
    METRICS.as_ref()
}

pub fn record_transaction_assembled(operation: &str) {
    if let Some(m) = metrics() {
        m.transactions_assembled.with_label_values(&[operation]).inc();
    }
}

pub fn record_simulation_rejected(signature: &str) {
    if let Some(m) = metrics() {
        m.simulations_rejected.with_label_values(&[signature]).inc();
    }
}

pub fn record_anchor_retry() {
    if let Some(m) = metrics() {
        m.anchor_retries.inc();
    }
}

pub fn record_asset_lookup_failure() {
    if let Some(m) = metrics() {
        m.asset_lookup_failures.inc();
    }
}

/// Timer helper for operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Record into `assembly_latency_ms` and return the elapsed milliseconds
    pub fn finish(self) -> u64 {
        let elapsed = self.start.elapsed().as_secs_f64() * 1000.0;
        if let Some(m) = metrics() {
            m.assembly_latency_ms.observe(elapsed);
        }
        elapsed as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let m = metrics().unwrap();
        let before = m.anchor_retries.get();
        record_anchor_retry();
        assert!(m.anchor_retries.get() > before);

        let label_before = m
            .simulations_rejected
            .with_label_values(&["Token is locked"])
            .get();
        record_simulation_rejected("Token is locked");
        assert!(
            m.simulations_rejected
                .with_label_values(&["Token is locked"])
                .get()
                > label_before
        );
    }

    #[test]
    fn test_registry_exposes_all_families() {
        let m = Metrics::new().unwrap();
        m.transactions_assembled.with_label_values(&["transfer"]).inc();
        m.simulations_rejected.with_label_values(&["Error"]).inc();
        let text = prometheus::TextEncoder::new()
            .encode_to_string(&m.registry().gather())
            .unwrap();
        for expected in [
            "transactions_assembled",
            "simulations_rejected",
            "anchor_retries",
            "asset_lookup_failures",
            "assembly_latency_ms",
        ] {
            assert!(text.contains(expected), "missing {}", expected);
        }
    }
}
