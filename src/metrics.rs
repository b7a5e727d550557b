//! Dataworker metrics.

use metrics::{Counter, Gauge};
use metrics_derive::Metrics;

/// Metrics for the dataworker loop.
#[derive(Metrics)]
#[metrics(scope = "dataworker")]
pub struct DataworkerMetrics {
    /// Number of root bundles proposed.
    pub bundles_proposed: Counter,
    /// Number of root bundles disputed.
    pub bundles_disputed: Counter,
    /// Number of bundle leaves queued for execution.
    pub leaves_executed: Counter,
    /// Number of bundle leaves skipped for insufficient balance.
    pub leaves_skipped: Counter,
    /// Number of lookback widening rounds taken by range resolution.
    pub resolver_retries: Counter,
    /// Number of iterations that failed and were retried.
    pub iteration_failures: Counter,
    /// Chains currently excluded as unreconstructable.
    pub excluded_chains: Gauge,
}
