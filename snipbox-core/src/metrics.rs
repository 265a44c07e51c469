//! Engine Metrics
//!
//! Lock-free counters describing what the engine has done so far. Cheap
//! enough to bump on every call; read through [`EngineMetrics::snapshot`].
//!
//! A steadily climbing `stale_results_dropped` means results keep arriving
//! after their caller already gave up, i.e. timeouts are tuned too tight.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Call outcomes
    pub evaluations: AtomicU64,
    pub evaluation_time_ns: AtomicU64,
    pub short_circuits: AtomicU64,
    pub runtime_errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub degraded_return_values: AtomicU64,

    // Boundary traffic
    pub boundary_dispatches: AtomicU64,
    pub stale_results_dropped: AtomicU64,

    // Context lifecycle
    pub contexts_created: AtomicU64,
    pub context_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a finished evaluation, whichever path produced it.
    pub fn record_evaluation(&self, duration: Duration) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.evaluation_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_short_circuit(&self) {
        self.short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_runtime_error(&self) {
        self.runtime_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_return(&self) {
        self.degraded_return_values.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.boundary_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_drop(&self) {
        self.stale_results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_created(&self) {
        self.contexts_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_failure(&self) {
        self.context_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let evaluations = self.evaluations.load(Ordering::Relaxed);
        let total_ns = self.evaluation_time_ns.load(Ordering::Relaxed);
        let avg_evaluation_ms = if evaluations == 0 {
            0.0
        } else {
            (total_ns as f64) / (evaluations as f64) / 1_000_000.0
        };

        MetricsSnapshot {
            evaluations,
            avg_evaluation_ms,
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
            runtime_errors: self.runtime_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            degraded_return_values: self.degraded_return_values.load(Ordering::Relaxed),
            boundary_dispatches: self.boundary_dispatches.load(Ordering::Relaxed),
            stale_results_dropped: self.stale_results_dropped.load(Ordering::Relaxed),
            contexts_created: self.contexts_created.load(Ordering::Relaxed),
            context_failures: self.context_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub avg_evaluation_ms: f64,
    pub short_circuits: u64,
    pub runtime_errors: u64,
    pub timeouts: u64,
    pub degraded_return_values: u64,
    pub boundary_dispatches: u64,
    pub stale_results_dropped: u64,
    pub contexts_created: u64,
    pub context_failures: u64,
}
