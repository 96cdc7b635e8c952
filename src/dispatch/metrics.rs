//! Dispatch metrics: per-controller counters, merged at join.
//!
//! Each controller thread owns a [`ControllerMetricsLocal`] and updates it
//! without any cross-thread contention. The dispatcher merges them into one
//! [`DispatchMetrics`] snapshot when all controllers are terminal. Counters
//! only; durations and histograms belong to the surrounding application.

use serde::Serialize;

/// Counters owned by a single controller thread.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ControllerMetricsLocal {
    /// Partition executions started on this thread.
    pub executions: u64,
    /// Executions that completed successfully.
    pub completions: u64,
    /// Executions that returned an error or panicked.
    pub failures: u64,
    /// Panics caught inside `main_functor`.
    pub panics_caught: u64,
    /// Failed partitions this thread re-ran on a freshly claimed device.
    pub remaps: u64,
    /// Parked partitions this thread picked up after its own success.
    pub pending_claims: u64,
}

/// Aggregated dispatch metrics for one run.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct DispatchMetrics {
    /// Number of controller threads merged into this snapshot.
    pub controllers: u64,
    pub executions: u64,
    pub completions: u64,
    pub failures: u64,
    pub panics_caught: u64,
    pub remaps: u64,
    pub pending_claims: u64,
}

impl DispatchMetrics {
    /// Fold one controller's counters into the snapshot.
    pub fn merge_controller(&mut self, local: &ControllerMetricsLocal) {
        self.controllers += 1;
        self.executions += local.executions;
        self.completions += local.completions;
        self.failures += local.failures;
        self.panics_caught += local.panics_caught;
        self.remaps += local.remaps;
        self.pending_claims += local.pending_claims;
    }
}
