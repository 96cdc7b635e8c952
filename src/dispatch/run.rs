//! Run Orchestrator
//!
//! Top-level driver composing the dispatch core:
//! partition -> dispatch -> remap-on-failure -> monitor -> join -> post-run.
//!
//! # Phases
//!
//! ```text
//! Init ──► Partitioned ──► Dispatching ──► Joined ──► PostRun ──► Done
//!   │            │
//!   └── fatal ───┴──────► report with TotalFailure and the phase reached
//! ```
//!
//! A fatal setup error (dataset binding, partition generation) resolves the
//! run early; everything after the dispatch phase always executes, so
//! `post_run` and `release_resources` observe every non-fatal run exactly
//! once, success or not. Individual device errors never surface as panics
//! or `Err` from [`run`]: they fold into the aggregate [`RunStatus`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::dispatcher;
use super::failure::{FailureKind, RemapPolicy};
use super::functor::{DeviceFunctor, DeviceId, FunctorId};
use super::metrics::DispatchMetrics;
use super::monitor::{AuxMonitor, CancelFlag, MonitorOutcome};
use super::remap::RemapRegistry;

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator configuration.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchConfig {
    /// Attempt budget for the failed-to-idle remap path.
    pub remap: RemapPolicy,

    /// How long to wait for the auxiliary monitor after main work is
    /// terminal before abandoning its thread.
    pub monitor_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            remap: RemapPolicy::default(),
            monitor_grace: Duration::from_millis(250),
        }
    }
}

impl DispatchConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        self.remap.validate();
        assert!(
            !self.monitor_grace.is_zero(),
            "monitor_grace must be > 0"
        );
    }
}

// ============================================================================
// Run outcome types
// ============================================================================

/// Phase reached by a run. `Done` unless a fatal setup error ended it early.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Init,
    Partitioned,
    Dispatching,
    Joined,
    PostRun,
    Done,
}

/// Aggregate status of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every partition completed.
    Success,
    /// Some partitions completed; the listed ones permanently failed.
    PartialFailure(Vec<FunctorId>),
    /// No partition completed.
    TotalFailure,
}

impl RunStatus {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

/// Everything a caller learns from one run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Aggregate status: success, partial failure, or total failure.
    pub status: RunStatus,
    /// Phase reached. `Done` for any run that entered the dispatch phase.
    pub phase: RunPhase,
    /// Partitions that completed, in index order.
    pub completed: Vec<FunctorId>,
    /// Partitions that permanently failed, in index order.
    pub failed: Vec<FunctorId>,
    /// `functor -> device` pairs for partitions that ran away from home.
    pub remap_table: Vec<(FunctorId, DeviceId)>,
    /// How the auxiliary monitor ended.
    pub monitor: MonitorOutcome,
    /// Merged controller metrics.
    pub metrics: DispatchMetrics,
}

impl RunReport {
    /// Report for a run that died before dispatching anything.
    fn fatal(phase: RunPhase, n_devices: usize) -> Self {
        Self {
            status: RunStatus::TotalFailure,
            phase,
            completed: Vec::new(),
            failed: (0..n_devices).map(|i| FunctorId(i as u32)).collect(),
            remap_table: Vec::new(),
            monitor: MonitorOutcome::NotStarted,
            metrics: DispatchMetrics::default(),
        }
    }
}

// ============================================================================
// Release guard
// ============================================================================

/// Runs `release_resources` on every exit path once allocation has been
/// attempted, including fatal ones.
struct ReleaseGuard<'a, F: DeviceFunctor> {
    functor: &'a F,
}

impl<F: DeviceFunctor> Drop for ReleaseGuard<'_, F> {
    fn drop(&mut self) {
        self.functor.release_resources();
    }
}

// ============================================================================
// The entry point
// ============================================================================

/// Execute one job across `n_devices` devices.
///
/// Binds `dataset`, allocates resources, partitions, runs one controller
/// thread per usable device plus the auxiliary monitor, remaps failed
/// partitions onto idle devices, and returns an aggregate report once all
/// main work is terminal. Device failures are absorbed into the report;
/// this function panics only on caller errors (invalid configuration,
/// `n_devices == 0`) or a bug in the dispatch machinery itself.
///
/// # Panics
///
/// Panics if `config` is invalid or `n_devices` is 0 or exceeds `u32::MAX`.
pub fn run<F>(
    functor: Arc<F>,
    dataset: F::Dataset,
    n_devices: usize,
    config: &DispatchConfig,
) -> RunReport
where
    F: DeviceFunctor + 'static,
{
    config.validate();
    assert!(n_devices >= 1, "n_devices must be >= 1");
    let _ = u32::try_from(n_devices).expect("n_devices must fit in u32");

    info!(n_devices, "dispatch run starting");

    // Init: bind, then acquire device resources.
    if let Err(err) = functor.bind_data(dataset) {
        error!(error = %err, "dataset binding failed");
        return RunReport::fatal(RunPhase::Init, n_devices);
    }

    let _release = ReleaseGuard {
        functor: functor.as_ref(),
    };

    let alloc_ok = match functor.allocate_resources() {
        Ok(()) => !functor.fail(),
        Err(err) => {
            warn!(error = %err, "device resource allocation failed");
            false
        }
    };
    let usable: Vec<bool> = (0..n_devices)
        .map(|i| alloc_ok && !functor.fail_on_functor(FunctorId(i as u32)))
        .collect();
    for (i, &up) in usable.iter().enumerate() {
        if !up {
            warn!(
                device = i,
                kind = ?FailureKind::DeviceAllocation,
                "device unusable, partition queued for reassignment"
            );
        }
    }

    // Partitioned.
    if let Err(err) = functor.generate_parameter_list(n_devices) {
        error!(error = %err, "parameter list generation failed");
        return RunReport::fatal(RunPhase::Partitioned, n_devices);
    }
    debug!(phase = ?RunPhase::Partitioned, "dataset split into per-device partitions");

    // Dispatching: controllers first, then the monitor alongside them.
    let registry = RemapRegistry::new(n_devices, &usable, config.remap);
    let cancel = CancelFlag::new();
    let mut monitor: Option<AuxMonitor> = None;

    let metrics = thread::scope(|s| {
        let handles = dispatcher::launch(s, functor.as_ref(), &registry, &usable);
        debug!(controllers = handles.len(), phase = ?RunPhase::Dispatching, "controller threads launched");
        monitor = Some(AuxMonitor::start(Arc::clone(&functor), cancel.clone()));
        dispatcher::join(handles)
    });
    debug!(phase = ?RunPhase::Joined, "all controller threads terminal");

    // Joined: main work is done; the monitor gets its bounded grace.
    cancel.cancel();
    let monitor_outcome = monitor
        .take()
        .expect("monitor started during dispatch")
        .finish(config.monitor_grace);

    // PostRun.
    let outcome = registry.finalize();
    functor.post_run();
    debug!(phase = ?RunPhase::PostRun, "post-run bookkeeping complete");

    let status = if outcome.failed.is_empty() {
        RunStatus::Success
    } else if outcome.completed.is_empty() {
        RunStatus::TotalFailure
    } else {
        RunStatus::PartialFailure(outcome.failed.clone())
    };
    if !outcome.failed.is_empty() {
        warn!(
            failed = outcome.failed.len(),
            kind = ?FailureKind::RemapExhausted,
            "partitions permanently failed"
        );
    }
    info!(
        completed = outcome.completed.len(),
        failed = outcome.failed.len(),
        remaps = outcome.remap_table.len(),
        monitor = ?monitor_outcome,
        "dispatch run finished"
    );

    RunReport {
        status,
        phase: RunPhase::Done,
        completed: outcome.completed,
        failed: outcome.failed,
        remap_table: outcome.remap_table,
        monitor: monitor_outcome,
        metrics,
    }
}

// ============================================================================
// Tests
// ============================================================================
