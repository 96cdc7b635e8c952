//! Device Functor Contract
//!
//! Run-scoped identifiers and the capability set a device back-end must
//! provide to participate in a dispatch run.
//!
//! A functor is a unit of device-bound work together with the logic to
//! execute it. One implementation drives one device family; the core is
//! generic over the implementation and never inspects it at runtime.
//!
//! ## Lifecycle
//!
//! ```text
//! bind_data ──► allocate_resources ──► generate_parameter_list
//!                                             │
//!                     ┌───────────────────────┴────────────────────┐
//!                     ▼                                            ▼
//!           main_functor(i, d)  × n_devices              aux_functor (best effort)
//!                     │
//!                     ▼
//!                 post_run ──► release_resources
//! ```
//!
//! ## Non-negotiable invariants
//!
//! - `main_functor` must be safely re-runnable on **any** device index, not
//!   only its originally assigned one, possibly at reduced performance. The
//!   failed-to-idle remap path depends on this.
//! - `release_resources` must be safe to call even when allocation partially
//!   failed, and runs on every exit path.
//! - `aux_functor` must not hold any resource whose release is required for
//!   correctness: it has no completion guarantee.

use serde::Serialize;
use thiserror::Error;

use super::monitor::CancelFlag;

// ============================================================================
// Run-scoped identifiers
// ============================================================================

/// Index of a work partition within a run.
///
/// Exactly `n_devices` functor indices exist per run, assigned `0..n` in
/// partition order. Initially functor `i` is bound to device `i`; after a
/// remap the pairing diverges and is recorded in the remap table.
///
/// Use this ID in logs and metrics instead of dataset contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FunctorId(pub u32);

/// Index of a physical or logical compute device within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(pub u32);

impl FunctorId {
    /// Index as a `usize` for slot arena addressing.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl DeviceId {
    /// Index as a `usize` for slot arena addressing.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Functor-side errors
// ============================================================================

/// Error returned by a [`DeviceFunctor`] operation.
///
/// Carried as data, not propagated as a panic: execution errors feed the
/// remap path, setup errors resolve the run to `TotalFailure`, auxiliary
/// errors are telemetry only.
#[derive(Clone, Debug, Error)]
pub enum FunctorError {
    /// Dataset binding failed. Fatal: nothing was dispatched.
    #[error("dataset binding failed: {0}")]
    Bind(String),

    /// Device resource acquisition failed (globally, or for the devices
    /// reported by `fail_on_functor`).
    #[error("device resource allocation failed: {0}")]
    Allocation(String),

    /// Partition generation failed. Fatal: nothing was dispatched.
    #[error("parameter list generation failed: {0}")]
    Partition(String),

    /// A partition execution failed on the given device. Triggers remap.
    #[error("partition execution failed: {0}")]
    Execution(String),

    /// The auxiliary monitoring routine failed. Never affects the run status.
    #[error("auxiliary routine failed: {0}")]
    Aux(String),
}

// ============================================================================
// The contract
// ============================================================================

/// Capability set a device back-end implements to be driven by the
/// dispatcher.
///
/// # Threading
///
/// All methods take `&self`; implementations own their interior
/// synchronization. During the dispatch phase `main_functor` is invoked
/// concurrently from one controller thread per device, each call with a
/// distinct `(functor, device)` pair. Setup and teardown methods
/// (`bind_data`, `allocate_resources`, `generate_parameter_list`,
/// `post_run`, `release_resources`) are only ever called from the
/// orchestrator thread, before or after the dispatch phase.
///
/// `fail` / `fail_on_functor` are not required to be internally
/// thread-safe; the core calls them sequentially from the orchestrator
/// thread only.
pub trait DeviceFunctor: Send + Sync {
    /// The dataset type this functor operates on.
    type Dataset;

    /// Attach the dataset to be processed. Must precede any execution.
    /// After partitioning the dataset is treated as read-only-shared across
    /// controller threads.
    fn bind_data(&self, dataset: Self::Dataset) -> Result<(), FunctorError>;

    /// Acquire device-side resources (memory, contexts) for up to
    /// `n_devices` devices.
    ///
    /// Per-device outcomes are read back via
    /// [`fail_on_functor`](DeviceFunctor::fail_on_functor): a device whose
    /// allocation failed never starts, and its partition is seeded for
    /// reassignment to the surviving devices. Returning `Err` marks the
    /// whole allocation as failed.
    fn allocate_resources(&self) -> Result<(), FunctorError>;

    /// Release all device-side resources.
    ///
    /// Must be safe to call even if allocation partially failed. The
    /// orchestrator guarantees this runs on every exit path, including
    /// failure, after all controller threads are terminal.
    fn release_resources(&self);

    /// Split the bound dataset into exactly `n_devices` non-overlapping
    /// partitions covering the full dataset. The split policy is
    /// implementation-defined; partitions stay inside the implementation
    /// and are addressed by [`FunctorId`] afterwards.
    fn generate_parameter_list(&self, n_devices: usize) -> Result<(), FunctorError>;

    /// Execute partition `functor` on device `device`.
    ///
    /// Under normal circumstances `functor.0 == device.0`. After a failure
    /// the partition is re-run on the first idle device, so implementations
    /// must make sure any partition can run on any device, even if at
    /// reduced performance.
    ///
    /// A panic inside this method is caught by the calling controller
    /// thread and treated as an execution failure.
    fn main_functor(&self, functor: FunctorId, device: DeviceId) -> Result<(), FunctorError>;

    /// Optional best-effort monitoring routine, run concurrently with the
    /// main work on one extra thread.
    ///
    /// Has no completion guarantee: when all main work is terminal the
    /// orchestrator sets `cancel` and waits only a bounded grace period
    /// before abandoning the thread. Use it for progress or telemetry
    /// observation only; long-running implementations should poll
    /// [`CancelFlag::is_cancelled`] to exit early.
    fn aux_functor(&self, cancel: &CancelFlag) -> Result<(), FunctorError> {
        let _ = cancel;
        Ok(())
    }

    /// Final bookkeeping, run once after all main work reaches a terminal
    /// state, successfully or not.
    fn post_run(&self);

    /// True if the most recent global operation failed.
    ///
    /// Consulted by the orchestrator after resource allocation in addition
    /// to the returned `Result`, matching back-ends whose bulk operations
    /// only latch an error flag.
    fn fail(&self) -> bool;

    /// True if the most recent operation on `functor` failed. Must also
    /// return `true` for an out-of-range index.
    fn fail_on_functor(&self, functor: FunctorId) -> bool;
}
