//! Multi-device task dispatch with failure remapping.
//!
//! ## Scope
//! This crate distributes one computational job across an arbitrary number
//! of independent compute devices, one controller thread per device, and
//! tolerates individual device failures by reassigning their share of work
//! to devices that finished successfully and still hold resources.
//!
//! ## Key invariants
//! - Remap bookkeeping (device slots, idle/pending FIFOs, remap table) is
//!   only touched inside one mutual-exclusion region.
//! - A failed partition is retried on a *different*, currently idle device,
//!   never in place, and at most `max_attempts` times.
//! - The auxiliary monitor never blocks completion: it is cancelled and, if
//!   unresponsive, abandoned after a bounded grace period.
//! - Individual device errors fold into an aggregate status; `run` never
//!   panics on them.
//!
//! ## Run flow
//! `bind_data -> allocate_resources -> generate_parameter_list ->
//! controllers + monitor -> remap on failure -> join -> post_run ->
//! release_resources`
//!
//! ## Notable entry points
//! - [`run`] / [`DispatchConfig`]: execute one job, get a [`RunReport`].
//! - [`DeviceFunctor`]: the capability set a device back-end implements.
//! - [`RemapRegistry`]: the shared failed-to-idle bookkeeping, usable
//!   standalone with [`dispatch::dispatcher`].

pub mod dispatch;
#[cfg(test)]
pub mod test_utils;

pub use dispatch::{
    run, CancelFlag, DeviceFunctor, DeviceId, DispatchConfig, DispatchMetrics, FailureKind,
    FunctorError, FunctorId, MonitorOutcome, RemapPolicy, RemapRegistry, RunPhase, RunReport,
    RunStatus, SlotState,
};
