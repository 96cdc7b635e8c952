//! Device-Task Dispatch Core
//!
//! # Architecture
//!
//! One job, N devices, N + 1 threads:
//! - **Controller threads**: one per usable device, each driving
//!   `main_functor` and the failed-to-idle remap loop
//! - **Auxiliary thread**: one best-effort monitor, cancelled with a
//!   bounded grace period once main work is terminal
//!
//! The remap registry is the only shared mutable state; everything it owns
//! lives behind a single mutex so reassignment decisions serialize.

pub mod dispatcher;
pub mod failure;
pub mod functor;
pub mod metrics;
pub mod monitor;
pub mod remap;
pub mod run;

// Re-exports for primary types
pub use failure::{FailureKind, RemapPolicy};
pub use functor::{DeviceFunctor, DeviceId, FunctorError, FunctorId};
pub use metrics::{ControllerMetricsLocal, DispatchMetrics};
pub use monitor::{AuxMonitor, CancelFlag, MonitorOutcome};
pub use remap::{RemapOutcome, RemapRegistry, SlotState};
pub use run::{run, DispatchConfig, RunPhase, RunReport, RunStatus};
