//! Worker Dispatcher
//!
//! Launches one controller thread per usable device and blocks until every
//! controller, original or remapped, reaches a terminal state.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │                 dispatch phase               │
//!                 │                                              │
//!   launch() ─────┼──► ctrl-0      ctrl-1      ...    ctrl-N    │
//!                 │      │           │                  │        │
//!                 │      ▼           ▼                  ▼        │
//!                 │  main_functor(i, i)  (initially i == i)      │
//!                 │      │           │                  │        │
//!                 │      └───────────┴───────┬──────────┘        │
//!                 │                          ▼                   │
//!                 │                   RemapRegistry              │
//!                 │            (next assignment, or terminal)    │
//!                 └──────────────────────────────────────────────┘
//!                                            │
//!   join() ◄─────────────────────────────────┘  merged metrics
//! ```
//!
//! # Correctness Invariants
//!
//! - **Work-conserving**: a controller never terminates while a pending
//!   partition and an idle device coexist; the registry hands it the work
//!   before it exits.
//! - **Thread reuse**: a remapped partition re-runs on the controller
//!   thread that detected the failure (or the one whose success freed a
//!   device), never on a newly spawned thread.
//! - **Panic isolation**: a panic inside `main_functor` is caught and
//!   recorded as an execution failure; a panic in the dispatch machinery
//!   itself is captured at join and re-thrown on the calling thread.
//! - **No inter-controller blocking**: controllers block only inside
//!   `main_functor` or on the registry mutex, never on each other.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{Scope, ScopedJoinHandle};

use tracing::{debug, warn};

use super::functor::{DeviceFunctor, DeviceId, FunctorId};
use super::metrics::{ControllerMetricsLocal, DispatchMetrics};
use super::remap::RemapRegistry;

/// Launch one named controller thread per usable device.
///
/// Functor `i` starts on device `i`. Devices whose allocation failed get no
/// thread; the registry has their partitions parked already.
///
/// # Panics
///
/// Panics if the OS refuses to spawn a thread.
pub fn launch<'scope, 'env, F>(
    scope: &'scope Scope<'scope, 'env>,
    functor: &'env F,
    registry: &'env RemapRegistry,
    usable: &[bool],
) -> Vec<ScopedJoinHandle<'scope, ControllerMetricsLocal>>
where
    F: DeviceFunctor,
{
    let mut handles = Vec::with_capacity(usable.len());
    for (i, &up) in usable.iter().enumerate() {
        if !up {
            continue;
        }
        let functor_id = FunctorId(i as u32);
        let device_id = DeviceId(i as u32);
        let handle = std::thread::Builder::new()
            .name(format!("dispatch-ctrl-{i}"))
            .spawn_scoped(scope, move || {
                controller_loop(functor, registry, functor_id, device_id)
            })
            .expect("failed to spawn controller thread");
        handles.push(handle);
    }
    handles
}

/// Join all controller threads and merge their metrics.
///
/// # Panics
///
/// If a controller thread itself panicked (outside `main_functor`, whose
/// panics are absorbed), the first captured panic is re-thrown here after
/// every thread has been joined.
pub fn join(handles: Vec<ScopedJoinHandle<'_, ControllerMetricsLocal>>) -> DispatchMetrics {
    let mut snapshot = DispatchMetrics::default();
    let mut first_panic = None;

    for handle in handles {
        match handle.join() {
            Ok(local) => snapshot.merge_controller(&local),
            Err(payload) => {
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }
    }

    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
    snapshot
}

/// Controller thread body: execute the assigned partition, then keep asking
/// the registry for follow-up work (a remap of this partition, or a parked
/// partition another device failed) until none remains.
fn controller_loop<F>(
    functor: &F,
    registry: &RemapRegistry,
    initial_functor: FunctorId,
    initial_device: DeviceId,
) -> ControllerMetricsLocal
where
    F: DeviceFunctor,
{
    let mut metrics = ControllerMetricsLocal::default();
    let mut assignment = Some((initial_functor, initial_device));

    while let Some((f, d)) = assignment {
        metrics.executions += 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| functor.main_functor(f, d)));

        let succeeded = match result {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(functor = f.0, device = d.0, error = %err, "partition execution failed");
                metrics.failures += 1;
                false
            }
            Err(_payload) => {
                warn!(functor = f.0, device = d.0, "partition execution panicked");
                metrics.failures += 1;
                metrics.panics_caught += 1;
                false
            }
        };

        assignment = if succeeded {
            metrics.completions += 1;
            let next = registry.next_after_success(f, d);
            if let Some((nf, nd)) = next {
                metrics.pending_claims += 1;
                debug!(
                    functor = nf.0,
                    device = nd.0,
                    "controller picked up parked partition"
                );
            }
            next
        } else {
            let next = registry.next_after_failure(f, d);
            if let Some((_, nd)) = next {
                metrics.remaps += 1;
                debug!(functor = f.0, from = d.0, to = nd.0, "retrying on idle device");
            }
            next
        };
    }

    metrics
}

// ============================================================================
// Tests
// ============================================================================
