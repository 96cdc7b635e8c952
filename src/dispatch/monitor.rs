//! Auxiliary Monitor
//!
//! One extra thread running the functor's best-effort monitoring routine
//! alongside the main controller threads.
//!
//! # Cancellation Semantics
//!
//! Forcibly killing an arbitrary in-flight thread is unsafe in Rust, so
//! "kill the auxiliary thread when main work completes" is deliberately
//! narrowed to: set a cancellation flag, wait a bounded grace period, then
//! abandon the thread (drop its handle and let it run out on its own).
//! Callers must not place correctness-critical logic in the auxiliary
//! routine; an abandoned monitor is reported as a telemetry gap, never as
//! an error, and an abandoned thread must not hold any resource whose
//! release matters.
//!
//! # No Lost Wakeups
//!
//! The monitor thread publishes its result, sets the done flag, then
//! unparks the waiter. The waiter re-checks the flag around every
//! `park_timeout`, so a completion between checks is never missed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::Parker;
use serde::Serialize;
use tracing::warn;

use super::functor::{DeviceFunctor, FunctorError};

// ============================================================================
// Cancellation flag
// ============================================================================

/// Cooperative cancellation flag handed to the auxiliary routine.
///
/// Cheap to clone; all clones observe the same flag. Once cancelled it
/// never resets.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// How the auxiliary monitor ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MonitorOutcome {
    /// The routine returned `Ok` before or within the grace period.
    Completed,
    /// The routine returned an error or panicked. Telemetry only.
    Failed,
    /// Still running when the grace period expired; thread abandoned.
    Abandoned,
    /// The run ended before the dispatch phase; no monitor was started.
    NotStarted,
}

struct MonitorShared {
    done: AtomicBool,
    result: Mutex<Option<Result<(), FunctorError>>>,
}

/// Handle to the running auxiliary thread.
pub struct AuxMonitor {
    shared: Arc<MonitorShared>,
    parker: Parker,
    handle: Option<JoinHandle<()>>,
}

impl AuxMonitor {
    /// Spawn the auxiliary thread. Called after the controller threads are
    /// launched so the routine observes a running dispatch.
    pub fn start<F>(functor: Arc<F>, cancel: CancelFlag) -> Self
    where
        F: DeviceFunctor + 'static,
    {
        let shared = Arc::new(MonitorShared {
            done: AtomicBool::new(false),
            result: Mutex::new(None),
        });
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let thread_shared = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name("dispatch-aux".to_string())
            .spawn(move || {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| functor.aux_functor(&cancel)));
                let flattened = match result {
                    Ok(r) => r,
                    Err(_) => Err(FunctorError::Aux("auxiliary routine panicked".to_string())),
                };
                *thread_shared
                    .result
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner()) = Some(flattened);
                thread_shared.done.store(true, Ordering::Release);
                unparker.unpark();
            })
            .expect("failed to spawn monitor thread");

        Self {
            shared,
            parker,
            handle: Some(handle),
        }
    }

    /// Wait at most `grace` for the routine to finish, then abandon it.
    ///
    /// Call after cancelling the flag handed to [`start`](AuxMonitor::start).
    pub fn finish(mut self, grace: Duration) -> MonitorOutcome {
        let deadline = Instant::now() + grace;
        while !self.shared.done.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.parker.park_timeout(deadline - now);
        }

        if !self.shared.done.load(Ordering::Acquire) {
            // Handle dropped, thread left running. It owns only an Arc of
            // the functor and its shared slot, both safe to outlive us.
            warn!("auxiliary monitor still running after grace period, abandoning");
            return MonitorOutcome::Abandoned;
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let result = self
            .shared
            .result
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        match result {
            Some(Ok(())) => MonitorOutcome::Completed,
            Some(Err(err)) => {
                warn!(error = %err, "auxiliary monitor failed");
                MonitorOutcome::Failed
            }
            None => MonitorOutcome::Failed,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::functor::{DeviceId, FunctorId};

    struct AuxProbe {
        behavior: AuxBehavior,
    }

    enum AuxBehavior {
        ReturnOk,
        ReturnErr,
        Panic,
        PollCancel,
        IgnoreCancel,
    }

    impl DeviceFunctor for AuxProbe {
        type Dataset = ();

        fn bind_data(&self, _dataset: ()) -> Result<(), FunctorError> {
            Ok(())
        }
        fn allocate_resources(&self) -> Result<(), FunctorError> {
            Ok(())
        }
        fn release_resources(&self) {}
        fn generate_parameter_list(&self, _n: usize) -> Result<(), FunctorError> {
            Ok(())
        }
        fn main_functor(&self, _f: FunctorId, _d: DeviceId) -> Result<(), FunctorError> {
            Ok(())
        }
        fn aux_functor(&self, cancel: &CancelFlag) -> Result<(), FunctorError> {
            match self.behavior {
                AuxBehavior::ReturnOk => Ok(()),
                AuxBehavior::ReturnErr => Err(FunctorError::Aux("probe".to_string())),
                AuxBehavior::Panic => panic!("aux probe panic"),
                AuxBehavior::PollCancel => {
                    while !cancel.is_cancelled() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Ok(())
                }
                AuxBehavior::IgnoreCancel => loop {
                    thread::sleep(Duration::from_millis(50));
                },
            }
        }
        fn post_run(&self) {}
        fn fail(&self) -> bool {
            false
        }
        fn fail_on_functor(&self, _f: FunctorId) -> bool {
            false
        }
    }

    fn run_monitor(behavior: AuxBehavior, grace: Duration) -> MonitorOutcome {
        let functor = Arc::new(AuxProbe { behavior });
        let cancel = CancelFlag::new();
        let monitor = AuxMonitor::start(functor, cancel.clone());
        cancel.cancel();
        monitor.finish(grace)
    }

    #[test]
    fn cancel_flag_is_sticky_and_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn immediate_return_completes() {
        let outcome = run_monitor(AuxBehavior::ReturnOk, Duration::from_secs(1));
        assert_eq!(outcome, MonitorOutcome::Completed);
    }

    #[test]
    fn error_is_telemetry_only() {
        let outcome = run_monitor(AuxBehavior::ReturnErr, Duration::from_secs(1));
        assert_eq!(outcome, MonitorOutcome::Failed);
    }

    #[test]
    fn panic_is_contained() {
        let outcome = run_monitor(AuxBehavior::Panic, Duration::from_secs(1));
        assert_eq!(outcome, MonitorOutcome::Failed);
    }

    #[test]
    fn cooperative_routine_exits_on_cancel() {
        let outcome = run_monitor(AuxBehavior::PollCancel, Duration::from_secs(5));
        assert_eq!(outcome, MonitorOutcome::Completed);
    }

    #[test]
    fn unresponsive_routine_is_abandoned() {
        let outcome = run_monitor(AuxBehavior::IgnoreCancel, Duration::from_millis(20));
        assert_eq!(outcome, MonitorOutcome::Abandoned);
    }
}
