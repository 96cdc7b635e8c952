//! Failure Taxonomy & Remap Attempt Policy
//!
//! # Design
//!
//! This module defines the contract between the dispatch core and callers for:
//! - Error classification (which failures the remapper absorbs locally)
//! - The per-functor attempt budget (how many executions a partition gets)
//!
//! # Classification Hierarchy
//!
//! ```text
//! FailureKind
//! ├── Handled locally (never abort the run)
//! │   ├── DeviceAllocation - device never starts; its partition is reassigned
//! │   └── Execution        - partition returned an error; triggers remap
//! ├── Terminal (folds into the aggregate status)
//! │   └── RemapExhausted   - no idle device / attempt budget spent
//! └── Telemetry-only (never an error)
//!     └── MonitorAbandoned - auxiliary thread outlived its grace period
//! ```
//!
//! # Attempt Budget Invariants
//!
//! - **Bounded executions**: a functor runs at most `max_attempts` times
//!   (initial dispatch plus remaps).
//! - **No in-place retry**: a failed partition is only ever re-run on a
//!   *different*, currently idle device.
//! - **Budget independence**: every functor gets the same budget; there is
//!   no global retry pool.

use serde::Serialize;

// ============================================================================
// Failure Classification
// ============================================================================

/// Classification of dispatch-level failures.
///
/// Determines where a failure is absorbed: the remapper handles
/// [`DeviceAllocation`](FailureKind::DeviceAllocation) and
/// [`Execution`](FailureKind::Execution) without aborting the run; only
/// [`RemapExhausted`](FailureKind::RemapExhausted) reaches the caller,
/// folded into the aggregate run status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Resource acquisition failed before execution began. The device never
    /// starts; its partition is seeded for reassignment.
    DeviceAllocation,
    /// A partition execution returned an error (or panicked). Triggers the
    /// failed-to-idle remap path.
    Execution,
    /// No idle device was available and the attempt budget is spent. The
    /// partition is permanently failed.
    RemapExhausted,
    /// The auxiliary monitor did not stop within its grace period. Reported
    /// as a possible telemetry gap, never as an error.
    MonitorAbandoned,
}

impl FailureKind {
    /// True if the remapper absorbs this failure without caller involvement.
    #[inline]
    pub fn is_handled_locally(&self) -> bool {
        matches!(self, FailureKind::DeviceAllocation | FailureKind::Execution)
    }

    /// True if this failure accumulates into the final run status.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureKind::RemapExhausted)
    }

    /// True if this is observational only and never affects the run status.
    #[inline]
    pub fn is_telemetry_only(&self) -> bool {
        matches!(self, FailureKind::MonitorAbandoned)
    }
}

// ============================================================================
// Remap Attempt Policy
// ============================================================================

/// Per-functor attempt budget for the failed-to-idle remap path.
///
/// `max_attempts` counts every execution of a partition: the initial
/// dispatch on its home device plus each remapped re-run. The default of 2
/// allows exactly one remap per partition.
///
/// # Invariants
///
/// - `max_attempts >= 1`. A budget of 0 could never execute anything and is
///   rejected by [`validate`](RemapPolicy::validate).
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RemapPolicy {
    /// Maximum executions per functor (initial attempt included).
    pub max_attempts: u32,
}

impl Default for RemapPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

impl RemapPolicy {
    /// Policy that never remaps: one execution per functor, on its home
    /// device only.
    pub const fn single_shot() -> Self {
        Self { max_attempts: 1 }
    }

    /// Validate policy invariants.
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is 0.
    pub fn validate(&self) {
        assert!(self.max_attempts >= 1, "max_attempts must be >= 1");
    }

    /// True if `attempts` executions leave room for another run.
    #[inline]
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ============================================================================
// Tests
// ============================================================================
