//! Failed-to-Idle Remap Registry
//!
//! # Purpose
//!
//! Shared bookkeeping for the dispatch phase: which devices are busy, idle,
//! or failed, which partitions completed, and which failed partitions are
//! waiting for a device. Controller threads consult it after every
//! execution to learn their next assignment, so a partition that failed on
//! one device migrates to a device that finished successfully and still
//! holds resources.
//!
//! # Architecture
//!
//! ```text
//! RemapRegistry
//!     └── Mutex<RegistryState>           (the single critical section)
//!         ├── slots:   [Free|Busy|Failed]  indexed by device id
//!         ├── idle:    VecDeque<DeviceId>  FIFO of claimable devices
//!         ├── pending: VecDeque<FunctorId> FIFO of waiting partitions
//!         ├── remap:   functor -> device actually executing it
//!         └── attempts / completed         per-functor bookkeeping
//! ```
//!
//! # Correctness Invariants
//!
//! - **Single critical section**: the registries and the remap table are
//!   only ever observed or mutated while holding the one mutex, so remap
//!   decisions serialize.
//! - **Busy/idle disjoint**: a device id never appears in the idle FIFO
//!   while its slot is `Busy`, and never appears in the FIFO twice.
//! - **No in-place retry**: a failed partition is only handed to a device
//!   popped from the idle FIFO, never back to the slot that failed it.
//! - **FIFO tie-breaks**: idle devices are claimed strictly in the order
//!   they became idle; pending partitions are served strictly in the order
//!   they failed. No home-device locality preference.
//! - **Bounded attempts**: a partition executes at most
//!   `RemapPolicy::max_attempts` times.
//! - **Handoff in the lock**: ownership of a claimed idle device transfers
//!   to the claiming controller inside the same critical section that pops
//!   it, closing the use-after-release window.
//!
//! # Slot state machine
//!
//! ```text
//!          dispatch            success
//!   Free ───────────► Busy ───────────► Free (enters idle FIFO)
//!                      │
//!                      │ execution error
//!                      ▼
//!                    Failed   (partition retried elsewhere, slot stays)
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use super::failure::RemapPolicy;
use super::functor::{DeviceId, FunctorId};

// ============================================================================
// Slot state
// ============================================================================

/// State of one device slot.
///
/// Exactly one controller thread holds a slot in `Busy` at a time. A slot
/// that failed allocation starts out `Failed` and never runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SlotState {
    /// Completed its work; resources still allocated; claimable for remap.
    Free,
    /// A controller thread is executing a partition on this device.
    Busy,
    /// Execution or allocation failed on this device.
    Failed,
}

// ============================================================================
// Registry
// ============================================================================

/// Per-functor and per-device outcome sets, extracted after join.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RemapOutcome {
    /// Functors that reached a completed state, in index order.
    pub completed: Vec<FunctorId>,
    /// Functors that permanently failed (attempt budget spent or no idle
    /// device ever became available), in index order.
    pub failed: Vec<FunctorId>,
    /// `functor -> device` pairs for every partition that executed on a
    /// device other than its home device.
    pub remap_table: Vec<(FunctorId, DeviceId)>,
}

/// Mutable state behind the registry mutex.
#[derive(Debug)]
struct RegistryState {
    slots: Vec<SlotState>,
    idle: VecDeque<DeviceId>,
    pending: VecDeque<FunctorId>,
    remap: Vec<Option<DeviceId>>,
    attempts: Vec<u32>,
    completed: Vec<bool>,
}

impl RegistryState {
    /// Invariant sweep, used from `debug_assert!` after every mutation.
    fn invariants_hold(&self) -> bool {
        // Idle FIFO entries are unique and their slots are Free.
        for (i, d) in self.idle.iter().enumerate() {
            if self.slots[d.index()] != SlotState::Free {
                return false;
            }
            if self.idle.iter().skip(i + 1).any(|other| other == d) {
                return false;
            }
        }
        // Pending entries are unique and not completed.
        for (i, f) in self.pending.iter().enumerate() {
            if self.completed[f.index()] {
                return false;
            }
            if self.pending.iter().skip(i + 1).any(|other| other == f) {
                return false;
            }
        }
        self.idle.len() <= self.slots.len() && self.pending.len() <= self.slots.len()
    }
}

/// Shared remap bookkeeping for one dispatch run.
///
/// # Thread Safety
///
/// Safe to share by reference across controller threads. Every method takes
/// the internal mutex; critical sections are short (deque and vector
/// operations only, never user code).
///
/// # Poisoning
///
/// Lock poisoning is recovered, not propagated: a panicking functor must
/// not deadlock or abort the bookkeeping of surviving controllers.
#[derive(Debug)]
pub struct RemapRegistry {
    policy: RemapPolicy,
    n_devices: usize,
    state: Mutex<RegistryState>,
}

impl RemapRegistry {
    /// Create the registry for `n_devices` partitions.
    ///
    /// `usable[i]` is false for devices whose allocation failed: their slot
    /// starts `Failed` and their partition is seeded into the pending FIFO
    /// (attempt count 0, since it never executed), to be picked up by an
    /// allocation survivor exactly like remapped work.
    ///
    /// # Panics
    ///
    /// Panics if `usable.len() != n_devices` or the policy is invalid.
    pub fn new(n_devices: usize, usable: &[bool], policy: RemapPolicy) -> Self {
        assert_eq!(usable.len(), n_devices, "usable mask length mismatch");
        policy.validate();

        let slots = usable
            .iter()
            .map(|&up| if up { SlotState::Busy } else { SlotState::Failed })
            .collect();
        let attempts = usable.iter().map(|&up| u32::from(up)).collect();
        let pending = usable
            .iter()
            .enumerate()
            .filter(|(_, &up)| !up)
            .map(|(i, _)| FunctorId(i as u32))
            .collect();

        Self {
            policy,
            n_devices,
            state: Mutex::new(RegistryState {
                slots,
                idle: VecDeque::new(),
                pending,
                remap: vec![None; n_devices],
                attempts,
                completed: vec![false; n_devices],
            }),
        }
    }

    /// Number of partitions/devices in this run.
    #[inline]
    pub fn n_devices(&self) -> usize {
        self.n_devices
    }

    /// Lock with poison recovery.
    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Record a successful execution of `functor` on `device` and return
    /// the controller's next assignment, if any.
    ///
    /// The device transitions `Busy -> Free` and enters the idle FIFO. If a
    /// failed partition is pending, the oldest one claims the oldest idle
    /// device (which may be the device just released) and is returned for
    /// execution on the calling thread. This is the path that guarantees a
    /// partition parked while no device was idle is not silently dropped:
    /// every later-completing controller drains the pending FIFO before
    /// terminating.
    pub fn next_after_success(
        &self,
        functor: FunctorId,
        device: DeviceId,
    ) -> Option<(FunctorId, DeviceId)> {
        let mut st = self.lock();
        debug_assert_eq!(st.slots[device.index()], SlotState::Busy);

        st.completed[functor.index()] = true;
        st.slots[device.index()] = SlotState::Free;
        st.idle.push_back(device);

        let next = self.claim_pending(&mut st);
        debug_assert!(st.invariants_hold());
        next
    }

    /// Record a failed execution of `functor` on `device` and return the
    /// controller's next assignment, if any.
    ///
    /// The device transitions `Busy -> Failed`. If the partition has
    /// attempt budget left and an idle device exists, it is claimed (FIFO)
    /// and the re-run happens on the calling thread. With budget but no
    /// idle device the partition parks in the pending FIFO. With no budget
    /// it is left permanently failed.
    pub fn next_after_failure(
        &self,
        functor: FunctorId,
        device: DeviceId,
    ) -> Option<(FunctorId, DeviceId)> {
        let mut st = self.lock();
        debug_assert_eq!(st.slots[device.index()], SlotState::Busy);

        st.slots[device.index()] = SlotState::Failed;

        let next = if !self.policy.allows_another(st.attempts[functor.index()]) {
            debug!(
                functor = functor.0,
                device = device.0,
                attempts = st.attempts[functor.index()],
                "attempt budget spent, partition permanently failed"
            );
            None
        } else if let Some(claimed) = st.idle.pop_front() {
            self.assign(&mut st, functor, claimed);
            Some((functor, claimed))
        } else {
            debug!(
                functor = functor.0,
                device = device.0,
                "no idle device, partition parked for a later controller"
            );
            st.pending.push_back(functor);
            None
        };

        debug_assert!(st.invariants_hold());
        next
    }

    /// Pop the oldest pending partition and pair it with the oldest idle
    /// device. Caller must have pushed at least one idle device.
    fn claim_pending(&self, st: &mut RegistryState) -> Option<(FunctorId, DeviceId)> {
        if st.pending.is_empty() {
            return None;
        }
        let functor = st.pending.pop_front().expect("pending checked non-empty");
        let device = st.idle.pop_front().expect("idle non-empty after release");
        self.assign(st, functor, device);
        Some((functor, device))
    }

    /// Record the `functor -> device` reassignment. Lock must be held.
    fn assign(&self, st: &mut RegistryState, functor: FunctorId, device: DeviceId) {
        debug_assert_eq!(st.slots[device.index()], SlotState::Free);
        st.slots[device.index()] = SlotState::Busy;
        st.attempts[functor.index()] += 1;
        st.remap[functor.index()] = Some(device);
        debug!(
            functor = functor.0,
            device = device.0,
            attempt = st.attempts[functor.index()],
            "partition remapped to idle device"
        );
    }

    /// Extract the outcome sets. Call after all controller threads are
    /// terminal; pending leftovers count as permanently failed.
    pub fn finalize(&self) -> RemapOutcome {
        let st = self.lock();
        let mut outcome = RemapOutcome::default();
        for i in 0..self.n_devices {
            let functor = FunctorId(i as u32);
            if st.completed[i] {
                outcome.completed.push(functor);
            } else {
                outcome.failed.push(functor);
            }
            if let Some(device) = st.remap[i] {
                outcome.remap_table.push((functor, device));
            }
        }
        outcome
    }

    /// Snapshot of the idle FIFO, oldest first.
    pub fn idle_devices(&self) -> Vec<DeviceId> {
        self.lock().idle.iter().copied().collect()
    }

    /// Number of partitions currently parked awaiting a device.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Current state of one device slot.
    ///
    /// # Panics
    ///
    /// Panics if `device` is out of range.
    pub fn slot(&self, device: DeviceId) -> SlotState {
        self.lock().slots[device.index()]
    }
}

// ============================================================================
// Tests
// ============================================================================
