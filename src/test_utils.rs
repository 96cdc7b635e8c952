//! Scriptable device functor for unit tests.
//!
//! Failure behavior is scripted per partition: the first `panic_first`
//! executions panic, the next `fail_first` return an error, everything
//! after succeeds. Setup-phase failures (bind, allocation, partitioning)
//! and a blocking auxiliary routine can be toggled per instance.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::dispatch::functor::{DeviceFunctor, DeviceId, FunctorError, FunctorId};
use crate::dispatch::monitor::CancelFlag;

pub struct ScriptedFunctor {
    n: usize,
    fail_first: Vec<u32>,
    panic_first: Vec<u32>,
    attempts: Vec<AtomicU32>,
    executions: Mutex<Vec<(FunctorId, DeviceId)>>,
    bind_fails: bool,
    alloc_fails: bool,
    partition_fails: bool,
    alloc_fail_devices: Vec<bool>,
    aux_blocks: bool,
    bound: AtomicBool,
    partitioned: AtomicBool,
    releases: AtomicU32,
    post_runs: AtomicU32,
}

impl ScriptedFunctor {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            fail_first: vec![0; n],
            panic_first: vec![0; n],
            attempts: (0..n).map(|_| AtomicU32::new(0)).collect(),
            executions: Mutex::new(Vec::new()),
            bind_fails: false,
            alloc_fails: false,
            partition_fails: false,
            alloc_fail_devices: vec![false; n],
            aux_blocks: false,
            bound: AtomicBool::new(false),
            partitioned: AtomicBool::new(false),
            releases: AtomicU32::new(0),
            post_runs: AtomicU32::new(0),
        }
    }

    /// First `count` executions of `functor` return an error.
    pub fn fail_times(mut self, functor: FunctorId, count: u32) -> Self {
        self.fail_first[functor.index()] = count;
        self
    }

    /// First `count` executions of `functor` panic.
    pub fn panic_times(mut self, functor: FunctorId, count: u32) -> Self {
        self.panic_first[functor.index()] = count;
        self
    }

    pub fn bind_fails(mut self) -> Self {
        self.bind_fails = true;
        self
    }

    /// Allocation reports global failure through `fail()` while still
    /// returning `Ok`, mimicking back-ends that only latch an error flag.
    pub fn alloc_fails(mut self) -> Self {
        self.alloc_fails = true;
        self
    }

    pub fn partition_fails(mut self) -> Self {
        self.partition_fails = true;
        self
    }

    /// Allocation fails for one device only.
    pub fn alloc_fail_device(mut self, device: DeviceId) -> Self {
        self.alloc_fail_devices[device.index()] = true;
        self
    }

    /// Auxiliary routine loops forever, ignoring cancellation.
    pub fn blocking_aux(mut self) -> Self {
        self.aux_blocks = true;
        self
    }

    pub fn executions(&self) -> Vec<(FunctorId, DeviceId)> {
        self.executions
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub fn attempts_of(&self, functor: FunctorId) -> u32 {
        self.attempts[functor.index()].load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn post_runs(&self) -> u32 {
        self.post_runs.load(Ordering::SeqCst)
    }
}

impl DeviceFunctor for ScriptedFunctor {
    type Dataset = Vec<u8>;

    fn bind_data(&self, _dataset: Vec<u8>) -> Result<(), FunctorError> {
        if self.bind_fails {
            return Err(FunctorError::Bind("scripted bind failure".to_string()));
        }
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn allocate_resources(&self) -> Result<(), FunctorError> {
        Ok(())
    }

    fn release_resources(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn generate_parameter_list(&self, n_devices: usize) -> Result<(), FunctorError> {
        assert_eq!(n_devices, self.n);
        if self.partition_fails {
            return Err(FunctorError::Partition(
                "scripted partition failure".to_string(),
            ));
        }
        self.partitioned.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn main_functor(&self, functor: FunctorId, device: DeviceId) -> Result<(), FunctorError> {
        debug_assert!(self.bound.load(Ordering::SeqCst), "dataset not bound");
        debug_assert!(
            self.partitioned.load(Ordering::SeqCst),
            "parameter list not generated"
        );
        self.executions
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push((functor, device));

        let attempt = self.attempts[functor.index()].fetch_add(1, Ordering::SeqCst) + 1;
        let panics = self.panic_first[functor.index()];
        if attempt <= panics {
            panic!("scripted panic for functor {}", functor.0);
        }
        if attempt <= panics.saturating_add(self.fail_first[functor.index()]) {
            return Err(FunctorError::Execution(format!(
                "scripted failure for functor {} attempt {attempt}",
                functor.0
            )));
        }
        Ok(())
    }

    fn aux_functor(&self, cancel: &CancelFlag) -> Result<(), FunctorError> {
        if self.aux_blocks {
            loop {
                thread::sleep(Duration::from_millis(20));
            }
        }
        let _ = cancel;
        Ok(())
    }

    fn post_run(&self) {
        self.post_runs.fetch_add(1, Ordering::SeqCst);
    }

    fn fail(&self) -> bool {
        self.alloc_fails
    }

    fn fail_on_functor(&self, functor: FunctorId) -> bool {
        functor.index() >= self.n || self.alloc_fail_devices[functor.index()]
    }
}
