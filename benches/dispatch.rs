//! Benchmarks for dispatch overhead on trivial partitions.
//!
//! Measures the fixed cost of a run (thread spawn, registry traffic,
//! monitor lifecycle) against partitions that do almost no work, and the
//! added cost of one remap.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dispatch_rs::{
    run, DeviceFunctor, DeviceId, DispatchConfig, FunctorError, FunctorId, RemapPolicy,
};

struct SpinFunctor {
    n: usize,
    iters: u64,
    fail_first: Vec<u32>,
    attempts: Vec<AtomicU32>,
}

impl SpinFunctor {
    fn new(n: usize, iters: u64) -> Self {
        Self {
            n,
            iters,
            fail_first: vec![0; n],
            attempts: (0..n).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn fail_once(mut self, functor: usize) -> Self {
        self.fail_first[functor] = 1;
        self
    }
}

impl DeviceFunctor for SpinFunctor {
    type Dataset = ();

    fn bind_data(&self, _dataset: ()) -> Result<(), FunctorError> {
        Ok(())
    }
    fn allocate_resources(&self) -> Result<(), FunctorError> {
        Ok(())
    }
    fn release_resources(&self) {}
    fn generate_parameter_list(&self, _n_devices: usize) -> Result<(), FunctorError> {
        Ok(())
    }

    fn main_functor(&self, functor: FunctorId, _device: DeviceId) -> Result<(), FunctorError> {
        let attempt = self.attempts[functor.index()].fetch_add(1, Ordering::Relaxed) + 1;
        if attempt <= self.fail_first[functor.index()] {
            return Err(FunctorError::Execution("bench failure".to_string()));
        }
        let mut acc = 0u64;
        for i in 0..self.iters {
            acc = acc.wrapping_add(black_box(i));
        }
        black_box(acc);
        Ok(())
    }

    fn post_run(&self) {}
    fn fail(&self) -> bool {
        false
    }
    fn fail_on_functor(&self, functor: FunctorId) -> bool {
        functor.index() >= self.n
    }
}

fn bench_config() -> DispatchConfig {
    DispatchConfig {
        remap: RemapPolicy::default(),
        monitor_grace: Duration::from_millis(1),
    }
}

fn dispatch_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_overhead");
    for n in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let functor = Arc::new(SpinFunctor::new(n, 100));
                run(functor, (), n, &bench_config())
            });
        });
    }
    group.finish();
}

fn remap_path(c: &mut Criterion) {
    c.bench_function("remap_single_failure", |b| {
        b.iter(|| {
            let functor = Arc::new(SpinFunctor::new(4, 100).fail_once(2));
            run(functor, (), 4, &bench_config())
        });
    });
}

criterion_group!(benches, dispatch_overhead, remap_path);
criterion_main!(benches);
