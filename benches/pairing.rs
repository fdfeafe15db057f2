//! Benchmarks for the call/return hot path.
//!
//! Measures the cost the instrumentation adds per event:
//! - Uninstrumented calls (registry miss)
//! - Instrumented call/return pairs at increasing recursion depth
//! - Fork-on-trigger with copy-on-write guest state

extern crate funcscope;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use funcscope::prelude::*;

const LOAD_BASE: u64 = 0x4000_0000;

struct NoopMonitor;

impl CallMonitor for NoopMonitor {
    fn install_hook(&self, _module_name: &str, _pc: u64) -> Result<()> {
        Ok(())
    }

    fn remove_hook(&self, _module_name: &str, _pc: u64) {}
}

/// Drops forked children right away.
struct DiscardScheduler;

impl ForkScheduler for DiscardScheduler {
    fn allocate_context_id(&self) -> ContextId {
        ContextId(u64::MAX)
    }

    fn schedule(&self, child: Box<dyn ExecutionContext>) {
        drop(child);
    }
}

fn setup() -> (FunctionInstrumentation, ModuleDescriptor) {
    let fi = FunctionInstrumentation::builder()
        .monitor(Arc::new(NoopMonitor))
        .scheduler(Arc::new(DiscardScheduler))
        .build()
        .unwrap();
    fi.register("libfoo", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
    fi.register("libfoo", 0x2000, 2, "onFork", CallingConvention::Cdecl, true);
    fi.dispatcher()
        .register_handler("onFoo", |_, _| Ok(HandlerOutcome::Continue));
    fi.dispatcher()
        .register_handler("onFork", |_, _| Ok(HandlerOutcome::Continue));
    (fi, ModuleDescriptor::new("libfoo", 0, LOAD_BASE, 0x10_0000))
}

fn state_with_pages(pages: u64) -> GuestState {
    let mut state = GuestState::new(ContextId(1), 8);
    for page in 0..pages {
        state.write_memory(0x1000_0000 + page * 4096, &[0xcc; 64]).unwrap();
    }
    state.set_register(Register::StackPointer, 0x7fff_0000);
    state.push(7).unwrap();
    state.push(5).unwrap();
    state.push(0x4000_5000).unwrap();
    state
}

/// Benchmark a call to a function without instrumentation.
fn bench_uninstrumented_call(c: &mut Criterion) {
    let (fi, libfoo) = setup();
    let mut state = state_with_pages(0);

    c.bench_function("on_call_miss", |b| {
        b.iter(|| {
            let mut signal = ReturnSignal::new();
            fi.on_call(
                &mut state,
                None,
                &libfoo,
                0,
                black_box(LOAD_BASE + 0x3000),
                &mut signal,
            )
            .unwrap();
            black_box(signal)
        });
    });
}

/// Benchmark nested call/return pairs.
fn bench_nested_pairs(c: &mut Criterion) {
    let (fi, libfoo) = setup();
    let mut group = c.benchmark_group("call_return_nested");

    for depth in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut state = state_with_pages(0);
            b.iter(|| {
                let mut payloads = Vec::with_capacity(depth);
                for _ in 0..depth {
                    let mut signal = ReturnSignal::new();
                    fi.on_call(&mut state, None, &libfoo, 0, LOAD_BASE + 0x1000, &mut signal)
                        .unwrap();
                    payloads.extend(signal.into_payloads());
                }
                for payload in payloads.iter().rev() {
                    fi.on_return(&mut state, None, None, 0x4000_5000, payload)
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

/// Benchmark fork-on-trigger; forking is O(1) regardless of mapped memory.
fn bench_fork(c: &mut Criterion) {
    let (fi, libfoo) = setup();
    let mut group = c.benchmark_group("fork_on_call");

    for pages in [1u64, 64, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(pages), &pages, |b, &pages| {
            let mut state = state_with_pages(pages);
            b.iter(|| {
                let mut signal = ReturnSignal::new();
                fi.on_call(&mut state, None, &libfoo, 0, LOAD_BASE + 0x2000, &mut signal)
                    .unwrap();
                for payload in signal.payloads() {
                    fi.on_return(&mut state, None, None, 0x4000_5000, payload)
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_uninstrumented_call,
    bench_nested_pairs,
    bench_fork
);
criterion_main!(benches);
