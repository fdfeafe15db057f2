#![no_main]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use funcscope::prelude::*;
use libfuzzer_sys::fuzz_target;

struct NoopMonitor;

impl CallMonitor for NoopMonitor {
    fn install_hook(&self, _module_name: &str, _pc: u64) -> Result<()> {
        Ok(())
    }

    fn remove_hook(&self, _module_name: &str, _pc: u64) {}
}

struct Scheduler {
    next_id: AtomicU64,
    children: Mutex<Vec<Box<dyn ExecutionContext>>>,
}

impl ForkScheduler for Scheduler {
    fn allocate_context_id(&self) -> ContextId {
        ContextId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn schedule(&self, child: Box<dyn ExecutionContext>) {
        if let Ok(mut children) = self.children.lock() {
            children.push(child);
        }
    }
}

// Arbitrary interleavings of calls, returns, stale payloads and teardowns across
// up to four contexts. Nothing may panic.
fuzz_target!(|data: &[u8]| {
    let scheduler = Arc::new(Scheduler {
        next_id: AtomicU64::new(16),
        children: Mutex::new(Vec::new()),
    });
    let Ok(fi) = FunctionInstrumentation::builder()
        .monitor(Arc::new(NoopMonitor))
        .scheduler(scheduler.clone())
        .build()
    else {
        return;
    };
    fi.register("libfoo", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
    fi.register("libfoo", 0x2000, 1, "onFork", CallingConvention::Stdcall, true);
    fi.dispatcher()
        .register_handler("onFoo", |invocation, _| {
            invocation.expect_args(2)?;
            Ok(HandlerOutcome::Continue)
        });

    let libfoo = ModuleDescriptor::new("libfoo", 0, 0x4000_0000, 0x10_0000);
    let mut states: Vec<GuestState> = (0..4)
        .map(|id| {
            let mut state = GuestState::new(ContextId(id), if id % 2 == 0 { 4 } else { 8 });
            state.set_register(Register::StackPointer, 0x7fff_0000);
            state
        })
        .collect();
    let mut payloads: Vec<ReturnPayload> = Vec::new();

    for chunk in data.chunks(3) {
        let [op, target, value] = match *chunk {
            [a, b, c] => [a, b, c],
            _ => return,
        };
        let state = &mut states[usize::from(target % 4)];
        match op % 4 {
            0 => {
                let _ = state.push(u64::from(value));
                let _ = state.push(0x4000_5000);
                let callee = 0x4000_0000 + if value % 2 == 0 { 0x1000 } else { 0x2000 };
                let mut signal = ReturnSignal::new();
                let _ = fi.on_call(state, None, &libfoo, 0, callee, &mut signal);
                payloads.extend(signal.into_payloads());
            }
            1 => {
                if let Some(payload) = payloads.pop() {
                    let _ = fi.on_return(state, None, None, 0x4000_5000, &payload);
                }
            }
            2 => {
                let index = usize::from(value) % payloads.len().max(1);
                if let Some(payload) = payloads.get(index).cloned() {
                    let _ = fi.on_return(state, None, None, 0x4000_5000, &payload);
                }
            }
            _ => {
                let _ = fi.on_context_teardown(state.id());
            }
        }
    }
});
