//! Shared harness for the integration tests.
//!
//! [`Harness`] plays the call/return event source: it builds call frames on a
//! [`GuestState`], keeps the connected return payloads per frame and delivers them
//! back when the frame returns.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use funcscope::prelude::*;

pub const LIBFOO_BASE: u64 = 0x4000_0000;

pub fn libfoo() -> ModuleDescriptor {
    ModuleDescriptor::new("libfoo", 0, LIBFOO_BASE, 0x10_0000)
}

#[derive(Default)]
pub struct NullMonitor;

impl CallMonitor for NullMonitor {
    fn install_hook(&self, _module_name: &str, _pc: u64) -> Result<()> {
        Ok(())
    }

    fn remove_hook(&self, _module_name: &str, _pc: u64) {}
}

pub struct QueueScheduler {
    next_id: AtomicU64,
    queue: Mutex<Vec<Box<dyn ExecutionContext>>>,
}

impl QueueScheduler {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn pop(&self) -> Option<Box<dyn ExecutionContext>> {
        self.queue.lock().unwrap().pop()
    }
}

impl ForkScheduler for QueueScheduler {
    fn allocate_context_id(&self) -> ContextId {
        ContextId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn schedule(&self, child: Box<dyn ExecutionContext>) {
        self.queue.lock().unwrap().push(child);
    }
}

/// One live call frame as seen by the event source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub payloads: Vec<ReturnPayload>,
    pub return_site: u64,
}

pub struct Harness {
    pub fi: FunctionInstrumentation,
    pub scheduler: Arc<QueueScheduler>,
    pub log: Arc<Mutex<Vec<CallbackInvocation>>>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let scheduler = Arc::new(QueueScheduler::new(1000));
        let fi = FunctionInstrumentation::builder()
            .monitor(Arc::new(NullMonitor))
            .scheduler(scheduler.clone())
            .build()
            .unwrap();
        Self {
            fi,
            scheduler,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers an instrumentation point with a handler that logs every invocation.
    pub fn instrument(&self, pc: u64, param_count: u32, name: &str, fork: bool) {
        assert!(self
            .fi
            .register("libfoo", pc, param_count, name, CallingConvention::Cdecl, fork));
        let log = Arc::clone(&self.log);
        self.fi
            .dispatcher()
            .register_handler(name, move |invocation, _ctx| {
                log.lock().unwrap().push(invocation.clone());
                Ok(HandlerOutcome::Continue)
            });
    }

    /// Executes a call from `return_site - 5` to `libfoo + pc`.
    pub fn call(&self, state: &mut GuestState, pc: u64, args: &[u64], return_site: u64) -> Frame {
        for arg in args.iter().rev() {
            state.push(*arg).unwrap();
        }
        state.push(return_site).unwrap();

        let mut signal = ReturnSignal::new();
        self.fi
            .on_call(state, None, &libfoo(), return_site - 5, LIBFOO_BASE + pc, &mut signal)
            .unwrap();
        Frame {
            payloads: signal.into_payloads(),
            return_site,
        }
    }

    /// Returns from `frame` with `value` in the return register.
    pub fn ret(&self, context: &mut dyn ExecutionContext, frame: &Frame, value: u64) {
        context.set_return_value(value);
        for payload in &frame.payloads {
            self.fi
                .on_return(context, Some(&libfoo()), None, frame.return_site, payload)
                .unwrap();
        }
    }

    pub fn invocations(&self) -> Vec<CallbackInvocation> {
        self.log.lock().unwrap().clone()
    }
}

pub fn fresh_state(id: u64) -> GuestState {
    let mut state = GuestState::new(ContextId(id), 4);
    state.set_register(Register::StackPointer, 0x7fff_0000);
    state
}

// Routes log output through the test harness so it only shows for failing tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
