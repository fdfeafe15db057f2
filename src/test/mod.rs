//! Shared fixtures for unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use crate::{
    dispatch::{CallbackInvocation, HandlerError, HandlerOutcome, HostServices, ScriptBridge, Terminator},
    fork::ForkScheduler,
    monitor::CallMonitor,
    state::{ContextId, ExecutionContext, GuestState, Register},
    Error, Result,
};

/// Top of the stack used by [`entry_state`].
pub const STACK_TOP: u64 = 0x7fff_0000;

// Builds a state positioned at a function entry: args pushed right to left, then the
// return address, as a call instruction leaves them.
pub fn entry_state(id: ContextId, pointer_size: usize, return_address: u64, args: &[u64]) -> GuestState {
    let mut state = GuestState::new(id, pointer_size);
    state.set_register(Register::StackPointer, STACK_TOP);
    for arg in args.iter().rev() {
        state.push(*arg).unwrap();
    }
    state.push(return_address).unwrap();
    state
}

// Call monitor that records installed hooks
pub struct RecordingMonitor {
    installed: Mutex<Vec<(String, u64)>>,
    fail: bool,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self {
            installed: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    // Refuses every hook
    pub fn failing() -> Self {
        Self {
            installed: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn installed(&self) -> Vec<(String, u64)> {
        self.installed.lock().unwrap().clone()
    }
}

impl CallMonitor for RecordingMonitor {
    fn install_hook(&self, module_name: &str, pc: u64) -> Result<()> {
        if self.fail {
            return Err(Error::HookInstall {
                module: module_name.to_string(),
                pc,
                reason: "module not loaded".to_string(),
            });
        }
        self.installed
            .lock()
            .unwrap()
            .push((module_name.to_string(), pc));
        Ok(())
    }

    fn remove_hook(&self, module_name: &str, pc: u64) {
        self.installed
            .lock()
            .unwrap()
            .retain(|(module, hook)| !(module == module_name && *hook == pc));
    }
}

// Fork scheduler handing out sequential ids and keeping scheduled children
pub struct RecordingScheduler {
    next_id: AtomicU64,
    refuse: bool,
    children: Mutex<Vec<Box<dyn ExecutionContext>>>,
}

impl RecordingScheduler {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            refuse: false,
            children: Mutex::new(Vec::new()),
        }
    }

    // Refuses every fork
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(0)
        }
    }

    pub fn scheduled(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    pub fn scheduled_ids(&self) -> Vec<ContextId> {
        self.children.lock().unwrap().iter().map(|c| c.id()).collect()
    }

    pub fn take(&self) -> Vec<Box<dyn ExecutionContext>> {
        std::mem::take(&mut *self.children.lock().unwrap())
    }
}

impl ForkScheduler for RecordingScheduler {
    fn allocate_context_id(&self) -> ContextId {
        ContextId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn admit(&self, parent: &dyn ExecutionContext) -> Result<()> {
        if self.refuse {
            return Err(Error::ForkFailed(format!("state limit reached at {}", parent.id())));
        }
        Ok(())
    }

    fn schedule(&self, child: Box<dyn ExecutionContext>) {
        self.children.lock().unwrap().push(child);
    }
}

// Terminator that records exit codes instead of exiting
pub struct RecordingTerminator {
    codes: Mutex<Vec<i32>>,
}

impl RecordingTerminator {
    pub fn new() -> Self {
        Self {
            codes: Mutex::new(Vec::new()),
        }
    }

    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

type ScriptFn = Box<
    dyn Fn(&CallbackInvocation, &mut dyn ExecutionContext, &HostServices) -> std::result::Result<HandlerOutcome, HandlerError>
        + Send
        + Sync,
>;

// Script bridge backed by a map of closures, standing in for an interpreter
pub struct MapScriptBridge {
    handlers: Mutex<HashMap<String, ScriptFn>>,
}

impl MapScriptBridge {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn define<F>(&self, name: &str, handler: F)
    where
        F: Fn(&CallbackInvocation, &mut dyn ExecutionContext, &HostServices) -> std::result::Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(name.to_string(), Box::new(handler));
    }
}

impl ScriptBridge for MapScriptBridge {
    fn language(&self) -> &str {
        "map"
    }

    fn has_handler(&self, name: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(name)
    }

    fn invoke(
        &self,
        invocation: &CallbackInvocation,
        context: &mut dyn ExecutionContext,
        host: &HostServices,
    ) -> std::result::Result<HandlerOutcome, HandlerError> {
        let handlers = self.handlers.lock().unwrap();
        let handler = handlers
            .get(&invocation.name)
            .ok_or_else(|| HandlerError::Malformed(format!("'{}' is not defined", invocation.name)))?;
        handler(invocation, context, host)
    }
}
