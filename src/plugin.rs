//! The composition root.
//!
//! [`FunctionInstrumentation`] wires the registry, the pairing engine, the callback
//! dispatcher and the fork coordinator together and exposes the event handlers the
//! call/return event source drives.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    dispatch::{
        CallbackDispatcher, CallbackInvocation, DispatchOutcome, PluginSet, ProcessTerminator,
        ScriptBridge, Terminator,
    },
    engine::PairingEngine,
    fork::{ForkCoordinator, ForkScheduler},
    instrumentation::{
        CallingConvention, Instrumentation, InstrumentationConfig, InstrumentationRegistry,
    },
    monitor::{CallMonitor, ModuleDescriptor, ReturnPayload, ReturnSignal},
    state::{ContextId, ExecutionContext},
    Error, Result,
};

/// Dynamic function instrumentation for one execution engine.
///
/// # Examples
///
/// ```rust,ignore
/// let fi = FunctionInstrumentation::builder()
///     .monitor(monitor)
///     .scheduler(scheduler)
///     .build()?;
///
/// fi.dispatcher().register_handler("onFoo", |invocation, _ctx| {
///     println!("{:?}", invocation.args);
///     Ok(HandlerOutcome::Continue)
/// });
/// fi.register("libfoo", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
///
/// // Driven by the event source:
/// let mut signal = ReturnSignal::new();
/// fi.on_call(&mut state, None, &libfoo, caller_pc, callee_pc, &mut signal)?;
/// ```
pub struct FunctionInstrumentation {
    registry: InstrumentationRegistry,
    pairing: PairingEngine,
    dispatcher: CallbackDispatcher,
    forks: ForkCoordinator,
}

impl FunctionInstrumentation {
    /// Returns a builder for wiring the external collaborators.
    #[must_use]
    pub fn builder() -> FunctionInstrumentationBuilder {
        FunctionInstrumentationBuilder::new()
    }

    /// Registers an instrumentation point.
    ///
    /// # Returns
    ///
    /// `true` if the point was registered, `false` if an equal or conflicting record
    /// already exists or the hook could not be installed. Use
    /// [`register_instrumentation`](Self::register_instrumentation) for the reason.
    pub fn register(
        &self,
        module_name: &str,
        pc: u64,
        param_count: u32,
        name: &str,
        convention: CallingConvention,
        fork: bool,
    ) -> bool {
        let record = Instrumentation::new(module_name, pc, param_count, name, convention, fork);
        match self.register_instrumentation(record) {
            Ok(_) => true,
            Err(Error::DuplicateRegistration { module, pc }) => {
                debug!(module = %module, pc, "instrumentation already registered");
                false
            }
            Err(e) => {
                warn!(error = %e, "instrumentation rejected");
                false
            }
        }
    }

    /// Registers an instrumentation record.
    ///
    /// # Errors
    ///
    /// See [`InstrumentationRegistry::register`].
    pub fn register_instrumentation(
        &self,
        instrumentation: Instrumentation,
    ) -> Result<Arc<Instrumentation>> {
        self.registry.register(instrumentation)
    }

    /// Removes an instrumentation point.
    ///
    /// Calls already entered through it still complete normally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the registry lock is poisoned.
    pub fn unregister(&self, module_name: &str, pc: u64) -> Result<Option<Arc<Instrumentation>>> {
        self.registry.unregister(module_name, pc)
    }

    /// Registers every entry of `config`.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid, duplicate or conflicting entry. Entries before it
    /// stay registered.
    pub fn load_config(&self, config: &InstrumentationConfig) -> Result<Vec<Arc<Instrumentation>>> {
        config.validate()?;
        let records = config
            .entries()
            .iter()
            .map(|entry| self.register_instrumentation(entry.to_instrumentation()))
            .collect::<Result<Vec<_>>>()?;

        info!(count = records.len(), "loaded instrumentation config");
        Ok(records)
    }

    /// Handles a call event.
    ///
    /// Looks up the callee, records a pending call, connects `return_signal`, forks
    /// if requested and runs the entry callback. Calls to functions without
    /// instrumentation are ignored.
    ///
    /// # Arguments
    ///
    /// * `context` - The context positioned at the callee's first instruction
    /// * `source` - Module of the caller, if known
    /// * `dest` - Module of the callee
    /// * `caller_pc` - Address of the call instruction
    /// * `callee_pc` - Runtime address of the callee
    /// * `return_signal` - Handle for registering interest in the matching return
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryRead`] if the arguments cannot be decoded. Nothing is
    /// recorded and no callback runs in that case. Handler failures and refused forks
    /// are logged, not returned.
    pub fn on_call(
        &self,
        context: &mut dyn ExecutionContext,
        source: Option<&ModuleDescriptor>,
        dest: &ModuleDescriptor,
        caller_pc: u64,
        callee_pc: u64,
        return_signal: &mut ReturnSignal,
    ) -> Result<()> {
        let Some(pc) = dest.to_native_base(callee_pc) else {
            return Ok(());
        };
        let Some(record) = self.registry.lookup(&dest.name, pc) else {
            return Ok(());
        };

        let pending = self
            .pairing
            .enter(&*context, &record, caller_pc)
            .inspect_err(|e| {
                warn!(
                    context = %context.id(),
                    instrumentation = record.name(),
                    caller = source.map(|module| module.name.as_str()),
                    error = %e,
                    "could not decode arguments"
                );
            })?;

        return_signal.connect(ReturnPayload {
            call_id: pending.call_id,
            instrumentation: Arc::clone(&record),
        });

        let child = self
            .forks
            .maybe_fork(&record, &*context)
            .unwrap_or_else(|e| {
                warn!(context = %context.id(), error = %e, "continuing without fork");
                None
            });
        if let Some(child) = &child {
            self.pairing.inherit(context.id(), child.id(), pending.call_id);
        }

        let invocation = CallbackInvocation::entry(&pending, context.id());
        self.run_callback(&invocation, context);

        if let Some(mut child) = child {
            let invocation = CallbackInvocation::entry(&pending, child.id()).as_child();
            self.run_callback(&invocation, child.as_mut());
            self.forks.schedule(child);
        }
        Ok(())
    }

    /// Handles a return event.
    ///
    /// Completes the pending call identified by `payload` and runs the exit
    /// callback with the entry-time arguments and the current return value.
    ///
    /// Orphaned returns are logged, counted and dropped.
    ///
    /// # Arguments
    ///
    /// * `context` - The context that executed the return
    /// * `source` - Module the return was executed in, if known
    /// * `dest` - Module returned into, if known
    /// * `return_site` - Address returned to
    /// * `payload` - The payload connected at the matching call
    ///
    /// # Errors
    ///
    /// Only unexpected internal failures are returned.
    pub fn on_return(
        &self,
        context: &mut dyn ExecutionContext,
        source: Option<&ModuleDescriptor>,
        dest: Option<&ModuleDescriptor>,
        return_site: u64,
        payload: &ReturnPayload,
    ) -> Result<()> {
        let pending = match self.pairing.exit(context.id(), payload) {
            Ok(pending) => pending,
            Err(e @ Error::OrphanedReturn { .. }) => {
                warn!(
                    context = %context.id(),
                    instrumentation = payload.instrumentation.name(),
                    callee = source.map(|module| module.name.as_str()),
                    caller = dest.map(|module| module.name.as_str()),
                    return_site,
                    error = %e,
                    "dropping orphaned return"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut invocation =
            CallbackInvocation::exit(&pending, context.id(), context.return_value());
        if pending.forked_into == Some(context.id()) {
            invocation = invocation.as_child();
        }
        self.run_callback(&invocation, context);
        Ok(())
    }

    /// Handles the destruction of an execution context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PendingCallsDiscarded`] if calls were still outstanding.
    /// They are discarded without exit callbacks.
    pub fn on_context_teardown(&self, context: ContextId) -> Result<usize> {
        self.pairing.teardown(context)
    }

    /// Returns the callback dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    /// Returns the instrumentation registry.
    #[must_use]
    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    /// Returns the pairing engine.
    #[must_use]
    pub fn pairing(&self) -> &PairingEngine {
        &self.pairing
    }

    /// Returns the fork coordinator.
    #[must_use]
    pub fn forks(&self) -> &ForkCoordinator {
        &self.forks
    }

    fn run_callback(&self, invocation: &CallbackInvocation, context: &mut dyn ExecutionContext) {
        match self.dispatcher.dispatch(invocation, context) {
            Ok(DispatchOutcome::Terminated(code)) => {
                debug!(context = %invocation.context, code, "terminator returned, continuing");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    context = %invocation.context,
                    call_id = %invocation.call_id,
                    error = %e,
                    "callback failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for FunctionInstrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionInstrumentation")
            .field("registry", &self.registry)
            .field("pairing", &self.pairing)
            .field("dispatcher", &self.dispatcher)
            .field("forks", &self.forks)
            .finish()
    }
}

/// Builder for [`FunctionInstrumentation`].
///
/// The call monitor and the fork scheduler are required; termination defaults to
/// [`ProcessTerminator`].
#[derive(Default)]
pub struct FunctionInstrumentationBuilder {
    monitor: Option<Arc<dyn CallMonitor>>,
    scheduler: Option<Arc<dyn ForkScheduler>>,
    terminator: Option<Arc<dyn Terminator>>,
    script: Option<Arc<dyn ScriptBridge>>,
    script_plugin: Option<(PluginSet, String)>,
}

impl FunctionInstrumentationBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the call/return event source hooks are installed with.
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<dyn CallMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Sets the engine forked contexts are scheduled on.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn ForkScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Overrides how termination requests are carried out.
    #[must_use]
    pub fn terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// Attaches a script bridge directly.
    #[must_use]
    pub fn script_bridge(mut self, bridge: Arc<dyn ScriptBridge>) -> Self {
        self.script = Some(bridge);
        self
    }

    /// Resolves the script bridge from the plugin called `name` at build time.
    #[must_use]
    pub fn script_plugin(mut self, plugins: PluginSet, name: impl Into<String>) -> Self {
        self.script_plugin = Some((plugins, name.into()));
        self
    }

    /// Builds the instrumentation.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the monitor or the scheduler is missing
    /// - [`Error::PluginNotFound`] or [`Error::NotScriptable`] if a script plugin
    ///   was requested and cannot be resolved
    pub fn build(self) -> Result<FunctionInstrumentation> {
        let monitor = self.monitor.ok_or_else(|| {
            Error::InvalidConfig("A call monitor is required for FunctionInstrumentation".to_string())
        })?;
        let scheduler = self.scheduler.ok_or_else(|| {
            Error::InvalidConfig("A fork scheduler is required for FunctionInstrumentation".to_string())
        })?;
        let terminator = self
            .terminator
            .unwrap_or_else(|| Arc::new(ProcessTerminator));

        let script = match self.script_plugin {
            Some((plugins, name)) => Some(plugins.script_bridge(&name)?),
            None => self.script,
        };

        let mut dispatcher = CallbackDispatcher::new(terminator);
        if let Some(script) = script {
            debug!(language = script.language(), "attached script bridge");
            dispatcher = dispatcher.with_script_bridge(script);
        }

        Ok(FunctionInstrumentation {
            registry: InstrumentationRegistry::new(monitor),
            pairing: PairingEngine::new(),
            dispatcher,
            forks: ForkCoordinator::new(scheduler),
        })
    }
}
