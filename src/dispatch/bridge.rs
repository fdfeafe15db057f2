//! Name-based callback resolution and invocation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{
    dispatch::{
        CallbackInvocation, HandlerError, HandlerFn, HandlerOutcome, HostServices, ScriptBridge,
        Terminator,
    },
    state::ExecutionContext,
    Error, Result,
};

/// Result of dispatching one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler with the invocation's name exists.
    Unresolved,
    /// A handler ran and asked to continue.
    Completed,
    /// A handler requested termination and the terminator returned.
    Terminated(i32),
}

/// Resolves callback names to handlers and runs them.
///
/// Native handlers registered with [`register_handler`](Self::register_handler)
/// take precedence over the optional [`ScriptBridge`].
///
/// # Thread Safety
///
/// Handlers are stored in a `DashMap` and cloned out before being called, so a
/// handler may register or remove handlers without deadlocking.
pub struct CallbackDispatcher {
    handlers: DashMap<String, HandlerFn>,
    script: Option<Arc<dyn ScriptBridge>>,
    host: HostServices,
}

impl CallbackDispatcher {
    /// Creates a dispatcher without handlers that terminates through `terminator`.
    #[must_use]
    pub fn new(terminator: Arc<dyn Terminator>) -> Self {
        Self {
            handlers: DashMap::new(),
            script: None,
            host: HostServices::new(terminator),
        }
    }

    /// Attaches a script bridge consulted for names without a native handler.
    #[must_use]
    pub fn with_script_bridge(mut self, bridge: Arc<dyn ScriptBridge>) -> Self {
        self.script = Some(bridge);
        self
    }

    /// Registers a native handler under `name`, replacing any previous one.
    pub fn register_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&CallbackInvocation, &mut dyn ExecutionContext) -> std::result::Result<HandlerOutcome, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Removes the native handler registered under `name`.
    pub fn remove_handler(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Returns `true` if a native or scripted handler called `name` exists.
    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
            || self
                .script
                .as_ref()
                .is_some_and(|script| script.has_handler(name))
    }

    /// Returns the host services handed to script handlers.
    #[must_use]
    pub fn host(&self) -> &HostServices {
        &self.host
    }

    /// Runs the handler selected by `invocation.name`.
    ///
    /// # Arguments
    ///
    /// * `invocation` - The invocation to deliver
    /// * `context` - The context the callback runs in
    ///
    /// # Returns
    ///
    /// [`DispatchOutcome::Unresolved`] if no handler exists, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handler`] if the handler failed. Failures never terminate
    /// the process.
    pub fn dispatch(
        &self,
        invocation: &CallbackInvocation,
        context: &mut dyn ExecutionContext,
    ) -> Result<DispatchOutcome> {
        let native = self
            .handlers
            .get(&invocation.name)
            .map(|entry| Arc::clone(entry.value()));

        let result = if let Some(handler) = native {
            handler(invocation, context)
        } else if let Some(script) = self
            .script
            .as_ref()
            .filter(|script| script.has_handler(&invocation.name))
        {
            script.invoke(invocation, context, &self.host)
        } else {
            let unresolved = Error::UnresolvedHandler(invocation.name.clone());
            debug!(
                context = %invocation.context,
                phase = %invocation.phase,
                error = %unresolved,
                "skipping callback"
            );
            return Ok(DispatchOutcome::Unresolved);
        };

        match result {
            Ok(HandlerOutcome::Continue) => Ok(DispatchOutcome::Completed),
            Ok(HandlerOutcome::Terminate(code)) => {
                self.host
                    .terminate(&invocation.name, invocation.context, code);
                Ok(DispatchOutcome::Terminated(code))
            }
            Err(source) => Err(Error::Handler {
                name: invocation.name.clone(),
                phase: invocation.phase,
                source,
            }),
        }
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("handlers", &self.handlers.len())
            .field(
                "script",
                &self.script.as_ref().map(|script| script.language().to_string()),
            )
            .finish()
    }
}
