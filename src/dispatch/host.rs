//! Services the host offers to callback code.
//!
//! Script bridges cannot call `tracing` or `std::process::exit` directly from inside
//! an interpreter, so [`HostServices`] exposes logging and the termination escape
//! hatch as plain methods the bridge can bind into its scripting environment.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{dispatch::HandlerOutcome, state::ContextId};

/// Performs process termination on behalf of a callback.
///
/// Injected into the dispatcher so embedders and tests can replace the default
/// [`ProcessTerminator`].
pub trait Terminator: Send + Sync {
    /// Terminates the process with `code`.
    ///
    /// Implementations that return (test doubles) let dispatch report
    /// [`DispatchOutcome::Terminated`](crate::DispatchOutcome::Terminated).
    fn terminate(&self, code: i32);
}

/// Terminator that exits the current process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Logging and termination services for callback code.
#[derive(Clone)]
pub struct HostServices {
    terminator: Arc<dyn Terminator>,
}

impl HostServices {
    /// Creates host services that terminate through `terminator`.
    #[must_use]
    pub fn new(terminator: Arc<dyn Terminator>) -> Self {
        Self { terminator }
    }

    /// Emits a debug message on behalf of a callback.
    pub fn debug(&self, context: ContextId, message: &str) {
        debug!(target: "funcscope::script", context = %context, "{message}");
    }

    /// Emits an informational message on behalf of a callback.
    pub fn info(&self, context: ContextId, message: &str) {
        info!(target: "funcscope::script", context = %context, "{message}");
    }

    /// Emits a warning on behalf of a callback.
    pub fn warning(&self, context: ContextId, message: &str) {
        warn!(target: "funcscope::script", context = %context, "{message}");
    }

    /// Builds the outcome a callback returns to request process termination.
    #[must_use]
    pub fn exit(&self, code: i32) -> HandlerOutcome {
        HandlerOutcome::Terminate(code)
    }

    /// Logs the termination request, then hands it to the terminator.
    pub(crate) fn terminate(&self, name: &str, context: ContextId, code: i32) {
        info!(
            context = %context,
            instrumentation = name,
            code,
            "instrumentation requested exit"
        );
        self.terminator.terminate(code);
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
