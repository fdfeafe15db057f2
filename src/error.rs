use thiserror::Error;

use crate::{
    dispatch::{CallPhase, HandlerError},
    engine::CallId,
    state::ContextId,
};

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Most variants describe conditions the instrumentation layer recovers from locally: the
/// composition root in [`crate::FunctionInstrumentation`] logs them and keeps the hosting
/// engine running. They are still surfaced as values so embedders and tests can observe them.
///
/// # Error Categories
///
/// ## Registration Errors
/// - [`Error::DuplicateRegistration`] - An equal instrumentation point is already registered
/// - [`Error::InstrumentationConflict`] - A different record already owns the `(module, pc)` slot
/// - [`Error::HookInstall`] - The call/return event source refused to install a hook
///
/// ## Event Errors
/// - [`Error::OrphanedReturn`] - A return arrived without a matching pending call
/// - [`Error::PendingCallsDiscarded`] - A context was torn down with calls still outstanding
/// - [`Error::MemoryRead`] - Argument extraction could not read guest memory
/// - [`Error::ForkFailed`] - The execution engine refused to fork a context
///
/// ## Callback Errors
/// - [`Error::Handler`] - A callback handler reported a failure
/// - [`Error::UnresolvedHandler`] - No handler is registered for an instrumentation name
/// - [`Error::PluginNotFound`] - No plugin with the requested name exists
/// - [`Error::NotScriptable`] - A plugin exists but exposes no script bridge
///
/// ## Configuration Errors
/// - [`Error::Config`] - The TOML configuration could not be parsed
/// - [`Error::InvalidConfig`] - The configuration parsed but is semantically invalid
///
/// # Examples
///
/// ```rust
/// use funcscope::{CallingConvention, Error, Instrumentation};
///
/// let record = Instrumentation::new("libfoo.so", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
/// let err = Error::DuplicateRegistration {
///     module: record.module_name().to_string(),
///     pc: record.pc(),
/// };
/// assert!(err.to_string().contains("libfoo.so"));
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An instrumentation point equal to the one being registered already exists.
    ///
    /// Equality ignores the fork flag, so re-registering a point with only a different
    /// fork behavior also lands here. The existing registration is left untouched.
    #[error("Instrumentation {module}:{pc:#x} is already registered")]
    DuplicateRegistration {
        /// Module name of the rejected registration
        module: String,
        /// Module-relative program counter of the rejected registration
        pc: u64,
    },

    /// A different instrumentation record already owns this `(module, pc)` slot.
    #[error("Instrumentation {module}:{pc:#x} conflicts with existing '{existing}'")]
    InstrumentationConflict {
        /// Module name of the rejected registration
        module: String,
        /// Module-relative program counter of the rejected registration
        pc: u64,
        /// Instrumentation name of the record that owns the slot
        existing: String,
    },

    /// The call/return event source could not install a hook.
    #[error("Failed to install hook at {module}:{pc:#x} - {reason}")]
    HookInstall {
        /// Module name of the hook
        module: String,
        /// Module-relative program counter of the hook
        pc: u64,
        /// Reason reported by the event source
        reason: String,
    },

    /// A return event did not match any pending call in its context.
    ///
    /// This happens after engine restarts or when the event source chains return
    /// signals incorrectly. The event is dropped; other pending calls are unaffected.
    #[error("Orphaned return in context {context} for call {call_id}")]
    OrphanedReturn {
        /// Context that observed the return
        context: ContextId,
        /// Call identifier carried by the return payload
        call_id: CallId,
    },

    /// A context was destroyed while pending calls were still outstanding.
    ///
    /// The pending calls are discarded without exit callbacks. This indicates a
    /// protocol desynchronization upstream of the instrumentation layer.
    #[error("Context {context} torn down with {count} pending call(s)")]
    PendingCallsDiscarded {
        /// The destroyed context
        context: ContextId,
        /// Number of discarded pending calls
        count: usize,
    },

    /// Guest memory could not be read.
    #[error("Failed to read {size} byte(s) of guest memory at {address:#x}")]
    MemoryRead {
        /// Start address of the failed read
        address: u64,
        /// Size of the failed read
        size: usize,
    },

    /// The execution engine refused to fork a context.
    #[error("Fork failed - {0}")]
    ForkFailed(String),

    /// A callback handler failed.
    ///
    /// Handler failures never terminate the hosting process.
    #[error("Handler '{name}' failed on {phase} - {source}")]
    Handler {
        /// Instrumentation name the handler is registered under
        name: String,
        /// Phase during which the handler failed
        phase: CallPhase,
        /// The failure reported by the handler
        source: HandlerError,
    },

    /// No native or script handler is registered for an instrumentation name.
    ///
    /// Dispatch treats this as a no-op and reports
    /// [`DispatchOutcome::Unresolved`](crate::DispatchOutcome::Unresolved).
    #[error("No handler registered for '{0}'")]
    UnresolvedHandler(String),

    /// No plugin with the given name exists.
    #[error("Could not find plugin '{0}'")]
    PluginNotFound(String),

    /// A plugin exists but does not expose a script bridge.
    #[error("Plugin '{0}' does not expose a script bridge")]
    NotScriptable(String),

    /// The configuration text is not valid TOML for an instrumentation config.
    #[error("{0}")]
    Config(#[from] toml::de::Error),

    /// The configuration parsed but contains invalid values.
    #[error("Invalid instrumentation config - {0}")]
    InvalidConfig(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when a lock was poisoned by a panicking thread.
    #[error("Failed to lock target")]
    LockError,
}
