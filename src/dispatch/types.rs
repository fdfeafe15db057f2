//! Core types for callback dispatch.
//!
//! - [`CallPhase`]: Whether a callback fires on entry or on exit
//! - [`CallbackInvocation`]: The uniform argument shape handed to every handler
//! - [`HandlerOutcome`]: What a handler asks the host to do next
//! - [`HandlerError`]: Recoverable handler-side failures
//! - [`HandlerFn`]: Type alias for native handler closures

use std::sync::Arc;

use strum::Display;
use thiserror::Error;

use crate::{
    engine::{CallId, PendingCall},
    state::{ContextId, ExecutionContext},
};

/// Phase of an instrumented call a callback fires for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CallPhase {
    /// The function is being entered; arguments were just decoded.
    Entry,
    /// The function returned.
    Exit,
}

/// A single callback invocation.
///
/// Handlers receive the same shape regardless of whether they are native closures
/// or live behind a [`ScriptBridge`](crate::ScriptBridge).
///
/// # Examples
///
/// ```rust,ignore
/// dispatcher.register_handler("onFoo", |invocation, _ctx| {
///     let args = invocation.expect_args(2)?;
///     println!("{} fd={} len={}", invocation.phase, args[0], args[1]);
///     Ok(HandlerOutcome::Continue)
/// });
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackInvocation {
    /// Instrumentation name the handler is selected by.
    pub name: String,
    /// Module of the instrumented function.
    pub module_name: String,
    /// Module-relative pc of the instrumented function.
    pub pc: u64,
    /// Entry or exit.
    pub phase: CallPhase,
    /// Arguments decoded at entry, in declaration order.
    ///
    /// Exit invocations carry the entry-time values.
    pub args: Vec<u64>,
    /// Context the callback runs in.
    pub context: ContextId,
    /// Call occurrence this invocation belongs to.
    pub call_id: CallId,
    /// `true` if the callback runs in a context forked at this call.
    pub is_child: bool,
    /// Value of the return register; only set on exit.
    pub return_value: Option<u64>,
}

impl CallbackInvocation {
    /// Builds the entry invocation of a pending call running in `context`.
    #[must_use]
    pub fn entry(pending: &PendingCall, context: ContextId) -> Self {
        Self::from_pending(pending, context, CallPhase::Entry)
    }

    /// Builds the exit invocation of a completed call.
    #[must_use]
    pub fn exit(pending: &PendingCall, context: ContextId, return_value: u64) -> Self {
        let mut invocation = Self::from_pending(pending, context, CallPhase::Exit);
        invocation.return_value = Some(return_value);
        invocation
    }

    fn from_pending(pending: &PendingCall, context: ContextId, phase: CallPhase) -> Self {
        let record = &pending.instrumentation;
        Self {
            name: record.name().to_string(),
            module_name: record.module_name().to_string(),
            pc: record.pc(),
            phase,
            args: pending.args.to_vec(),
            context,
            call_id: pending.call_id,
            is_child: false,
            return_value: None,
        }
    }

    /// Marks the invocation as running in a forked child context.
    #[must_use]
    pub fn as_child(mut self) -> Self {
        self.is_child = true;
        self
    }

    /// Returns `true` for entry invocations.
    #[must_use]
    pub fn is_entry(&self) -> bool {
        self.phase == CallPhase::Entry
    }

    /// Returns the arguments if there are exactly `expected` of them.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::ArgumentCount`] otherwise.
    pub fn expect_args(&self, expected: usize) -> Result<&[u64], HandlerError> {
        if self.args.len() != expected {
            return Err(HandlerError::ArgumentCount {
                expected,
                actual: self.args.len(),
            });
        }
        Ok(&self.args)
    }

    /// Returns the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::ArgumentCount`] if the index is out of range.
    pub fn arg(&self, index: usize) -> Result<u64, HandlerError> {
        self.args
            .get(index)
            .copied()
            .ok_or(HandlerError::ArgumentCount {
                expected: index + 1,
                actual: self.args.len(),
            })
    }
}

/// What a handler asks the host to do after it ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Continue execution normally.
    Continue,
    /// Terminate the whole process with this exit code.
    ///
    /// This is the only way a callback can stop the hosting process. The request
    /// is logged before the [`Terminator`](crate::Terminator) acts on it.
    Terminate(i32),
}

/// Recoverable failure reported by a handler.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler expected a different number of arguments.
    #[error("expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        /// Number of arguments the handler needs
        expected: usize,
        /// Number of arguments it received
        actual: usize,
    },

    /// The handler itself is unusable (e.g. a script value that is not callable).
    #[error("malformed handler - {0}")]
    Malformed(String),

    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// Type alias for native handler functions.
///
/// Handlers receive the invocation and mutable access to the context they run in.
///
/// # Thread Safety
///
/// Handlers must be `Send + Sync`; contexts may be driven from several threads.
pub type HandlerFn = Arc<
    dyn Fn(&CallbackInvocation, &mut dyn ExecutionContext) -> Result<HandlerOutcome, HandlerError>
        + Send
        + Sync,
>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::{CallingConvention, Instrumentation};

    fn pending() -> PendingCall {
        PendingCall {
            call_id: CallId(3),
            context: ContextId(1),
            instrumentation: Arc::new(Instrumentation::new(
                "libfoo",
                0x1000,
                2,
                "onFoo",
                CallingConvention::Cdecl,
                false,
            )),
            caller_pc: 0,
            return_address: 0,
            stack_pointer: 0,
            args: vec![5, 7].into(),
            forked_into: None,
        }
    }

    #[test]
    fn test_entry_invocation() {
        let invocation = CallbackInvocation::entry(&pending(), ContextId(1));

        assert_eq!(invocation.name, "onFoo");
        assert_eq!(invocation.args, vec![5, 7]);
        assert!(invocation.is_entry());
        assert!(!invocation.is_child);
        assert_eq!(invocation.return_value, None);
        assert!(CallbackInvocation::entry(&pending(), ContextId(2)).as_child().is_child);
    }

    #[test]
    fn test_exit_invocation() {
        let invocation = CallbackInvocation::exit(&pending(), ContextId(1), 0x55);

        assert_eq!(invocation.phase, CallPhase::Exit);
        assert_eq!(invocation.return_value, Some(0x55));
        assert_eq!(invocation.args, vec![5, 7]);
    }

    #[test]
    fn test_argument_helpers() {
        let invocation = CallbackInvocation::entry(&pending(), ContextId(1));

        assert_eq!(invocation.expect_args(2).unwrap(), &[5, 7]);
        assert_eq!(
            invocation.expect_args(3),
            Err(HandlerError::ArgumentCount {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(invocation.arg(1), Ok(7));
        assert!(invocation.arg(2).is_err());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(CallPhase::Entry.to_string(), "entry");
        assert_eq!(CallPhase::Exit.to_string(), "exit");
    }
}
