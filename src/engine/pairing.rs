//! Call/return pairing.
//!
//! Every matched call creates one [`PendingCall`] on the stack of the context that
//! made it. Returns are resolved against that stack by [`CallId`], so recursive and
//! re-entrant calls to the same function are tracked per occurrence, never per
//! function.
//!
//! # Per-Call State Machine
//!
//! ```text
//!   Idle ──enter()──► Entered ──exit()──► Exited
//!                        │
//!                        └──teardown()──► discarded (no exit callback)
//! ```

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use imbl::Vector as ImVector;
use tracing::{debug, warn};

use crate::{
    engine::args::{extract_arguments, return_address},
    instrumentation::Instrumentation,
    monitor::ReturnPayload,
    state::{ContextId, ExecutionContext},
    Error, Result,
};

/// Identifier of one call occurrence.
///
/// Unique per [`PairingEngine`]; forked contexts share the identifiers of calls
/// made before the fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Bookkeeping for one call that has been entered but has not returned yet.
#[derive(Clone, Debug)]
pub struct PendingCall {
    /// Identifier of this call occurrence.
    pub call_id: CallId,
    /// Context the call was made in.
    pub context: ContextId,
    /// The instrumentation that matched the call.
    pub instrumentation: Arc<Instrumentation>,
    /// Address of the call instruction.
    pub caller_pc: u64,
    /// Return address found on the stack at entry.
    pub return_address: u64,
    /// Stack pointer at entry.
    pub stack_pointer: u64,
    /// Arguments decoded at entry.
    pub args: Arc<[u64]>,
    /// Child context created by forking at this call.
    ///
    /// Only set on the child's own copy of the entry.
    pub forked_into: Option<ContextId>,
}

/// Counters describing the pairing engine's activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PairingStats {
    /// Calls that created a pending entry.
    pub entered: u64,
    /// Returns that completed a pending entry.
    pub exited: u64,
    /// Returns that matched no pending entry.
    pub orphaned: u64,
    /// Pending entries dropped because a deeper frame returned first.
    pub unwound: u64,
    /// Pending entries dropped because their context was torn down.
    pub discarded: u64,
}

/// Tracks pending calls per execution context and pairs them with returns.
///
/// Each context owns its own stack of pending calls; contexts never share entries,
/// so events of different contexts can be processed from different threads. Within
/// one context, events must be delivered in program order.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = PairingEngine::new();
/// let pending = engine.enter(&state, &record, caller_pc)?;
/// // ... the callee runs ...
/// let completed = engine.exit(state.id(), &payload)?;
/// assert_eq!(completed.call_id, pending.call_id);
/// ```
pub struct PairingEngine {
    next_call_id: AtomicU64,
    pending: DashMap<ContextId, ImVector<PendingCall>>,
    entered: AtomicU64,
    exited: AtomicU64,
    orphaned: AtomicU64,
    unwound: AtomicU64,
    discarded: AtomicU64,
}

impl PairingEngine {
    /// Creates an engine with no pending calls.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_call_id: AtomicU64::new(1),
            pending: DashMap::new(),
            entered: AtomicU64::new(0),
            exited: AtomicU64::new(0),
            orphaned: AtomicU64::new(0),
            unwound: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Records the entry of an instrumented function.
    ///
    /// Decodes the arguments with the record's calling convention and pushes a new
    /// pending call on the context's stack. The context is not modified.
    ///
    /// # Arguments
    ///
    /// * `context` - The context positioned at the function entry
    /// * `instrumentation` - The record that matched the call
    /// * `caller_pc` - Address of the call instruction
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryRead`] if the return address or an argument cannot be
    /// read. No pending call is created in that case.
    pub fn enter(
        &self,
        context: &dyn ExecutionContext,
        instrumentation: &Arc<Instrumentation>,
        caller_pc: u64,
    ) -> Result<PendingCall> {
        let args = extract_arguments(context, instrumentation)?;
        let return_address = return_address(context)?;

        let pending = PendingCall {
            call_id: CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed)),
            context: context.id(),
            instrumentation: Arc::clone(instrumentation),
            caller_pc,
            return_address,
            stack_pointer: context.stack_pointer(),
            args: args.into(),
            forked_into: None,
        };

        self.pending
            .entry(pending.context)
            .or_default()
            .push_back(pending.clone());
        self.entered.fetch_add(1, Ordering::Relaxed);

        debug!(
            context = %pending.context,
            call_id = %pending.call_id,
            instrumentation = instrumentation.name(),
            "entered instrumented function"
        );
        Ok(pending)
    }

    /// Resolves a return event against the context's pending calls.
    ///
    /// The matching entry is normally the most recent one. If it is deeper in the
    /// stack, the entries above it belong to frames that were unwound without
    /// returning; they are dropped with a warning and counted as unwound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrphanedReturn`] if no pending call of this context has the
    /// payload's call id, or if the payload refers to a different record than the
    /// pending call. Other pending calls are left untouched.
    pub fn exit(&self, context: ContextId, payload: &ReturnPayload) -> Result<PendingCall> {
        let completed = {
            let Some(mut stack) = self.pending.get_mut(&context) else {
                return Err(self.orphan(context, payload));
            };

            let position = (0..stack.len())
                .rev()
                .find(|&index| stack[index].call_id == payload.call_id);
            let Some(position) = position else {
                return Err(self.orphan(context, payload));
            };
            if !Arc::ptr_eq(&stack[position].instrumentation, &payload.instrumentation) {
                return Err(self.orphan(context, payload));
            }

            let unwound = stack.split_off(position + 1);
            for frame in &unwound {
                warn!(
                    context = %context,
                    call_id = %frame.call_id,
                    instrumentation = frame.instrumentation.name(),
                    "dropping pending call of an unwound frame"
                );
            }
            self.unwound
                .fetch_add(unwound.len() as u64, Ordering::Relaxed);

            stack.pop_back()
        };
        self.pending.remove_if(&context, |_, stack| stack.is_empty());

        let Some(completed) = completed else {
            return Err(self.orphan(context, payload));
        };
        self.exited.fetch_add(1, Ordering::Relaxed);

        debug!(
            context = %context,
            call_id = %completed.call_id,
            instrumentation = completed.instrumentation.name(),
            "returned from instrumented function"
        );
        Ok(completed)
    }

    /// Copies the pending calls of `parent` to a freshly forked `child`.
    ///
    /// The copy is O(1); afterwards both stacks evolve independently. The child's
    /// copy of the call identified by `forked_at` records the child as the context
    /// forked at that call.
    pub fn inherit(&self, parent: ContextId, child: ContextId, forked_at: CallId) {
        let stack = self.pending.get(&parent).map(|stack| stack.value().clone());
        let Some(mut stack) = stack else {
            return;
        };
        if let Some(frame) = stack.iter_mut().find(|frame| frame.call_id == forked_at) {
            frame.forked_into = Some(child);
        }
        self.pending.insert(child, stack);
    }

    /// Discards every pending call of a destroyed context.
    ///
    /// No exit callback fires for discarded calls.
    ///
    /// # Returns
    ///
    /// `Ok(0)` if the context had no pending calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PendingCallsDiscarded`] if calls were outstanding. The calls
    /// are discarded either way; the error makes the upstream desynchronization
    /// visible.
    pub fn teardown(&self, context: ContextId) -> Result<usize> {
        let Some((_, stack)) = self.pending.remove(&context) else {
            return Ok(0);
        };
        if stack.is_empty() {
            return Ok(0);
        }

        let count = stack.len();
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
        warn!(
            context = %context,
            count,
            "context torn down with pending calls"
        );
        Err(Error::PendingCallsDiscarded { context, count })
    }

    /// Returns the number of pending calls of a context.
    #[must_use]
    pub fn pending_depth(&self, context: ContextId) -> usize {
        self.pending.get(&context).map_or(0, |stack| stack.len())
    }

    /// Returns the pending calls of a context, oldest first.
    #[must_use]
    pub fn pending_calls(&self, context: ContextId) -> Vec<PendingCall> {
        self.pending
            .get(&context)
            .map(|stack| stack.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of contexts with pending calls.
    #[must_use]
    pub fn active_contexts(&self) -> usize {
        self.pending.len()
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> PairingStats {
        PairingStats {
            entered: self.entered.load(Ordering::Relaxed),
            exited: self.exited.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            unwound: self.unwound.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    fn orphan(&self, context: ContextId, payload: &ReturnPayload) -> Error {
        self.orphaned.fetch_add(1, Ordering::Relaxed);
        Error::OrphanedReturn {
            context,
            call_id: payload.call_id,
        }
    }
}

impl Default for PairingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PairingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingEngine")
            .field("active_contexts", &self.pending.len())
            .field("stats", &self.stats())
            .finish()
    }
}
