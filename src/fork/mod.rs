//! Fork-on-trigger.
//!
//! Instrumentation records with the fork flag split the execution context at the
//! function entry, so both outcomes of whatever the callback decides can be
//! explored. The coordinator only creates the copy; scheduling it is up to the
//! hosting engine through [`ForkScheduler`].
//!
//! # Ordering
//!
//! [`FunctionInstrumentation::on_call`](crate::FunctionInstrumentation::on_call)
//! drives a fork in this order:
//!
//! ```text
//! extract args ─► pending entry ─► connect return signal ─► fork
//!     ─► child inherits pending stack
//!     ─► entry callback (original, is_child = false)
//!     ─► entry callback (child, is_child = true)
//!     ─► schedule child
//! ```

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::debug;

use crate::{
    instrumentation::Instrumentation,
    state::{ContextId, ExecutionContext},
    Result,
};

/// Scheduling interface of the hosting execution engine.
pub trait ForkScheduler: Send + Sync {
    /// Returns a fresh identifier for a context about to be forked.
    fn allocate_context_id(&self) -> ContextId;

    /// Checks whether `parent` may be forked now.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ForkFailed`] to refuse the fork (e.g. a state limit
    /// was reached). The call then proceeds unforked.
    fn admit(&self, parent: &dyn ExecutionContext) -> Result<()> {
        let _ = parent;
        Ok(())
    }

    /// Takes ownership of a forked context whose entry callback already ran.
    fn schedule(&self, child: Box<dyn ExecutionContext>);
}

/// Creates and schedules forked contexts for fork-enabled instrumentation.
pub struct ForkCoordinator {
    scheduler: Arc<dyn ForkScheduler>,
    forks: AtomicU64,
}

impl ForkCoordinator {
    /// Creates a coordinator scheduling through `scheduler`.
    #[must_use]
    pub fn new(scheduler: Arc<dyn ForkScheduler>) -> Self {
        Self {
            scheduler,
            forks: AtomicU64::new(0),
        }
    }

    /// Forks `context` if `instrumentation` requests it.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the record's fork flag is not set, otherwise the isolated copy
    /// carrying a fresh [`ContextId`]. The original is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ForkFailed`] if the scheduler refuses the fork.
    pub fn maybe_fork(
        &self,
        instrumentation: &Instrumentation,
        context: &dyn ExecutionContext,
    ) -> Result<Option<Box<dyn ExecutionContext>>> {
        if !instrumentation.fork() {
            return Ok(None);
        }
        self.scheduler.admit(context)?;

        let child_id = self.scheduler.allocate_context_id();
        let child = context.fork(child_id);
        self.forks.fetch_add(1, Ordering::Relaxed);

        debug!(
            parent = %context.id(),
            child = %child_id,
            instrumentation = instrumentation.name(),
            "forked context"
        );
        Ok(Some(child))
    }

    /// Hands a forked child to the execution engine.
    pub fn schedule(&self, child: Box<dyn ExecutionContext>) {
        self.scheduler.schedule(child);
    }

    /// Returns the number of forks performed.
    #[must_use]
    pub fn fork_count(&self) -> u64 {
        self.forks.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ForkCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkCoordinator")
            .field("forks", &self.fork_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instrumentation::CallingConvention,
        state::{GuestState, Register},
        test::RecordingScheduler,
        Error,
    };

    fn record(fork: bool) -> Instrumentation {
        Instrumentation::new("libfoo", 0x1000, 0, "onFoo", CallingConvention::Cdecl, fork)
    }

    #[test]
    fn test_no_fork_without_flag() {
        let scheduler = Arc::new(RecordingScheduler::new(100));
        let coordinator = ForkCoordinator::new(scheduler.clone());
        let state = GuestState::new(ContextId(1), 4);

        assert!(coordinator.maybe_fork(&record(false), &state).unwrap().is_none());
        assert_eq!(coordinator.fork_count(), 0);
        assert_eq!(scheduler.scheduled(), 0);
    }

    #[test]
    fn test_fork_is_isolated() {
        let scheduler = Arc::new(RecordingScheduler::new(100));
        let coordinator = ForkCoordinator::new(scheduler.clone());
        let mut state = GuestState::new(ContextId(1), 4);
        state.set_register(Register::General(1), 11);

        let mut child = coordinator.maybe_fork(&record(true), &state).unwrap().unwrap();
        assert_eq!(child.id(), ContextId(100));
        child.set_return_value(5);
        child.write_memory(0x1000, &[1]).unwrap();

        assert_eq!(state.return_value(), 0);
        assert_eq!(state.mapped_pages(), 0);
        let child_state = child.as_any().downcast_ref::<GuestState>().unwrap();
        assert_eq!(child_state.register(Register::General(1)), 11);

        coordinator.schedule(child);
        assert_eq!(coordinator.fork_count(), 1);
        assert_eq!(scheduler.scheduled_ids(), vec![ContextId(100)]);
    }

    #[test]
    fn test_refused_fork() {
        let scheduler = Arc::new(RecordingScheduler::refusing());
        let coordinator = ForkCoordinator::new(scheduler);
        let state = GuestState::new(ContextId(1), 4);

        let result = coordinator.maybe_fork(&record(true), &state);

        assert!(matches!(result, Err(Error::ForkFailed(_))));
        assert_eq!(coordinator.fork_count(), 0);
    }
}
