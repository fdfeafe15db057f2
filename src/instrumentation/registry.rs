//! Registry of active instrumentation points.
//!
//! The [`InstrumentationRegistry`] owns every [`Instrumentation`] for the lifetime of
//! the plugin. Registering a record installs a hook with the [`CallMonitor`];
//! the registry guarantees at most one record per `(module, pc)` so the pairing
//! engine never has to choose between records for an entry event.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::{debug, info};

use crate::{instrumentation::Instrumentation, monitor::CallMonitor, Error, Result};

/// Key of an instrumentation point: `(module name, module-relative pc)`.
type PointKey = (String, u64);

/// Owner of all active instrumentation records.
///
/// Register and unregister are serialized through a `RwLock`; lookups from the
/// event path only take the read side.
///
/// # Deduplication Policy
///
/// The first registration of a point wins:
///
/// 1. A record equal to an existing one (fork flag ignored) is rejected with
///    [`Error::DuplicateRegistration`].
/// 2. A record at an occupied `(module, pc)` slot that is *not* equal is rejected
///    with [`Error::InstrumentationConflict`].
///
/// Rejections have no side effects: no hook is installed and the existing record
/// is untouched.
///
/// # Examples
///
/// ```rust,ignore
/// use funcscope::{CallingConvention, Instrumentation, InstrumentationRegistry};
///
/// let registry = InstrumentationRegistry::new(monitor);
/// registry.register(Instrumentation::new("libfoo", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false))?;
/// assert!(registry.lookup("libfoo", 0x1000).is_some());
/// ```
pub struct InstrumentationRegistry {
    monitor: Arc<dyn CallMonitor>,
    records: RwLock<HashMap<PointKey, Arc<Instrumentation>>>,
}

impl InstrumentationRegistry {
    /// Creates an empty registry that installs hooks through `monitor`.
    #[must_use]
    pub fn new(monitor: Arc<dyn CallMonitor>) -> Self {
        Self {
            monitor,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an instrumentation point and installs its hook.
    ///
    /// # Returns
    ///
    /// The shared record now owned by the registry.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateRegistration`] if an equal record exists
    /// - [`Error::InstrumentationConflict`] if another record owns the slot
    /// - [`Error::HookInstall`] if the event source refuses the hook
    /// - [`Error::LockError`] if the registry lock is poisoned
    pub fn register(&self, instrumentation: Instrumentation) -> Result<Arc<Instrumentation>> {
        let mut records = write_lock!(self.records)?;

        let key = (
            instrumentation.module_name().to_string(),
            instrumentation.pc(),
        );
        if let Some(existing) = records.get(&key) {
            if **existing == instrumentation {
                return Err(Error::DuplicateRegistration {
                    module: key.0,
                    pc: key.1,
                });
            }
            return Err(Error::InstrumentationConflict {
                module: key.0,
                pc: key.1,
                existing: existing.name().to_string(),
            });
        }

        self.monitor
            .install_hook(instrumentation.module_name(), instrumentation.pc())?;

        let record = Arc::new(instrumentation);
        info!(instrumentation = %record, "registered instrumentation");
        records.insert(key, Arc::clone(&record));
        Ok(record)
    }

    /// Removes the instrumentation at `(module_name, pc)` and its hook.
    ///
    /// Pending calls that already resolved the record keep their reference and
    /// still complete normally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the registry lock is poisoned.
    pub fn unregister(&self, module_name: &str, pc: u64) -> Result<Option<Arc<Instrumentation>>> {
        let mut records = write_lock!(self.records)?;
        let removed = records.remove(&(module_name.to_string(), pc));
        if let Some(record) = &removed {
            self.monitor.remove_hook(module_name, pc);
            debug!(instrumentation = %record, "unregistered instrumentation");
        }
        Ok(removed)
    }

    /// Resolves the record installed at `(module_name, pc)`.
    ///
    /// A poisoned lock resolves to `None`; the event path treats it like an
    /// uninstrumented call.
    #[must_use]
    pub fn lookup(&self, module_name: &str, pc: u64) -> Option<Arc<Instrumentation>> {
        let records = read_lock!(self.records).ok()?;
        records.get(&(module_name.to_string(), pc)).cloned()
    }

    /// Returns the number of registered instrumentation points.
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock!(self.records).map(|r| r.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of all registered records, ordered by module and pc.
    #[must_use]
    pub fn records(&self) -> Vec<Arc<Instrumentation>> {
        let Ok(records) = read_lock!(self.records) else {
            return Vec::new();
        };
        let mut snapshot: Vec<_> = records.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.module_name()
                .cmp(b.module_name())
                .then(a.pc().cmp(&b.pc()))
        });
        snapshot
    }
}

impl std::fmt::Debug for InstrumentationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationRegistry")
            .field("record_count", &self.len())
            .finish()
    }
}
