//! Interfaces consumed from the call/return event source.
//!
//! The event source is an external collaborator that watches call and return
//! instructions of the guest and forwards them to
//! [`FunctionInstrumentation`](crate::FunctionInstrumentation). This module defines
//! what the instrumentation layer needs from it:
//!
//! - [`CallMonitor`] - Hook installation keyed by `(module, pc)`
//! - [`ModuleDescriptor`] - Load information for the module an event refers to
//! - [`ReturnSignal`] - Per-call handle used to register interest in the matching return
//! - [`ReturnPayload`] - Data carried from the call event back to the return event
//!
//! # Event Protocol
//!
//! ```text
//! event source                          FunctionInstrumentation
//!      │ on_call(ctx, src, dest, .., &mut signal) │
//!      │────────────────────────────────────────►│ signal.connect(payload)
//!      │                                         │
//!      │   ... callee runs, possibly recursing ...
//!      │                                         │
//!      │ on_return(ctx, src, dest, site, payload)│
//!      │────────────────────────────────────────►│ pair with pending call
//! ```
//!
//! The event source keeps connected payloads per execution context and hands each
//! one back exactly once, when the frame that created it returns. When the engine
//! forks a context, the event source's per-context bookkeeping is forked with it.

use std::{fmt, sync::Arc};

use crate::{engine::CallId, instrumentation::Instrumentation, Result};

/// Hook installation interface of the call/return event source.
///
/// Implementations must be `Send + Sync`; the registry may be shared between
/// threads that drive different execution contexts.
pub trait CallMonitor: Send + Sync {
    /// Starts delivering call events for the function at `(module_name, pc)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::HookInstall`] if the hook cannot be installed.
    fn install_hook(&self, module_name: &str, pc: u64) -> Result<()>;

    /// Stops delivering call events for the function at `(module_name, pc)`.
    fn remove_hook(&self, module_name: &str, pc: u64);
}

/// Load information for a guest module.
///
/// Instrumentation points are expressed relative to the module's *native* base
/// (the preferred image base found in the binary). At runtime the module may be
/// loaded elsewhere; [`to_native_base`](Self::to_native_base) translates runtime
/// addresses back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Module name as reported by the module loader.
    pub name: String,
    /// Preferred base address of the image.
    pub native_base: u64,
    /// Address the image was loaded at.
    pub load_base: u64,
    /// Size of the loaded image in bytes.
    pub size: u64,
}

impl ModuleDescriptor {
    /// Creates a module descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, native_base: u64, load_base: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            native_base,
            load_base,
            size,
        }
    }

    /// Returns `true` if `address` lies inside the loaded image.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address
            .checked_sub(self.load_base)
            .is_some_and(|offset| offset < self.size)
    }

    /// Translates a runtime address into the module's native address space.
    ///
    /// Returns `None` if the address is outside the loaded image or the translated
    /// address does not fit in 64 bits.
    #[must_use]
    pub fn to_native_base(&self, address: u64) -> Option<u64> {
        if !self.contains(address) {
            return None;
        }
        (address - self.load_base).checked_add(self.native_base)
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:#x}..{:#x}]",
            self.name,
            self.load_base,
            self.load_base.saturating_add(self.size)
        )
    }
}

/// Data attached to a return signal and delivered back with the return event.
///
/// Carries the call identifier of the pending entry and the resolved record, so
/// the return handler can pair the event without another registry lookup.
#[derive(Clone, Debug)]
pub struct ReturnPayload {
    /// Identifier of the pending call this return completes.
    pub call_id: CallId,
    /// The instrumentation that fired on entry.
    pub instrumentation: Arc<Instrumentation>,
}

/// Per-call handle for registering interest in the matching return.
///
/// The event source creates one signal per observed call and passes it to
/// [`FunctionInstrumentation::on_call`](crate::FunctionInstrumentation::on_call).
/// Every payload connected to the signal must be delivered back exactly once
/// through [`FunctionInstrumentation::on_return`](crate::FunctionInstrumentation::on_return)
/// when the call returns.
#[derive(Debug, Default)]
pub struct ReturnSignal {
    payloads: Vec<ReturnPayload>,
}

impl ReturnSignal {
    /// Creates a signal with no interested parties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in the return of this call.
    pub fn connect(&mut self, payload: ReturnPayload) {
        self.payloads.push(payload);
    }

    /// Returns `true` if nobody is interested in the return.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Returns the connected payloads.
    #[must_use]
    pub fn payloads(&self) -> &[ReturnPayload] {
        &self.payloads
    }

    /// Consumes the signal, yielding the connected payloads.
    #[must_use]
    pub fn into_payloads(self) -> Vec<ReturnPayload> {
        self.payloads
    }
}
