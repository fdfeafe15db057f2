//! Instrumentation records and calling conventions.
//!
//! An [`Instrumentation`] describes one interception point: which function to
//! intercept (module name plus module-relative pc), how to decode its arguments and
//! which callback to fire. Records are immutable once created and are shared as
//! `Arc<Instrumentation>` between the registry, the pairing engine and return payloads.

use std::fmt;

use serde::Deserialize;
use strum::{Display, EnumString};

/// Calling convention used to locate the arguments of an instrumented function.
///
/// Both supported conventions pass arguments in fixed-width stack slots above the
/// return address. They differ only in who pops the arguments after the call
/// (callee for [`Stdcall`](Self::Stdcall), caller for [`Cdecl`](Self::Cdecl)).
/// Stack cleanup is never performed by the instrumentation layer.
///
/// # Examples
///
/// ```rust
/// use funcscope::CallingConvention;
///
/// let cc: CallingConvention = "stdcall".parse().unwrap();
/// assert_eq!(cc, CallingConvention::Stdcall);
/// assert_eq!(CallingConvention::Cdecl.to_string(), "cdecl");
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Deserialize, Default,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CallingConvention {
    /// Callee cleans the stack, fixed-width slots.
    Stdcall,
    /// Caller cleans the stack.
    #[default]
    Cdecl,
}

impl CallingConvention {
    /// Returns `true` if the callee removes its arguments from the stack on return.
    #[must_use]
    pub fn callee_cleans_stack(self) -> bool {
        matches!(self, CallingConvention::Stdcall)
    }
}

/// An immutable description of one interception point.
///
/// # Equality
///
/// Two records are equal when module, pc, parameter count, name and calling
/// convention match. The fork flag is not compared, so a registration differing
/// only in fork behavior is a duplicate and the registry rejects it.
///
/// # Examples
///
/// ```rust
/// use funcscope::{CallingConvention, Instrumentation};
///
/// let a = Instrumentation::new("libfoo.so", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
/// let b = Instrumentation::new("libfoo.so", 0x1000, 2, "onFoo", CallingConvention::Cdecl, true);
/// assert_eq!(a, b);
/// ```
#[derive(Clone, Debug)]
pub struct Instrumentation {
    module_name: String,
    pc: u64,
    param_count: u32,
    name: String,
    convention: CallingConvention,
    fork: bool,
}

impl Instrumentation {
    /// Creates a new instrumentation record.
    ///
    /// # Arguments
    ///
    /// * `module_name` - Name of the module containing the function
    /// * `pc` - Function entry, relative to the module's native base
    /// * `param_count` - Number of arguments to decode on entry
    /// * `name` - Label the callback layer dispatches on
    /// * `convention` - Calling convention of the function
    /// * `fork` - Fork the execution context before the entry callback
    #[must_use]
    pub fn new(
        module_name: impl Into<String>,
        pc: u64,
        param_count: u32,
        name: impl Into<String>,
        convention: CallingConvention,
        fork: bool,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            pc,
            param_count,
            name: name.into(),
            convention,
            fork,
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Returns the module-relative program counter.
    #[must_use]
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Returns the number of arguments decoded on entry.
    #[must_use]
    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    /// Returns the instrumentation name used for handler dispatch.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the calling convention.
    #[must_use]
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Returns `true` if the context is forked when this instrumentation triggers.
    #[must_use]
    pub fn fork(&self) -> bool {
        self.fork
    }

    /// Returns `true` if this record is installed at `(module_name, pc)`.
    #[must_use]
    pub fn is_at(&self, module_name: &str, pc: u64) -> bool {
        self.pc == pc && self.module_name == module_name
    }
}

impl PartialEq for Instrumentation {
    fn eq(&self, other: &Self) -> bool {
        self.module_name == other.module_name
            && self.pc == other.pc
            && self.param_count == other.param_count
            && self.name == other.name
            && self.convention == other.convention
    }
}

impl Eq for Instrumentation {}

impl fmt::Display for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{:#x} ({} args, {}{})",
            self.name,
            self.module_name,
            self.pc,
            self.param_count,
            self.convention,
            if self.fork { ", fork" } else { "" }
        )
    }
}
