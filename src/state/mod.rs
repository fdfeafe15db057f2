//! Execution contexts.
//!
//! The instrumentation layer never owns guest state. It reads arguments from, and
//! hands callbacks access to, whatever state the hosting engine uses through the
//! [`ExecutionContext`] trait. [`GuestState`] is a copy-on-write reference
//! implementation for embedders without a state type of their own.
//!
//! # Isolation
//!
//! [`ExecutionContext::fork`] must return a full logical copy: once forked, writes
//! to registers, memory or path constraints of one context are invisible to the
//! other.

mod guest;

use std::{any::Any, fmt};

use crate::{Error, Result};

pub use guest::{GuestState, Register, PAGE_SIZE};

/// Identity of an execution context.
///
/// Identifiers are assigned by the hosting engine and must be unique among live
/// contexts; forked contexts receive fresh identifiers from
/// [`ForkScheduler::allocate_context_id`](crate::ForkScheduler::allocate_context_id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Access to the guest state of one execution context.
///
/// Reads take `&self`: argument extraction must never mutate the context.
/// Callbacks receive `&mut dyn ExecutionContext` and may modify the state through
/// the write methods or by downcasting via [`as_any_mut`](Self::as_any_mut).
pub trait ExecutionContext: Send {
    /// Returns the identity of this context.
    fn id(&self) -> ContextId;

    /// Returns the guest pointer width in bytes (4 or 8).
    fn pointer_size(&self) -> usize;

    /// Returns the current program counter.
    fn program_counter(&self) -> u64;

    /// Returns the current stack pointer.
    fn stack_pointer(&self) -> u64;

    /// Returns the value of the return-value register.
    fn return_value(&self) -> u64;

    /// Overwrites the return-value register.
    fn set_return_value(&mut self, value: u64);

    /// Reads `buf.len()` bytes of guest memory starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryRead`] if any byte is unmapped.
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` to guest memory starting at `address`.
    ///
    /// # Errors
    ///
    /// Implementations may refuse writes to unmapped memory.
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()>;

    /// Creates an isolated copy of this context carrying the identity `child`.
    fn fork(&self, child: ContextId) -> Box<dyn ExecutionContext>;

    /// Upcast for downcasting to the concrete state type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete state type.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Reads one little-endian guest pointer at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryRead`] if the pointer cannot be read or the pointer
    /// size is not 4 or 8.
    fn read_pointer(&self, address: u64) -> Result<u64> {
        match self.pointer_size() {
            4 => {
                let mut buf = [0u8; 4];
                self.read_memory(address, &mut buf)?;
                Ok(u64::from(u32::from_le_bytes(buf)))
            }
            8 => {
                let mut buf = [0u8; 8];
                self.read_memory(address, &mut buf)?;
                Ok(u64::from_le_bytes(buf))
            }
            size => Err(Error::MemoryRead { address, size }),
        }
    }
}

impl fmt::Debug for dyn ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id())
            .field("pc", &format_args!("{:#x}", self.program_counter()))
            .field("sp", &format_args!("{:#x}", self.stack_pointer()))
            .finish()
    }
}
