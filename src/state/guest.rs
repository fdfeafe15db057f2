//! Copy-on-write guest state.
//!
//! [`GuestState`] keeps registers, memory pages and path constraints in `imbl`
//! persistent collections. Forking clones the collections, which is O(1) thanks to
//! structural sharing; only entries modified afterwards are copied. Memory pages are
//! additionally shared through `Arc` and copied on first write with
//! [`Arc::make_mut`].

use std::{any::Any, fmt, sync::Arc};

use imbl::{HashMap as ImHashMap, Vector as ImVector};

use crate::{
    state::{ContextId, ExecutionContext},
    Error, Result,
};

/// Size of a guest memory page in bytes.
pub const PAGE_SIZE: usize = 4096;

type PageData = [u8; PAGE_SIZE];

/// Guest registers known to [`GuestState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    /// Program counter.
    ProgramCounter,
    /// Stack pointer.
    StackPointer,
    /// Register holding function return values.
    ReturnValue,
    /// Any other general purpose register, by index.
    General(u8),
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::ProgramCounter => write!(f, "pc"),
            Register::StackPointer => write!(f, "sp"),
            Register::ReturnValue => write!(f, "ret"),
            Register::General(index) => write!(f, "r{index}"),
        }
    }
}

/// A forkable guest state with copy-on-write registers, memory and constraints.
///
/// Unset registers read as zero. Memory is sparse: reading a page that was never
/// written fails with [`Error::MemoryRead`], writing maps it.
///
/// # Example
///
/// ```rust
/// use funcscope::{ContextId, ExecutionContext, GuestState, Register};
///
/// let mut state = GuestState::new(ContextId(1), 4);
/// state.set_register(Register::StackPointer, 0x8000);
/// state.write_memory(0x8000, &0x1234u32.to_le_bytes()).unwrap();
///
/// let mut child = state.fork_state(ContextId(2));
/// child.write_memory(0x8000, &[0xff; 4]).unwrap();
///
/// assert_eq!(state.read_pointer(0x8000).unwrap(), 0x1234);
/// assert_eq!(child.read_pointer(0x8000).unwrap(), 0xffff_ffff);
/// ```
#[derive(Clone)]
pub struct GuestState {
    id: ContextId,
    pointer_size: usize,
    registers: ImHashMap<Register, u64>,
    pages: ImHashMap<u64, Arc<PageData>>,
    constraints: ImVector<String>,
}

impl GuestState {
    /// Creates an empty state with the given identity and pointer width.
    #[must_use]
    pub fn new(id: ContextId, pointer_size: usize) -> Self {
        Self {
            id,
            pointer_size,
            registers: ImHashMap::new(),
            pages: ImHashMap::new(),
            constraints: ImVector::new(),
        }
    }

    /// Reads a register. Unset registers read as zero.
    #[must_use]
    pub fn register(&self, register: Register) -> u64 {
        self.registers.get(&register).copied().unwrap_or(0)
    }

    /// Writes a register.
    pub fn set_register(&mut self, register: Register, value: u64) {
        self.registers.insert(register, value);
    }

    /// Appends a path constraint.
    ///
    /// Constraints are opaque to this crate; they only need to follow the state
    /// across forks.
    pub fn add_constraint(&mut self, constraint: impl Into<String>) {
        self.constraints.push_back(constraint.into());
    }

    /// Returns the path constraints in insertion order.
    pub fn constraints(&self) -> impl Iterator<Item = &String> {
        self.constraints.iter()
    }

    /// Returns the number of mapped pages.
    #[must_use]
    pub fn mapped_pages(&self) -> usize {
        self.pages.len()
    }

    /// Pushes a pointer-sized value, decrementing the stack pointer first.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack memory cannot be written.
    pub fn push(&mut self, value: u64) -> Result<()> {
        let sp = self
            .register(Register::StackPointer)
            .wrapping_sub(self.pointer_size as u64);
        let bytes = value.to_le_bytes();
        self.write_memory(sp, &bytes[..self.pointer_size])?;
        self.set_register(Register::StackPointer, sp);
        Ok(())
    }

    /// Forks this state, keeping the concrete type.
    ///
    /// O(1): all collections are shared structurally until modified.
    #[must_use]
    pub fn fork_state(&self, child: ContextId) -> Self {
        let mut forked = self.clone();
        forked.id = child;
        forked
    }

    fn page_base(address: u64) -> u64 {
        address & !(PAGE_SIZE as u64 - 1)
    }
}

impl ExecutionContext for GuestState {
    fn id(&self) -> ContextId {
        self.id
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn program_counter(&self) -> u64 {
        self.register(Register::ProgramCounter)
    }

    fn stack_pointer(&self) -> u64 {
        self.register(Register::StackPointer)
    }

    fn return_value(&self) -> u64 {
        self.register(Register::ReturnValue)
    }

    fn set_return_value(&mut self, value: u64) {
        self.set_register(Register::ReturnValue, value);
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let current = address.wrapping_add(done as u64);
            let base = Self::page_base(current);
            let page = self.pages.get(&base).ok_or(Error::MemoryRead {
                address,
                size: buf.len(),
            })?;

            let offset = (current - base) as usize;
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            buf[done..done + chunk].copy_from_slice(&page[offset..offset + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let current = address.wrapping_add(done as u64);
            let base = Self::page_base(current);
            let page = self
                .pages
                .entry(base)
                .or_insert_with(|| Arc::new([0u8; PAGE_SIZE]));

            let offset = (current - base) as usize;
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            Arc::make_mut(page)[offset..offset + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn fork(&self, child: ContextId) -> Box<dyn ExecutionContext> {
        Box::new(self.fork_state(child))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl fmt::Debug for GuestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestState")
            .field("id", &self.id)
            .field("pointer_size", &self.pointer_size)
            .field("registers", &self.registers.len())
            .field("pages", &self.pages.len())
            .field("constraints", &self.constraints.len())
            .finish()
    }
}
