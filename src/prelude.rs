//! # funcscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the funcscope library. Import this module to get quick access to everything needed
//! to wire an event source to user callbacks.
//!
//! ```rust
//! use funcscope::prelude::*;
//!
//! let record = Instrumentation::new("libfoo", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
//! assert_eq!(record.param_count(), 2);
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all funcscope operations
pub use crate::Error;

/// The result type used throughout funcscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The composition root and its builder
pub use crate::{FunctionInstrumentation, FunctionInstrumentationBuilder};

// ================================================================================================
// Registration
// ================================================================================================

/// Instrumentation records and configuration
pub use crate::instrumentation::{
    CallingConvention, Instrumentation, InstrumentationConfig, InstrumentationEntry,
};

// ================================================================================================
// Event Source Interfaces
// ================================================================================================

/// What the call/return event source provides and consumes
pub use crate::monitor::{CallMonitor, ModuleDescriptor, ReturnPayload, ReturnSignal};

// ================================================================================================
// Execution Contexts
// ================================================================================================

/// Execution context abstraction, its identity and the reference implementation
pub use crate::state::{ContextId, ExecutionContext, GuestState, Register};

/// Scheduling of forked contexts
pub use crate::fork::ForkScheduler;

// ================================================================================================
// Callbacks
// ================================================================================================

/// Callback invocation and handler types
pub use crate::dispatch::{
    CallPhase, CallbackInvocation, DispatchOutcome, HandlerError, HandlerOutcome, HostServices,
};

/// Script plugins and termination
pub use crate::dispatch::{Plugin, PluginSet, ScriptBridge, Terminator};
