//! Callback dispatch.
//!
//! Entry and exit events of instrumented functions are delivered to user callbacks
//! selected by the instrumentation's name. Callbacks are either native Rust closures
//! or live in a scripting engine reached through a [`ScriptBridge`].
//!
//! # Architecture
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CallbackDispatcher`] | Resolves names and runs handlers |
//! | [`CallbackInvocation`] | Uniform argument shape of every callback |
//! | [`HostServices`] | Logging and termination offered to callback code |
//! | [`PluginSet`] | Plugin lookup with the [`Plugin::as_scriptable`] capability query |
//!
//! # Termination
//!
//! A callback stops the hosting process by returning
//! [`HandlerOutcome::Terminate`]. The request is logged at `info` and then handed to
//! the injected [`Terminator`]. Handler failures are reported as errors and never
//! terminate anything.

mod bridge;
mod host;
mod script;
mod types;

pub use bridge::{CallbackDispatcher, DispatchOutcome};
pub use host::{HostServices, ProcessTerminator, Terminator};
pub use script::{Plugin, PluginSet, ScriptBridge};
pub use types::{CallPhase, CallbackInvocation, HandlerError, HandlerFn, HandlerOutcome};
