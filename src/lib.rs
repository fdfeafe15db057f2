// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # funcscope
//!
//! Dynamic function instrumentation for binary-analysis execution engines.
//!
//! `funcscope` lets an analyst register interception points on functions of a loaded
//! module (module name plus module-relative program counter) and receive callbacks when
//! those functions are entered and when they return. It sits between three external
//! collaborators:
//!
//! - a **call/return event source** ([`CallMonitor`]) that raises entry and exit
//!   notifications and installs hooks on request,
//! - a **callback host** (native closures or a [`ScriptBridge`]) that runs user logic,
//! - an **execution engine** ([`ForkScheduler`]) that schedules forked contexts.
//!
//! ## Features
//!
//! - **🔌 Deduplicated registry** - One record per `(module, pc)`, hooks installed on registration
//! - **📐 Calling conventions** - Stack-slot argument decoding for `stdcall` and `cdecl`
//! - **🔁 Call/return pairing** - One pending entry per call occurrence, LIFO per context,
//!   recursion and re-entrancy safe
//! - **🌿 Fork on trigger** - Copy-on-write context forks with the entry callback run in both copies
//! - **🛡️ Recoverable anomalies** - Orphaned returns, torn-down contexts and handler failures
//!   are logged and counted, never crash the host
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use funcscope::prelude::*;
//!
//! # fn wire(monitor: Arc<dyn CallMonitor>, scheduler: Arc<dyn ForkScheduler>) -> funcscope::Result<()> {
//! let instrumentation = FunctionInstrumentation::builder()
//!     .monitor(monitor)
//!     .scheduler(scheduler)
//!     .build()?;
//!
//! instrumentation.dispatcher().register_handler("onFoo", |invocation, _ctx| {
//!     println!("{} {} args={:?}", invocation.name, invocation.phase, invocation.args);
//!     Ok(HandlerOutcome::Continue)
//! });
//!
//! assert!(instrumentation.register("libfoo.so", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`instrumentation`] - Instrumentation records, the registry and TOML configuration
//! - [`monitor`] - Interfaces consumed from the call/return event source
//! - [`state`] - The execution context abstraction and a copy-on-write reference state
//! - [`engine`] - Argument extraction and call/return pairing
//! - [`dispatch`] - The callback dispatch bridge, host services and script plugins
//! - [`fork`] - The fork coordinator
//! - [`FunctionInstrumentation`] - The composition root wiring everything together
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). The event handlers on
//! [`FunctionInstrumentation`] treat everything except hard lock failures as recoverable:
//!
//! ```rust,no_run
//! use funcscope::{Error, Instrumentation, CallingConvention};
//! # fn demo(fi: &funcscope::FunctionInstrumentation) {
//! let record = Instrumentation::new("libfoo.so", 0x1000, 2, "onFoo", CallingConvention::Cdecl, false);
//! match fi.register_instrumentation(record) {
//!     Ok(record) => println!("registered {}", record),
//!     Err(Error::DuplicateRegistration { module, pc }) => println!("{module}:{pc:#x} exists"),
//!     Err(e) => println!("other error: {e}"),
//! }
//! # }
//! ```

#[macro_use]
pub(crate) mod macros;

#[cfg(test)]
pub(crate) mod test;

mod error;
mod plugin;

pub mod dispatch;
pub mod engine;
pub mod fork;
pub mod instrumentation;
pub mod monitor;
pub mod prelude;
pub mod state;

/// `funcscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `funcscope` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the
/// individual failure categories.
pub use error::Error;

pub use dispatch::{
    CallPhase, CallbackDispatcher, CallbackInvocation, DispatchOutcome, HandlerError,
    HandlerOutcome, HostServices, Plugin, PluginSet, ProcessTerminator, ScriptBridge, Terminator,
};
pub use engine::{CallId, PairingEngine, PairingStats, PendingCall};
pub use fork::{ForkCoordinator, ForkScheduler};
pub use instrumentation::{
    CallingConvention, Instrumentation, InstrumentationConfig, InstrumentationEntry,
    InstrumentationRegistry, MAX_PARAM_COUNT,
};
pub use monitor::{CallMonitor, ModuleDescriptor, ReturnPayload, ReturnSignal};
pub use plugin::{FunctionInstrumentation, FunctionInstrumentationBuilder};
pub use state::{ContextId, ExecutionContext, GuestState, Register};
