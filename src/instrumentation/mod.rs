//! Instrumentation points: records, registry and configuration.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`record`] | [`Instrumentation`] records and [`CallingConvention`] |
//! | [`registry`] | [`InstrumentationRegistry`] owning and deduplicating records |
//! | [`config`] | [`InstrumentationConfig`] loaded from TOML |
//!
//! # Lifecycle
//!
//! ```text
//! InstrumentationConfig ──► Instrumentation ──► InstrumentationRegistry::register
//!                                                     │
//!                                                     ├─► CallMonitor::install_hook
//!                                                     ▼
//!                                          Arc<Instrumentation> shared with
//!                                          pending calls and return payloads
//! ```

pub mod config;
pub mod record;
pub mod registry;

pub use config::{InstrumentationConfig, InstrumentationEntry, MAX_PARAM_COUNT};
pub use record::{CallingConvention, Instrumentation};
pub use registry::InstrumentationRegistry;
