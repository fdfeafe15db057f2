//! Argument extraction and call/return pairing.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`args`] | Calling-convention aware argument decoding |
//! | [`pairing`] | [`PairingEngine`] tracking one [`PendingCall`] per call occurrence |
//!
//! # Stack Discipline
//!
//! Within one execution context, the i-th return observed completes the i-th most
//! recent unmatched call. Nested and recursive calls to the same function therefore
//! pair correctly without any per-function state:
//!
//! ```text
//! call f (#1) ─► call f (#2) ─► call f (#3)
//!                                   ret ─► completes #3
//!                   ret ─► completes #2
//!   ret ─► completes #1
//! ```

pub mod args;
pub mod pairing;

pub use args::{extract_arguments, return_address};
pub use pairing::{CallId, PairingEngine, PairingStats, PendingCall};
