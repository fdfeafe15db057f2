//! Instrumentation configuration.
//!
//! Embedders describe the instrumentation points they want in TOML and hand the text
//! to [`InstrumentationConfig::from_toml_str`]. Reading the text from disk (or any
//! other source) is the embedder's business; this crate never persists configuration.
//!
//! # Format
//!
//! ```toml
//! [[instrumentation]]
//! module_name = "libfoo.so"
//! name = "onFoo"
//! pc = 0x1000
//! param_count = 2
//! convention = "cdecl"
//! fork = false
//! ```
//!
//! `convention` defaults to `"cdecl"`, `param_count` to `0` and `fork` to `false`.
//! `param_count` may not exceed [`MAX_PARAM_COUNT`].
//!
//! # Example
//!
//! ```rust
//! use funcscope::{CallingConvention, InstrumentationConfig, InstrumentationEntry};
//!
//! // From TOML
//! let config = InstrumentationConfig::from_toml_str(r#"
//!     [[instrumentation]]
//!     module_name = "libfoo.so"
//!     name = "onFoo"
//!     pc = 0x1000
//!     param_count = 2
//! "#).unwrap();
//! assert_eq!(config.entries().len(), 1);
//!
//! // Or built in code
//! let config = InstrumentationConfig::new()
//!     .with_entry(InstrumentationEntry::new("libfoo.so", "onFoo", 0x1000).with_param_count(2));
//! ```

use std::collections::HashSet;

use serde::Deserialize;

use crate::{
    instrumentation::{CallingConvention, Instrumentation},
    Error, Result,
};

/// Largest parameter count a configured entry may declare.
pub const MAX_PARAM_COUNT: u32 = 64;

/// One configured instrumentation point.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentationEntry {
    /// Module containing the function.
    pub module_name: String,
    /// Instrumentation name used for handler dispatch.
    pub name: String,
    /// Function entry relative to the module's native base.
    pub pc: u64,
    /// Number of arguments to decode on entry.
    #[serde(default)]
    pub param_count: u32,
    /// Calling convention of the function.
    #[serde(default)]
    pub convention: CallingConvention,
    /// Fork the execution context when the function is entered.
    #[serde(default)]
    pub fork: bool,
}

impl InstrumentationEntry {
    /// Creates an entry with no parameters, `cdecl` and no fork.
    #[must_use]
    pub fn new(module_name: impl Into<String>, name: impl Into<String>, pc: u64) -> Self {
        Self {
            module_name: module_name.into(),
            name: name.into(),
            pc,
            param_count: 0,
            convention: CallingConvention::default(),
            fork: false,
        }
    }

    /// Sets the parameter count.
    #[must_use]
    pub fn with_param_count(mut self, param_count: u32) -> Self {
        self.param_count = param_count;
        self
    }

    /// Sets the calling convention.
    #[must_use]
    pub fn with_convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Sets the fork flag.
    #[must_use]
    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    /// Converts the entry into an instrumentation record.
    #[must_use]
    pub fn to_instrumentation(&self) -> Instrumentation {
        Instrumentation::new(
            self.module_name.clone(),
            self.pc,
            self.param_count,
            self.name.clone(),
            self.convention,
            self.fork,
        )
    }
}

/// A set of instrumentation points to register at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentationConfig {
    #[serde(default, rename = "instrumentation")]
    entries: Vec<InstrumentationEntry>,
}

impl InstrumentationConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the text is not a valid configuration
    /// - [`Error::InvalidConfig`] if an entry has an empty module or instrumentation
    ///   name, declares more than [`MAX_PARAM_COUNT`] parameters, or two entries
    ///   target the same `(module, pc)`
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Adds an entry.
    #[must_use]
    pub fn with_entry(mut self, entry: InstrumentationEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Returns the configured entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[InstrumentationEntry] {
        &self.entries
    }

    /// Checks the configuration for values the registry would reject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.module_name.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "entry '{}' has an empty module_name",
                    entry.name
                )));
            }
            if entry.name.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "entry at {}:{:#x} has an empty name",
                    entry.module_name, entry.pc
                )));
            }
            if entry.param_count > MAX_PARAM_COUNT {
                return Err(Error::InvalidConfig(format!(
                    "entry '{}' declares {} parameters, at most {MAX_PARAM_COUNT} are supported",
                    entry.name, entry.param_count
                )));
            }
            if !seen.insert((entry.module_name.as_str(), entry.pc)) {
                return Err(Error::InvalidConfig(format!(
                    "{}:{:#x} is configured more than once",
                    entry.module_name, entry.pc
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let config = InstrumentationConfig::from_toml_str(
            r#"
            [[instrumentation]]
            module_name = "driver.sys"
            name = "onDispatch"
            pc = 0x11a0
            param_count = 3
            convention = "stdcall"
            fork = true
            "#,
        )
        .unwrap();

        let entry = &config.entries()[0];
        assert_eq!(entry.module_name, "driver.sys");
        assert_eq!(entry.pc, 0x11a0);
        assert_eq!(entry.param_count, 3);
        assert_eq!(entry.convention, CallingConvention::Stdcall);
        assert!(entry.fork);
    }

    #[test]
    fn test_defaults() {
        let config = InstrumentationConfig::from_toml_str(
            r#"
            [[instrumentation]]
            module_name = "libfoo"
            name = "onFoo"
            pc = 4096
            "#,
        )
        .unwrap();

        assert_eq!(
            config.entries()[0],
            InstrumentationEntry::new("libfoo", "onFoo", 0x1000)
        );
    }

    #[test]
    fn test_empty_config() {
        let config = InstrumentationConfig::from_toml_str("").unwrap();
        assert!(config.entries().is_empty());
    }

    #[test]
    fn test_unknown_convention_rejected() {
        let result = InstrumentationConfig::from_toml_str(
            r#"
            [[instrumentation]]
            module_name = "libfoo"
            name = "onFoo"
            pc = 1
            convention = "fastcall"
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_duplicate_point_rejected() {
        let result = InstrumentationConfig::from_toml_str(
            r#"
            [[instrumentation]]
            module_name = "libfoo"
            name = "a"
            pc = 1

            [[instrumentation]]
            module_name = "libfoo"
            name = "b"
            pc = 1
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_param_count_bound() {
        let result = InstrumentationConfig::from_toml_str(
            r#"
            [[instrumentation]]
            module_name = "libfoo"
            name = "onFoo"
            pc = 1
            param_count = 4294967295
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let at_limit = InstrumentationConfig::new().with_entry(
            InstrumentationEntry::new("libfoo", "onFoo", 1).with_param_count(MAX_PARAM_COUNT),
        );
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = InstrumentationConfig::new().with_entry(InstrumentationEntry::new("libfoo", "", 1));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_entry_conversion() {
        let record = InstrumentationEntry::new("libfoo", "onFoo", 0x1000)
            .with_param_count(2)
            .with_convention(CallingConvention::Stdcall)
            .with_fork(true)
            .to_instrumentation();

        assert_eq!(record.module_name(), "libfoo");
        assert_eq!(record.param_count(), 2);
        assert_eq!(record.convention(), CallingConvention::Stdcall);
        assert!(record.fork());
    }
}
