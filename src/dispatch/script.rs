//! Script plugins and the capability query for script bridges.
//!
//! A scripting engine plugs into the dispatcher through [`ScriptBridge`]. Plugins
//! announce that capability through [`Plugin::as_scriptable`]; the query is
//! resolved once, when the dispatcher is composed, never on the event path.

use std::sync::Arc;

use tracing::warn;

use crate::{
    dispatch::{CallbackInvocation, HandlerError, HandlerOutcome, HostServices},
    state::ExecutionContext,
    Error, Result,
};

/// Adapter between the dispatcher and a scripting engine.
///
/// Implementations marshal the [`CallbackInvocation`] into the interpreter, call the
/// user-level handler named by [`CallbackInvocation::name`] and translate the result
/// back. Interpreter failures must be reported as [`HandlerError`]s, never panics.
pub trait ScriptBridge: Send + Sync {
    /// Name of the scripting language, used in diagnostics.
    fn language(&self) -> &str;

    /// Returns `true` if the script defines a handler called `name`.
    fn has_handler(&self, name: &str) -> bool;

    /// Runs the handler for `invocation`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the handler is malformed or fails.
    fn invoke(
        &self,
        invocation: &CallbackInvocation,
        context: &mut dyn ExecutionContext,
        host: &HostServices,
    ) -> std::result::Result<HandlerOutcome, HandlerError>;
}

/// A plugin of the hosting engine.
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin's script bridge if it hosts callback logic.
    fn as_scriptable(&self) -> Option<Arc<dyn ScriptBridge>> {
        None
    }
}

/// The plugins known to the hosting engine, looked up by name.
#[derive(Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin. A plugin with the same name is replaced.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.retain(|p| p.name() != plugin.name());
        self.plugins.push(plugin);
        self
    }

    /// Returns the plugin called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// Resolves the script bridge of the plugin called `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::PluginNotFound`] if no such plugin exists
    /// - [`Error::NotScriptable`] if it exists but hosts no scripts
    pub fn script_bridge(&self, name: &str) -> Result<Arc<dyn ScriptBridge>> {
        let Some(plugin) = self.get(name) else {
            warn!(plugin = name, "could not get plugin");
            return Err(Error::PluginNotFound(name.to_string()));
        };
        plugin.as_scriptable().ok_or_else(|| {
            warn!(plugin = name, "plugin does not expose a script bridge");
            Error::NotScriptable(name.to_string())
        })
    }

    /// Returns the number of plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("PluginSet").field("plugins", &names).finish()
    }
}
