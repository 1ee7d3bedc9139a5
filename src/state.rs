//! Plug-in lifecycle states and the events delivered as they change.

use std::fmt;

/// A plug-in's position in its lifecycle. Transitions are driven exclusively
/// by [`crate::engine`]; nothing else mutates a `RegisteredPlugin`'s state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Uninstalled,
    Installed,
    Resolved,
    Starting,
    Stopping,
    Active,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Uninstalled => "uninstalled",
            PluginState::Installed => "installed",
            PluginState::Resolved => "resolved",
            PluginState::Starting => "starting",
            PluginState::Stopping => "stopping",
            PluginState::Active => "active",
        };
        f.write_str(name)
    }
}

/// A single lifecycle transition, delivered to every listener registered on
/// the context in which it happened.
#[derive(Debug, Clone)]
pub struct PluginEvent {
    pub plugin_id: String,
    pub old_state: PluginState,
    pub new_state: PluginState,
}

impl PluginEvent {
    pub fn new(plugin_id: impl Into<String>, old_state: PluginState, new_state: PluginState) -> Self {
        PluginEvent {
            plugin_id: plugin_id.into(),
            old_state,
            new_state,
        }
    }
}

/// Callback signature for context event listeners.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PluginEvent);
}

impl<F> EventListener for F
where
    F: Fn(&PluginEvent) + Send + Sync,
{
    fn on_event(&self, event: &PluginEvent) {
        (self)(event)
    }
}

/// Callback signature for context error handlers: receives a human-readable
/// message describing a recoverable failure.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, plugin_id: Option<&str>, message: &str);
}

impl<F> ErrorHandler for F
where
    F: Fn(Option<&str>, &str) + Send + Sync,
{
    fn on_error(&self, plugin_id: Option<&str>, message: &str) {
        (self)(plugin_id, message)
    }
}
