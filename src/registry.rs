//! The plug-in registry: `RegisteredPlugin` storage plus the `Install` and
//! lookup halves of the external interface. The transitive lifecycle
//! operations (`Resolve`/`Start`/`Stop`/`Unresolve`/`Uninstall`) live in
//! [`crate::engine`]; this module only covers what the source's
//! `pcontrol.c` calls `cp_install_plugin` and the various `cp_get_*`
//! lookups.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::Context;
use crate::descriptor::{Extension, PluginInfo};
use crate::error::{PluginError, Result};
use crate::loader::PluginRuntime;
use crate::state::{PluginEvent, PluginState};

/// A plug-in as tracked inside one context. Forward/back edges of the
/// dependency graph are represented as plain identifier keys rather than
/// pointers: the graph may be cyclic, and a plug-in's canonical owner is
/// always the context's `plugins` map, so every edge here is non-owning and
/// immune to the ownership-cycle problem a pointer-based graph would hit.
pub struct RegisteredPlugin {
    pub info: Arc<PluginInfo>,
    pub state: PluginState,
    /// Populated only once `state >= Resolved`: identifiers this plug-in's
    /// mandatory and satisfied-optional imports were wired to.
    pub imported: Vec<String>,
    /// Back-edges: identifiers of plug-ins that import this one, populated
    /// as a side effect of resolving them.
    pub importing: HashSet<String>,
    pub runtime: PluginRuntime,
    /// Cycle-breaking flag for graph traversals; must be `false` outside of
    /// any in-progress engine operation.
    pub processed: bool,
}

impl RegisteredPlugin {
    fn new(info: Arc<PluginInfo>) -> Self {
        RegisteredPlugin {
            info,
            state: PluginState::Installed,
            imported: Vec::new(),
            importing: HashSet::new(),
            runtime: PluginRuntime::None,
            processed: false,
        }
    }
}

impl Context {
    /// Registers a plug-in descriptor. All-or-nothing: on any conflict the
    /// context is left exactly as it was before the call.
    pub fn install_plugin(self: &Arc<Self>, info: PluginInfo) -> Result<()> {
        self.check_not_in_callback("install_plugin");
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        if state.plugins.contains_key(&info.identifier) {
            return Err(PluginError::Conflict(info.identifier.clone()));
        }
        for ep in &info.ext_points {
            if state.ext_points.contains_key(&ep.global_id) {
                return Err(PluginError::ExtPointConflict(ep.global_id.clone()));
            }
        }

        // Both conflict checks above ran before any mutation, so the
        // remaining steps can never fail partway through: no explicit
        // rollback bookkeeping is needed, unlike the unregister-on-failure
        // path a single insert-then-validate pass would require.
        let info = Arc::new(info);
        for ep in &info.ext_points {
            state.ext_points.insert(ep.global_id.clone(), ep.clone());
        }
        for ext in &info.extensions {
            state
                .extensions
                .entry(ext.ext_point_id.clone())
                .or_default()
                .push(crate::context::OwnedExtension {
                    owner: info.identifier.clone(),
                    extension: ext.clone(),
                });
        }

        let record = RegisteredPlugin::new(Arc::clone(&info));
        state.plugins.insert(info.identifier.clone(), record);

        drop(state);
        drop(guard);
        self.deliver_event(PluginEvent::new(
            info.identifier.clone(),
            PluginState::Uninstalled,
            PluginState::Installed,
        ));
        Ok(())
    }

    /// Returns a refcounted handle to a plug-in's descriptor. The returned
    /// `Arc` keeps the descriptor alive independently of the plug-in's
    /// lifecycle state, including past an `uninstall_plugin` call.
    pub fn get_plugin_info(&self, id: &str) -> Option<Arc<PluginInfo>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.plugins.get(id).map(|p| Arc::clone(&p.info))
    }

    pub fn get_plugin_state(&self, id: &str) -> Option<PluginState> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.plugins.get(id).map(|p| p.state)
    }

    pub fn list_plugins(&self) -> Vec<Arc<PluginInfo>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.plugins.values().map(|p| Arc::clone(&p.info)).collect()
    }

    pub fn get_ext_point(&self, global_id: &str) -> Option<crate::descriptor::ExtPoint> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.ext_points.get(global_id).cloned()
    }

    pub fn get_extensions(&self, ext_point_global_id: &str) -> Vec<Extension> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .extensions
            .get(ext_point_global_id)
            .map(|owned| owned.iter().map(|o| o.extension.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_plugin_installed(&self, id: &str) -> bool {
        let guard = self.state.lock();
        guard.borrow().plugins.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ExtPoint;
    use std::path::PathBuf;

    fn info(id: &str) -> PluginInfo {
        PluginInfo::new(id, PathBuf::from("/plugins").join(id))
    }

    #[test]
    fn install_rejects_duplicate_identifier_in_same_context() {
        let ctx = Context::create();
        ctx.install_plugin(info("core")).unwrap();
        let err = ctx.install_plugin(info("core")).unwrap_err();
        assert!(matches!(err, PluginError::Conflict(id) if id == "core"));
    }

    #[test]
    fn install_succeeds_independently_in_distinct_contexts() {
        let ctx_a = Context::create();
        let ctx_b = Context::create();
        ctx_a.install_plugin(info("core")).unwrap();
        ctx_b.install_plugin(info("core")).unwrap();
        assert!(ctx_a.is_plugin_installed("core"));
        assert!(ctx_b.is_plugin_installed("core"));
    }

    #[test]
    fn ext_point_conflict_rolls_back_partial_install() {
        let ctx = Context::create();
        let ep = ExtPoint::new("core", "hooks", "Hooks");
        ctx.install_plugin(info("core").with_ext_point(ep.clone())).unwrap();

        let conflicting = info("other").with_ext_point(ExtPoint::new("core", "hooks", "Hooks again"));
        let err = ctx.install_plugin(conflicting).unwrap_err();
        assert!(matches!(err, PluginError::ExtPointConflict(_)));
        assert!(!ctx.is_plugin_installed("other"));
    }

    #[test]
    fn anonymous_extensions_from_distinct_plugins_are_not_confused_on_uninstall() {
        use crate::descriptor::{CfgElement, Extension};

        let ctx = Context::create();
        let ep = ExtPoint::new("core", "hooks", "Hooks");
        ctx.install_plugin(info("core").with_ext_point(ep.clone()))
            .unwrap();

        // Both contributions are anonymous (no local_id), so they are
        // content-identical and indistinguishable by `global_id` alone.
        let anon = Extension::new(ep.global_id.clone(), CfgElement::new("hook"));
        ctx.install_plugin(info("ui").with_extension(anon.clone()))
            .unwrap();
        ctx.install_plugin(info("cli").with_extension(anon.clone()))
            .unwrap();

        assert_eq!(ctx.get_extensions(&ep.global_id).len(), 2);

        ctx.uninstall_plugin("ui").unwrap();

        // `ui`'s contribution is gone; `cli`'s identical-looking one survives.
        assert_eq!(ctx.get_extensions(&ep.global_id), vec![anon]);
    }

    #[test]
    fn plugin_info_outlives_uninstall_while_a_handle_is_held() {
        let ctx = Context::create();
        ctx.install_plugin(info("core")).unwrap();
        let handle = ctx.get_plugin_info("core").unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);
        drop(handle);
    }
}
