//! The dependency and lifecycle engine: `Resolve`, `Start`, `Stop`,
//! `Unresolve`, and `Uninstall`, all transitive, plus `Context::destroy`.
//!
//! Grounded directly on `resolve_plugin`/`resolve_plugin_prel_rec`/
//! `resolve_plugin_commit_rec`/`resolve_plugin_failed_rec`,
//! `start_plugin_rec`, `stop_plugin`, `unresolve_plugin_rec`, and
//! `uninstall_plugin` in the source this crate's design distills from.
//!
//! Every traversal here walks `HashMap<String, RegisteredPlugin>` by
//! identifier rather than by pointer, and every step that calls into plug-in
//! code (`start_fn`/`stop_fn`) temporarily takes the runtime out of its
//! `RegisteredPlugin` with `mem::replace`, drops the registry borrow, invokes
//! it, and puts it back — the one borrow-checker-driven departure from the
//! C source's "hold the lock across the callback" shape, needed because
//! `parking_lot::ReentrantMutex` only makes the *mutex* reentrant, not the
//! `RefCell` behind it. [`Context::check_not_in_callback`] is what actually
//! rejects a callback re-entering a mutating operation; the take/call/put
//! dance only exists so that legitimate non-reentrant recursion (the engine
//! calling itself while resolving a dependency chain) doesn't panic on a
//! `RefCell` double-borrow.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{PluginError, Result};
use crate::loader::{self, PluginRuntime};
use crate::registry::RegisteredPlugin;
use crate::state::{PluginEvent, PluginState};

#[derive(PartialEq, Eq)]
enum ResolveOutcome {
    Full,
    Preliminary,
}

fn resolve_prelim(
    plugins: &mut HashMap<String, RegisteredPlugin>,
    touched: &mut Vec<String>,
    id: &str,
) -> Result<ResolveOutcome> {
    {
        let p = plugins
            .get(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        if !matches!(p.state, PluginState::Installed) {
            return Ok(ResolveOutcome::Full);
        }
        if p.processed {
            return Ok(ResolveOutcome::Preliminary);
        }
    }

    let info = {
        let p = plugins.get_mut(id).expect("checked above");
        p.processed = true;
        Arc::clone(&p.info)
    };
    touched.push(id.to_string());

    let mut wired = Vec::new();
    for imp in &info.imports {
        let satisfied = match plugins.get(&imp.plugin_id) {
            None => {
                if imp.optional {
                    continue;
                }
                return Err(PluginError::Dependency {
                    plugin: id.to_string(),
                    dependency: imp.plugin_id.clone(),
                });
            }
            Some(target) => imp
                .match_rule
                .satisfied_by(imp.version.as_ref(), target.info.version.as_ref()),
        };
        if !satisfied {
            if imp.optional {
                continue;
            }
            return Err(PluginError::VersionMismatch {
                plugin: id.to_string(),
                dependency: imp.plugin_id.clone(),
            });
        }
        wired.push(imp.plugin_id.clone());
    }

    for target_id in &wired {
        plugins.get_mut(id).expect("checked above").imported.push(target_id.clone());
        if let Some(target) = plugins.get_mut(target_id) {
            target.importing.insert(id.to_string());
        }
    }

    let mut saw_preliminary = false;
    for target_id in &wired {
        if resolve_prelim(plugins, touched, target_id)? == ResolveOutcome::Preliminary {
            saw_preliminary = true;
        }
    }

    // A plug-in may already carry an in-process `Hook` runtime attached via
    // `Context::set_plugin_hooks` before this call; the native loader only
    // ever has something to contribute when `lib_path` is set, so it must
    // not stomp a hook runtime with the `None` it would otherwise produce.
    let already_hooked = matches!(
        plugins.get(id).expect("checked above").runtime,
        PluginRuntime::Hook(_)
    );
    if !already_hooked {
        let runtime = loader::load(
            &info.plugin_path,
            info.lib_path.as_deref(),
            info.start_func_name.as_deref(),
            info.stop_func_name.as_deref(),
        )?;
        plugins.get_mut(id).expect("checked above").runtime = runtime;
    }

    Ok(if saw_preliminary {
        ResolveOutcome::Preliminary
    } else {
        ResolveOutcome::Full
    })
}

fn rollback_resolve(plugins: &mut HashMap<String, RegisteredPlugin>, touched: &[String]) {
    for id in touched {
        let imported = match plugins.get(id) {
            Some(p) => p.imported.clone(),
            None => continue,
        };
        for target_id in &imported {
            if let Some(target) = plugins.get_mut(target_id) {
                target.importing.remove(id);
            }
        }
        if let Some(p) = plugins.get_mut(id) {
            p.imported.clear();
            if !matches!(p.runtime, PluginRuntime::Hook(_)) {
                p.runtime = PluginRuntime::None;
            }
            p.processed = false;
        }
    }
}

fn commit_resolve(
    plugins: &mut HashMap<String, RegisteredPlugin>,
    touched: &[String],
    events: &mut Vec<PluginEvent>,
) {
    for id in touched.iter().rev() {
        if let Some(p) = plugins.get_mut(id) {
            p.processed = false;
            if matches!(p.state, PluginState::Installed) {
                p.state = PluginState::Resolved;
                events.push(PluginEvent::new(id.clone(), PluginState::Installed, PluginState::Resolved));
            }
        }
    }
}

impl Context {
    /// Resolves `id` and every plug-in it transitively, mandatorily
    /// imports. Leaves every touched plug-in `Resolved`, or leaves the
    /// context exactly as it was and returns an error.
    pub fn resolve(self: &Arc<Self>, id: &str) -> Result<()> {
        self.check_not_in_callback("resolve");
        let mut events = Vec::new();
        let result = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let mut touched = Vec::new();
            match resolve_prelim(&mut state.plugins, &mut touched, id) {
                Ok(_) => {
                    commit_resolve(&mut state.plugins, &touched, &mut events);
                    Ok(())
                }
                Err(err) => {
                    rollback_resolve(&mut state.plugins, &touched);
                    Err(err)
                }
            }
        };
        for event in events {
            self.deliver_event(event);
        }
        result
    }

    /// Transitively starts `id`: resolves it first, then starts every
    /// import before starting `id` itself, depth-first, skipping plug-ins
    /// already `Active` and breaking cycles via the `processed` flag.
    pub fn start(self: &Arc<Self>, id: &str) -> Result<()> {
        self.check_not_in_callback("start");
        self.resolve(id)?;

        let mut touched = Vec::new();
        let mut events = Vec::new();
        let result = self.start_node(id, &mut touched, &mut events);

        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            for tid in &touched {
                if let Some(p) = state.plugins.get_mut(tid) {
                    p.processed = false;
                }
            }
        }
        for event in events {
            self.deliver_event(event);
        }
        result
    }

    fn start_node(
        self: &Arc<Self>,
        id: &str,
        touched: &mut Vec<String>,
        events: &mut Vec<PluginEvent>,
    ) -> Result<()> {
        let imported = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let p = state
                .plugins
                .get_mut(id)
                .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
            if matches!(p.state, PluginState::Active) || p.processed {
                return Ok(());
            }
            p.processed = true;
            touched.push(id.to_string());
            p.imported.clone()
        };

        for dep in &imported {
            self.start_node(dep, touched, events)?;
        }

        self.start_single(id, events)
    }

    fn start_single(self: &Arc<Self>, id: &str, events: &mut Vec<PluginEvent>) -> Result<()> {
        let runtime = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let p = state.plugins.get_mut(id).expect("started node must exist");
            let old = p.state;
            p.state = PluginState::Starting;
            events.push(PluginEvent::new(id, old, PluginState::Starting));
            std::mem::replace(&mut p.runtime, PluginRuntime::None)
        };

        let started = {
            let _guard = crate::context::CounterGuard::enter(&self.start_invocations);
            self.run_callback(|| runtime.start(self, id))
        };

        if started {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let p = state.plugins.get_mut(id).expect("started node must exist");
            p.runtime = runtime;
            p.state = PluginState::Active;
            state.started.push(id.to_string());
            events.push(PluginEvent::new(id, PluginState::Starting, PluginState::Active));
            Ok(())
        } else {
            {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                let p = state.plugins.get_mut(id).expect("started node must exist");
                p.runtime = runtime;
                p.state = PluginState::Stopping;
                events.push(PluginEvent::new(id, PluginState::Starting, PluginState::Stopping));
            }
            {
                let _guard = crate::context::CounterGuard::enter(&self.stop_invocations);
                let runtime = {
                    let guard = self.state.lock();
                    let mut state = guard.borrow_mut();
                    let p = state.plugins.get_mut(id).expect("started node must exist");
                    std::mem::replace(&mut p.runtime, PluginRuntime::None)
                };
                self.run_callback(|| runtime.stop(self, id));
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                let p = state.plugins.get_mut(id).expect("started node must exist");
                p.runtime = runtime;
            }
            {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                let p = state.plugins.get_mut(id).expect("started node must exist");
                p.state = PluginState::Resolved;
                events.push(PluginEvent::new(id, PluginState::Stopping, PluginState::Resolved));
            }
            Err(PluginError::Runtime {
                plugin: id.to_string(),
                operation: "starting",
                reason: "start_fn returned false".to_string(),
            })
        }
    }

    /// Stops `id` if `Active`, first stopping every plug-in that imports it
    /// (dependents before dependencies, the reverse of `start`).
    pub fn stop(self: &Arc<Self>, id: &str) -> Result<()> {
        self.check_not_in_callback("stop");
        let mut touched = Vec::new();
        let mut events = Vec::new();
        let result = self.stop_node(id, &mut touched, &mut events);
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            for tid in &touched {
                if let Some(p) = state.plugins.get_mut(tid) {
                    p.processed = false;
                }
            }
        }
        for event in events {
            self.deliver_event(event);
        }
        result
    }

    fn stop_node(self: &Arc<Self>, id: &str, touched: &mut Vec<String>, events: &mut Vec<PluginEvent>) -> Result<()> {
        let importing = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let p = match state.plugins.get_mut(id) {
                Some(p) => p,
                None => return Ok(()),
            };
            if !matches!(p.state, PluginState::Active) || p.processed {
                return Ok(());
            }
            p.processed = true;
            touched.push(id.to_string());
            p.importing.iter().cloned().collect::<Vec<_>>()
        };

        for dependent in &importing {
            self.stop_node(dependent, touched, events)?;
        }

        self.stop_single(id, events)
    }

    fn stop_single(self: &Arc<Self>, id: &str, events: &mut Vec<PluginEvent>) -> Result<()> {
        let runtime = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let p = match state.plugins.get_mut(id) {
                Some(p) if matches!(p.state, PluginState::Active) => p,
                _ => return Ok(()),
            };
            let old = p.state;
            p.state = PluginState::Stopping;
            events.push(PluginEvent::new(id, old, PluginState::Stopping));
            std::mem::replace(&mut p.runtime, PluginRuntime::None)
        };

        {
            let _guard = crate::context::CounterGuard::enter(&self.stop_invocations);
            self.run_callback(|| runtime.stop(self, id));
        }

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.started.retain(|started_id| started_id != id);
        let p = state.plugins.get_mut(id).expect("stopped node must exist");
        p.runtime = runtime;
        p.state = PluginState::Resolved;
        events.push(PluginEvent::new(id, PluginState::Stopping, PluginState::Resolved));
        Ok(())
    }

    /// Stops every active plug-in, most-recently-started first.
    pub fn stop_all(self: &Arc<Self>) {
        loop {
            let top = {
                let guard = self.state.lock();
                guard.borrow().started.last().cloned()
            };
            match top {
                Some(id) => {
                    let _ = self.stop(&id);
                }
                None => break,
            }
        }
    }

    /// Unresolves `id`: stops it first, then recursively unresolves every
    /// plug-in that imports it, then tears down its own runtime and import
    /// wiring, leaving it `Installed`.
    pub fn unresolve(self: &Arc<Self>, id: &str) -> Result<()> {
        self.check_not_in_callback("unresolve");
        self.stop(id)?;
        let mut touched = Vec::new();
        let mut events = Vec::new();
        self.unresolve_node(id, &mut touched, &mut events)?;
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            for tid in &touched {
                if let Some(p) = state.plugins.get_mut(tid) {
                    p.processed = false;
                }
            }
        }
        for event in events {
            self.deliver_event(event);
        }
        Ok(())
    }

    fn unresolve_node(self: &Arc<Self>, id: &str, touched: &mut Vec<String>, events: &mut Vec<PluginEvent>) -> Result<()> {
        let importing = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let p = match state.plugins.get_mut(id) {
                Some(p) => p,
                None => return Ok(()),
            };
            if !matches!(p.state, PluginState::Resolved) || p.processed {
                return Ok(());
            }
            p.processed = true;
            touched.push(id.to_string());
            p.importing.iter().cloned().collect::<Vec<_>>()
        };

        for dependent in &importing {
            self.stop(dependent)?;
            self.unresolve_node(dependent, touched, events)?;
        }

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let imported = state
            .plugins
            .get(id)
            .map(|p| p.imported.clone())
            .unwrap_or_default();
        for target_id in &imported {
            if let Some(target) = state.plugins.get_mut(target_id) {
                target.importing.remove(id);
            }
        }
        if let Some(p) = state.plugins.get_mut(id) {
            p.imported.clear();
            p.runtime = PluginRuntime::None;
            p.state = PluginState::Installed;
            events.push(PluginEvent::new(id, PluginState::Resolved, PluginState::Installed));
        }
        Ok(())
    }

    /// Removes `id` entirely: unresolves it, then tears down its ext-point
    /// and extension registrations and frees its `RegisteredPlugin`. The
    /// `PluginInfo` itself survives as long as any external `Arc` clone of
    /// it is still held (see [`crate::registry`]).
    pub fn uninstall_plugin(self: &Arc<Self>, id: &str) -> Result<()> {
        self.check_not_in_callback("uninstall_plugin");
        if !self.is_plugin_installed(id) {
            return Err(PluginError::UnknownPlugin(id.to_string()));
        }
        self.unresolve(id)?;

        let event = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let info = match state.plugins.get(id) {
                Some(p) => Arc::clone(&p.info),
                None => return Ok(()),
            };
            for ep in &info.ext_points {
                state.ext_points.remove(&ep.global_id);
            }
            for ext in &info.extensions {
                if let Some(bucket) = state.extensions.get_mut(&ext.ext_point_id) {
                    bucket.retain(|owned| owned.owner != id);
                }
            }
            state.plugins.remove(id);
            PluginEvent::new(id, PluginState::Installed, PluginState::Uninstalled)
        };
        self.deliver_event(event);
        Ok(())
    }

    /// Uninstalls every installed plug-in.
    pub fn uninstall_all(self: &Arc<Self>) {
        loop {
            let next = {
                let guard = self.state.lock();
                guard.borrow().plugins.keys().next().cloned()
            };
            match next {
                Some(id) => {
                    let _ = self.uninstall_plugin(&id);
                }
                None => break,
            }
        }
    }

    /// Tears the context down: stops, unresolves, and uninstalls every
    /// plug-in. Safe to call from [`crate::framework::destroy`] as well as
    /// directly by the host.
    pub fn destroy(self: &Arc<Self>) {
        self.stop_all();
        self.uninstall_all();
    }
}

/// Compares two optional versions the way a scanner upgrade decision would:
/// `None` never outranks a present version.
pub(crate) fn version_order(a: Option<&crate::version::Version>, b: Option<&crate::version::Version>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp_components(b, 4),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PluginImport;
    use crate::descriptor::PluginInfo;
    use crate::loader::PluginHooks;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn info(id: &str) -> PluginInfo {
        PluginInfo::new(id, PathBuf::from("/plugins").join(id))
    }

    #[test]
    fn start_resolves_and_activates_a_dependency_chain() {
        let ctx = Context::create();
        ctx.install_plugin(info("core")).unwrap();
        ctx.install_plugin(info("ui").with_import(crate::descriptor::PluginImport::mandatory("core")))
            .unwrap();

        ctx.start("ui").unwrap();

        assert_eq!(ctx.get_plugin_state("core"), Some(PluginState::Active));
        assert_eq!(ctx.get_plugin_state("ui"), Some(PluginState::Active));
    }

    #[test]
    fn start_fails_with_dependency_error_when_mandatory_import_missing() {
        let ctx = Context::create();
        ctx.install_plugin(info("ui").with_import(PluginImport::mandatory("core")))
            .unwrap();

        let err = ctx.start("ui").unwrap_err();
        assert!(matches!(err, PluginError::Dependency { .. }));
        assert_eq!(ctx.get_plugin_state("ui"), Some(PluginState::Installed));
    }

    #[test]
    fn optional_missing_import_never_blocks_resolution() {
        let ctx = Context::create();
        ctx.install_plugin(info("ui").with_import(PluginImport::optional("core")))
            .unwrap();
        ctx.start("ui").unwrap();
        assert_eq!(ctx.get_plugin_state("ui"), Some(PluginState::Active));
    }

    #[test]
    fn cyclic_dependency_resolves_and_starts_both() {
        let ctx = Context::create();
        ctx.install_plugin(info("a").with_import(PluginImport::mandatory("b")))
            .unwrap();
        ctx.install_plugin(info("b").with_import(PluginImport::mandatory("a")))
            .unwrap();

        ctx.start("a").unwrap();

        assert_eq!(ctx.get_plugin_state("a"), Some(PluginState::Active));
        assert_eq!(ctx.get_plugin_state("b"), Some(PluginState::Active));

        ctx.stop("a").unwrap();
        assert_eq!(ctx.get_plugin_state("a"), Some(PluginState::Resolved));
        assert_eq!(ctx.get_plugin_state("b"), Some(PluginState::Resolved));
    }

    #[test]
    fn stop_order_reverses_start_order() {
        let ctx = Context::create();
        ctx.install_plugin(info("core")).unwrap();
        ctx.install_plugin(info("ui").with_import(PluginImport::mandatory("core")))
            .unwrap();
        ctx.start("ui").unwrap();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_a = Arc::clone(&order);
        let order_b = Arc::clone(&order);

        // Replace with hook-backed plugins to observe stop order directly.
        let ctx2 = Context::create();
        ctx2.install_plugin(info("core")).unwrap();
        ctx2.set_plugin_hooks(
            "core",
            PluginHooks::new(
                move |_ctx, _id| true,
                move |_ctx, id| order_a.lock().unwrap().push(id.to_string()),
            ),
        );
        ctx2.install_plugin(info("ui").with_import(PluginImport::mandatory("core")))
            .unwrap();
        ctx2.set_plugin_hooks(
            "ui",
            PluginHooks::new(
                move |_ctx, _id| true,
                move |_ctx, id| order_b.lock().unwrap().push(id.to_string()),
            ),
        );
        ctx2.start("ui").unwrap();
        ctx2.stop_all();

        assert_eq!(order.lock().unwrap().as_slice(), ["ui", "core"]);
    }

    #[test]
    fn failing_start_fn_rolls_back_to_resolved_and_reports_runtime_error() {
        let ctx = Context::create();
        ctx.install_plugin(info("flaky")).unwrap();
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_clone = Arc::clone(&stopped);
        ctx.set_plugin_hooks(
            "flaky",
            PluginHooks::new(
                |_ctx, _id| false,
                move |_ctx, _id| stopped_clone.store(true, AtomicOrdering::SeqCst),
            ),
        );

        let err = ctx.start("flaky").unwrap_err();
        assert!(matches!(err, PluginError::Runtime { .. }));
        assert_eq!(ctx.get_plugin_state("flaky"), Some(PluginState::Resolved));
        assert!(stopped.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn uninstall_forces_dependents_to_unresolve_first() {
        let ctx = Context::create();
        ctx.install_plugin(info("core")).unwrap();
        ctx.install_plugin(info("ui").with_import(PluginImport::mandatory("core")))
            .unwrap();
        ctx.start("ui").unwrap();

        ctx.uninstall_plugin("core").unwrap();

        assert!(!ctx.is_plugin_installed("core"));
        assert_eq!(ctx.get_plugin_state("ui"), Some(PluginState::Installed));
    }
}
