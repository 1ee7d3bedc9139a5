//! The isolation unit: a `Context` owns its own plug-in, extension-point and
//! extension registries, its own reentrant lock, its own listener and error
//! handler sets, and its own plug-in directory list.
//!
//! Mutation of a context's registries always goes through the per-context
//! reentrant lock in [`Context`]. `check_not_in_callback` is the re-entrancy
//! guard described in the concurrency model: a start/stop callback that
//! tries to call back into install/start/stop/uninstall on the same context
//! trips the fatal path instead of deadlocking or corrupting state, since the
//! lock itself is reentrant and would otherwise happily let it through.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

use crate::descriptor::{ExtPoint, Extension};
use crate::framework::fatal;
use crate::registry::RegisteredPlugin;
use crate::state::{ErrorHandler, EventListener, PluginEvent};

/// An extension tagged with the identifier of the plug-in that contributed
/// it. `Extension` alone is not always enough to find-and-remove a single
/// plug-in's contributions on uninstall: an extension with no `local_id`
/// has `global_id = None`, and two distinct plug-ins can contribute
/// content-identical anonymous extensions to the same extension point.
pub(crate) struct OwnedExtension {
    pub owner: String,
    pub extension: Extension,
}

/// Everything mutable about a context, guarded by the reentrant lock in
/// [`Context`].
pub(crate) struct ContextState {
    pub plugins: HashMap<String, RegisteredPlugin>,
    pub ext_points: HashMap<String, ExtPoint>,
    pub extensions: HashMap<String, Vec<OwnedExtension>>,
    pub started: Vec<String>,
    pub plugin_dirs: Vec<PathBuf>,
}

/// Resolves `path` to its canonical form so two spellings of the same
/// directory (a relative path and its absolute form, a path through a
/// symlink and its target, a trailing slash) register as one entry.
/// Directories that don't exist yet at registration time can't be
/// canonicalized; such a path is kept as given; a later `add_plugin_dir`
/// call with that same directory, once it exists, then canonicalizes
/// successfully and is not guaranteed to match the verbatim entry already
/// stored.
fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl ContextState {
    fn new() -> Self {
        ContextState {
            plugins: HashMap::new(),
            ext_points: HashMap::new(),
            extensions: HashMap::new(),
            started: Vec::new(),
            plugin_dirs: Vec::new(),
        }
    }
}

/// An isolated plug-in universe.
///
/// `state` is guarded by a `parking_lot::ReentrantMutex` because the engine
/// legitimately re-enters a context's own methods while already holding the
/// lock (for example `Stop` walking `importing` back-edges calls itself
/// recursively); what must never happen is a *host callback* re-entering a
/// mutating public operation, which [`Context::check_not_in_callback`]
/// detects.
pub struct Context {
    pub(crate) state: ReentrantMutex<std::cell::RefCell<ContextState>>,
    listeners: DashMap<usize, Arc<dyn EventListener>>,
    error_handlers: DashMap<usize, Arc<dyn ErrorHandler>>,
    next_listener_id: AtomicU32,
    /// Incremented while inside a start_fn/stop_fn/listener/error-handler
    /// invocation so a mutating operation can detect it was invoked from
    /// within a host callback on this same context.
    callback_depth: AtomicU32,
    /// Count of start_fn invocations currently in flight, for diagnostics
    /// and for the `metrics` feature.
    pub(crate) start_invocations: AtomicU32,
    /// Count of stop_fn invocations currently in flight.
    pub(crate) stop_invocations: AtomicU32,
}

impl Context {
    fn new() -> Arc<Context> {
        Arc::new(Context {
            state: ReentrantMutex::new(std::cell::RefCell::new(ContextState::new())),
            listeners: DashMap::new(),
            error_handlers: DashMap::new(),
            next_listener_id: AtomicU32::new(0),
            callback_depth: AtomicU32::new(0),
            start_invocations: AtomicU32::new(0),
            stop_invocations: AtomicU32::new(0),
        })
    }

    /// Creates a new, empty context and registers it with the framework
    /// singleton so `framework::destroy()` can tear it down if the host
    /// never calls [`Context::destroy`] itself.
    pub fn create() -> Arc<Context> {
        let ctx = Context::new();
        crate::framework::register_context(&ctx);
        ctx
    }

    pub fn with_error_handler<H>(handler: H) -> Arc<Context>
    where
        H: ErrorHandler + 'static,
    {
        let ctx = Context::create();
        ctx.add_error_handler(handler);
        ctx
    }

    // -- plug-in directory registry -------------------------------------

    pub fn add_plugin_dir(&self, path: impl AsRef<Path>) {
        let path = canonical_or_self(path.as_ref());
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if !state.plugin_dirs.contains(&path) {
            state.plugin_dirs.push(path);
        }
    }

    pub fn remove_plugin_dir(&self, path: impl AsRef<Path>) {
        let path = canonical_or_self(path.as_ref());
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.plugin_dirs.retain(|p| p != &path);
    }

    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        let guard = self.state.lock();
        guard.borrow().plugin_dirs.clone()
    }

    // -- event listeners --------------------------------------------------

    pub fn add_event_listener<L>(&self, listener: L) -> usize
    where
        L: EventListener + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::SeqCst) as usize;
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    pub fn remove_event_listener(&self, id: usize) {
        self.listeners.remove(&id);
    }

    pub fn add_error_handler<H>(&self, handler: H) -> usize
    where
        H: ErrorHandler + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::SeqCst) as usize;
        self.error_handlers.insert(id, Arc::new(handler));
        id
    }

    pub fn remove_error_handler(&self, id: usize) {
        self.error_handlers.remove(&id);
    }

    /// Delivers an event to every registered listener, synchronously, under
    /// the reentrancy guard.
    pub(crate) fn deliver_event(&self, event: PluginEvent) {
        tracing::debug!(
            plugin = %event.plugin_id,
            from = %event.old_state,
            to = %event.new_state,
            "plugin state transition"
        );
        self.run_callback(|| {
            for listener in self.listeners.iter() {
                listener.value().on_event(&event);
            }
        });
    }

    pub(crate) fn report_error(&self, plugin_id: Option<&str>, message: &str) {
        tracing::warn!(plugin = plugin_id.unwrap_or("<none>"), "{message}");
        self.run_callback(|| {
            for handler in self.error_handlers.iter() {
                handler.value().on_error(plugin_id, message);
            }
        });
    }

    // -- re-entrancy guard -------------------------------------------------

    /// Runs `f` as a host callback, tracking entry/exit so a mutating
    /// operation invoked from within it can be detected. The depth counter
    /// is restored via a drop guard so a panic inside `f` that a host
    /// catches with `catch_unwind` (or that unwinds past this frame on
    /// another thread) doesn't leave the context permanently believing
    /// it's still inside a callback.
    pub(crate) fn run_callback<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = CounterGuard::enter(&self.callback_depth);
        f()
    }

    /// Must be called at the top of every mutating public operation
    /// (`install_plugin`, `start`, `stop`, `uninstall_plugin`, ...). Aborts
    /// the process via the fatal-error path if called while a host callback
    /// registered on this same context is on the stack.
    pub(crate) fn check_not_in_callback(&self, operation: &str) {
        if self.callback_depth.load(AtomicOrdering::SeqCst) > 0 {
            fatal(&format!(
                "re-entrant call to '{operation}' from within a context callback"
            ));
        }
    }

    /// Number of `start_fn` invocations currently in flight on this context.
    pub fn start_invocations(&self) -> u32 {
        self.start_invocations.load(AtomicOrdering::SeqCst)
    }

    /// Number of `stop_fn` invocations currently in flight on this context.
    pub fn stop_invocations(&self) -> u32 {
        self.stop_invocations.load(AtomicOrdering::SeqCst)
    }
}

/// Increments an atomic counter on construction and decrements it on drop,
/// unwind included. Used for `callback_depth` and the start/stop invocation
/// counters, all of which must never get stuck above zero just because the
/// callback they're bracketing panicked.
pub(crate) struct CounterGuard<'a> {
    counter: &'a AtomicU32,
}

impl<'a> CounterGuard<'a> {
    pub(crate) fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, AtomicOrdering::SeqCst);
        CounterGuard { counter }
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("ptr", &(self as *const _))
            .finish()
    }
}
