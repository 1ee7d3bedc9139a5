//! Native runtime loading.
//!
//! Resolves a plug-in's `lib_path` against its `plugin_path`, opens it
//! through the platform dynamic linker via [`libloading`], and extracts the
//! two entry points named in the descriptor. Mirrors the approach in the
//! `manager.rs` this crate grew from: `Library::new` plus `library.get`,
//! wrapped in typed errors instead of bare strings.
//!
//! A plug-in with no `lib_path` gets [`PluginRuntime::None`] and is still
//! resolvable and startable with no-op start/stop. A plug-in registered
//! in-process (no dylib at all, see [`PluginHooks`]) gets
//! [`PluginRuntime::Hook`], the path exercised by this crate's own test
//! suite and by hosts shipping built-in plug-ins compiled into the same
//! binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::context::Context;
use crate::error::{PluginError, Result};

/// Native ABI signature a loaded start entry point must have.
pub type NativeStartFn = unsafe extern "C" fn(ctx: *const Context, plugin_id: *const u8, plugin_id_len: usize) -> bool;

/// Native ABI signature a loaded stop entry point must have.
pub type NativeStopFn = unsafe extern "C" fn(ctx: *const Context, plugin_id: *const u8, plugin_id_len: usize);

/// In-process start hook: takes the context and the plugin's own
/// identifier, returns whether startup succeeded.
pub type HookStartFn = Arc<dyn Fn(&Context, &str) -> bool + Send + Sync>;
/// In-process stop hook.
pub type HookStopFn = Arc<dyn Fn(&Context, &str) + Send + Sync>;

/// A pair of in-process closures standing in for a native library's start
/// and stop entry points.
#[derive(Clone)]
pub struct PluginHooks {
    pub start: HookStartFn,
    pub stop: HookStopFn,
}

impl PluginHooks {
    pub fn new<S, T>(start: S, stop: T) -> Self
    where
        S: Fn(&Context, &str) -> bool + Send + Sync + 'static,
        T: Fn(&Context, &str) + Send + Sync + 'static,
    {
        PluginHooks {
            start: Arc::new(start),
            stop: Arc::new(stop),
        }
    }
}

/// The resolved, callable form of a plug-in's runtime code, or the absence
/// of one.
pub enum PluginRuntime {
    Native {
        library: Library,
        start: NativeStartFn,
        stop: NativeStopFn,
    },
    Hook(PluginHooks),
    None,
}

impl PluginRuntime {
    pub fn is_none(&self) -> bool {
        matches!(self, PluginRuntime::None)
    }

    /// Invokes the start entry point, if any, returning `true` when the
    /// plug-in has no runtime code at all (nothing to start).
    pub fn start(&self, ctx: &Context, plugin_id: &str) -> bool {
        match self {
            PluginRuntime::Native { start, .. } => unsafe {
                start(ctx as *const Context, plugin_id.as_ptr(), plugin_id.len())
            },
            PluginRuntime::Hook(hooks) => (hooks.start)(ctx, plugin_id),
            PluginRuntime::None => true,
        }
    }

    /// Invokes the stop entry point, if any.
    pub fn stop(&self, ctx: &Context, plugin_id: &str) {
        match self {
            PluginRuntime::Native { stop, .. } => unsafe {
                stop(ctx as *const Context, plugin_id.as_ptr(), plugin_id.len())
            },
            PluginRuntime::Hook(hooks) => (hooks.stop)(ctx, plugin_id),
            PluginRuntime::None => {}
        }
    }
}

/// Returns the platform's shared-library filename extension.
#[cfg(target_os = "windows")]
pub fn library_extension() -> &'static str {
    "dll"
}

#[cfg(target_os = "macos")]
pub fn library_extension() -> &'static str {
    "dylib"
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn library_extension() -> &'static str {
    "so"
}

/// Builds the file path for a plug-in's runtime library from its directory
/// and the relative library path named in its descriptor.
pub fn resolve_library_path(plugin_path: &Path, lib_path: &Path) -> PathBuf {
    let mut candidate = plugin_path.join(lib_path);
    if candidate.extension().is_none() {
        candidate.set_extension(library_extension());
    }
    candidate
}

/// Opens `lib_path` relative to `plugin_path` and resolves the named start
/// and stop symbols. Returns [`PluginRuntime::None`] when `lib_path` is
/// `None`, matching "no runtime library" plug-ins.
pub fn load(
    plugin_path: &Path,
    lib_path: Option<&Path>,
    start_func_name: Option<&str>,
    stop_func_name: Option<&str>,
) -> Result<PluginRuntime> {
    let Some(lib_path) = lib_path else {
        return Ok(PluginRuntime::None);
    };
    let full_path = resolve_library_path(plugin_path, lib_path);

    let library = unsafe { Library::new(&full_path) }.map_err(|source| PluginError::LibraryLoad {
        path: full_path.clone(),
        source,
    })?;

    let start = match start_func_name {
        Some(name) => {
            let symbol: Symbol<NativeStartFn> = unsafe { library.get(name.as_bytes()) }
                .map_err(|_| PluginError::MissingSymbol {
                    path: full_path.clone(),
                    symbol: name.to_string(),
                })?;
            *symbol
        }
        None => no_op_start,
    };
    let stop = match stop_func_name {
        Some(name) => {
            let symbol: Symbol<NativeStopFn> = unsafe { library.get(name.as_bytes()) }
                .map_err(|_| PluginError::MissingSymbol {
                    path: full_path.clone(),
                    symbol: name.to_string(),
                })?;
            *symbol
        }
        None => no_op_stop,
    };

    Ok(PluginRuntime::Native {
        library,
        start,
        stop,
    })
}

unsafe extern "C" fn no_op_start(_ctx: *const Context, _plugin_id: *const u8, _len: usize) -> bool {
    true
}

unsafe extern "C" fn no_op_stop(_ctx: *const Context, _plugin_id: *const u8, _len: usize) {}

impl Context {
    /// Attaches an in-process start/stop hook pair to an installed plug-in,
    /// bypassing the dynamic linker entirely. Must be called before the
    /// plug-in is first resolved; a later `Resolve` sees `lib_path = None`
    /// on the descriptor and would otherwise leave the plug-in with no
    /// runtime at all, so this slots `hooks` into the same field the native
    /// loader would have populated.
    pub fn set_plugin_hooks(&self, id: &str, hooks: PluginHooks) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(p) = state.plugins.get_mut(id) {
            p.runtime = PluginRuntime::Hook(hooks);
        }
    }
}
