//! The framework singleton: process-wide init/destroy refcounting, the
//! fatal-error hook, implementation metadata, and the registry of live
//! contexts so `destroy()` can tear down anything the host forgot to.
//!
//! Mirrors `cp_init`/`cp_destroy`/`cp_set_fatal_error_handler` from the
//! source this crate's design is grounded on: one process-wide mutex
//! (`parking_lot::Mutex` here, `cpi_lock_framework`/`cpi_unlock_framework`
//! there), an init refcount, and a fatal handler invoked before aborting.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::context::Context;

/// Reports the crate's own ABI-relevant identity. The `api_*` triple follows
/// the libtool current/revision/age convention: bump `revision` for
/// backwards-compatible internal changes, `current`+reset `age` for a
/// breaking change, `age` for a backwards-compatible addition to the public
/// surface.
#[derive(Debug, Clone, Copy)]
pub struct ImplementationInfo {
    pub release_version: &'static str,
    pub api_current: u32,
    pub api_revision: u32,
    pub api_age: u32,
    pub host: &'static str,
    pub thread_model: &'static str,
}

pub const IMPLEMENTATION_INFO: ImplementationInfo = ImplementationInfo {
    release_version: env!("CARGO_PKG_VERSION"),
    api_current: 1,
    api_revision: 0,
    api_age: 0,
    thread_model: "native-threads",
    host: concat_host(),
};

const fn concat_host() -> &'static str {
    // `std::env::consts::ARCH`/`OS` are `const`-friendly &str but `const fn`
    // string concatenation needs a literal; this crate targets a narrow set
    // of hosts so the pair is spelled out rather than computed at const time.
    match (cfg!(target_os = "linux"), cfg!(target_os = "macos"), cfg!(target_os = "windows")) {
        (true, _, _) => "unknown-linux-gnu",
        (_, true, _) => "apple-darwin",
        (_, _, true) => "pc-windows-msvc",
        _ => "unknown",
    }
}

type FatalHandler = Box<dyn Fn(&str) + Send + Sync>;

struct FrameworkState {
    init_count: u32,
    fatal_handler: Option<FatalHandler>,
    contexts: Vec<Weak<Context>>,
}

impl FrameworkState {
    fn new() -> Self {
        FrameworkState {
            init_count: 0,
            fatal_handler: None,
            contexts: Vec::new(),
        }
    }
}

fn framework_state() -> &'static Mutex<FrameworkState> {
    static STATE: OnceLock<Mutex<FrameworkState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(FrameworkState::new()))
}

/// Increments the framework's init refcount. The first call performs no
/// allocation of its own beyond the lazily-initialized global state (the
/// logger registry in [`crate::logger`] initializes independently, matching
/// the source's separate `loggers` list).
pub fn init() {
    let mut state = framework_state().lock();
    state.init_count += 1;
}

/// Decrements the framework's init refcount. On the last matching call,
/// destroys every context the host has not already destroyed and clears the
/// fatal handler. Calling `destroy()` more times than `init()` is a fatal
/// invariant violation.
pub fn destroy() {
    let mut state = framework_state().lock();
    if state.init_count == 0 {
        drop(state);
        fatal("destroy() called without a matching init()");
        return;
    }
    state.init_count -= 1;
    if state.init_count == 0 {
        let contexts: Vec<Arc<Context>> = state.contexts.iter().filter_map(Weak::upgrade).collect();
        state.contexts.clear();
        state.fatal_handler = None;
        drop(state);
        for ctx in contexts {
            ctx.destroy();
        }
    }
}

/// Registers a context so `destroy()` can tear it down if the host exits
/// without calling `Context::destroy` explicitly.
pub(crate) fn register_context(ctx: &Arc<Context>) {
    framework_state().lock().contexts.push(Arc::downgrade(ctx));
}

pub fn get_implementation_info() -> ImplementationInfo {
    IMPLEMENTATION_INFO
}

/// Installs a handler invoked before the process aborts on an invariant
/// violation. Passing `None` restores the default (log to `tracing::error!`
/// and to stderr).
pub fn set_fatal_error_handler<F>(handler: Option<F>)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    framework_state().lock().fatal_handler = handler.map(|h| Box::new(h) as FatalHandler);
}

/// Formats and reports a fatal invariant violation, then aborts the
/// process. There is no recovery path, matching `cpi_fatalf`: a violated
/// invariant means the registries are no longer trustworthy.
pub fn fatal(message: &str) -> ! {
    tracing::error!("FATAL ERROR: {message}");
    {
        let state = framework_state().lock();
        match state.fatal_handler.as_ref() {
            Some(handler) => handler(message),
            None => eprintln!("pluginhost: FATAL ERROR: {message}"),
        }
    }
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_destroy_is_refcounted() {
        init();
        init();
        destroy();
        destroy();
        // A third destroy would be fatal (aborts the process), not exercised
        // here since that path is a process-level abort by design.
    }

    #[test]
    fn implementation_info_reports_crate_version() {
        let info = get_implementation_info();
        assert_eq!(info.release_version, env!("CARGO_PKG_VERSION"));
    }
}
