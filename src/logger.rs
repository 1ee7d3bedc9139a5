//! The logger registry: host-pluggable diagnostic sinks with per-logger
//! minimum severity and an optional context filter, plus a cached global
//! floor for O(1) early rejection. Grounded directly on `cp_add_logger`/
//! `cp_remove_logger`/`cpi_log`/`update_logging_limits` in the source this
//! crate's design distills from.
//!
//! This sits alongside, not instead of, ordinary `tracing` instrumentation:
//! [`crate::context::Context`] emits `tracing` events at every lifecycle
//! transition regardless of whether any logger is registered here, so a host
//! that already runs a `tracing_subscriber` pipeline needs nothing extra.
//! The registry below exists for hosts that want programmatic control over
//! a lifecycle-message sink independent of that pipeline.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::context::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogSeverity {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

const NO_LOGGING: u8 = 4;

pub trait Logger: Send + Sync {
    fn log(&self, severity: LogSeverity, message: &str, ctx: Option<&Context>);
}

impl<F> Logger for F
where
    F: Fn(LogSeverity, &str, Option<&Context>) + Send + Sync,
{
    fn log(&self, severity: LogSeverity, message: &str, ctx: Option<&Context>) {
        (self)(severity, message, ctx)
    }
}

struct LoggerEntry {
    logger: Arc<dyn Logger>,
    min_severity: LogSeverity,
    /// `None` means "all contexts"; `Some(ptr)` restricts delivery to one
    /// context, compared by address like the source's `ctx_rule`.
    context_filter: Option<*const Context>,
}

// Safety: `context_filter` is only ever compared by address, never
// dereferenced, so sending the raw pointer across threads is sound.
unsafe impl Send for LoggerEntry {}
unsafe impl Sync for LoggerEntry {}

struct Registry {
    loggers: DashMap<usize, LoggerEntry>,
    next_id: std::sync::atomic::AtomicUsize,
    floor: AtomicU8,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        loggers: DashMap::new(),
        next_id: std::sync::atomic::AtomicUsize::new(0),
        floor: AtomicU8::new(NO_LOGGING),
    })
}

/// An opaque handle identifying a previously-added logger, used to remove or
/// update it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerHandle(usize);

/// Registers `logger` with a minimum severity and an optional context
/// filter. If `logger` is the same `Arc` (by pointer identity) as one
/// already registered, that registration's severity and context filter are
/// updated in place and its existing handle is returned, rather than adding
/// a second delivery target for the same sink. A caller that wants an
/// update rather than a duplicate must pass the identical `Arc` clone it
/// originally registered; a logger built fresh at the call site (for
/// example a new closure) is always a new registration, since it has no
/// address in common with anything already stored.
pub fn add_logger(
    logger: Arc<dyn Logger>,
    min_severity: LogSeverity,
    context_filter: Option<&Context>,
) -> LoggerHandle {
    let reg = registry();
    let context_filter = context_filter.map(|c| c as *const Context);

    for mut entry in reg.loggers.iter_mut() {
        if Arc::ptr_eq(&entry.logger, &logger) {
            entry.min_severity = min_severity;
            entry.context_filter = context_filter;
            let handle = LoggerHandle(*entry.key());
            drop(entry);
            update_floor(reg);
            return handle;
        }
    }

    let id = reg.next_id.fetch_add(1, Ordering::SeqCst);
    reg.loggers.insert(
        id,
        LoggerEntry {
            logger,
            min_severity,
            context_filter,
        },
    );
    update_floor(reg);
    LoggerHandle(id)
}

/// Removes a previously registered logger. Idempotent: removing an unknown
/// or already-removed handle is a no-op.
pub fn remove_logger(handle: LoggerHandle) {
    let reg = registry();
    reg.loggers.remove(&handle.0);
    update_floor(reg);
}

fn update_floor(reg: &Registry) {
    let floor = reg
        .loggers
        .iter()
        .map(|entry| entry.value().min_severity as u8)
        .min()
        .unwrap_or(NO_LOGGING);
    reg.floor.store(floor, Ordering::SeqCst);
}

/// Cheap early-out: true when at least one registered logger could accept a
/// message at this severity.
pub fn is_logged(severity: LogSeverity) -> bool {
    severity as u8 >= registry().floor.load(Ordering::SeqCst)
}

/// Dispatches `message` to every logger whose filter accepts it. Does
/// nothing if [`is_logged`] would return false, avoiding the registry walk
/// entirely on the common case of no interested logger.
pub fn log(ctx: Option<&Context>, severity: LogSeverity, message: &str) {
    if !is_logged(severity) {
        return;
    }
    let reg = registry();
    for entry in reg.loggers.iter() {
        let entry = entry.value();
        if severity < entry.min_severity {
            continue;
        }
        let matches_context = match entry.context_filter {
            None => true,
            Some(filter) => ctx.map(|c| c as *const Context == filter).unwrap_or(false),
        };
        if matches_context {
            entry.logger.log(severity, message, ctx);
        }
    }
}
