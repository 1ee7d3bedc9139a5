//! # pluginhost
//!
//! An embeddable plug-in lifecycle and dependency resolution engine.
//!
//! A host application creates one or more independent [`Context`]s, installs
//! [`descriptor::PluginInfo`] values describing plug-ins (built by a
//! descriptor parser this crate does not implement), and then drives them
//! through their lifecycle with [`Context::start`], [`Context::stop`],
//! [`Context::unresolve`], and [`Context::uninstall_plugin`]. The engine
//! resolves inter-plug-in dependencies transitively, tolerates dependency
//! cycles, loads each plug-in's native runtime library through [`loader`],
//! and delivers one event per state transition to every listener registered
//! on the context.
//!
//! ## Example
//!
//! ```
//! use pluginhost::{Context, PluginImport, PluginInfo, PluginState};
//! use std::path::PathBuf;
//!
//! let ctx = Context::create();
//! ctx.install_plugin(PluginInfo::new("core", PathBuf::from("/plugins/core"))).unwrap();
//! ctx.install_plugin(
//!     PluginInfo::new("ui", PathBuf::from("/plugins/ui"))
//!         .with_import(PluginImport::mandatory("core")),
//! ).unwrap();
//!
//! ctx.start("ui").unwrap();
//! assert_eq!(ctx.get_plugin_state("core"), Some(PluginState::Active));
//! assert_eq!(ctx.get_plugin_state("ui"), Some(PluginState::Active));
//! ```
//!
//! ## Module map
//!
//! - [`framework`]: process-wide init/destroy refcounting, the fatal-error
//!   hook, and implementation metadata.
//! - [`logger`]: the host-pluggable logger registry, independent of whatever
//!   `tracing` subscriber the host already runs.
//! - [`context`]: the isolation unit — one registry, lock, and listener set
//!   per `Context`.
//! - [`descriptor`]: the immutable value types (`PluginInfo`, `PluginImport`,
//!   `ExtPoint`, `Extension`, `CfgElement`) a descriptor loader produces and
//!   `InstallPlugin` consumes.
//! - [`registry`]: `RegisteredPlugin` storage, `InstallPlugin`, and the
//!   lookup half of the external interface.
//! - [`engine`]: `Resolve`/`Start`/`Stop`/`Unresolve`/`Uninstall`, all
//!   transitive, plus `Context::destroy`.
//! - [`loader`]: native dynamic-library loading, and the in-process hook
//!   runtime used by built-in plug-ins and this crate's own tests.
//! - [`version`]: dotted numeric versions and the import match predicates.
//! - [`state`]: the `PluginState` enum and the event/error-handler traits.
//! - [`scanner`]: the `ScanFlags` bitmask and the orchestration applied once
//!   an external `PluginSource` hands the core a batch of descriptors.
//! - [`error`]: the `PluginError`/`ErrorCode` taxonomy.

pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod framework;
pub mod loader;
pub mod logger;
pub mod registry;
pub mod scanner;
pub mod state;
pub mod version;

pub use context::Context;
pub use descriptor::{CfgElement, ExtPoint, Extension, PluginImport, PluginInfo};
pub use error::{ErrorCode, PluginError, Result};
pub use loader::{PluginHooks, PluginRuntime};
pub use logger::{LogSeverity, Logger, LoggerHandle};
pub use registry::RegisteredPlugin;
pub use scanner::{scan_plugins, PluginSource, ScanFlags, StaticSource};
pub use state::{ErrorHandler, EventListener, PluginEvent, PluginState};
pub use version::{MatchRule, Version};

/// This crate's own release version, reported by
/// [`framework::get_implementation_info`].
pub const PLUGINHOST_VERSION: &str = env!("CARGO_PKG_VERSION");
