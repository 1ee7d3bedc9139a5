//! The scanner seam: the bitmask of flags a directory scanner honors, and
//! the orchestration this crate performs once an external [`PluginSource`]
//! hands it a batch of descriptors. Walking a directory tree and parsing a
//! manifest format are both explicitly out of scope for this crate; only
//! the decision logic that reacts to what the source reports lives here.

use std::sync::Arc;

use crate::context::Context;
use crate::descriptor::PluginInfo;
use crate::error::Result;
use crate::state::PluginState;

bitflags::bitflags! {
    /// Flags controlling how [`scan_plugins`] reacts to descriptors handed
    /// to it by an external [`PluginSource`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScanFlags: u8 {
        /// Replace an already-installed plug-in with a higher-versioned one
        /// found by the source.
        const UPGRADE = 0b0001;
        /// Stop every active plug-in before applying an upgrade.
        const STOP_ALL_ON_UPGRADE = 0b0010;
        /// Stop every active plug-in before installing any newly found
        /// plug-in (upgrade or not).
        const STOP_ALL_ON_INSTALL = 0b0100;
        /// Restart plug-ins that were active before the scan once it
        /// completes.
        const RESTART_ACTIVE = 0b1000;
    }
}

/// The seam between this crate and an external directory walker / manifest
/// parser. Implementations enumerate candidate plug-in descriptors; they do
/// not decide whether to install, upgrade, or skip them — that decision is
/// [`scan_plugins`]'s job, driven by [`ScanFlags`].
pub trait PluginSource {
    /// Returns every plug-in descriptor discoverable right now. Errors
    /// (I/O, malformed manifests) are reported as-is; `scan_plugins` does
    /// not retry.
    fn discover(&self) -> Result<Vec<PluginInfo>>;
}

/// A `PluginSource` made of a fixed, pre-parsed list of descriptors. Useful
/// for hosts that already have their own manifest pipeline and just want
/// the upgrade/restart orchestration below.
pub struct StaticSource(pub Vec<PluginInfo>);

impl PluginSource for StaticSource {
    fn discover(&self) -> Result<Vec<PluginInfo>> {
        Ok(self.0.clone())
    }
}

/// Applies `flags` to every descriptor `source` reports: installs anything
/// not yet known, and when [`ScanFlags::UPGRADE`] is set, replaces an
/// already-installed plug-in with a higher-versioned descriptor for the
/// same identifier.
pub fn scan_plugins(ctx: &Arc<Context>, source: &dyn PluginSource, flags: ScanFlags) -> Result<()> {
    let descriptors = source.discover()?;

    let mut upgrades = Vec::new();
    let mut fresh = Vec::new();
    for info in descriptors {
        match ctx.get_plugin_info(&info.identifier) {
            Some(existing) if flags.contains(ScanFlags::UPGRADE) => {
                if crate::engine::version_order(info.version.as_ref(), existing.version.as_ref())
                    == std::cmp::Ordering::Greater
                {
                    upgrades.push(info);
                }
            }
            Some(_) => {}
            None => fresh.push(info),
        }
    }

    if upgrades.is_empty() && fresh.is_empty() {
        return Ok(());
    }

    let previously_active: Vec<String> = ctx
        .list_plugins()
        .into_iter()
        .filter(|p| ctx.get_plugin_state(&p.identifier) == Some(PluginState::Active))
        .map(|p| p.identifier.clone())
        .collect();

    let should_stop_all =
        (!upgrades.is_empty() && flags.contains(ScanFlags::STOP_ALL_ON_UPGRADE))
            || (!fresh.is_empty() && flags.contains(ScanFlags::STOP_ALL_ON_INSTALL));
    if should_stop_all {
        ctx.stop_all();
    }

    for info in upgrades {
        let id = info.identifier.clone();
        ctx.uninstall_plugin(&id)?;
        ctx.install_plugin(info)?;
    }
    for info in fresh {
        ctx.install_plugin(info)?;
    }

    if flags.contains(ScanFlags::RESTART_ACTIVE) {
        for id in previously_active {
            if ctx.is_plugin_installed(&id) {
                ctx.start(&id)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use std::path::PathBuf;

    fn info(id: &str, version: [u32; 4]) -> PluginInfo {
        PluginInfo::new(id, PathBuf::from("/plugins").join(id)).with_version(Version::new(version))
    }

    #[test]
    fn scan_installs_unknown_descriptors() {
        let ctx = Context::create();
        let source = StaticSource(vec![info("core", [1, 0, 0, 0])]);
        scan_plugins(&ctx, &source, ScanFlags::empty()).unwrap();
        assert!(ctx.is_plugin_installed("core"));
    }

    #[test]
    fn scan_without_upgrade_flag_ignores_higher_versions() {
        let ctx = Context::create();
        ctx.install_plugin(info("core", [1, 0, 0, 0])).unwrap();
        let source = StaticSource(vec![info("core", [2, 0, 0, 0])]);
        scan_plugins(&ctx, &source, ScanFlags::empty()).unwrap();
        let current = ctx.get_plugin_info("core").unwrap();
        assert_eq!(current.version, Some(Version::new([1, 0, 0, 0])));
    }

    #[test]
    fn scan_with_upgrade_flag_replaces_with_higher_version() {
        let ctx = Context::create();
        ctx.install_plugin(info("core", [1, 0, 0, 0])).unwrap();
        let source = StaticSource(vec![info("core", [2, 0, 0, 0])]);
        scan_plugins(&ctx, &source, ScanFlags::UPGRADE).unwrap();
        let current = ctx.get_plugin_info("core").unwrap();
        assert_eq!(current.version, Some(Version::new([2, 0, 0, 0])));
    }
}
