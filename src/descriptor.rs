//! Immutable plug-in descriptor types.
//!
//! Values here are produced by an external descriptor loader (a manifest
//! parser this crate does not implement, see [`crate::scanner::PluginSource`])
//! and consumed by [`crate::registry`]/[`crate::engine`]. `PluginInfo` is
//! refcounted through `Arc`, which doubles as the use-count tracking the
//! wider design calls for: a handle handed out by `GetPluginInfo` keeps the
//! data alive independently of whether the owning plug-in has since been
//! uninstalled.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::version::{MatchRule, Version};

/// A single import declared by a plug-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginImport {
    pub plugin_id: String,
    pub version: Option<Version>,
    #[serde(rename = "match")]
    pub match_rule: MatchRule,
    pub optional: bool,
}

impl PluginImport {
    pub fn mandatory(plugin_id: impl Into<String>) -> Self {
        PluginImport {
            plugin_id: plugin_id.into(),
            version: None,
            match_rule: MatchRule::None,
            optional: false,
        }
    }

    pub fn optional(plugin_id: impl Into<String>) -> Self {
        PluginImport {
            plugin_id: plugin_id.into(),
            version: None,
            match_rule: MatchRule::None,
            optional: true,
        }
    }

    pub fn with_version(mut self, version: Version, match_rule: MatchRule) -> Self {
        self.version = Some(version);
        self.match_rule = match_rule;
        self
    }
}

/// An extension point published by a plug-in.
///
/// `global_id` is always `"{owning plug-in identifier}.{local_id}"`; callers
/// construct it with [`ExtPoint::new`] rather than formatting it themselves
/// so the invariant can't drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtPoint {
    pub local_id: String,
    pub global_id: String,
    pub name: String,
    pub schema_path: Option<PathBuf>,
}

impl ExtPoint {
    pub fn new(owner_id: &str, local_id: impl Into<String>, name: impl Into<String>) -> Self {
        let local_id = local_id.into();
        let global_id = format!("{owner_id}.{local_id}");
        ExtPoint {
            local_id,
            global_id,
            name: name.into(),
            schema_path: None,
        }
    }

    pub fn with_schema(mut self, path: PathBuf) -> Self {
        self.schema_path = Some(path);
        self
    }
}

/// A configuration element within an extension's contribution tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CfgElement {
    pub name: String,
    pub value: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<CfgElement>,
}

impl CfgElement {
    pub fn new(name: impl Into<String>) -> Self {
        CfgElement {
            name: name.into(),
            value: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: CfgElement) -> Self {
        self.children.push(child);
        self
    }
}

/// A contribution targeting one extension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub local_id: Option<String>,
    pub global_id: Option<String>,
    pub ext_point_id: String,
    pub configuration: CfgElement,
}

impl Extension {
    pub fn new(ext_point_id: impl Into<String>, configuration: CfgElement) -> Self {
        Extension {
            local_id: None,
            global_id: None,
            ext_point_id: ext_point_id.into(),
            configuration,
        }
    }

    pub fn with_id(mut self, owner_id: &str, local_id: impl Into<String>) -> Self {
        let local_id = local_id.into();
        self.global_id = Some(format!("{owner_id}.{local_id}"));
        self.local_id = Some(local_id);
        self
    }
}

/// The immutable descriptor for a plug-in, as handed to `InstallPlugin` by
/// an external loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub identifier: String,
    pub version: Option<Version>,
    pub name: String,
    pub provider_name: String,
    pub plugin_path: PathBuf,
    pub lib_path: Option<PathBuf>,
    pub start_func_name: Option<String>,
    pub stop_func_name: Option<String>,
    pub imports: Vec<PluginImport>,
    pub ext_points: Vec<ExtPoint>,
    pub extensions: Vec<Extension>,
}

impl PluginInfo {
    pub fn new(identifier: impl Into<String>, plugin_path: PathBuf) -> Self {
        let identifier = identifier.into();
        PluginInfo {
            name: identifier.clone(),
            provider_name: String::new(),
            identifier,
            version: None,
            plugin_path,
            lib_path: None,
            start_func_name: None,
            stop_func_name: None,
            imports: Vec::new(),
            ext_points: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_provider(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = provider_name.into();
        self
    }

    pub fn with_runtime_library(
        mut self,
        lib_path: PathBuf,
        start_func_name: impl Into<String>,
        stop_func_name: impl Into<String>,
    ) -> Self {
        self.lib_path = Some(lib_path);
        self.start_func_name = Some(start_func_name.into());
        self.stop_func_name = Some(stop_func_name.into());
        self
    }

    pub fn with_import(mut self, import: PluginImport) -> Self {
        self.imports.push(import);
        self
    }

    pub fn with_ext_point(mut self, ext_point: ExtPoint) -> Self {
        self.ext_points.push(ext_point);
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_point_global_id_is_namespaced_by_owner() {
        let ep = ExtPoint::new("com.example.core", "hooks", "Hooks");
        assert_eq!(ep.global_id, "com.example.core.hooks");
    }

    #[test]
    fn extension_global_id_follows_same_convention() {
        let ext = Extension::new("com.example.core.hooks", CfgElement::new("hook"))
            .with_id("com.example.ui", "greeting");
        assert_eq!(ext.global_id.as_deref(), Some("com.example.ui.greeting"));
    }

    #[test]
    fn plugin_info_builder_round_trips_through_json() {
        let info = PluginInfo::new("com.example.core", PathBuf::from("/plugins/core"))
            .with_version(Version::new([1, 0, 0, 0]))
            .with_import(PluginImport::mandatory("com.example.base"));
        let encoded = serde_json::to_string(&info).unwrap();
        let decoded: PluginInfo = serde_json::from_str(&encoded).unwrap();
        assert_eq!(info, decoded);
    }
}
