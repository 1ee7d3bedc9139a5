//! Error taxonomy for the plug-in engine.
//!
//! [`PluginError`] is the Rust-native error type returned by every public
//! operation. [`ErrorCode`] mirrors the numeric contract a host embedding
//! this crate across an eventual C ABI would need; the two stay in sync
//! through [`ErrorCode::from`].

use std::fmt;
use std::path::PathBuf;

/// Numeric error codes, mirrored 1:1 against the host-facing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Unspecified = -1,
    Resource = -2,
    Unknown = -3,
    Io = -4,
    Malformed = -5,
    Conflict = -6,
    Dependency = -7,
    Runtime = -8,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Unspecified => "unspecified error",
            ErrorCode::Resource => "resource allocation failure",
            ErrorCode::Unknown => "unknown plug-in or extension point",
            ErrorCode::Io => "I/O error",
            ErrorCode::Malformed => "malformed plug-in descriptor",
            ErrorCode::Conflict => "identifier conflict",
            ErrorCode::Dependency => "unresolved dependency",
            ErrorCode::Runtime => "plug-in runtime error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plug-in identifier '{0}' is already registered in this context")]
    Conflict(String),

    #[error("extension point '{0}' is already published by another plug-in")]
    ExtPointConflict(String),

    #[error("unknown plug-in identifier '{0}'")]
    UnknownPlugin(String),

    #[error("unknown extension point '{0}'")]
    UnknownExtPoint(String),

    #[error("unresolved mandatory dependency '{dependency}' required by '{plugin}'")]
    Dependency { plugin: String, dependency: String },

    #[error("import of '{dependency}' by '{plugin}' does not satisfy the required version")]
    VersionMismatch { plugin: String, dependency: String },

    #[error("runtime failure while {operation} plug-in '{plugin}': {reason}")]
    Runtime {
        plugin: String,
        operation: &'static str,
        reason: String,
    },

    #[error("failed to load runtime library at {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("runtime library at {path} is missing required symbol '{symbol}'")]
    MissingSymbol { path: PathBuf, symbol: String },

    #[error("malformed plug-in descriptor: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("resource allocation failed: {0}")]
    Resource(String),

    #[error("{0}")]
    Unspecified(String),
}

impl From<&PluginError> for ErrorCode {
    fn from(err: &PluginError) -> Self {
        match err {
            PluginError::Conflict(_) | PluginError::ExtPointConflict(_) => ErrorCode::Conflict,
            PluginError::UnknownPlugin(_) | PluginError::UnknownExtPoint(_) => ErrorCode::Unknown,
            PluginError::Dependency { .. } | PluginError::VersionMismatch { .. } => {
                ErrorCode::Dependency
            }
            PluginError::Runtime { .. }
            | PluginError::LibraryLoad { .. }
            | PluginError::MissingSymbol { .. } => ErrorCode::Runtime,
            PluginError::Malformed(_) => ErrorCode::Malformed,
            PluginError::Io(_) => ErrorCode::Io,
            PluginError::Serialization(_) => ErrorCode::Malformed,
            PluginError::Resource(_) => ErrorCode::Resource,
            PluginError::Unspecified(_) => ErrorCode::Unspecified,
        }
    }
}

impl From<PluginError> for ErrorCode {
    fn from(err: PluginError) -> Self {
        ErrorCode::from(&err)
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_as_expected() {
        assert_eq!(
            ErrorCode::from(&PluginError::Conflict("a".into())),
            ErrorCode::Conflict
        );
        assert_eq!(
            ErrorCode::from(&PluginError::Dependency {
                plugin: "a".into(),
                dependency: "b".into()
            }),
            ErrorCode::Dependency
        );
        assert_eq!(
            ErrorCode::from(&PluginError::UnknownPlugin("x".into())),
            ErrorCode::Unknown
        );
    }
}
