//! Error types for the analyzer host.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`HostError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    PermissionDenied,
    ResourceLimitExceeded,
    Timeout,
    ValidationFailed,
    IncompatibleModule,
    Unhealthy,
    Internal,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin already loaded: {0}")]
    PluginAlreadyLoaded(String),

    #[error("plugin is disabled: {0}")]
    PluginDisabled(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("fix session not found: {0}")]
    SessionNotFound(String),

    #[error("permission denied: plugin '{plugin_id}' may not {operation} {target}")]
    PermissionDenied {
        plugin_id: String,
        operation: String,
        target: String,
    },

    #[error("resource limit exceeded: {plugin_id}: {detail}")]
    ResourceLimitExceeded { plugin_id: String, detail: String },

    #[error("timeout: plugin '{plugin_id}' exceeded {timeout_ms}ms deadline")]
    Timeout { plugin_id: String, timeout_ms: u64 },

    #[error("module validation failed for {}: {reason}", .path.display())]
    ValidationFailed { path: PathBuf, reason: String },

    #[error("incompatible module '{plugin_id}': {detail}")]
    IncompatibleModule { plugin_id: String, detail: String },

    #[error("plugin is unhealthy: {0}")]
    Unhealthy(String),

    #[error("sandbox disposed: {0}")]
    SandboxDisposed(String),

    #[error("plugin failed: {plugin_id}: {message}")]
    PluginFailed { plugin_id: String, message: String },

    #[error("module load failed: {0}")]
    LoadFailed(String),

    #[error("package error: {0}")]
    Package(#[from] warden_package::PackageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl HostError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PluginNotFound(_) | Self::FileNotFound(_) | Self::SessionNotFound(_) => {
                ErrorCategory::NotFound
            }
            Self::PermissionDenied { .. } => ErrorCategory::PermissionDenied,
            Self::ResourceLimitExceeded { .. } => ErrorCategory::ResourceLimitExceeded,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::ValidationFailed { .. } | Self::Package(_) => ErrorCategory::ValidationFailed,
            Self::IncompatibleModule { .. } => ErrorCategory::IncompatibleModule,
            Self::Unhealthy(_) | Self::SandboxDisposed(_) | Self::PluginDisabled(_) => {
                ErrorCategory::Unhealthy
            }
            Self::PluginAlreadyLoaded(_)
            | Self::PluginFailed { .. }
            | Self::LoadFailed(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Config(_) => ErrorCategory::Internal,
        }
    }
}

/// Result alias for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
