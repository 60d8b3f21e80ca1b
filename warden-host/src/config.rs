//! Host configuration, read from `warden.toml`.
//!
//! ```toml
//! workspace_root = "/home/me/project"
//!
//! [[trusted_signers]]
//! name = "acme"
//! public_key = "3b6a27bc..."
//!
//! [sandbox]
//! call_timeout_ms = 30000
//! max_memory_bytes = 268435456
//!
//! [cache]
//! directory = "/home/me/.cache/warden"
//! ttl_secs = 3600
//! ```

use crate::error::HostError;
use crate::permissions::TrustedSigner;
use crate::sandbox::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Disk tier location. Memory-only when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_memory_capacity() -> usize {
    1_000
}

fn default_ttl_secs() -> u64 {
    3_600
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_capacity: default_memory_capacity(),
            ttl_secs: default_ttl_secs(),
            directory: None,
        }
    }
}

/// Security audit log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

fn default_audit_capacity() -> usize {
    10_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

/// Fix engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixConfig {
    /// Number of fix sessions kept for history and rollback.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    50
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

/// Complete host configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Root that plugin file access and fix application are confined to.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub trusted_signers: Vec<TrustedSigner>,
    #[serde(default)]
    pub sandbox: ResourceLimits,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub fixes: FixConfig,
}

impl HostConfig {
    /// Loads configuration from `path`. A missing file yields defaults; so
    /// does a file that fails to parse, with a warning.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!("Loaded host configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("{}. Falling back to default configuration.", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Parses configuration strictly.
    pub fn from_toml_str(contents: &str) -> Result<Self, HostError> {
        toml::from_str(contents).map_err(|e| HostError::Config(e.to_string()))
    }

    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HostConfig::default();
        assert!(config.workspace_root.is_none());
        assert_eq!(config.audit.capacity, 10_000);
        assert_eq!(config.cache.memory_capacity, 1_000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3_600));
        assert_eq!(config.sandbox.queue_capacity, 100);
        assert_eq!(config.fixes.history_limit, 50);
    }

    #[test]
    fn parses_full_file() {
        let toml = r#"
workspace_root = "/ws"

[[trusted_signers]]
name = "acme"
public_key = "abcd"

[sandbox]
call_timeout_ms = 250
max_memory_bytes = 1024
queue_capacity = 4
shutdown_deadline_ms = 100

[cache]
enabled = false
directory = "/tmp/warden-cache"
ttl_secs = 5

[audit]
capacity = 3

[fixes]
history_limit = 2
"#;
        let config = HostConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.workspace_root.as_deref(), Some(Path::new("/ws")));
        assert_eq!(config.trusted_signers[0].name, "acme");
        assert_eq!(config.sandbox.call_timeout_ms, 250);
        assert_eq!(config.sandbox.queue_capacity, 4);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.directory.as_deref(), Some(Path::new("/tmp/warden-cache")));
        assert_eq!(config.audit.capacity, 3);
        assert_eq!(config.fixes.history_limit, 2);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = HostConfig::from_toml_str("[sandbox]\ncall_timeout_ms = 10\n").unwrap();
        assert_eq!(config.sandbox.call_timeout_ms, 10);
        assert_eq!(config.sandbox.queue_capacity, 100);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load_from(dir.path().join("absent.toml"));
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "this is [[ not toml").unwrap();
        assert_eq!(HostConfig::load_from(&path), HostConfig::default());
    }

    #[test]
    fn valid_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "workspace_root = \"/srv\"\n").unwrap();
        let config = HostConfig::load_from(&path);
        assert_eq!(config.workspace_root.as_deref(), Some(Path::new("/srv")));
    }
}
