//! The diagnostic capability a plugin module supplies.
//!
//! The host never builds issues or fixes itself; it calls this trait from
//! inside a sandbox and reshapes the results.

use crate::diagnostic::{Issue, Rule};
use crate::edit::Fix;
use crate::plugin::{Capabilities, PluginMetadata};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Failure reported by a plugin.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("plugin initialization failed: {0}")]
    Initialization(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("fix generation failed: {0}")]
    Fix(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unsupported file: {0}")]
    Unsupported(String),
}

/// Interface implemented by every analysis plugin.
#[async_trait]
pub trait DiagnosticCapability: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    /// Called once after construction, before the plugin is registered.
    async fn initialize(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn can_analyze(&self, path: &Path) -> bool {
        self.metadata().supports_path(path)
    }

    /// Analyse one file. `content` is the full file text.
    async fn analyze(&self, path: &Path, content: &str) -> Result<Vec<Issue>, CapabilityError>;

    fn rules(&self) -> Vec<Rule>;

    /// Propose fixes for one issue previously raised by this plugin.
    async fn get_fixes(&self, issue: &Issue, content: &str) -> Result<Vec<Fix>, CapabilityError>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Apply a configuration blob. Plugins without settings accept anything.
    fn configure(&self, _config: &serde_json::Value) -> Result<(), CapabilityError> {
        Ok(())
    }
}
