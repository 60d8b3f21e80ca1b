//! Plugin identity and declared capabilities.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version of the host capability interface. Plugins built against a
/// different version are rejected at load time.
pub const HOST_API_VERSION: u32 = 1;

/// Identity and declared scope of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Stable identifier, e.g. `acme.todo-finder`.
    pub id: String,
    pub name: String,
    /// Semver version string.
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Lowercase file extensions without the leading dot. Empty means any file.
    #[serde(default)]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_api_version")]
    pub host_api_version: u32,
}

fn default_api_version() -> u32 {
    HOST_API_VERSION
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            author: String::new(),
            description: String::new(),
            supported_extensions: Vec::new(),
            host_api_version: HOST_API_VERSION,
        }
    }

    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Returns true when the file extension is one this plugin declared.
    pub fn supports_path(&self, path: &Path) -> bool {
        if self.supported_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.supported_extensions.iter().any(|s| *s == e)
            })
            .unwrap_or(false)
    }
}

/// What a plugin says it can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub supported_languages: Vec<String>,
    /// Largest file in bytes the plugin accepts.
    pub max_file_size: u64,
    pub can_fix: bool,
    #[serde(default)]
    pub supports_batch: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supported_languages: Vec::new(),
            max_file_size: 1024 * 1024,
            can_fix: false,
            supports_batch: false,
        }
    }
}
