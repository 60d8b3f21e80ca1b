//! Module manifest (`manifest.toml`) inside a `.wpk` package.
//!
//! A module declares one or more plugins. Each plugin is a set of
//! pattern rules, optionally with a replacement fix.

use serde::{Deserialize, Serialize};
use warden_types::{Confidence, PluginMetadata, Rule, Severity, HOST_API_VERSION};

/// Top-level manifest embedded in every module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Host capability interface the module was built against.
    #[serde(default = "default_api_version")]
    pub host_api_version: u32,
    #[serde(default)]
    pub plugins: Vec<PluginManifest>,
}

fn default_api_version() -> u32 {
    HOST_API_VERSION
}

/// One plugin declared by a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin identifier (e.g. "acme.todo").
    pub id: String,
    pub name: String,
    /// Semver version string.
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// File extensions the plugin analyses. Empty means any file.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Overrides the module-level API version for this plugin.
    #[serde(default)]
    pub host_api_version: Option<u32>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub rules: Vec<RuleManifest>,
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

/// A pattern rule. `pattern` is a regular expression matched per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleManifest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub help_uri: Option<String>,
    pub pattern: String,
    /// Issue message. Defaults to the rule title.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub fix: Option<FixTemplate>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_true() -> bool {
    true
}

/// Replacement applied to the matched text. Supports `$1`-style capture
/// group references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixTemplate {
    pub title: String,
    pub replacement: String,
    #[serde(default)]
    pub confidence: Confidence,
}

impl ModuleManifest {
    /// Validates required fields and id uniqueness.
    pub fn validate(&self) -> Result<(), crate::PackageError> {
        if self.plugins.is_empty() {
            return Err(crate::PackageError::ManifestInvalid(
                "module declares no plugins".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            plugin.validate()?;
            if !seen.insert(plugin.id.as_str()) {
                return Err(crate::PackageError::ManifestInvalid(format!(
                    "duplicate plugin id '{}'",
                    plugin.id
                )));
            }
        }
        Ok(())
    }
}

impl PluginManifest {
    pub fn validate(&self) -> Result<(), crate::PackageError> {
        if self.id.is_empty() {
            return Err(crate::PackageError::ManifestInvalid("id is required".into()));
        }
        if self.name.is_empty() {
            return Err(crate::PackageError::ManifestInvalid("name is required".into()));
        }
        if self.version.is_empty() {
            return Err(crate::PackageError::ManifestInvalid("version is required".into()));
        }
        if !self.id.contains('.') {
            return Err(crate::PackageError::ManifestInvalid(format!(
                "id '{}' must use reverse-domain format (e.g. 'acme.todo')",
                self.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(crate::PackageError::ManifestInvalid(format!(
                    "duplicate rule id '{}' in plugin '{}'",
                    rule.id, self.id
                )));
            }
        }
        Ok(())
    }

    /// Metadata for this plugin, inheriting the module API version unless
    /// overridden.
    pub fn metadata(&self, module_api_version: u32) -> PluginMetadata {
        let mut meta = PluginMetadata::new(&self.id, &self.name, &self.version)
            .with_extensions(self.extensions.iter().cloned());
        meta.author = self.author.clone();
        meta.description = self.description.clone();
        meta.host_api_version = self.host_api_version.unwrap_or(module_api_version);
        meta
    }
}

impl RuleManifest {
    pub fn to_rule(&self) -> Rule {
        Rule {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            default_severity: self.severity,
            enabled_by_default: self.enabled_by_default,
            tags: self.tags.clone(),
            help_uri: self.help_uri.clone(),
        }
    }
}
