//! Rules published by plugins and the issues they raise.

use crate::ids::IssueId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How serious a finding is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// How sure a plugin is about a finding or a fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

/// A rule a plugin can raise. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique within the owning plugin.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub default_severity: Severity,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub help_uri: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            category: default_category(),
            default_severity: Severity::default(),
            enabled_by_default: true,
            tags: Vec::new(),
            help_uri: None,
        }
    }
}

/// A single finding from one plugin's analysis of one file.
///
/// Positions are 1-based. Issues are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub rule_id: String,
    pub plugin_id: String,
    pub file_path: PathBuf,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub message: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub category: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Issue {
    /// Creates an issue spanning the first column of the first line.
    /// Use [`Issue::at`] to place it.
    pub fn new(
        plugin_id: impl Into<String>,
        rule: &Rule,
        file_path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: IssueId::new(),
            rule_id: rule.id.clone(),
            plugin_id: plugin_id.into(),
            file_path: file_path.into(),
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 1,
            message: message.into(),
            severity: rule.default_severity,
            confidence: Confidence::default(),
            category: rule.category.clone(),
            properties: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn at(mut self, start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        self.start_line = start_line;
        self.start_column = start_column;
        self.end_line = end_line;
        self.end_column = end_column;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}
