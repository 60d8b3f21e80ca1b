//! Requests accepted by the host and the session records it returns.

use crate::diagnostic::Issue;
use crate::edit::{ConflictStrategy, FixConflict, FixOutcome};
use crate::ids::{FixId, IssueId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Free-form counters and timings attached to a session.
pub type Statistics = BTreeMap<String, serde_json::Value>;

/// Outcome of analysing a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub file_path: PathBuf,
    pub success: bool,
    pub issues: Vec<Issue>,
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
}

impl AnalysisResult {
    pub fn succeeded(file_path: impl Into<PathBuf>, issues: Vec<Issue>, duration_ms: u64) -> Self {
        Self {
            file_path: file_path.into(),
            success: true,
            issues,
            error: None,
            duration_ms,
            from_cache: false,
        }
    }

    pub fn failed(file_path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            success: false,
            issues: Vec::new(),
            error: Some(error.into()),
            duration_ms: 0,
            from_cache: false,
        }
    }
}

/// Request to analyse a set of files with one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub plugin_id: String,
    pub files: Vec<PathBuf>,
    /// Keep only issues raised by these rules.
    #[serde(default)]
    pub rule_filter: Option<Vec<String>>,
    #[serde(default)]
    pub generate_fixes: bool,
}

impl AnalysisRequest {
    pub fn new(plugin_id: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            files,
            rule_filter: None,
            generate_fixes: false,
        }
    }
}

/// Record of one analysis request. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub session_id: SessionId,
    pub plugin_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub file_results: Vec<AnalysisResult>,
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub statistics: Statistics,
}

impl AnalysisSession {
    /// Number of files that were actually analysed (cache hits included).
    pub fn files_analyzed(&self) -> usize {
        self.file_results.iter().filter(|r| r.success).count()
    }
}

/// Request to apply fixes for previously reported issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixApplyRequest {
    pub plugin_id: String,
    pub issue_ids: Vec<IssueId>,
    /// Restrict to these fixes. `None` applies every candidate.
    #[serde(default)]
    pub fix_ids: Option<Vec<FixId>>,
    #[serde(default)]
    pub preview_only: bool,
    #[serde(default = "default_true")]
    pub resolve_conflicts: bool,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

fn default_true() -> bool {
    true
}

impl FixApplyRequest {
    pub fn new(plugin_id: impl Into<String>, issue_ids: Vec<IssueId>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            issue_ids,
            fix_ids: None,
            preview_only: false,
            resolve_conflicts: true,
            conflict_strategy: ConflictStrategy::default(),
            create_backup: true,
        }
    }
}

/// Record of one fix-application request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSession {
    pub session_id: SessionId,
    pub plugin_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub preview_only: bool,
    pub modified_files: Vec<PathBuf>,
    pub fix_outcomes: Vec<FixOutcome>,
    /// Conflicts that were left unresolved.
    pub conflicts: Vec<FixConflict>,
    pub resolved_conflicts: Vec<FixConflict>,
    /// New file contents computed in preview mode.
    #[serde(default)]
    pub previews: BTreeMap<PathBuf, String>,
    #[serde(default)]
    pub statistics: Statistics,
}

impl FixSession {
    pub fn applied_count(&self) -> usize {
        self.fix_outcomes.iter().filter(|o| o.applied).count()
    }
}

/// Short history entry kept by a fix engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSessionSummary {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub applied_fixes: usize,
    pub modified_files: Vec<PathBuf>,
    pub has_backup: bool,
    pub rolled_back: bool,
}

/// Outcome of rolling back a fix session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub restored_files: Vec<PathBuf>,
    pub failed_files: Vec<PathBuf>,
}
