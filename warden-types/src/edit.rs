//! Text edits and the fixes built from them.

use crate::diagnostic::Confidence;
use crate::ids::{FixId, IssueId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A zero-based position in a text file. Columns count Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Replaces the half-open range `[start, end)` of a file with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextEdit {
    pub file_path: PathBuf,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub new_text: String,
}

impl TextEdit {
    pub fn new(file_path: impl Into<PathBuf>, start: Position, end: Position, new_text: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            start_line: start.line,
            start_column: start.column,
            end_line: end.line,
            end_column: end.column,
            new_text: new_text.into(),
        }
    }

    pub fn start(&self) -> Position {
        Position::new(self.start_line, self.start_column)
    }

    pub fn end(&self) -> Position {
        Position::new(self.end_line, self.end_column)
    }

    /// Returns true when both edits touch the same file and their ranges
    /// intersect. Two insertions at the same point also overlap, since the
    /// resulting order would be ambiguous.
    pub fn overlaps(&self, other: &TextEdit) -> bool {
        if self.file_path != other.file_path {
            return false;
        }
        let (a_start, a_end) = (self.start(), self.end());
        let (b_start, b_end) = (other.start(), other.end());
        if a_start == a_end && b_start == b_end {
            return a_start == b_start;
        }
        if a_start == a_end {
            return b_start <= a_start && a_start < b_end;
        }
        if b_start == b_end {
            return a_start <= b_start && b_start < a_end;
        }
        a_start < b_end && b_start < a_end
    }
}

/// An ordered set of edits addressing one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub id: FixId,
    pub issue_id: IssueId,
    pub rule_id: String,
    pub plugin_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub is_interactive: bool,
    #[serde(default = "default_batchable")]
    pub is_batchable: bool,
    pub edits: Vec<TextEdit>,
}

fn default_batchable() -> bool {
    true
}

impl Fix {
    pub fn new(
        issue_id: IssueId,
        rule_id: impl Into<String>,
        plugin_id: impl Into<String>,
        title: impl Into<String>,
        edits: Vec<TextEdit>,
    ) -> Self {
        Self {
            id: FixId::new(),
            issue_id,
            rule_id: rule_id.into(),
            plugin_id: plugin_id.into(),
            title: title.into(),
            description: String::new(),
            confidence: Confidence::default(),
            is_interactive: false,
            is_batchable: true,
            edits,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    /// Files this fix touches, sorted and deduplicated.
    pub fn affected_files(&self) -> BTreeSet<&Path> {
        self.edits.iter().map(|e| e.file_path.as_path()).collect()
    }

    /// Returns true when any edit of `self` overlaps any edit of `other`.
    pub fn conflicts_with(&self, other: &Fix) -> bool {
        self.edits
            .iter()
            .any(|a| other.edits.iter().any(|b| a.overlaps(b)))
    }
}

/// How the fix engine picks a winner among conflicting fixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep the fix with the highest confidence; ties go to the earlier fix.
    #[default]
    HighestConfidence,
    /// Keep the fix that was requested first.
    FirstWins,
    /// Drop every fix involved in a conflict.
    SkipConflicting,
}

/// Two fixes whose edits overlap in the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixConflict {
    pub file_path: PathBuf,
    pub first_fix: FixId,
    pub second_fix: FixId,
    /// The fix that was kept, when the conflict was resolved.
    pub winner: Option<FixId>,
    pub description: String,
}

/// What happened to one requested fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub fix_id: FixId,
    pub applied: bool,
    pub reason: Option<String>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl FixOutcome {
    pub fn applied(fix: &Fix) -> Self {
        Self {
            fix_id: fix.id,
            applied: true,
            reason: None,
            files: fix.affected_files().into_iter().map(Path::to_path_buf).collect(),
        }
    }

    pub fn skipped(fix: &Fix, reason: impl Into<String>) -> Self {
        Self {
            fix_id: fix.id,
            applied: false,
            reason: Some(reason.into()),
            files: fix.affected_files().into_iter().map(Path::to_path_buf).collect(),
        }
    }
}
