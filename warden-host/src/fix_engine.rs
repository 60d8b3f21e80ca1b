//! Fix application behind the [`FixEngine`] trait, with a default
//! text-based implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use warden_types::{
    ConflictStrategy, Fix, FixConflict, FixId, FixOutcome, FixSessionSummary, Issue, Position,
    RollbackResult, SessionId, TextEdit,
};

use crate::error::HostError;
use crate::lock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    pub create_backup: bool,
    pub resolve_conflicts: bool,
    pub preview_only: bool,
    pub strategy: ConflictStrategy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            resolve_conflicts: true,
            preview_only: false,
            strategy: ConflictStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixEngineOutcome {
    pub session_id: SessionId,
    pub success: bool,
    pub fix_outcomes: Vec<FixOutcome>,
    pub modified_files: Vec<PathBuf>,
    /// Conflicts left unresolved.
    pub conflicts: Vec<FixConflict>,
    pub resolved_conflicts: Vec<FixConflict>,
    /// New contents per file, filled in preview mode.
    pub previews: BTreeMap<PathBuf, String>,
}

#[async_trait]
pub trait FixEngine: Send + Sync {
    async fn apply(
        &self,
        issues: &[Issue],
        fixes: &[Fix],
        options: &ApplyOptions,
    ) -> Result<FixEngineOutcome, HostError>;

    /// Restores the files a session modified from its backups.
    async fn rollback(&self, session_id: SessionId) -> Result<RollbackResult, HostError>;

    /// Most recent sessions first.
    fn history(&self, max_sessions: usize) -> Vec<FixSessionSummary>;
}

struct SessionRecord {
    summary: FixSessionSummary,
    backups: BTreeMap<PathBuf, String>,
}

/// Applies fixes as in-place text edits. Backups are kept in memory.
pub struct TextFixEngine {
    history_limit: usize,
    sessions: Mutex<VecDeque<SessionRecord>>,
}

impl TextFixEngine {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            sessions: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for TextFixEngine {
    fn default() -> Self {
        Self::new(50)
    }
}

/// One entry per overlapping pair, in input order.
pub fn detect_conflicts(fixes: &[Fix]) -> Vec<FixConflict> {
    let mut conflicts = Vec::new();
    for (i, first) in fixes.iter().enumerate() {
        for second in &fixes[i + 1..] {
            let overlap = first
                .edits
                .iter()
                .find_map(|a| second.edits.iter().find(|b| a.overlaps(b)).map(|_| a));
            if let Some(edit) = overlap {
                conflicts.push(FixConflict {
                    file_path: edit.file_path.clone(),
                    first_fix: first.id,
                    second_fix: second.id,
                    winner: None,
                    description: format!(
                        "'{}' and '{}' edit overlapping ranges in {}",
                        first.title,
                        second.title,
                        edit.file_path.display()
                    ),
                });
            }
        }
    }
    conflicts
}

/// Picks the fixes to apply. Returns the kept ids and, for each dropped fix,
/// the id of the fix that beat it (if any).
fn resolve(
    fixes: &[Fix],
    conflicts: &[FixConflict],
    strategy: ConflictStrategy,
) -> (HashSet<FixId>, BTreeMap<FixId, Option<FixId>>) {
    let mut kept = HashSet::new();
    let mut dropped = BTreeMap::new();

    if strategy == ConflictStrategy::SkipConflicting {
        let involved: HashSet<FixId> = conflicts
            .iter()
            .flat_map(|c| [c.first_fix, c.second_fix])
            .collect();
        for fix in fixes {
            if involved.contains(&fix.id) {
                dropped.insert(fix.id, None);
            } else {
                kept.insert(fix.id);
            }
        }
        return (kept, dropped);
    }

    let mut order: Vec<&Fix> = fixes.iter().collect();
    if strategy == ConflictStrategy::HighestConfidence {
        order.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    }

    let mut accepted: Vec<&Fix> = Vec::new();
    for fix in order {
        match accepted.iter().find(|winner| winner.conflicts_with(fix)) {
            Some(winner) => {
                dropped.insert(fix.id, Some(winner.id));
            }
            None => {
                kept.insert(fix.id);
                accepted.push(fix);
            }
        }
    }
    (kept, dropped)
}

/// Byte offsets of each line start.
fn line_starts(content: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Byte offset of a zero-based position; columns count chars.
fn offset_of(content: &str, starts: &[usize], pos: Position) -> Option<usize> {
    let line = pos.line as usize;
    let start = *starts.get(line)?;
    let end = starts.get(line + 1).map_or(content.len(), |next| next - 1);
    let text = &content[start..end];
    let column = pos.column as usize;
    if column == text.chars().count() {
        return Some(end);
    }
    text.char_indices().nth(column).map(|(i, _)| start + i)
}

/// Resolves every edit of a fix to byte ranges, or `None` when any edit
/// falls outside the content.
fn resolve_edits<'a>(
    content: &str,
    starts: &[usize],
    edits: impl Iterator<Item = &'a TextEdit>,
) -> Option<Vec<(usize, usize, &'a str)>> {
    edits
        .map(|edit| {
            let start = offset_of(content, starts, edit.start())?;
            let end = offset_of(content, starts, edit.end())?;
            (start <= end).then_some((start, end, edit.new_text.as_str()))
        })
        .collect()
}

/// Applies byte ranges back to front. `None` when two ranges overlap.
fn apply_ranges(content: &str, mut ranges: Vec<(usize, usize, &str)>) -> Option<String> {
    ranges.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    let mut out = content.to_string();
    let mut limit = content.len();
    for (start, end, text) in ranges {
        if end > limit {
            return None;
        }
        out.replace_range(start..end, text);
        limit = start;
    }
    Some(out)
}

fn has_overlapping_edits(fix: &Fix) -> bool {
    fix.edits
        .iter()
        .enumerate()
        .any(|(i, a)| fix.edits[i + 1..].iter().any(|b| a.overlaps(b)))
}

/// New content for every file still touched by a fix that has not failed.
///
/// A fix whose ranges cannot be applied to one of its files fails in all of
/// them, so rendering repeats until the failed set stops growing.
fn render(
    originals: &BTreeMap<PathBuf, String>,
    by_file: &BTreeMap<PathBuf, Vec<&Fix>>,
    failed: &mut BTreeMap<FixId, String>,
) -> BTreeMap<PathBuf, String> {
    loop {
        let failed_before = failed.len();
        let mut new_contents = BTreeMap::new();
        for (path, content) in originals {
            let Some(fixes_in_file) = by_file.get(path) else {
                continue;
            };
            let live: Vec<&Fix> = fixes_in_file
                .iter()
                .copied()
                .filter(|fix| !failed.contains_key(&fix.id))
                .collect();
            let starts = line_starts(content);
            let ranges: Vec<_> = live
                .iter()
                .filter_map(|fix| {
                    resolve_edits(content, &starts, fix.edits.iter().filter(|e| &e.file_path == path))
                })
                .flatten()
                .collect();
            if ranges.is_empty() {
                continue;
            }
            match apply_ranges(content, ranges) {
                Some(updated) if &updated != content => {
                    new_contents.insert(path.clone(), updated);
                }
                Some(_) => {}
                None => {
                    for fix in live {
                        failed.insert(fix.id, format!("overlapping edits in {}", path.display()));
                    }
                }
            }
        }
        if failed.len() == failed_before {
            return new_contents;
        }
    }
}

#[async_trait]
impl FixEngine for TextFixEngine {
    async fn apply(
        &self,
        issues: &[Issue],
        fixes: &[Fix],
        options: &ApplyOptions,
    ) -> Result<FixEngineOutcome, HostError> {
        let session_id = SessionId::new();
        let conflicts = detect_conflicts(fixes);

        if !conflicts.is_empty() && !options.resolve_conflicts {
            info!(%session_id, conflicts = conflicts.len(), "Fixes not applied, unresolved conflicts");
            return Ok(FixEngineOutcome {
                session_id,
                success: false,
                fix_outcomes: fixes
                    .iter()
                    .map(|f| FixOutcome::skipped(f, "unresolved conflicts"))
                    .collect(),
                modified_files: Vec::new(),
                conflicts,
                resolved_conflicts: Vec::new(),
                previews: BTreeMap::new(),
            });
        }

        let (kept, dropped) = resolve(fixes, &conflicts, options.strategy);
        let resolved_conflicts: Vec<FixConflict> = conflicts
            .into_iter()
            .map(|mut c| {
                c.winner = [c.first_fix, c.second_fix]
                    .into_iter()
                    .find(|id| kept.contains(id));
                c
            })
            .collect();

        let known_issues: HashSet<_> = issues.iter().map(|i| i.id).collect();
        let mut outcomes: BTreeMap<FixId, FixOutcome> = BTreeMap::new();
        let mut by_file: BTreeMap<PathBuf, Vec<&Fix>> = BTreeMap::new();
        let mut malformed: BTreeSet<FixId> = BTreeSet::new();
        for fix in fixes {
            if let Some(winner) = dropped.get(&fix.id) {
                let reason = match winner {
                    Some(winner) => format!("conflicts with fix {winner}"),
                    None => "skipped: conflicting".to_string(),
                };
                outcomes.insert(fix.id, FixOutcome::skipped(fix, reason));
            } else if !issues.is_empty() && !known_issues.contains(&fix.issue_id) {
                outcomes.insert(fix.id, FixOutcome::skipped(fix, "issue not found"));
            } else if fix.edits.is_empty() {
                outcomes.insert(fix.id, FixOutcome::skipped(fix, "fix has no edits"));
            } else if has_overlapping_edits(fix) {
                warn!(fix_id = %fix.id, "Fix has overlapping edits");
                malformed.insert(fix.id);
                outcomes.insert(fix.id, FixOutcome::skipped(fix, "fix has overlapping edits"));
            } else {
                for file in fix.affected_files() {
                    by_file.entry(file.to_path_buf()).or_default().push(fix);
                }
            }
        }

        // Read every touched file and drop fixes whose edits no longer fit.
        let mut originals: BTreeMap<PathBuf, String> = BTreeMap::new();
        let mut failed: BTreeMap<FixId, String> = BTreeMap::new();
        for path in by_file.keys() {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    originals.insert(path.clone(), content);
                }
                Err(e) => {
                    for fix in &by_file[path] {
                        failed.insert(fix.id, format!("cannot read {}: {e}", path.display()));
                    }
                }
            }
        }
        for (path, fixes_in_file) in &by_file {
            let Some(content) = originals.get(path) else {
                continue;
            };
            let starts = line_starts(content);
            for fix in fixes_in_file {
                let edits = fix.edits.iter().filter(|e| &e.file_path == path);
                if resolve_edits(content, &starts, edits).is_none() {
                    failed.insert(fix.id, format!("edit out of range in {}", path.display()));
                }
            }
        }

        // A fix spanning several files is applied to all of them or none.
        // When a write fails, files already written in that pass are
        // restored and the remaining fixes are rendered again without the
        // fixes of the failing file.
        let mut previews = BTreeMap::new();
        let mut modified_files: Vec<PathBuf> = Vec::new();
        let mut stranded: Vec<PathBuf> = Vec::new();
        loop {
            let new_contents = render(&originals, &by_file, &mut failed);
            if options.preview_only {
                previews = new_contents;
                break;
            }

            let mut written = Vec::new();
            let mut write_failed = false;
            for (path, updated) in &new_contents {
                match tokio::fs::write(path, updated).await {
                    Ok(()) => written.push(path.clone()),
                    Err(e) => {
                        warn!("Failed to write {:?}: {}", path, e);
                        for fix in by_file.get(path).into_iter().flatten() {
                            failed.insert(fix.id, format!("cannot write {}: {e}", path.display()));
                        }
                        write_failed = true;
                        break;
                    }
                }
            }
            if !write_failed {
                modified_files = written;
                break;
            }
            for path in written {
                let Some(original) = originals.get(&path) else {
                    continue;
                };
                if let Err(e) = tokio::fs::write(&path, original).await {
                    warn!("Failed to restore {:?}: {}", path, e);
                    stranded.push(path);
                }
            }
        }
        for path in stranded {
            if !modified_files.contains(&path) {
                modified_files.push(path);
            }
        }
        modified_files.sort();

        let backups: BTreeMap<PathBuf, String> = if options.create_backup {
            modified_files
                .iter()
                .filter_map(|path| originals.get(path).map(|c| (path.clone(), c.clone())))
                .collect()
        } else {
            BTreeMap::new()
        };

        let applied_ids: BTreeSet<FixId> = by_file
            .values()
            .flatten()
            .map(|f| f.id)
            .filter(|id| !failed.contains_key(id))
            .collect();
        for fix in fixes {
            if outcomes.contains_key(&fix.id) {
                continue;
            }
            let outcome = match failed.get(&fix.id) {
                Some(reason) => FixOutcome::skipped(fix, reason.clone()),
                None if applied_ids.contains(&fix.id) => FixOutcome::applied(fix),
                None => FixOutcome::skipped(fix, "not applied"),
            };
            outcomes.insert(fix.id, outcome);
        }
        let fix_outcomes: Vec<FixOutcome> = fixes
            .iter()
            .filter_map(|f| outcomes.remove(&f.id))
            .collect();

        let success = failed.is_empty() && malformed.is_empty();
        let applied = fix_outcomes.iter().filter(|o| o.applied).count();

        if !options.preview_only && !modified_files.is_empty() {
            let record = SessionRecord {
                summary: FixSessionSummary {
                    session_id,
                    timestamp: Utc::now(),
                    applied_fixes: applied,
                    modified_files: modified_files.clone(),
                    has_backup: !backups.is_empty(),
                    rolled_back: false,
                },
                backups,
            };
            let mut sessions = lock(&self.sessions);
            sessions.push_front(record);
            sessions.truncate(self.history_limit);
        }

        info!(
            %session_id,
            applied,
            files = modified_files.len(),
            preview = options.preview_only,
            "Fix session finished"
        );

        Ok(FixEngineOutcome {
            session_id,
            success,
            fix_outcomes,
            modified_files,
            conflicts: Vec::new(),
            resolved_conflicts,
            previews,
        })
    }

    async fn rollback(&self, session_id: SessionId) -> Result<RollbackResult, HostError> {
        let backups = {
            let sessions = lock(&self.sessions);
            let record = sessions
                .iter()
                .find(|r| r.summary.session_id == session_id)
                .ok_or_else(|| HostError::SessionNotFound(session_id.to_string()))?;
            if record.summary.rolled_back {
                debug!(%session_id, "Session already rolled back");
                return Ok(RollbackResult::default());
            }
            record.backups.clone()
        };

        let mut result = RollbackResult::default();
        for (path, original) in backups {
            match tokio::fs::write(&path, original).await {
                Ok(()) => result.restored_files.push(path),
                Err(e) => {
                    warn!("Failed to restore {:?}: {}", path, e);
                    result.failed_files.push(path);
                }
            }
        }

        if let Some(record) = lock(&self.sessions)
            .iter_mut()
            .find(|r| r.summary.session_id == session_id)
        {
            record.summary.rolled_back = true;
        }
        info!(%session_id, restored = result.restored_files.len(), "Fix session rolled back");
        Ok(result)
    }

    fn history(&self, max_sessions: usize) -> Vec<FixSessionSummary> {
        lock(&self.sessions)
            .iter()
            .take(max_sessions)
            .map(|r| r.summary.clone())
            .collect()
    }
}
