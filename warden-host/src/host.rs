//! The analyzer host: validates and loads plugin modules, runs analyses and
//! fix sessions through per-plugin sandboxes.
//!
//! `AnalyzerHost` is shared behind an `Arc` and serves concurrent requests
//! through `&self`. It owns one instance each of the permission store,
//! registry, result cache and fix engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use warden_types::{
    AnalysisRequest, AnalysisResult, AnalysisSession, Fix, FixApplyRequest, FixOutcome,
    FixSession, FixSessionSummary, Issue, IssueId, PluginMetadata, RollbackResult, Rule,
    SessionId, Statistics,
};

use crate::cache::{content_hash, CacheStats, ResultCache};
use crate::config::HostConfig;
use crate::error::HostError;
use crate::fix_engine::{ApplyOptions, FixEngine, TextFixEngine};
use crate::loader::{ModuleLoader, PackageLoader, PluginDescriptor};
use crate::lock;
use crate::permissions::{Grant, Operation, PermissionStore, SecurityEvent, SecurityEventType};
use crate::registry::{PluginRegistry, RegisteredPlugin, RegistryEvent};
use crate::sandbox::{FixRequest, MemoryProbe, PluginSandbox, ProcessMemoryProbe, SandboxUsage};
use crate::validator::{PluginValidator, ValidationResult};

const EVENT_CAPACITY: usize = 256;

/// Outcome of loading one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    /// First plugin loaded from the module.
    pub plugin_id: String,
    pub plugin_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub validation: ValidationResult,
}

/// Lifecycle notifications delivered through [`AnalyzerHost::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PluginLoaded { plugin_id: String, module_path: PathBuf },
    PluginUnloaded { plugin_id: String },
    PluginEnabled { plugin_id: String },
    PluginDisabled { plugin_id: String },
    AnalysisCompleted { plugin_id: String, session_id: SessionId, issues_found: usize },
    FixesApplied { plugin_id: String, session_id: SessionId, applied: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHealth {
    pub plugin_id: String,
    pub healthy: bool,
    pub registered: bool,
    pub enabled: bool,
    pub sandbox_running: bool,
    pub uptime_secs: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub usage: SandboxUsage,
}

struct IndexedIssue {
    issue: Issue,
    fixes: Option<Vec<Fix>>,
}

pub struct AnalyzerHost {
    config: HostConfig,
    permissions: Arc<PermissionStore>,
    validator: PluginValidator,
    registry: PluginRegistry,
    registry_events: Mutex<mpsc::UnboundedReceiver<RegistryEvent>>,
    sandboxes: Mutex<HashMap<String, Arc<PluginSandbox>>>,
    cache: ResultCache,
    fix_engine: Arc<dyn FixEngine>,
    probe: Arc<dyn MemoryProbe>,
    issues: Mutex<HashMap<IssueId, IndexedIssue>>,
    events: broadcast::Sender<HostEvent>,
}

impl AnalyzerHost {
    /// Creates a host that loads `.wpk` rule packs.
    pub fn new(config: HostConfig) -> Self {
        Self::with_loader(config, Arc::new(PackageLoader))
    }

    pub fn with_loader(config: HostConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let permissions = Arc::new(
            PermissionStore::new(config.workspace_root.clone(), config.audit.capacity)
                .with_trusted_signers(config.trusted_signers.clone()),
        );
        let (registry, registry_events) = PluginRegistry::new(loader);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            validator: PluginValidator::new(Arc::clone(&permissions)),
            cache: ResultCache::new(&config.cache),
            fix_engine: Arc::new(TextFixEngine::new(config.fixes.history_limit)),
            probe: Arc::new(ProcessMemoryProbe),
            permissions,
            registry,
            registry_events: Mutex::new(registry_events),
            sandboxes: Mutex::new(HashMap::new()),
            issues: Mutex::new(HashMap::new()),
            events,
            config,
        }
    }

    /// Replaces the memory probe handed to sandboxes created afterwards.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_fix_engine(mut self, engine: Arc<dyn FixEngine>) -> Self {
        self.fix_engine = engine;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    // ================================================================
    // Loading / Unloading
    // ================================================================

    /// Inspects the modules in `directory` without loading them.
    pub fn discover(&self, directory: &Path) -> Vec<PluginDescriptor> {
        self.registry.discover(directory)
    }

    /// Validates, instantiates and starts every plugin in a module.
    ///
    /// Validation and compatibility failures reject the whole module.
    /// Individual plugins that fail to construct, initialize or start are
    /// skipped with a warning; the call fails only when nothing loaded.
    pub async fn load(&self, module_path: &Path) -> Result<LoadResult, HostError> {
        let validation = self.validator.validate(module_path);
        if !validation.valid {
            let reason = validation.error.clone().unwrap_or_else(|| {
                let mut reasons = validation.warnings.clone();
                if validation.signed && !validation.trusted {
                    reasons.push("module signer is not trusted".to_string());
                }
                reasons.join("; ")
            });
            warn!("Rejected module {:?}: {}", module_path, reason);
            return Err(HostError::ValidationFailed {
                path: module_path.to_path_buf(),
                reason,
            });
        }

        let descriptors = self.registry.loader().inspect(module_path)?;
        if descriptors.is_empty() {
            return Err(HostError::LoadFailed(format!(
                "{} declares no plugins",
                module_path.display()
            )));
        }
        for descriptor in &descriptors {
            self.registry.check_compatibility(descriptor)?;
        }

        let mut warnings = validation.warnings.clone();
        let mut loaded = Vec::new();
        let mut duplicates = 0;
        for descriptor in &descriptors {
            let plugin_id = descriptor.metadata.id.clone();
            if self.registry.contains(&plugin_id) {
                warn!(plugin_id = %plugin_id, "Plugin already loaded, skipping");
                warnings.push(format!("plugin '{plugin_id}' is already loaded"));
                duplicates += 1;
                continue;
            }

            let capability = match self.registry.loader().instantiate(module_path, descriptor) {
                Ok(capability) => capability,
                Err(e) => {
                    warn!(plugin_id = %plugin_id, "Instantiation failed: {}", e);
                    warnings.push(format!("plugin '{plugin_id}': {e}"));
                    continue;
                }
            };
            if let Err(e) = capability.initialize().await {
                warn!(plugin_id = %plugin_id, "Initialization failed: {}", e);
                warnings.push(format!("plugin '{plugin_id}': {e}"));
                continue;
            }

            if !self
                .registry
                .register(RegisteredPlugin::new(descriptor, Arc::clone(&capability)))
            {
                warnings.push(format!("plugin '{plugin_id}' is already loaded"));
                duplicates += 1;
                continue;
            }

            let sandbox = Arc::new(PluginSandbox::new(
                plugin_id.clone(),
                capability,
                Arc::clone(&self.permissions),
                self.config.sandbox.clone(),
                Arc::clone(&self.probe),
            ));
            if let Err(e) = sandbox.start() {
                warn!(plugin_id = %plugin_id, "Sandbox failed to start: {}", e);
                warnings.push(format!("plugin '{plugin_id}': {e}"));
                self.registry.unregister(&plugin_id);
                continue;
            }
            lock(&self.sandboxes).insert(plugin_id.clone(), sandbox);

            if self.permissions.get_permissions(&plugin_id).is_none() {
                self.permissions.set_permissions(&plugin_id, Grant::read_only());
            }

            let mut event = SecurityEvent::new(
                plugin_id.as_str(),
                SecurityEventType::PluginLoaded,
                "LoadPlugin",
                true,
            )
            .with_target(module_path)
            .with_metadata("version", descriptor.metadata.version.clone().into());
            if let Some(checksum) = &validation.checksum {
                event = event.with_metadata("checksum", checksum.clone().into());
            }
            self.permissions.log(event);

            info!(plugin_id = %plugin_id, module = %module_path.display(), "Plugin loaded");
            loaded.push(plugin_id);
        }
        self.pump_registry_events();

        let Some(first) = loaded.first().cloned() else {
            return Err(if duplicates == descriptors.len() {
                HostError::PluginAlreadyLoaded(descriptors[0].metadata.id.clone())
            } else {
                HostError::LoadFailed(warnings.join("; "))
            });
        };

        Ok(LoadResult {
            plugin_id: first,
            plugin_ids: loaded,
            warnings,
            validation,
        })
    }

    /// Disposes the plugin's sandbox and forgets everything held for it.
    /// Returns false for an unknown id.
    pub async fn unload(&self, plugin_id: &str) -> bool {
        let sandbox = lock(&self.sandboxes).remove(plugin_id);
        if let Some(sandbox) = &sandbox {
            sandbox.dispose().await;
        }
        let unregistered = self.registry.unregister(plugin_id);
        if sandbox.is_none() && !unregistered {
            debug!(plugin_id = %plugin_id, "Unload requested for unknown plugin");
            return false;
        }

        self.permissions.remove_permissions(plugin_id);
        let evicted = self.cache.invalidate_plugin(plugin_id);
        lock(&self.issues).retain(|_, indexed| indexed.issue.plugin_id != plugin_id);
        self.permissions.log(
            SecurityEvent::new(plugin_id, SecurityEventType::PluginUnloaded, "UnloadPlugin", true)
                .with_metadata("cache_entries_evicted", evicted.into()),
        );
        self.pump_registry_events();
        info!(plugin_id = %plugin_id, "Plugin unloaded");
        true
    }

    /// Forwards registry lifecycle events to host subscribers.
    pub fn pump_registry_events(&self) {
        let mut rx = lock(&self.registry_events);
        while let Ok(event) = rx.try_recv() {
            let event = match event {
                RegistryEvent::Registered { plugin_id, module_path } => {
                    HostEvent::PluginLoaded { plugin_id, module_path }
                }
                RegistryEvent::Unregistered { plugin_id } => HostEvent::PluginUnloaded { plugin_id },
            };
            self.emit(event);
        }
    }

    /// Disposes every sandbox. Plugins stay registered but unhealthy.
    pub async fn shutdown(&self) {
        let sandboxes: Vec<_> = lock(&self.sandboxes).drain().collect();
        for (plugin_id, sandbox) in sandboxes {
            sandbox.dispose().await;
            debug!(plugin_id = %plugin_id, "Sandbox released on shutdown");
        }
        info!("Analyzer host shut down");
    }

    // ================================================================
    // Plugin queries
    // ================================================================

    pub fn list(&self) -> Vec<PluginMetadata> {
        self.registry.list()
    }

    pub fn get_rules(&self, plugin_id: &str) -> Result<Vec<Rule>, HostError> {
        self.registry
            .get(plugin_id)
            .map(|p| p.rules.clone())
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))
    }

    pub fn set_enabled(&self, plugin_id: &str, enabled: bool) -> Result<(), HostError> {
        self.registry.set_enabled(plugin_id, enabled)?;
        let plugin_id = plugin_id.to_string();
        self.emit(if enabled {
            HostEvent::PluginEnabled { plugin_id }
        } else {
            HostEvent::PluginDisabled { plugin_id }
        });
        Ok(())
    }

    /// Reconfigures a plugin. Cached results for it are dropped since they
    /// may no longer match.
    pub fn configure(&self, plugin_id: &str, config: serde_json::Value) -> Result<(), HostError> {
        self.registry.configure(plugin_id, config)?;
        self.cache.invalidate_plugin(plugin_id);
        Ok(())
    }

    pub fn health(&self) -> Vec<PluginHealth> {
        let sandboxes = lock(&self.sandboxes).clone();
        let mut ids: Vec<String> = self.registry.list().into_iter().map(|m| m.id).collect();
        for id in sandboxes.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();

        let now = Utc::now();
        ids.into_iter()
            .map(|plugin_id| {
                let plugin = self.registry.get(&plugin_id);
                let sandbox = sandboxes.get(&plugin_id);
                let sandbox_running = sandbox.is_some_and(|s| s.is_healthy());
                let usage = sandbox.map(|s| s.usage()).unwrap_or_default();
                let enabled = plugin.as_ref().is_some_and(|p| p.is_enabled());
                let uptime_secs = plugin
                    .as_ref()
                    .map(|p| (now - p.loaded_at).num_seconds().max(0) as u64)
                    .unwrap_or(0);
                PluginHealth {
                    healthy: enabled && sandbox_running,
                    registered: plugin.is_some(),
                    enabled,
                    sandbox_running,
                    uptime_secs,
                    last_activity: usage.last_activity,
                    usage,
                    plugin_id,
                }
            })
            .collect()
    }

    // ================================================================
    // Analysis
    // ================================================================

    /// Analyses each requested file with one plugin.
    ///
    /// Missing, unreadable-by-grant, unsupported and oversized files are
    /// skipped. A file whose analysis fails is recorded as failed without
    /// affecting the others.
    pub async fn run_analysis(&self, request: AnalysisRequest) -> Result<AnalysisSession, HostError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let plugin_id = request.plugin_id.clone();
        let plugin = self
            .registry
            .get(&plugin_id)
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.clone()))?;
        if !plugin.is_enabled() {
            return Err(HostError::PluginDisabled(plugin_id));
        }
        let sandbox = self.sandbox(&plugin_id)?;
        let capabilities = plugin.capability.capabilities();

        let mut warnings = Vec::new();
        let mut file_results: Vec<AnalysisResult> = Vec::new();
        let mut issues: Vec<Issue> = Vec::new();
        let (mut skipped, mut failed, mut cache_hits) = (0usize, 0usize, 0usize);

        for requested in &request.files {
            let path = self.permissions.resolve(requested);
            if !path.is_file() {
                warnings.push(format!("file not found: {}", path.display()));
                skipped += 1;
                continue;
            }
            if !self
                .permissions
                .is_allowed(&plugin_id, &Operation::ReadFile, Some(&path))
            {
                info!(plugin_id = %plugin_id, file = %path.display(), "Skipping file without read permission");
                warnings.push(format!("read permission denied: {}", path.display()));
                skipped += 1;
                continue;
            }
            if !plugin.capability.can_analyze(&path) {
                debug!(plugin_id = %plugin_id, file = %path.display(), "File type not supported");
                skipped += 1;
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    failed += 1;
                    file_results.push(AnalysisResult::failed(&path, e.to_string()));
                    continue;
                }
            };
            if capabilities.max_file_size > 0 && bytes.len() as u64 > capabilities.max_file_size {
                warnings.push(format!(
                    "file too large ({} bytes, limit {}): {}",
                    bytes.len(),
                    capabilities.max_file_size,
                    path.display()
                ));
                skipped += 1;
                continue;
            }

            let hash = content_hash(&bytes);
            if let Some(mut hit) = self.cache.get(&plugin_id, &path, &hash) {
                cache_hits += 1;
                // Issue ids are unique per run.
                for issue in &mut hit.issues {
                    issue.id = IssueId::new();
                }
                issues.extend(hit.issues.iter().cloned());
                file_results.push(hit);
                continue;
            }

            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(_) => {
                    failed += 1;
                    file_results.push(AnalysisResult::failed(&path, "file is not valid UTF-8"));
                    continue;
                }
            };
            match sandbox.execute_analysis(&path, content).await {
                Ok(result) => {
                    self.cache.put(&plugin_id, &path, &hash, &result);
                    issues.extend(result.issues.iter().cloned());
                    file_results.push(result);
                }
                Err(e) => {
                    warn!(plugin_id = %plugin_id, file = %path.display(), "Analysis failed: {}", e);
                    failed += 1;
                    file_results.push(AnalysisResult::failed(&path, e.to_string()));
                }
            }
        }

        if let Some(filter) = &request.rule_filter {
            issues.retain(|issue| filter.contains(&issue.rule_id));
        }

        {
            let mut index = lock(&self.issues);
            for issue in &issues {
                index.insert(issue.id, IndexedIssue { issue: issue.clone(), fixes: None });
            }
        }

        let mut fixes_generated = 0;
        if request.generate_fixes && capabilities.can_fix {
            let mut contents: HashMap<PathBuf, String> = HashMap::new();
            for issue in &issues {
                match self.fixes_for(&sandbox, issue, &mut contents).await {
                    Ok(fixes) => fixes_generated += fixes.len(),
                    Err(e) => warnings.push(format!("fix generation failed for {}: {e}", issue.id)),
                }
            }
        }

        let files_analyzed = file_results.iter().filter(|r| r.success).count();
        let mut statistics = Statistics::new();
        statistics.insert("files_requested".into(), request.files.len().into());
        statistics.insert("files_analyzed".into(), files_analyzed.into());
        statistics.insert("files_skipped".into(), skipped.into());
        statistics.insert("files_failed".into(), failed.into());
        statistics.insert("cache_hits".into(), cache_hits.into());
        statistics.insert("issues_found".into(), issues.len().into());
        statistics.insert("fixes_generated".into(), fixes_generated.into());
        statistics.insert("duration_ms".into(), (timer.elapsed().as_millis() as u64).into());

        let session = AnalysisSession {
            session_id: SessionId::new(),
            plugin_id: plugin_id.clone(),
            started_at,
            ended_at: Utc::now(),
            success: failed == 0,
            file_results,
            issues,
            warnings,
            statistics,
        };
        info!(
            plugin_id = %plugin_id,
            session_id = %session.session_id,
            files = files_analyzed,
            issues = session.issues.len(),
            "Analysis completed"
        );
        self.emit(HostEvent::AnalysisCompleted {
            plugin_id,
            session_id: session.session_id,
            issues_found: session.issues.len(),
        });
        Ok(session)
    }

    /// Fixes for previously reported issues. Unknown issue ids and issues
    /// raised by other plugins are ignored.
    pub async fn get_fixes(&self, plugin_id: &str, issue_ids: &[IssueId]) -> Result<Vec<Fix>, HostError> {
        let plugin = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
        if !plugin.is_enabled() {
            return Err(HostError::PluginDisabled(plugin_id.to_string()));
        }
        let sandbox = self.sandbox(plugin_id)?;

        let mut contents = HashMap::new();
        let mut fixes = Vec::new();
        for id in issue_ids {
            let issue = match lock(&self.issues).get(id) {
                Some(indexed) if indexed.issue.plugin_id == plugin_id => indexed.issue.clone(),
                _ => {
                    debug!(plugin_id = %plugin_id, issue_id = %id, "Issue not indexed for plugin");
                    continue;
                }
            };
            match self.fixes_for(&sandbox, &issue, &mut contents).await {
                Ok(found) => fixes.extend(found),
                Err(e) => warn!(plugin_id = %plugin_id, issue_id = %id, "Fix generation failed: {}", e),
            }
        }
        Ok(fixes)
    }

    /// Applies fixes for previously reported issues. Fixes that would edit
    /// files outside the workspace root are rejected before the fix engine
    /// sees them.
    pub async fn apply_fixes(&self, request: FixApplyRequest) -> Result<FixSession, HostError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let candidates = self.get_fixes(&request.plugin_id, &request.issue_ids).await?;
        let requested: Vec<Fix> = match &request.fix_ids {
            Some(ids) => candidates.into_iter().filter(|f| ids.contains(&f.id)).collect(),
            None => candidates,
        };

        let (inside, outside): (Vec<Fix>, Vec<Fix>) = requested.into_iter().partition(|fix| {
            fix.edits
                .iter()
                .all(|edit| self.permissions.is_within_workspace(&edit.file_path))
        });
        for fix in &outside {
            warn!(plugin_id = %request.plugin_id, fix_id = %fix.id, "Fix edits files outside the workspace");
        }

        let issues: Vec<Issue> = {
            let index = lock(&self.issues);
            request
                .issue_ids
                .iter()
                .filter_map(|id| index.get(id))
                .filter(|indexed| indexed.issue.plugin_id == request.plugin_id)
                .map(|indexed| indexed.issue.clone())
                .collect()
        };
        let options = ApplyOptions {
            create_backup: request.create_backup,
            resolve_conflicts: request.resolve_conflicts,
            preview_only: request.preview_only,
            strategy: request.conflict_strategy,
        };
        let outcome = self.fix_engine.apply(&issues, &inside, &options).await?;

        for path in &outcome.modified_files {
            self.cache.invalidate_file(path);
        }

        let mut fix_outcomes: Vec<FixOutcome> = outside
            .iter()
            .map(|fix| FixOutcome::skipped(fix, "edits files outside the workspace root"))
            .collect();
        fix_outcomes.extend(outcome.fix_outcomes);
        let applied = fix_outcomes.iter().filter(|o| o.applied).count();

        let mut statistics = Statistics::new();
        statistics.insert("fixes_requested".into(), (inside.len() + outside.len()).into());
        statistics.insert("fixes_applied".into(), applied.into());
        statistics.insert("fixes_rejected".into(), outside.len().into());
        statistics.insert("conflicts".into(), (outcome.conflicts.len() + outcome.resolved_conflicts.len()).into());
        statistics.insert("files_modified".into(), outcome.modified_files.len().into());
        statistics.insert("duration_ms".into(), (timer.elapsed().as_millis() as u64).into());

        let session = FixSession {
            session_id: outcome.session_id,
            plugin_id: request.plugin_id.clone(),
            started_at,
            ended_at: Utc::now(),
            success: outcome.success && outside.is_empty(),
            preview_only: request.preview_only,
            modified_files: outcome.modified_files,
            fix_outcomes,
            conflicts: outcome.conflicts,
            resolved_conflicts: outcome.resolved_conflicts,
            previews: outcome.previews,
            statistics,
        };
        if !request.preview_only {
            self.emit(HostEvent::FixesApplied {
                plugin_id: request.plugin_id,
                session_id: session.session_id,
                applied,
            });
        }
        Ok(session)
    }

    pub fn fix_history(&self, max_sessions: usize) -> Vec<FixSessionSummary> {
        self.fix_engine.history(max_sessions)
    }

    pub async fn rollback(&self, session_id: SessionId) -> Result<RollbackResult, HostError> {
        let result = self.fix_engine.rollback(session_id).await?;
        for path in &result.restored_files {
            self.cache.invalidate_file(path);
        }
        Ok(result)
    }

    // ================================================================
    // Permissions and cache
    // ================================================================

    pub fn get_permissions(&self, plugin_id: &str) -> Option<Grant> {
        self.permissions.get_permissions(plugin_id)
    }

    pub fn set_permissions(&self, plugin_id: &str, grant: Grant) {
        self.permissions.set_permissions(plugin_id, grant);
    }

    /// Most recent audit records, oldest first.
    pub fn security_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.permissions.audit_log().recent(limit)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ================================================================
    // Internals
    // ================================================================

    fn sandbox(&self, plugin_id: &str) -> Result<Arc<PluginSandbox>, HostError> {
        let sandbox = lock(&self.sandboxes)
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| HostError::Unhealthy(format!("no sandbox for '{plugin_id}'")))?;
        if !sandbox.is_healthy() {
            return Err(HostError::Unhealthy(plugin_id.to_string()));
        }
        Ok(sandbox)
    }

    /// Returns the indexed fixes for `issue`, asking the sandbox on first use.
    async fn fixes_for(
        &self,
        sandbox: &PluginSandbox,
        issue: &Issue,
        contents: &mut HashMap<PathBuf, String>,
    ) -> Result<Vec<Fix>, HostError> {
        if let Some(fixes) = lock(&self.issues).get(&issue.id).and_then(|i| i.fixes.clone()) {
            return Ok(fixes);
        }

        let content = match contents.get(&issue.file_path) {
            Some(content) => content.clone(),
            None => {
                let content = tokio::fs::read_to_string(&issue.file_path).await?;
                contents.insert(issue.file_path.clone(), content.clone());
                content
            }
        };
        let fixes = sandbox
            .execute_fix(FixRequest {
                issue: issue.clone(),
                content,
            })
            .await?;

        if let Some(indexed) = lock(&self.issues).get_mut(&issue.id) {
            indexed.fixes = Some(fixes.clone());
        }
        Ok(fixes)
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            debug!("Host event dropped, no subscribers");
        }
    }
}
