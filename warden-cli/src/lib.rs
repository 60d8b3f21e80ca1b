//! Commands behind the `warden` binary.
//!
//! Each command returns a serializable report; `main.rs` prints it as
//! JSON. Fix sessions applied from the command line also write their
//! original file contents under the state directory, so `rollback` works
//! from a later invocation.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_host::{AnalyzerHost, HostConfig, PermissionStore, PluginValidator, ValidationResult};
use warden_package::{KeyPair, ModuleManifest, PackageBuilder, PluginPackage, SigningKey};
use warden_types::{
    AnalysisRequest, AnalysisSession, ConflictStrategy, FixApplyRequest, FixSession,
    RollbackResult, SessionId,
};

/// Directory under the workspace root holding fix backups.
pub const STATE_DIR: &str = ".warden";

// ================================================================
// Keys and packages
// ================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenReport {
    pub secret_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub public_key: String,
}

/// Writes a new signing key pair as `<name>.key` and `<name>.pub`.
pub fn keygen(out_dir: &Path, name: &str) -> Result<KeygenReport> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let secret_key_path = out_dir.join(format!("{name}.key"));
    if secret_key_path.exists() {
        bail!("{} already exists", secret_key_path.display());
    }

    let keys = KeyPair::generate();
    let public_key = keys.verifying_key.to_hex();
    let public_key_path = out_dir.join(format!("{name}.pub"));
    fs::write(&secret_key_path, keys.signing_key.to_hex())
        .context("Failed to write secret key")?;
    fs::write(&public_key_path, &public_key).context("Failed to write public key")?;
    info!("Generated key pair '{}'", name);

    Ok(KeygenReport {
        secret_key_path,
        public_key_path,
        public_key,
    })
}

#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub manifest: PathBuf,
    pub output: PathBuf,
    pub signing_key: Option<PathBuf>,
    pub readme: Option<PathBuf>,
    pub include: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackReport {
    pub path: PathBuf,
    pub plugins: Vec<String>,
    pub content_hash: String,
    pub signed: bool,
}

/// Builds a `.wpk` module from a `manifest.toml`.
pub fn pack(options: &PackOptions) -> Result<PackReport> {
    let text = fs::read_to_string(&options.manifest)
        .with_context(|| format!("Failed to read {}", options.manifest.display()))?;
    let manifest: ModuleManifest = toml::from_str(&text).context("Failed to parse manifest")?;

    let mut builder = PackageBuilder::new(manifest);
    if let Some(readme) = &options.readme {
        builder = builder.readme(fs::read(readme).context("Failed to read README")?);
    }
    for file in &options.include {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid file name: {}", file.display()))?;
        let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        builder = builder.add_file(name, data);
    }
    if let Some(key_path) = &options.signing_key {
        let hex = fs::read_to_string(key_path).context("Failed to read signing key")?;
        builder = builder.sign(&SigningKey::from_hex(hex.trim())?);
    }
    builder.write_to(&options.output)?;

    let package = PluginPackage::open_path(&options.output)?;
    let signed = package.verify_embedded().is_ok();
    info!("Packed {} ({} plugins)", options.output.display(), package.manifest.plugins.len());
    Ok(PackReport {
        path: options.output.clone(),
        plugins: package.manifest.plugins.iter().map(|p| p.id.clone()).collect(),
        content_hash: package.content_hash(),
        signed,
    })
}

/// Validates a module against the configured trusted signers without
/// loading it.
pub fn validate(config: &HostConfig, module: &Path) -> ValidationResult {
    let permissions = Arc::new(
        PermissionStore::new(config.workspace_root.clone(), config.audit.capacity)
            .with_trusted_signers(config.trusted_signers.clone()),
    );
    PluginValidator::new(permissions).validate(module)
}

// ================================================================
// Analysis and fixes
// ================================================================

/// Expands directories into the files beneath them, skipping hidden
/// entries. The result is sorted and deduplicated.
pub fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else {
            warn!("Cannot read directory {:?}", dir);
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if path.is_dir() {
                walk(&path, out);
            } else {
                out.push(path);
            }
        }
    }

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk(path, &mut files);
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Loads every module and returns the plugin ids to run: `plugin` when
/// given, otherwise everything that loaded.
async fn load_modules(host: &AnalyzerHost, modules: &[PathBuf], plugin: Option<&str>) -> Result<Vec<String>> {
    let mut loaded = Vec::new();
    for module in modules {
        let result = host
            .load(module)
            .await
            .with_context(|| format!("Failed to load {}", module.display()))?;
        for warning in &result.warnings {
            warn!("{}: {}", module.display(), warning);
        }
        loaded.extend(result.plugin_ids);
    }

    match plugin {
        Some(id) if loaded.iter().any(|p| p == id) => Ok(vec![id.to_string()]),
        Some(id) => bail!("plugin '{id}' is not provided by the given modules"),
        None if loaded.is_empty() => bail!("no plugins loaded"),
        None => Ok(loaded),
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub modules: Vec<PathBuf>,
    pub plugin: Option<String>,
    pub files: Vec<PathBuf>,
    pub generate_fixes: bool,
}

pub async fn analyze(host: &AnalyzerHost, options: &AnalyzeOptions) -> Result<Vec<AnalysisSession>> {
    let plugins = load_modules(host, &options.modules, options.plugin.as_deref()).await?;
    let files = collect_files(&options.files);

    let mut sessions = Vec::new();
    for plugin_id in plugins {
        let mut request = AnalysisRequest::new(plugin_id.clone(), files.clone());
        request.generate_fixes = options.generate_fixes;
        let session = host
            .run_analysis(request)
            .await
            .with_context(|| format!("Analysis with '{plugin_id}' failed"))?;
        sessions.push(session);
    }
    Ok(sessions)
}

#[derive(Debug, Clone)]
pub struct FixOptions {
    pub analyze: AnalyzeOptions,
    pub preview: bool,
    pub strategy: ConflictStrategy,
    pub create_backup: bool,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub session: FixSession,
    /// Backup written for `warden rollback`, when files were modified.
    pub backup: Option<PathBuf>,
}

/// Original file contents of one applied fix session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBackup {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub files: BTreeMap<PathBuf, String>,
}

fn backup_path(state_dir: &Path, session_id: SessionId) -> PathBuf {
    state_dir.join(format!("{session_id}.json"))
}

/// Analyses, then applies every available fix, one session per plugin.
pub async fn fix(host: &AnalyzerHost, options: &FixOptions) -> Result<Vec<FixReport>> {
    let sessions = analyze(host, &options.analyze).await?;

    let mut reports = Vec::new();
    for analysis in sessions {
        let issue_ids: Vec<_> = analysis.issues.iter().map(|i| i.id).collect();
        if issue_ids.is_empty() {
            debug!(plugin_id = %analysis.plugin_id, "No issues to fix");
            continue;
        }

        let fixes = host.get_fixes(&analysis.plugin_id, &issue_ids).await?;
        let mut originals = BTreeMap::new();
        for fix in &fixes {
            for file in fix.affected_files() {
                if !originals.contains_key(file) {
                    if let Ok(content) = fs::read_to_string(file) {
                        originals.insert(file.to_path_buf(), content);
                    }
                }
            }
        }

        let mut request = FixApplyRequest::new(analysis.plugin_id.clone(), issue_ids);
        request.preview_only = options.preview;
        request.conflict_strategy = options.strategy;
        request.create_backup = options.create_backup;
        let session = host.apply_fixes(request).await?;

        let backup = if options.create_backup && !options.preview && !session.modified_files.is_empty() {
            let backup = SessionBackup {
                session_id: session.session_id,
                created_at: Utc::now(),
                files: originals
                    .into_iter()
                    .filter(|(path, _)| session.modified_files.contains(path))
                    .collect(),
            };
            fs::create_dir_all(&options.state_dir).context("Failed to create state directory")?;
            let path = backup_path(&options.state_dir, session.session_id);
            fs::write(&path, serde_json::to_vec_pretty(&backup)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Some(path)
        } else {
            None
        };
        reports.push(FixReport { session, backup });
    }
    Ok(reports)
}

/// Restores the files recorded for `session_id` and removes its backup.
pub fn rollback(state_dir: &Path, session_id: SessionId) -> Result<RollbackResult> {
    let path = backup_path(state_dir, session_id);
    let data = fs::read(&path).with_context(|| format!("No backup for session {session_id}"))?;
    let backup: SessionBackup = serde_json::from_slice(&data).context("Corrupt backup file")?;

    let mut result = RollbackResult::default();
    for (file, content) in backup.files {
        match fs::write(&file, content) {
            Ok(()) => result.restored_files.push(file),
            Err(e) => {
                warn!("Failed to restore {:?}: {}", file, e);
                result.failed_files.push(file);
            }
        }
    }
    if result.failed_files.is_empty() {
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    info!("Rolled back session {}", session_id);
    Ok(result)
}
