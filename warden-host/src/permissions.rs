//! Capability-based permission model and security audit log.
//!
//! Every plugin holds at most one [`Grant`]. Plugins without a grant are
//! denied everything. Path-scoped checks apply in this order:
//! 1. deny-list prefix match rejects
//! 2. a non-empty allow-list must contain a matching prefix
//! 3. otherwise the path must sit under the workspace root

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::lock;

/// An author key the host trusts. `public_key` is hex-encoded Ed25519.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSigner {
    pub name: String,
    pub public_key: String,
}

impl TrustedSigner {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_key: public_key.into(),
        }
    }
}

/// Operation a plugin asks to perform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadFile,
    WriteFile,
    ExecuteCommand,
    NetworkAccess,
    FileSystemAccess,
    /// Looked up by name in [`Grant::custom_operations`].
    Custom(String),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Self::ReadFile => "ReadFile",
            Self::WriteFile => "WriteFile",
            Self::ExecuteCommand => "ExecuteCommand",
            Self::NetworkAccess => "NetworkAccess",
            Self::FileSystemAccess => "FileSystemAccess",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for Operation {
    fn from(name: &str) -> Self {
        match name {
            "ReadFile" => Self::ReadFile,
            "WriteFile" => Self::WriteFile,
            "ExecuteCommand" => Self::ExecuteCommand,
            "NetworkAccess" => Self::NetworkAccess,
            "FileSystemAccess" => Self::FileSystemAccess,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Capabilities granted to one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub read_files: bool,
    pub write_files: bool,
    pub execute_commands: bool,
    pub network_access: bool,
    pub filesystem_access: bool,
    /// Path prefixes the plugin is confined to. Empty means the workspace root.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    /// Path prefixes that are always rejected.
    #[serde(default)]
    pub denied_paths: Vec<PathBuf>,
    #[serde(default)]
    pub custom_operations: BTreeSet<String>,
}

impl Grant {
    /// Read-only, workspace-scoped. Granted to every plugin on load.
    pub fn read_only() -> Self {
        Self {
            read_files: true,
            write_files: false,
            execute_commands: false,
            network_access: false,
            filesystem_access: false,
            allowed_paths: Vec::new(),
            denied_paths: Vec::new(),
            custom_operations: BTreeSet::new(),
        }
    }

    /// Nothing granted.
    pub fn none() -> Self {
        Self {
            read_files: false,
            ..Self::read_only()
        }
    }

    fn permits(&self, operation: &Operation) -> bool {
        match operation {
            Operation::ReadFile => self.read_files,
            Operation::WriteFile => self.write_files,
            Operation::ExecuteCommand => self.execute_commands,
            Operation::NetworkAccess => self.network_access,
            Operation::FileSystemAccess => self.filesystem_access,
            Operation::Custom(name) => self.custom_operations.contains(name),
        }
    }
}

impl Default for Grant {
    fn default() -> Self {
        Self::read_only()
    }
}

/// Kind of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    PermissionCheck,
    PermissionChanged,
    PermissionRemoved,
    ModuleValidated,
    PluginLoaded,
    PluginUnloaded,
    SignerChanged,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub plugin_id: String,
    pub event_type: SecurityEventType,
    pub operation: String,
    pub target_path: Option<PathBuf>,
    pub success: bool,
    pub details: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        plugin_id: impl Into<String>,
        event_type: SecurityEventType,
        operation: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            event_type,
            operation: operation.into(),
            target_path: None,
            success,
            details: String::new(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Fixed-capacity FIFO of security events. The oldest record is evicted
/// once the log is full.
pub struct AuditLog {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record(&self, event: SecurityEvent) {
        if event.success {
            debug!(
                plugin_id = %event.plugin_id,
                event_type = ?event.event_type,
                operation = %event.operation,
                "security event"
            );
        } else {
            warn!(
                plugin_id = %event.plugin_id,
                event_type = ?event.event_type,
                operation = %event.operation,
                target = ?event.target_path,
                details = %event.details,
                "security event denied"
            );
        }

        let mut events = lock(&self.events);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = lock(&self.events);
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn for_plugin(&self, plugin_id: &str) -> Vec<SecurityEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.plugin_id == plugin_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Removes `.` and resolves `..` without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Per-plugin grants, trusted signers and the audit log.
pub struct PermissionStore {
    workspace_root: Option<PathBuf>,
    grants: Mutex<HashMap<String, Grant>>,
    trusted_signers: Mutex<Vec<TrustedSigner>>,
    audit: AuditLog,
}

impl PermissionStore {
    pub fn new(workspace_root: Option<PathBuf>, audit_capacity: usize) -> Self {
        Self {
            workspace_root: workspace_root.map(|r| normalize_path(&r)),
            grants: Mutex::new(HashMap::new()),
            trusted_signers: Mutex::new(Vec::new()),
            audit: AuditLog::new(audit_capacity),
        }
    }

    #[must_use]
    pub fn with_trusted_signers(self, signers: Vec<TrustedSigner>) -> Self {
        *lock(&self.trusted_signers) = signers;
        self
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    /// Resolves `path` against the workspace root and normalizes it.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => normalize_path(&root.join(path)),
            _ => normalize_path(path),
        }
    }

    pub fn is_within_workspace(&self, path: &Path) -> bool {
        match &self.workspace_root {
            Some(root) => self.resolve(path).starts_with(root),
            None => false,
        }
    }

    /// Decides whether `plugin_id` may perform `operation`, optionally on
    /// `target`. The decision is audited before returning.
    pub fn is_allowed(&self, plugin_id: &str, operation: &Operation, target: Option<&Path>) -> bool {
        let grant = lock(&self.grants).get(plugin_id).cloned();

        let (allowed, reason) = match grant {
            None => (false, "no grant for plugin".to_string()),
            Some(grant) if !grant.permits(operation) => {
                (false, format!("{operation} not granted"))
            }
            Some(grant) => match target {
                None => (true, String::new()),
                Some(path) => match self.check_path(&grant, path) {
                    Ok(()) => (true, String::new()),
                    Err(reason) => (false, reason),
                },
            },
        };

        let mut event = SecurityEvent::new(
            plugin_id,
            SecurityEventType::PermissionCheck,
            operation.name(),
            allowed,
        )
        .with_details(reason);
        if let Some(path) = target {
            event = event.with_target(path);
        }
        self.audit.record(event);
        allowed
    }

    fn check_path(&self, grant: &Grant, path: &Path) -> Result<(), String> {
        let path = self.resolve(path);

        if grant
            .denied_paths
            .iter()
            .any(|denied| path.starts_with(self.resolve(denied)))
        {
            return Err(format!("{} matches a denied path", path.display()));
        }

        if !grant.allowed_paths.is_empty() {
            return if grant
                .allowed_paths
                .iter()
                .any(|allowed| path.starts_with(self.resolve(allowed)))
            {
                Ok(())
            } else {
                Err(format!("{} is outside the allowed paths", path.display()))
            };
        }

        match &self.workspace_root {
            Some(root) if path.starts_with(root) => Ok(()),
            Some(_) => Err(format!("{} is outside the workspace", path.display())),
            None => Err("no workspace root configured".to_string()),
        }
    }

    pub fn get_permissions(&self, plugin_id: &str) -> Option<Grant> {
        lock(&self.grants).get(plugin_id).cloned()
    }

    pub fn set_permissions(&self, plugin_id: &str, grant: Grant) {
        let details = serde_json::to_value(&grant).unwrap_or(serde_json::Value::Null);
        lock(&self.grants).insert(plugin_id.to_string(), grant);
        info!(plugin_id = %plugin_id, "Permissions updated");
        self.audit.record(
            SecurityEvent::new(plugin_id, SecurityEventType::PermissionChanged, "SetPermissions", true)
                .with_metadata("grant", details),
        );
    }

    /// Drops the plugin's grant. Returns false when it had none.
    pub fn remove_permissions(&self, plugin_id: &str) -> bool {
        let removed = lock(&self.grants).remove(plugin_id).is_some();
        self.audit.record(SecurityEvent::new(
            plugin_id,
            SecurityEventType::PermissionRemoved,
            "RemovePermissions",
            removed,
        ));
        removed
    }

    pub fn log(&self, event: SecurityEvent) {
        self.audit.record(event);
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn trusted_signers(&self) -> Vec<TrustedSigner> {
        lock(&self.trusted_signers).clone()
    }

    /// Looks up a trusted signer by hex public key, ignoring case.
    pub fn find_trusted_signer(&self, public_key_hex: &str) -> Option<TrustedSigner> {
        lock(&self.trusted_signers)
            .iter()
            .find(|s| s.public_key.eq_ignore_ascii_case(public_key_hex.trim()))
            .cloned()
    }

    /// Adds a signer, replacing any existing one with the same name.
    pub fn add_trusted_signer(&self, signer: TrustedSigner) {
        let name = signer.name.clone();
        {
            let mut signers = lock(&self.trusted_signers);
            signers.retain(|s| s.name != signer.name);
            signers.push(signer);
        }
        self.audit.record(
            SecurityEvent::new("host", SecurityEventType::SignerChanged, "AddTrustedSigner", true)
                .with_details(name),
        );
    }

    pub fn remove_trusted_signer(&self, name: &str) -> bool {
        let removed = {
            let mut signers = lock(&self.trusted_signers);
            let before = signers.len();
            signers.retain(|s| s.name != name);
            signers.len() != before
        };
        self.audit.record(
            SecurityEvent::new("host", SecurityEventType::SignerChanged, "RemoveTrustedSigner", removed)
                .with_details(name),
        );
        removed
    }
}
