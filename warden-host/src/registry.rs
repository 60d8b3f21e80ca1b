//! Registry of loaded plugin instances.
//!
//! Lifecycle changes are published as [`RegistryEvent`]s on an unbounded
//! channel; the receiver is handed to the owner at construction.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warden_types::{DiagnosticCapability, PluginMetadata, Rule, HOST_API_VERSION};

use crate::error::HostError;
use crate::loader::{ModuleLoader, PluginDescriptor};
use crate::lock;

/// File extension of plugin modules picked up by discovery.
pub const MODULE_EXTENSION: &str = "wpk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { plugin_id: String, module_path: PathBuf },
    Unregistered { plugin_id: String },
}

/// A live plugin instance and its host-side state.
pub struct RegisteredPlugin {
    pub metadata: PluginMetadata,
    pub capability: Arc<dyn DiagnosticCapability>,
    pub rules: Vec<Rule>,
    pub module_path: PathBuf,
    pub loaded_at: DateTime<Utc>,
    enabled: AtomicBool,
    config: Mutex<serde_json::Value>,
}

impl RegisteredPlugin {
    pub fn new(descriptor: &PluginDescriptor, capability: Arc<dyn DiagnosticCapability>) -> Self {
        let rules = capability.rules();
        Self {
            metadata: descriptor.metadata.clone(),
            capability,
            rules,
            module_path: descriptor.module_path.clone(),
            loaded_at: Utc::now(),
            enabled: AtomicBool::new(true),
            config: Mutex::new(serde_json::Value::Null),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn config(&self) -> serde_json::Value {
        lock(&self.config).clone()
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("id", &self.metadata.id)
            .field("module_path", &self.module_path)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

pub struct PluginRegistry {
    loader: Arc<dyn ModuleLoader>,
    plugins: Mutex<HashMap<String, Arc<RegisteredPlugin>>>,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl PluginRegistry {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            loader,
            plugins: Mutex::new(HashMap::new()),
            events,
        };
        (registry, rx)
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    /// Inspects every module file directly under `directory`. Modules that
    /// fail inspection are logged and skipped.
    pub fn discover(&self, directory: &Path) -> Vec<PluginDescriptor> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read plugin directory {:?}: {}", directory, e);
                return Vec::new();
            }
        };

        let mut modules: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(MODULE_EXTENSION))
            })
            .collect();
        modules.sort();

        let mut descriptors = Vec::new();
        for module in modules {
            match self.loader.inspect(&module) {
                Ok(found) => {
                    debug!(module = %module.display(), plugins = found.len(), "Module inspected");
                    descriptors.extend(found);
                }
                Err(e) => warn!("Skipping module {:?}: {}", module, e),
            }
        }
        descriptors
    }

    /// Rejects descriptors built against another host API or carrying an
    /// unparseable version.
    pub fn check_compatibility(&self, descriptor: &PluginDescriptor) -> Result<(), HostError> {
        let meta = &descriptor.metadata;
        if meta.host_api_version != HOST_API_VERSION {
            return Err(HostError::IncompatibleModule {
                plugin_id: meta.id.clone(),
                detail: format!(
                    "built for host API v{}, this host provides v{}",
                    meta.host_api_version, HOST_API_VERSION
                ),
            });
        }
        if !is_semver(&meta.version) {
            return Err(HostError::IncompatibleModule {
                plugin_id: meta.id.clone(),
                detail: format!("version '{}' is not major.minor.patch", meta.version),
            });
        }
        Ok(())
    }

    /// Adds a plugin. Returns false when the id is already registered.
    pub fn register(&self, plugin: RegisteredPlugin) -> bool {
        let plugin_id = plugin.metadata.id.clone();
        let module_path = plugin.module_path.clone();
        {
            let mut plugins = lock(&self.plugins);
            if plugins.contains_key(&plugin_id) {
                return false;
            }
            plugins.insert(plugin_id.clone(), Arc::new(plugin));
        }
        info!(plugin_id = %plugin_id, "Plugin registered");
        self.emit(RegistryEvent::Registered { plugin_id, module_path });
        true
    }

    pub fn unregister(&self, plugin_id: &str) -> bool {
        let removed = lock(&self.plugins).remove(plugin_id).is_some();
        if removed {
            info!(plugin_id = %plugin_id, "Plugin unregistered");
            self.emit(RegistryEvent::Unregistered {
                plugin_id: plugin_id.to_string(),
            });
        }
        removed
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<RegisteredPlugin>> {
        lock(&self.plugins).get(plugin_id).cloned()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        lock(&self.plugins).contains_key(plugin_id)
    }

    /// Metadata of every registered plugin, sorted by id.
    pub fn list(&self) -> Vec<PluginMetadata> {
        let mut list: Vec<_> = lock(&self.plugins)
            .values()
            .map(|p| p.metadata.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn set_enabled(&self, plugin_id: &str, enabled: bool) -> Result<(), HostError> {
        let plugin = self
            .get(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
        plugin.enabled.store(enabled, Ordering::Release);
        info!(plugin_id = %plugin_id, enabled, "Plugin enablement changed");
        Ok(())
    }

    /// Passes `config` to the plugin and stores it once accepted.
    pub fn configure(&self, plugin_id: &str, config: serde_json::Value) -> Result<(), HostError> {
        let plugin = self
            .get(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
        plugin
            .capability
            .configure(&config)
            .map_err(|e| HostError::PluginFailed {
                plugin_id: plugin_id.to_string(),
                message: e.to_string(),
            })?;
        *lock(&plugin.config) = config;
        debug!(plugin_id = %plugin_id, "Plugin configured");
        Ok(())
    }

    fn emit(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            debug!("Registry event dropped, receiver closed");
        }
    }
}

/// `major.minor.patch` with optional pre-release or build suffix.
fn is_semver(version: &str) -> bool {
    let core = version
        .split(['-', '+'])
        .next()
        .unwrap_or_default();
    let parts: Vec<_> = core.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.parse::<u64>().is_ok())
}
