//! Module loading behind the [`ModuleLoader`] trait.
//!
//! `inspect` is cheap and only reads metadata; `instantiate` builds the
//! plugin instance. The registry and host only see the trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use warden_package::PluginPackage;
use warden_types::{DiagnosticCapability, PluginMetadata};

use crate::error::HostError;
use crate::lock;
use crate::pattern::PatternPlugin;

/// A plugin found inside a module, before instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub metadata: PluginMetadata,
    pub module_path: PathBuf,
}

pub trait ModuleLoader: Send + Sync {
    /// Lists the plugins a module declares.
    fn inspect(&self, module_path: &Path) -> Result<Vec<PluginDescriptor>, HostError>;

    /// Constructs the plugin described by `descriptor`.
    fn instantiate(
        &self,
        module_path: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<Arc<dyn DiagnosticCapability>, HostError>;
}

/// Loads `.wpk` rule packs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageLoader;

impl ModuleLoader for PackageLoader {
    fn inspect(&self, module_path: &Path) -> Result<Vec<PluginDescriptor>, HostError> {
        let package = PluginPackage::open_path(module_path)?;
        let api_version = package.manifest.host_api_version;
        Ok(package
            .manifest
            .plugins
            .iter()
            .map(|p| PluginDescriptor {
                metadata: p.metadata(api_version),
                module_path: module_path.to_path_buf(),
            })
            .collect())
    }

    fn instantiate(
        &self,
        module_path: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<Arc<dyn DiagnosticCapability>, HostError> {
        let package = PluginPackage::open_path(module_path)?;
        let manifest = package
            .manifest
            .plugins
            .iter()
            .find(|p| p.id == descriptor.metadata.id)
            .ok_or_else(|| HostError::PluginNotFound(descriptor.metadata.id.clone()))?;
        let plugin = PatternPlugin::from_manifest(manifest, package.manifest.host_api_version)?;
        debug!(plugin_id = %descriptor.metadata.id, "Rule pack plugin instantiated");
        Ok(Arc::new(plugin))
    }
}

/// Builds a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn DiagnosticCapability> + Send + Sync>;

/// In-process plugins registered by module path. Used when embedding the
/// host or in tests.
#[derive(Default)]
pub struct StaticLoader {
    modules: Mutex<HashMap<PathBuf, Vec<PluginFactory>>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin to the module at `module_path`.
    pub fn register<F>(&self, module_path: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> Arc<dyn DiagnosticCapability> + Send + Sync + 'static,
    {
        lock(&self.modules)
            .entry(module_path.into())
            .or_default()
            .push(Arc::new(factory));
    }

    fn factories(&self, module_path: &Path) -> Result<Vec<PluginFactory>, HostError> {
        lock(&self.modules)
            .get(module_path)
            .cloned()
            .ok_or_else(|| HostError::LoadFailed(format!("no static module at {}", module_path.display())))
    }
}

impl ModuleLoader for StaticLoader {
    fn inspect(&self, module_path: &Path) -> Result<Vec<PluginDescriptor>, HostError> {
        Ok(self
            .factories(module_path)?
            .iter()
            .map(|factory| PluginDescriptor {
                metadata: factory().metadata(),
                module_path: module_path.to_path_buf(),
            })
            .collect())
    }

    fn instantiate(
        &self,
        module_path: &Path,
        descriptor: &PluginDescriptor,
    ) -> Result<Arc<dyn DiagnosticCapability>, HostError> {
        self.factories(module_path)?
            .iter()
            .map(|factory| factory())
            .find(|plugin| plugin.metadata().id == descriptor.metadata.id)
            .ok_or_else(|| HostError::PluginNotFound(descriptor.metadata.id.clone()))
    }
}
