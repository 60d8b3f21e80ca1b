//! Sandboxed host for Warden analysis plugins.
//!
//! Validates and loads plugin modules, enforces capability-based
//! permissions with an audit trail, and runs every plugin call through a
//! per-plugin sandbox with timeouts and memory-delta limits. Analysis
//! results are cached by content hash; proposed fixes are applied by a
//! [`FixEngine`] that detects and resolves overlapping edits.

mod cache;
mod config;
mod error;
mod fix_engine;
mod host;
mod loader;
mod pattern;
mod permissions;
mod registry;
mod sandbox;
mod validator;

pub use cache::{content_hash, CacheStats, ResultCache};
pub use config::{AuditConfig, CacheConfig, FixConfig, HostConfig};
pub use error::{ErrorCategory, HostError, Result};
pub use fix_engine::{detect_conflicts, ApplyOptions, FixEngine, FixEngineOutcome, TextFixEngine};
pub use host::{AnalyzerHost, HostEvent, LoadResult, PluginHealth};
pub use loader::{ModuleLoader, PackageLoader, PluginDescriptor, PluginFactory, StaticLoader};
pub use pattern::PatternPlugin;
pub use permissions::{
    normalize_path, AuditLog, Grant, Operation, PermissionStore, SecurityEvent, SecurityEventType,
    TrustedSigner,
};
pub use registry::{PluginRegistry, RegisteredPlugin, RegistryEvent, MODULE_EXTENSION};
pub use sandbox::{
    FixRequest, MemoryProbe, PluginSandbox, ProcessMemoryProbe, ResourceLimits, SandboxState,
    SandboxUsage,
};
pub use validator::{PluginValidator, ValidationResult, SUSPICIOUS_PATTERNS};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
