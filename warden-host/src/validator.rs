//! Pre-load validation of plugin modules.
//!
//! Produces three independent signals (signature, trust, suspicious
//! content) and a combined verdict. Never returns an error: failures are
//! reported in [`ValidationResult::error`].

use crate::permissions::{PermissionStore, SecurityEvent, SecurityEventType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use warden_package::{PluginPackage, SIGNATURE_ENTRY, SIGNER_ENTRY};

/// API names whose presence in a module marks it as suspicious: process
/// spawning, dynamic code emission or invocation, reflection, and dynamic
/// library loading.
pub const SUSPICIOUS_PATTERNS: &[&str] = &[
    "std::process::Command",
    "Command::new",
    "Process.Start",
    "Reflection.Emit",
    "DynamicMethod",
    "Assembly.Load",
    "MethodInfo.Invoke",
    "libloading",
    "dlopen",
    "LoadLibrary",
    "eval(",
    "exec(",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub module_path: PathBuf,
    /// `!has_suspicious_patterns && trusted`.
    pub valid: bool,
    /// The embedded signer key verifies the package signature.
    pub signed: bool,
    /// Signed, and the signer is on the trusted list.
    pub trusted: bool,
    pub has_suspicious_patterns: bool,
    /// Trusted signer name, or the hex key of an unknown signer.
    pub signer: Option<String>,
    /// SHA-256 of the module file.
    pub checksum: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn failed(module_path: &Path, error: impl Into<String>) -> Self {
        Self {
            module_path: module_path.to_path_buf(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

pub struct PluginValidator {
    permissions: Arc<PermissionStore>,
}

impl PluginValidator {
    pub fn new(permissions: Arc<PermissionStore>) -> Self {
        Self { permissions }
    }

    pub fn validate(&self, module_path: &Path) -> ValidationResult {
        let result = self.inspect(module_path);

        let mut event = SecurityEvent::new(
            "validator",
            SecurityEventType::ModuleValidated,
            "ValidateModule",
            result.valid,
        )
        .with_target(module_path)
        .with_metadata("signed", result.signed.into())
        .with_metadata("trusted", result.trusted.into())
        .with_metadata("suspicious", result.has_suspicious_patterns.into());
        if let Some(checksum) = &result.checksum {
            event = event.with_metadata("checksum", checksum.clone().into());
        }
        if let Some(error) = &result.error {
            event = event.with_details(error.clone());
        }
        self.permissions.log(event);

        result
    }

    fn inspect(&self, module_path: &Path) -> ValidationResult {
        if !module_path.is_file() {
            return ValidationResult::failed(
                module_path,
                format!("module not found: {}", module_path.display()),
            );
        }

        let bytes = match std::fs::read(module_path) {
            Ok(bytes) => bytes,
            Err(e) => return ValidationResult::failed(module_path, format!("read failed: {e}")),
        };
        let checksum = hex::encode(Sha256::digest(&bytes));

        let package = match PluginPackage::open(std::io::Cursor::new(&bytes)) {
            Ok(package) => package,
            Err(e) => {
                let mut result = ValidationResult::failed(module_path, format!("invalid package: {e}"));
                result.checksum = Some(checksum);
                return result;
            }
        };

        let mut result = ValidationResult {
            module_path: module_path.to_path_buf(),
            checksum: Some(checksum),
            ..ValidationResult::default()
        };

        match package.verify_embedded() {
            Ok(key) => {
                result.signed = true;
                let key_hex = key.to_hex();
                match self.permissions.find_trusted_signer(&key_hex) {
                    Some(signer) => {
                        result.trusted = true;
                        result.signer = Some(signer.name);
                    }
                    None => {
                        result
                            .warnings
                            .push(format!("module is signed by an untrusted key {key_hex}"));
                        result.signer = Some(key_hex);
                    }
                }
            }
            Err(warden_package::PackageError::NotSigned) => {
                result.warnings.push("module is not signed".to_string());
            }
            Err(e) => {
                warn!(path = %module_path.display(), "Module signature rejected: {}", e);
                result.warnings.push(format!("signature rejected: {e}"));
            }
        }

        for pattern in scan_entries(&package) {
            result.has_suspicious_patterns = true;
            result
                .warnings
                .push(format!("suspicious pattern found: {pattern}"));
        }

        result.valid = result.trusted && !result.has_suspicious_patterns;
        debug!(
            path = %module_path.display(),
            valid = result.valid,
            signed = result.signed,
            trusted = result.trusted,
            "Module validated"
        );
        result
    }
}

/// Distinct suspicious patterns present in any package entry.
fn scan_entries(package: &PluginPackage) -> Vec<&'static str> {
    let texts: Vec<_> = package
        .entries()
        .iter()
        .filter(|e| e.name != SIGNATURE_ENTRY && e.name != SIGNER_ENTRY)
        .map(|e| String::from_utf8_lossy(&e.data))
        .collect();

    SUSPICIOUS_PATTERNS
        .iter()
        .copied()
        .filter(|pattern| texts.iter().any(|text| text.contains(pattern)))
        .collect()
}
