//! Shared fixtures: signed rule packs in a temporary workspace.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use warden_host::{AnalyzerHost, HostConfig, ModuleLoader, TrustedSigner};
use warden_package::{
    FixTemplate, KeyPair, ModuleManifest, PackageBuilder, PluginManifest, RuleManifest,
};
use warden_types::{Confidence, Severity};

pub struct Workspace {
    pub dir: TempDir,
    pub keys: KeyPair,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            keys: KeyPair::generate(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.root().join(name)).unwrap()
    }

    pub fn config(&self) -> HostConfig {
        HostConfig {
            trusted_signers: vec![TrustedSigner::new("acme", self.keys.verifying_key.to_hex())],
            ..HostConfig::default()
        }
        .with_workspace_root(self.root())
    }

    pub fn host(&self) -> AnalyzerHost {
        AnalyzerHost::new(self.config())
    }

    pub fn host_with_loader(&self, loader: Arc<dyn ModuleLoader>) -> AnalyzerHost {
        AnalyzerHost::with_loader(self.config(), loader)
    }

    /// Writes `manifest` as a module signed by the workspace key.
    pub fn signed_module(&self, name: &str, manifest: ModuleManifest) -> PathBuf {
        let path = self.root().join(name);
        PackageBuilder::new(manifest)
            .sign(&self.keys.signing_key)
            .write_to(&path)
            .unwrap();
        path
    }
}

pub fn rule(id: &str, pattern: &str, replacement: &str, confidence: Confidence) -> RuleManifest {
    RuleManifest {
        id: id.into(),
        title: format!("Rule {id}"),
        description: String::new(),
        category: "style".into(),
        severity: Severity::Warning,
        enabled_by_default: true,
        tags: Vec::new(),
        help_uri: None,
        pattern: pattern.into(),
        message: None,
        confidence: Confidence::High,
        fix: Some(FixTemplate {
            title: format!("Apply {id}"),
            replacement: replacement.into(),
            confidence,
        }),
    }
}

pub fn pack(id: &str, rules: Vec<RuleManifest>) -> ModuleManifest {
    ModuleManifest {
        host_api_version: 1,
        plugins: vec![PluginManifest {
            id: id.into(),
            name: "Acme rules".into(),
            version: "1.2.0".into(),
            author: "Acme".into(),
            description: String::new(),
            extensions: vec!["txt".into()],
            host_api_version: None,
            max_file_size: 1024 * 1024,
            rules,
        }],
    }
}

/// A pack with a single `R1` rule flagging `TODO`.
pub fn todo_pack(id: &str) -> ModuleManifest {
    pack(id, vec![rule("R1", "TODO", "DONE", Confidence::Medium)])
}
