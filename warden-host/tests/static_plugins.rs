//! Host behavior with in-process plugins: per-file failure isolation,
//! timeouts, panics and fixes that reach outside the workspace.

mod common;

use async_trait::async_trait;
use common::{todo_pack, Workspace};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use warden_host::{AnalyzerHost, HostConfig, StaticLoader};
use warden_types::{
    AnalysisRequest, Capabilities, CapabilityError, DiagnosticCapability, Fix, FixApplyRequest,
    Issue, PluginMetadata, Position, Rule, TextEdit,
};

/// Flags every file. Misbehaves on demand based on file content.
struct Moody {
    outside: PathBuf,
}

#[async_trait]
impl DiagnosticCapability for Moody {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("test.moody", "Moody", "0.1.0").with_extensions(["txt"])
    }

    async fn analyze(&self, path: &Path, content: &str) -> Result<Vec<Issue>, CapabilityError> {
        match content.trim() {
            "slow" => tokio::time::sleep(Duration::from_secs(10)).await,
            "boom" => panic!("plugin exploded"),
            "fail" => return Err(CapabilityError::Analysis("cannot parse".into())),
            _ => {}
        }
        Ok(vec![Issue::new("test.moody", &self.rules()[0], path, "seen").at(1, 1, 1, 2)])
    }

    fn rules(&self) -> Vec<Rule> {
        vec![Rule::new("M1", "Seen")]
    }

    async fn get_fixes(&self, issue: &Issue, _content: &str) -> Result<Vec<Fix>, CapabilityError> {
        let edit = TextEdit::new(&self.outside, Position::new(0, 0), Position::new(0, 1), "x");
        Ok(vec![Fix::new(issue.id, "M1", "test.moody", "Escape", vec![edit])])
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_fix: true,
            ..Capabilities::default()
        }
    }
}

/// A host whose module path is a real signed pack, backed by `Moody`.
async fn moody_host(ws: &Workspace, outside: PathBuf) -> AnalyzerHost {
    let module = ws.signed_module("moody.wpk", todo_pack("test.placeholder"));
    let loader = StaticLoader::new();
    loader.register(module.clone(), move || {
        Arc::new(Moody { outside: outside.clone() }) as Arc<dyn DiagnosticCapability>
    });

    let mut config: HostConfig = ws.config();
    config.sandbox.call_timeout_ms = 200;
    let host = AnalyzerHost::with_loader(config, Arc::new(loader));
    let loaded = host.load(&module).await.unwrap();
    assert_eq!(loaded.plugin_ids, vec!["test.moody".to_string()]);
    host
}

#[tokio::test]
async fn failures_stay_with_their_file() {
    let ws = Workspace::new();
    let host = moody_host(&ws, PathBuf::from("/elsewhere/x.txt")).await;
    ws.file("ok.txt", "fine");
    ws.file("slow.txt", "slow");
    ws.file("boom.txt", "boom");
    ws.file("fail.txt", "fail");
    ws.file("after.txt", "fine");

    let files = ["ok.txt", "slow.txt", "boom.txt", "fail.txt", "after.txt"]
        .into_iter()
        .map(PathBuf::from)
        .collect();
    let session = host
        .run_analysis(AnalysisRequest::new("test.moody", files))
        .await
        .unwrap();

    assert!(!session.success);
    assert_eq!(session.statistics["files_analyzed"], 2);
    assert_eq!(session.statistics["files_failed"], 3);
    assert_eq!(session.issues.len(), 2);

    let error_of = |name: &str| {
        session
            .file_results
            .iter()
            .find(|r| r.file_path.ends_with(name))
            .and_then(|r| r.error.clone())
            .unwrap()
    };
    assert!(error_of("slow.txt").contains("timeout"));
    assert!(error_of("boom.txt").contains("panicked"));
    assert!(error_of("fail.txt").contains("cannot parse"));

    let health = host.health();
    assert!(health[0].healthy);
    assert_eq!(health[0].usage.operations_processed, 5);
    assert_eq!(health[0].usage.operations_failed, 3);
}

#[tokio::test]
async fn fixes_outside_the_workspace_are_rejected() {
    let ws = Workspace::new();
    let host = moody_host(&ws, PathBuf::from("/elsewhere/x.txt")).await;
    ws.file("a.txt", "fine");

    let session = host
        .run_analysis(AnalysisRequest::new("test.moody", vec!["a.txt".into()]))
        .await
        .unwrap();
    let issue_ids = session.issues.iter().map(|i| i.id).collect();

    let fixes = host
        .apply_fixes(FixApplyRequest::new("test.moody", issue_ids))
        .await
        .unwrap();
    assert!(!fixes.success);
    assert_eq!(fixes.applied_count(), 0);
    assert_eq!(
        fixes.fix_outcomes[0].reason.as_deref(),
        Some("edits files outside the workspace root")
    );
    assert!(fixes.modified_files.is_empty());
}

#[tokio::test]
async fn unloaded_plugin_cannot_analyze() {
    let ws = Workspace::new();
    let host = moody_host(&ws, PathBuf::from("/elsewhere/x.txt")).await;
    ws.file("a.txt", "fine");

    assert!(host.unload("test.moody").await);
    let err = host
        .run_analysis(AnalysisRequest::new("test.moody", vec!["a.txt".into()]))
        .await
        .unwrap_err();
    assert!(matches!(err, warden_host::HostError::PluginNotFound(_)));
}
