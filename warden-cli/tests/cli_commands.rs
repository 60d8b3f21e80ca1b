use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use warden_cli::{AnalyzeOptions, FixOptions, PackOptions, STATE_DIR};
use warden_host::{AnalyzerHost, HostConfig, TrustedSigner};
use warden_types::ConflictStrategy;

const MANIFEST: &str = r#"
host_api_version = 1

[[plugins]]
id = "acme.todo"
name = "Acme TODO"
version = "1.0.0"
extensions = ["txt"]

[[plugins.rules]]
id = "R1"
title = "No TODO"
pattern = "TODO"

[plugins.rules.fix]
title = "Mark done"
replacement = "DONE"
"#;

/// Key material and a packed module live in `tools`; sources in `ws`.
struct Fixture {
    _tools: TempDir,
    ws: TempDir,
    public_key: String,
    module: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tools = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let keys = warden_cli::keygen(tools.path(), "acme").unwrap();

        let manifest = tools.path().join("manifest.toml");
        fs::write(&manifest, MANIFEST).unwrap();
        let module = tools.path().join("todo.wpk");
        warden_cli::pack(&PackOptions {
            manifest,
            output: module.clone(),
            signing_key: Some(keys.secret_key_path),
            ..PackOptions::default()
        })
        .unwrap();

        Self {
            _tools: tools,
            ws,
            public_key: keys.public_key,
            module,
        }
    }

    fn config(&self) -> HostConfig {
        HostConfig {
            trusted_signers: vec![TrustedSigner::new("acme", self.public_key.clone())],
            ..HostConfig::default()
        }
        .with_workspace_root(self.ws.path())
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.ws.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn state_dir(&self) -> PathBuf {
        self.ws.path().join(STATE_DIR)
    }

    fn fix_options(&self, preview: bool) -> FixOptions {
        FixOptions {
            analyze: AnalyzeOptions {
                modules: vec![self.module.clone()],
                plugin: None,
                files: vec![self.ws.path().to_path_buf()],
                generate_fixes: false,
            },
            preview,
            strategy: ConflictStrategy::HighestConfidence,
            create_backup: true,
            state_dir: self.state_dir(),
        }
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn keygen_writes_a_hex_pair_once() {
    let dir = tempfile::tempdir().unwrap();
    let report = warden_cli::keygen(dir.path(), "dev").unwrap();

    assert_eq!(report.public_key.len(), 64);
    assert_eq!(read(&report.public_key_path), report.public_key);
    assert_eq!(read(&report.secret_key_path).len(), 64);
    assert!(warden_cli::keygen(dir.path(), "dev").is_err());
}

#[test]
fn packed_module_validates_only_with_its_signer_trusted() {
    let fx = Fixture::new();

    let trusted = warden_cli::validate(&fx.config(), &fx.module);
    assert!(trusted.valid, "{:?}", trusted.warnings);
    assert!(trusted.signed);

    let untrusted = warden_cli::validate(&HostConfig::default(), &fx.module);
    assert!(!untrusted.valid);
    assert!(untrusted.signed);
    assert!(!untrusted.trusted);
}

#[test]
fn unsigned_pack_reports_unsigned() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("manifest.toml");
    fs::write(&manifest, MANIFEST).unwrap();

    let report = warden_cli::pack(&PackOptions {
        manifest,
        output: dir.path().join("plain.wpk"),
        ..PackOptions::default()
    })
    .unwrap();
    assert!(!report.signed);
    assert_eq!(report.plugins, vec!["acme.todo".to_string()]);
}

#[test]
fn collect_files_walks_directories_and_skips_hidden_entries() {
    let fx = Fixture::new();
    let a = fx.file("src/a.txt", "x");
    let b = fx.file("src/nested/b.txt", "x");
    fx.file(".cache/c.txt", "x");

    let files = warden_cli::collect_files(&[fx.ws.path().to_path_buf(), a.clone()]);
    assert_eq!(files, vec![a, b]);
}

#[tokio::test]
async fn analyze_reports_issues_per_plugin() {
    let fx = Fixture::new();
    fx.file("src/a.txt", "ok\nTODO later\n");
    fx.file("src/b.txt", "clean\n");

    let host = AnalyzerHost::new(fx.config());
    let sessions = warden_cli::analyze(
        &host,
        &AnalyzeOptions {
            modules: vec![fx.module.clone()],
            plugin: None,
            files: vec![fx.ws.path().join("src")],
            generate_fixes: true,
        },
    )
    .await
    .unwrap();

    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].success);
    assert_eq!(sessions[0].issues.len(), 1);
    assert_eq!(sessions[0].issues[0].start_line, 2);
}

#[tokio::test]
async fn analyze_rejects_a_plugin_the_modules_do_not_provide() {
    let fx = Fixture::new();
    let host = AnalyzerHost::new(fx.config());
    let result = warden_cli::analyze(
        &host,
        &AnalyzeOptions {
            modules: vec![fx.module.clone()],
            plugin: Some("acme.other".into()),
            files: vec![fx.ws.path().to_path_buf()],
            generate_fixes: false,
        },
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn fix_writes_a_backup_that_rollback_restores() {
    let fx = Fixture::new();
    let file = fx.file("notes.txt", "TODO one\nkeep\n");

    let host = AnalyzerHost::new(fx.config());
    let reports = warden_cli::fix(&host, &fx.fix_options(false)).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(read(&file), "DONE one\nkeep\n");

    let backup = reports[0].backup.clone().unwrap();
    assert!(backup.exists());

    // A fresh process only has the backup on disk.
    let restored = warden_cli::rollback(&fx.state_dir(), reports[0].session.session_id).unwrap();
    assert_eq!(restored.restored_files, vec![file.clone()]);
    assert!(restored.failed_files.is_empty());
    assert_eq!(read(&file), "TODO one\nkeep\n");
    assert!(!backup.exists());

    assert!(warden_cli::rollback(&fx.state_dir(), reports[0].session.session_id).is_err());
}

#[tokio::test]
async fn fix_preview_leaves_files_and_state_untouched() {
    let fx = Fixture::new();
    let file = fx.file("notes.txt", "TODO one\n");

    let host = AnalyzerHost::new(fx.config());
    let reports = warden_cli::fix(&host, &fx.fix_options(true)).await.unwrap();

    assert_eq!(read(&file), "TODO one\n");
    assert!(reports[0].backup.is_none());
    assert_eq!(reports[0].session.previews.get(&file).map(String::as_str), Some("DONE one\n"));
    assert!(!fx.state_dir().exists());
}
