//! Warden command-line interface.
//!
//! Loads analyzer modules into a host, runs them over workspace files and
//! applies their fixes. Reports are printed to stdout as JSON; logs go to
//! stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use warden_cli::{AnalyzeOptions, FixOptions, PackOptions, STATE_DIR};
use warden_host::{AnalyzerHost, HostConfig};
use warden_types::{ConflictStrategy, SessionId};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Sandboxed host for code-analysis plugins")]
struct Args {
    /// Host configuration file
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Workspace root (overrides the configuration; defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a module signing key pair
    Keygen {
        /// Base name for the key files
        #[arg(default_value = "warden")]
        name: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Build a module from a manifest.toml
    Pack {
        manifest: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Hex-encoded signing key file
        #[arg(short, long)]
        key: Option<PathBuf>,
        #[arg(long)]
        readme: Option<PathBuf>,
        /// Extra files to bundle
        #[arg(long)]
        include: Vec<PathBuf>,
    },
    /// Check a module's signature and contents without loading it
    Validate { module: PathBuf },
    /// Run analysis over files or directories
    Analyze {
        #[arg(short, long = "module", required = true)]
        modules: Vec<PathBuf>,
        #[arg(short, long)]
        plugin: Option<String>,
        /// Also generate fixes for reported issues
        #[arg(long)]
        fixes: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Analyze, then apply every available fix
    Fix {
        #[arg(short, long = "module", required = true)]
        modules: Vec<PathBuf>,
        #[arg(short, long)]
        plugin: Option<String>,
        /// Report the edits without writing them
        #[arg(long)]
        preview: bool,
        #[arg(long, value_enum, default_value_t = Strategy::HighestConfidence)]
        strategy: Strategy,
        /// Skip writing a rollback backup
        #[arg(long)]
        no_backup: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Restore the files changed by a fix session
    Rollback { session_id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    HighestConfidence,
    FirstWins,
    SkipConflicting,
}

impl From<Strategy> for ConflictStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::HighestConfidence => ConflictStrategy::HighestConfidence,
            Strategy::FirstWins => ConflictStrategy::FirstWins,
            Strategy::SkipConflicting => ConflictStrategy::SkipConflicting,
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn host_config(args: &Args) -> Result<HostConfig> {
    let config = HostConfig::load_from(&args.config);
    let root = match (&args.workspace, &config.workspace_root) {
        (Some(root), _) => root.clone(),
        (None, Some(root)) => root.clone(),
        (None, None) => std::env::current_dir().context("Failed to read current directory")?,
    };
    let root = std::path::absolute(&root)
        .with_context(|| format!("Invalid workspace root {}", root.display()))?;
    Ok(config.with_workspace_root(root))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = host_config(&args)?;
    let state_dir = config
        .workspace_root
        .clone()
        .unwrap_or_default()
        .join(STATE_DIR);

    match args.command {
        Command::Keygen { name, out_dir } => {
            print_json(&warden_cli::keygen(&out_dir, &name)?)?;
        }
        Command::Pack {
            manifest,
            output,
            key,
            readme,
            include,
        } => {
            let report = warden_cli::pack(&PackOptions {
                manifest,
                output,
                signing_key: key,
                readme,
                include,
            })?;
            print_json(&report)?;
        }
        Command::Validate { module } => {
            let result = warden_cli::validate(&config, &module);
            print_json(&result)?;
            if !result.valid {
                anyhow::bail!("module failed validation");
            }
        }
        Command::Analyze {
            modules,
            plugin,
            fixes,
            files,
        } => {
            let host = AnalyzerHost::new(config);
            let options = AnalyzeOptions {
                modules,
                plugin,
                files,
                generate_fixes: fixes,
            };
            let sessions = warden_cli::analyze(&host, &options).await;
            host.shutdown().await;
            let sessions = sessions?;
            let issues: usize = sessions.iter().map(|s| s.issues.len()).sum();
            info!("Analysis complete: {} issues", issues);
            print_json(&sessions)?;
        }
        Command::Fix {
            modules,
            plugin,
            preview,
            strategy,
            no_backup,
            files,
        } => {
            let host = AnalyzerHost::new(config);
            let options = FixOptions {
                analyze: AnalyzeOptions {
                    modules,
                    plugin,
                    files,
                    generate_fixes: false,
                },
                preview,
                strategy: strategy.into(),
                create_backup: !no_backup,
                state_dir,
            };
            let reports = warden_cli::fix(&host, &options).await;
            host.shutdown().await;
            print_json(&reports?)?;
        }
        Command::Rollback { session_id } => {
            let session_id: SessionId = session_id
                .parse()
                .with_context(|| format!("Invalid session id '{session_id}'"))?;
            print_json(&warden_cli::rollback(&state_dir, session_id)?)?;
        }
    }

    Ok(())
}
