//! # kiln-cli
//!
//! Binary entry point for the kiln build runner.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Logging initialization and configuration loading with flag overrides
//! - `kiln build`: run one supervised build job, exiting with its outcome code
//! - `kiln watch`: attach to a running job and stream its console output

mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_core::{BuildSupervisor, KilnConfig, LogReporter};
use kiln_proto::ImageSpec;
use std::path::{Path, PathBuf};
use tracing::warn;

/// kiln - supervised disk-image build runner
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "kiln.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one build job and exit with its outcome code
    Build(BuildArgs),
    /// Attach to a running job and stream its console output
    Watch(WatchArgs),
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Identifier of the requesting user
    #[arg(long)]
    user: String,

    /// Path to the image specification (JSON)
    #[arg(long)]
    image: PathBuf,

    /// Path to the base filesystem tree copied into each workspace
    #[arg(long)]
    base_system: Option<PathBuf>,

    /// Directory containing the external builder
    #[arg(long)]
    builder_location: Option<PathBuf>,

    /// Root directory for per-job workspaces
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Directory for rendezvous sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct WatchArgs {
    /// Build identifier to attach to
    build_id: String,

    /// Directory for rendezvous sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Build(args) => {
            let code = build_command(&cli.config, args).await?;
            std::process::exit(code);
        }
        Commands::Watch(args) => watch_command(&cli.config, args).await,
    }
}

fn load_config(config_path: &Path) -> Result<KilnConfig> {
    if config_path.exists() {
        KilnConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))
    } else {
        warn!("Config file {:?} not found, using defaults", config_path);
        Ok(KilnConfig::default())
    }
}

async fn build_command(config_path: &Path, args: BuildArgs) -> Result<i32> {
    let mut config = load_config(config_path)?;

    // CLI overrides take final precedence over the config file.
    if let Some(path) = args.base_system {
        config.base_system = path;
    }
    if let Some(path) = args.builder_location {
        config.builder_location = path;
    }
    if let Some(path) = args.workspace {
        config.workspace = path;
    }
    if let Some(path) = args.socket_dir {
        config.socket_dir = path;
    }
    config
        .ensure_workspace()
        .with_context(|| format!("Failed to create workspace root {:?}", config.workspace))?;

    let spec_text = std::fs::read_to_string(&args.image)
        .with_context(|| format!("Failed to read image spec from {:?}", args.image))?;
    let spec: ImageSpec =
        serde_json::from_str(&spec_text).context("Failed to parse image spec")?;

    let supervisor = BuildSupervisor::new(config, LogReporter);
    let code = supervisor.run(&args.user, spec).await?;
    Ok(code)
}

async fn watch_command(config_path: &Path, args: WatchArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let socket_dir = args.socket_dir.unwrap_or(config.socket_dir);
    tokio::task::spawn_blocking(move || watch::stream_build_log(&socket_dir, &args.build_id))
        .await?
}
