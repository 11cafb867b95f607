//! Desktop compiler bridge daemon.
//!
//! Polls a shared-directory mailbox for compile/run commands from a mobile
//! client and answers them by driving the local JVM toolchain.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use compiler_bridge::{
    config::BridgeConfig, mailbox::Mailbox, orchestrator::Orchestrator, toolchain::Toolchain,
    workspace::Workspace,
};

#[derive(Parser, Debug)]
#[command(name = "compiler-bridge")]
#[command(about = "Desktop-side compiler bridge over a shared-filesystem mailbox")]
struct Args {
    /// Workspace root shared with the client (overrides config file and env)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mailbox poll interval in milliseconds (overrides config)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout stays clean for shells and tools)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path).context("Failed to load configuration")?,
        None => BridgeConfig::from_env(),
    };
    if let Some(workspace) = args.workspace {
        config.workspace_root = workspace;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval = std::time::Duration::from_millis(ms);
    }

    let workspace = Workspace::init_with_mailbox(
        config.workspace_root.clone(),
        config.command_file.clone(),
        config.response_file.clone(),
    )
    .context("Failed to initialize workspace")?;

    info!(
        workspace = %workspace.root().display(),
        poll_interval = ?config.poll_interval,
        "Loaded configuration"
    );

    let removed = workspace.cleanup_stale(config.stale_artifact_age);
    if removed > 0 {
        info!(removed, "Removed stale artifacts from previous runs");
    }

    Toolchain::from_config(&config).probe();

    let mailbox = Mailbox::for_workspace(&workspace, config.poll_interval);
    let orchestrator = Orchestrator::new(workspace, mailbox, &config);
    orchestrator.run().await;

    Ok(())
}
