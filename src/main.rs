mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::prelude::*;

use cli::{Cli, Command};
use devserver_launcher::services::SettingsService;
use devserver_launcher::AppState;

fn init_tracing() {
    // RUST_LOG wins over the default.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("devserver_launcher=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match cli.config_dir {
        Some(dir) => SettingsService::new(dir),
        None => SettingsService::from_home().context("failed to locate config directory")?,
    };
    let state = AppState::from_config(&config)
        .await
        .with_context(|| format!("failed to load state from {}", config.config_dir().display()))?;

    let result = match cli.command {
        Command::List { json } => commands::list_projects(&state, json).await,
        Command::Add(args) => commands::add_project(&state, args).await,
        Command::Update(args) => commands::update_project(&state, args).await,
        Command::Remove { id } => commands::remove_project(&state, &id).await,
        Command::Scan { root, depth, add } => commands::scan_projects(&state, &root, depth, add).await,
        Command::Run { ids, all } => commands::run_projects(&state, ids, all).await,
    };

    // Commands that only edit the catalog still need their change on disk.
    state
        .registry
        .flush()
        .await
        .context("failed to write project catalog")?;
    result
}
