use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use credit_sync::cli::args::{Cli, Commands, OutputFormat};
use credit_sync::cli::commands;
use credit_sync::config::{ColorSetting, Config, Paths};
use credit_sync::error::SyncError;
use credit_sync::features::sync::{EnvToken, HttpRemoteApi, NetworkStatus, RemoteApi};
use credit_sync::service::OfflineSync;
use credit_sync::storage::SqliteStore;

/// Environment variable holding the API bearer token.
const TOKEN_ENV: &str = "CREDIT_SYNC_TOKEN";

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        let code = e
            .downcast_ref::<SyncError>()
            .map_or(1, SyncError::exit_code);
        std::process::exit(code);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "credit_sync=debug",
        _ => "credit_sync=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let paths = cli.home.clone().map_or_else(Paths::new, |root| Ok(Paths::with_root(root)))?;
    paths.ensure_dirs()?;

    let config = Config::load_from_path(&paths.config_file)?;
    match config.general.color {
        ColorSetting::Always => colored::control::set_override(true),
        ColorSetting::Never => colored::control::set_override(false),
        ColorSetting::Auto => {}
    }
    let format = cli.output.unwrap_or(config.general.default_output);

    let store = SqliteStore::open(&paths.database, &config.api.shop)?
        .with_quota(config.storage.quota_bytes);
    let network = NetworkStatus::new(!cli.offline);
    let remote = Arc::new(HttpRemoteApi::new(&config.api.base_url)?);

    let mut builder = OfflineSync::builder(
        Arc::new(store),
        Arc::clone(&remote) as Arc<dyn RemoteApi>,
        Arc::new(EnvToken::new(TOKEN_ENV)),
    )
    .sync_config(config.sync.clone())
    .cache_config(config.cache.clone())
    .network(network)
    .auto_drain(false);
    // `--offline` pins the flag; otherwise `watch` learns it from the API
    if !cli.offline {
        builder = builder.reachability(remote);
    }
    let service = builder.build().context("failed to load the offline queue")?;

    tracing::debug!(shop = %config.api.shop, root = %paths.root.display(), "service ready");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let output = runtime.block_on(dispatch(&service, cli.command, format))?;

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

async fn dispatch(
    service: &OfflineSync,
    command: Commands,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match command {
        Commands::Enqueue { operation, payload } => {
            commands::enqueue(service, &operation, &payload, format).await
        }
        Commands::Status => commands::status(service, format),
        Commands::List { status, limit } => {
            commands::list(service, status.as_deref(), limit, format)
        }
        Commands::Sync => commands::sync(service, format).await,
        Commands::Retry { all: _, id } => commands::retry(service, id.as_deref(), format),
        Commands::Credits { customer, refresh } => {
            commands::credits(service, &customer, refresh, format).await
        }
        Commands::Clear { target, force } => commands::clear(service, target, force, format),
        Commands::Watch => commands::watch(service, format).await,
    }
}
