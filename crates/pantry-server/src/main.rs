mod cli;
mod config;
mod routes;
mod storage;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, ServeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config_path = cli.config_path.clone();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            let config = config::load(config_path.as_deref(), &args)?;
            serve(config).await?
        }
        Command::Version => print_version(),
        Command::Health => {
            let config = config::load(config_path.as_deref(), &ServeArgs::default())?;
            run_health_check(&config)?
        }
        Command::Config(ConfigCommand::Init) => init_config(config_path)?,
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("pantry {}", env!("CARGO_PKG_VERSION"));
}

/// Bind `0.0.0.0:<port>` and serve until SIGINT/SIGTERM.
async fn serve(config: config::Config) -> Result<()> {
    let credential = config.require_credential()?;
    let store = storage::store_from_config(&config)?;
    let state = routes::AppState::new(credential, store);
    let app = routes::routes(state, config.static_dir.clone());

    let (addr, server) = warp::serve(app)
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.port), async {
            wait_for_quit().await;
            info!("shutdown signal received");
        })?;

    info!("{} listening on port {}", config.application, addr.port());
    server.await;
    Ok(())
}

/// Opens the configured data file without modifying it.
fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::open_file_store(config)?;
    println!(
        "Storage: ok ({} records in {})",
        store.len()?,
        store.path().display()
    );
    Ok(())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::default_path()?,
    };
    let path = config::write_default_if_missing(&path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn wait_for_quit() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => (),
                    _ = sigterm.recv() => (),
                }
                return;
            }
            Err(err) => warn!("failed to install SIGTERM handler: {err}"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
    }
}
