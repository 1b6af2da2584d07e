use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// CLI surface definition. Running without a subcommand starts the server.
#[derive(Parser, Debug)]
#[command(
    name = "pantry",
    about = "Shared-secret key-value persistence over HTTP",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Path to a TOML config file (defaults to the platform config dir).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server (default).
    Serve(ServeArgs),
    /// Print version and exit.
    Version,
    /// Open the configured data file and report its record count.
    Health,
    /// Manage the config file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Per-run overrides; these win over the environment and the config file.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeArgs {
    #[arg(long)]
    pub port: Option<u16>,
    /// Location of the JSON data file.
    #[arg(long)]
    pub data_file: Option<PathBuf>,
    /// Directory of static assets served alongside the API.
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
    /// Keep records in memory only; nothing is written to disk.
    #[arg(long)]
    pub in_memory: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
