use std::{
    fs,
    path::{Path, PathBuf},
};

use dirs::config_dir;
use pantry_core::auth::Credential;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cli::ServeArgs;

pub const DEFAULT_APPLICATION: &str = "pantry";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATA_FILE: &str = "data-storage.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config {path}: {reason}")]
    Write { path: PathBuf, reason: String },
    #[error("no config dir available")]
    NoConfigDir,
    #[error("PORT must be a number between 0 and 65535, got {value:?}")]
    InvalidPort { value: String },
    #[error("SECRET is not set; refusing to serve without a shared secret")]
    MissingSecret,
}

/// Optional settings read from `config.toml`. Every field may be overridden
/// by the environment or the command line.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub application: Option<String>,
    pub port: Option<u16>,
    pub secret: Option<String>,
    pub data_file: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub application: String,
    pub port: u16,
    /// `None` when no non-empty secret was configured anywhere.
    pub credential: Option<Credential>,
    pub data_file: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub in_memory: bool,
}

impl Config {
    /// The shared secret, required before the server may accept requests.
    pub fn require_credential(&self) -> Result<Credential, ConfigError> {
        self.credential.clone().ok_or(ConfigError::MissingSecret)
    }
}

/// Load `.env`, the config file and the process environment, then apply `overrides`.
pub fn load(path: Option<&Path>, overrides: &ServeArgs) -> Result<Config, ConfigError> {
    note_dotenv(dotenvy::dotenv());

    let file = match path {
        Some(path) => load_file(path)?,
        None => match default_path() {
            Ok(path) => load_file(path)?,
            Err(ConfigError::NoConfigDir) => FileConfig::default(),
            Err(err) => return Err(err),
        },
    };
    resolve(file, |name| std::env::var(name).ok(), overrides)
}

/// A broken `.env` never stops startup; it is logged and skipped.
fn note_dotenv(result: Result<PathBuf, dotenvy::Error>) -> Option<PathBuf> {
    match result {
        Ok(path) => {
            debug!(path = %path.display(), "loaded .env");
            Some(path)
        }
        Err(err) if err.not_found() => None,
        Err(err) => {
            debug!(error = %err, "skipping unreadable .env");
            None
        }
    }
}

/// Load a config file; a missing or empty file yields defaults.
pub fn load_file(path: impl AsRef<Path>) -> Result<FileConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge defaults < file < environment < command line.
pub fn resolve(
    file: FileConfig,
    env: impl Fn(&str) -> Option<String>,
    overrides: &ServeArgs,
) -> Result<Config, ConfigError> {
    let env_port = match env("PORT").filter(|v| !v.trim().is_empty()) {
        Some(value) => Some(
            value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { value })?,
        ),
        None => None,
    };

    let application = env("APPLICATION")
        .filter(|v| !v.is_empty())
        .or(file.application)
        .unwrap_or_else(|| DEFAULT_APPLICATION.to_string());

    let port = overrides
        .port
        .or(env_port)
        .or(file.port)
        .unwrap_or(DEFAULT_PORT);

    let credential = env("SECRET")
        .or(file.secret)
        .filter(|secret| !secret.is_empty())
        .map(Credential::new);

    let data_file = overrides
        .data_file
        .clone()
        .or_else(|| env("PANTRY_DATA_FILE").map(PathBuf::from))
        .or(file.data_file)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE));

    let static_dir = overrides
        .static_dir
        .clone()
        .or_else(|| env("PANTRY_STATIC_DIR").map(PathBuf::from))
        .or(file.static_dir);

    Ok(Config {
        application,
        port,
        credential,
        data_file,
        static_dir,
        in_memory: overrides.in_memory,
    })
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let base = config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join("pantry").join("config.toml"))
}

/// Write a default config to `path` unless a file is already there.
/// The secret is deliberately left out of the generated file.
pub fn write_default_if_missing(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let write_err = |reason: String| ConfigError::Write {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let defaults = FileConfig {
        application: Some(DEFAULT_APPLICATION.to_string()),
        port: Some(DEFAULT_PORT),
        secret: None,
        data_file: Some(PathBuf::from(DEFAULT_DATA_FILE)),
        static_dir: None,
    };
    let body = toml::to_string_pretty(&defaults).map_err(|e| write_err(e.to_string()))?;
    fs::write(path, body).map_err(|e| write_err(e.to_string()))?;
    Ok(path.to_path_buf())
}
