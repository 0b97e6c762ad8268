//! Configuration system for the `Taskboard` dev server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard-devserver/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::user::Role;

/// Errors that can occur when loading dev server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the dev server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DevConfigFile {
    server: ServerFileConfig,
    users: Option<Vec<SeedUser>>,
}

/// `[server]` section of the dev server config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    ping_interval_secs: Option<u64>,
}

/// An account created at start-up (`[[users]]` in the config file).
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SeedUser {
    /// Login email.
    pub email: String,
    /// Login password.
    pub password: String,
    /// Role.
    #[serde(default)]
    pub role: Role,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the dev server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Taskboard dev server (in-memory REST + Action Cable)")]
pub struct DevCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "TASKBOARD_DEV_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskboard-devserver/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds between cable heartbeats.
    #[arg(long)]
    pub ping_interval_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_DEV_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved dev server configuration.
#[derive(Debug, Clone)]
pub struct DevConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:4000`).
    pub bind_addr: String,
    /// Interval between cable `ping` frames.
    pub ping_interval: Duration,
    /// Accounts created at start-up.
    pub users: Vec<SeedUser>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            ping_interval: Duration::from_secs(3),
            users: vec![SeedUser {
                email: "admin@example.com".to_string(),
                password: "password".to_string(),
                role: Role::Admin,
            }],
            log_level: "info".to_string(),
        }
    }
}

impl DevConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &DevCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. A `[[users]]` list replaces the
    /// default seed entirely.
    #[must_use]
    fn resolve(cli: &DevCliArgs, file: &DevConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            ping_interval: cli
                .ping_interval_secs
                .or(file.server.ping_interval_secs)
                .map_or(defaults.ping_interval, Duration::from_secs),
            users: file.users.clone().unwrap_or(defaults.users),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the dev server.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<DevConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(DevConfigFile::default());
        };
        config_dir.join("taskboard-devserver").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DevConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
