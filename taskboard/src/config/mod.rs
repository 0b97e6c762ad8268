//! Configuration system for the `taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cli::Command;
use crate::transport::ReconnectConfig;
use crate::transport::cable::CableOptions;

/// Errors that can occur when loading configuration.
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

    /// A configured URL does not parse.
    #[error("invalid {field} {value:?}: {source}")]
    InvalidUrl {
        /// Setting the URL came from.
        field: &'static str,
        /// The offending value.
        value: String,
        /// Parse failure.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    channel: ChannelFileConfig,
    session: SessionFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    cable_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[channel]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChannelFileConfig {
    connect_timeout_secs: Option<u64>,
    stale_after_secs: Option<u64>,
    capacity: Option<usize>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_secs: Option<u64>,
    reconnect_max_attempts: Option<u32>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the REST API.
    pub api_url: String,
    /// Action Cable endpoint.
    pub cable_url: String,
    /// Timeout for each REST request.
    pub request_timeout: Duration,

    // -- Channel --
    /// Timeout for each push connection attempt.
    pub connect_timeout: Duration,
    /// Silence after which the push connection is considered dead.
    pub stale_after: Duration,
    /// Capacity of the push and view event channels.
    pub channel_capacity: usize,
    /// Push reconnection backoff.
    pub reconnect: ReconnectConfig,

    // -- Session --
    /// Session file; `None` uses the platform data directory.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4000".to_string(),
            cable_url: "ws://localhost:4000/cable".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(6),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            session_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path
    /// (`~/.config/taskboard/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. Separate from `load()` so it can be
    /// tested without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.server.api_url.clone())
                .unwrap_or(defaults.api_url),
            cable_url: cli
                .cable_url
                .clone()
                .or_else(|| file.server.cable_url.clone())
                .unwrap_or(defaults.cable_url),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            connect_timeout: file
                .channel
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            stale_after: file
                .channel
                .stale_after_secs
                .map_or(defaults.stale_after, Duration::from_secs),
            channel_capacity: file
                .channel
                .capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .channel
                    .reconnect_initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .channel
                    .reconnect_max_delay_secs
                    .map_or(defaults.reconnect.max_delay, Duration::from_secs),
                max_attempts: file
                    .channel
                    .reconnect_max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            session_file: cli
                .session_file
                .clone()
                .or_else(|| file.session.file.clone()),
        }
    }

    /// Push transport tuning derived from this configuration.
    #[must_use]
    pub fn cable_options(&self) -> CableOptions {
        CableOptions {
            connect_timeout: self.connect_timeout,
            stale_after: self.stale_after,
            capacity: self.channel_capacity,
            reconnect: self.reconnect.clone(),
        }
    }

    /// The parsed Action Cable endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `cable_url` does not parse.
    pub fn cable_endpoint(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.cable_url).map_err(|source| ConfigError::InvalidUrl {
            field: "cable_url",
            value: self.cable_url.clone(),
            source,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task board client with live task updates")]
pub struct CliArgs {
    /// Base URL of the REST API.
    #[arg(long, env = "TASKBOARD_API_URL")]
    pub api_url: Option<String>,

    /// Action Cable endpoint for live updates.
    #[arg(long, env = "TASKBOARD_CABLE_URL")]
    pub cable_url: Option<String>,

    /// Where the session is kept (default: `<data_dir>/taskboard/session.json`).
    #[arg(long, env = "TASKBOARD_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
