//! Configuration system for the `LiveChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/livechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error. The auth token is never
//! read from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use livechat_proto::room::{AuthToken, RoomId};

use crate::channel::{ChannelConfig, DEFAULT_BASE_URL, DEFAULT_RECONNECT_DELAY};
use crate::transport::{self, TransportError};
use crate::transport::ws::DEFAULT_CONNECT_TIMEOUT;

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

    /// The base URL is not a URL.
    #[error("invalid base url {url:?}: {source}")]
    BaseUrl {
        /// The configured value.
        url: String,
        /// Parse failure.
        source: url::ParseError,
    },

    /// The base URL cannot carry room endpoints.
    #[error(transparent)]
    Endpoint(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    reconnect: ReconnectFileConfig,
    session: SessionFileConfig,
    ui: UiFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    delay_ms: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    room: Option<String>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base WebSocket URL rooms are appended to.
    pub base_url: String,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,

    // -- Reconnect --
    /// Fixed delay before reconnecting after an abnormal close.
    pub reconnect_delay: Duration,

    // -- Session --
    /// Room to join.
    pub room: Option<String>,
    /// Auth token (CLI or environment only).
    pub token: Option<String>,
    /// JSON history file loaded after joining.
    pub history_file: Option<PathBuf>,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            room: None,
            token: None,
            history_file: None,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/livechat/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            base_url: cli
                .base_url
                .clone()
                .or_else(|| file.server.base_url.clone())
                .unwrap_or(defaults.base_url),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            reconnect_delay: cli
                .reconnect_delay_ms
                .or(file.reconnect.delay_ms)
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            room: cli.room.clone().or_else(|| file.session.room.clone()),
            token: cli.token.clone(),
            history_file: cli.history.clone(),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Build a [`ChannelConfig`], validating the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BaseUrl`] if the base URL does not parse and
    /// [`ConfigError::Endpoint`] if it is not a `ws://`/`wss://` URL.
    pub fn to_channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        let base_url = Url::parse(&self.base_url).map_err(|source| ConfigError::BaseUrl {
            url: self.base_url.clone(),
            source,
        })?;
        transport::validate_base(&base_url)?;
        Ok(ChannelConfig::new(base_url).with_reconnect_delay(self.reconnect_delay))
    }

    /// The room and token to join with. Blank values count as missing.
    #[must_use]
    pub fn identity(&self) -> (Option<RoomId>, Option<AuthToken>) {
        (
            self.room.clone().and_then(RoomId::parse),
            self.token.clone().and_then(AuthToken::parse),
        )
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Realtime chat room client")]
pub struct CliArgs {
    /// Base WebSocket URL rooms are appended to.
    #[arg(long, env = "LIVECHAT_URL")]
    pub base_url: Option<String>,

    /// Room to join.
    #[arg(long, env = "LIVECHAT_ROOM")]
    pub room: Option<String>,

    /// Auth token sent with the connection.
    #[arg(long, env = "LIVECHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// JSON file with the room's history (`{room}` is replaced by the room id).
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Delay before reconnecting, in milliseconds.
    #[arg(long)]
    pub reconnect_delay_ms: Option<u64>,

    /// Path to config file (default: `~/.config/livechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LIVECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/livechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("livechat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
