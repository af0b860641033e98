//! Configuration system for the `FernChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/fernchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fernchat_proto::codec::DEFAULT_MAX_FRAME_LEN;

use crate::session::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_MESSAGE_LEN, SessionConfig};
use crate::transport::connect::{DEFAULT_RETRY_DELAY, join_host_port};

/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default server port.
pub const DEFAULT_PORT: u16 = 55555;

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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    network: NetworkFileConfig,
    chat: ChatFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    host: Option<String>,
    port: Option<u16>,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    retry_delay_secs: Option<u64>,
    channel_capacity: Option<usize>,
    max_frame_len: Option<usize>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_message_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    // -- Server --
    /// Chat server host name or address.
    pub host: String,
    /// Chat server TCP port.
    pub port: u16,

    // -- Network --
    /// Delay between refused connection attempts.
    pub retry_delay: Duration,
    /// Capacity of the outbound and inbound message queues.
    pub channel_capacity: usize,
    /// Largest frame accepted or sent, in bytes.
    pub max_frame_len: usize,

    // -- Chat --
    /// Longest message the input accepts, in characters.
    pub max_message_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            retry_delay: DEFAULT_RETRY_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/fernchat/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be read
    /// or parsed, or if an explicit `--config` path is missing.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            host: cli
                .host
                .clone()
                .or_else(|| file.server.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(file.server.port).unwrap_or(defaults.port),
            retry_delay: file
                .network
                .retry_delay_secs
                .map_or(defaults.retry_delay, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .filter(|&n| n > 0)
                .unwrap_or(defaults.channel_capacity),
            max_frame_len: file
                .network
                .max_frame_len
                .unwrap_or(defaults.max_frame_len),
            max_message_len: file
                .chat
                .max_message_len
                .unwrap_or(defaults.max_message_len),
        }
    }

    /// `host:port` of the chat server.
    #[must_use]
    pub fn server_addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// Build the [`SessionConfig`] the core runs with.
    #[must_use]
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            server_addr: self.server_addr(),
            retry_delay: self.retry_delay,
            channel_capacity: self.channel_capacity,
            max_frame_len: self.max_frame_len,
            max_message_len: self.max_message_len,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal chat client with passphrase-encrypted messages")]
pub struct CliArgs {
    /// Chat server host.
    #[arg(long, env = "FERNCHAT_HOST")]
    pub host: Option<String>,

    /// Chat server port.
    #[arg(short, long, env = "FERNCHAT_PORT")]
    pub port: Option<u16>,

    /// Path to config file (default: `~/.config/fernchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "FERNCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/fernchat.log`).
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
        // No config dir available, use defaults.
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("fernchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
