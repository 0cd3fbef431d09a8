//! Configuration module for stamp-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "stamp-echo")]
#[command(author = "stamp-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "TCP clients and server exchanging timestamped echoes", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host the server binds to and clients connect to
    #[arg(long)]
    pub host: Option<String>,

    /// Port the server binds to and clients connect to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of clients (also the number of connections the server accepts)
    #[arg(short = 'n', long)]
    pub clients: Option<usize>,

    /// Total run duration in seconds before shutdown is signalled
    #[arg(short = 't', long)]
    pub work_time: Option<u64>,

    /// Delay between client sends in milliseconds
    #[arg(short, long)]
    pub delay_ms: Option<u64>,

    /// Receive buffer size in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Receive buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Number of clients to start
    #[serde(default = "default_clients")]
    pub count: usize,
    /// Delay between sends in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            count: default_clients(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Run duration configuration
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Seconds to run before signalling shutdown
    #[serde(default = "default_work_time")]
    pub work_time: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_time: default_work_time(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5353
}

fn default_buffer_size() -> usize {
    1024
}

fn default_clients() -> usize {
    5
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_work_time() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub clients: usize,
    pub work_time: Duration,
    pub delay: Duration,
    pub buffer_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mut config = Self::from_toml(toml_config);

        // Merge CLI args (CLI takes precedence)
        if let Some(host) = cli.host {
            config.host = host;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(clients) = cli.clients {
            config.clients = clients;
        }
        if let Some(work_time) = cli.work_time {
            config.work_time = Duration::from_secs(work_time);
        }
        if let Some(delay_ms) = cli.delay_ms {
            config.delay = Duration::from_millis(delay_ms);
        }
        if let Some(buffer_size) = cli.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(log_level) = cli.log_level {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_toml(toml_config: TomlConfig) -> Self {
        Config {
            host: toml_config.server.host,
            port: toml_config.server.port,
            clients: toml_config.client.count,
            work_time: Duration::from_secs(toml_config.run.work_time),
            delay: Duration::from_millis(toml_config.client.delay_ms),
            buffer_size: toml_config.server.buffer_size,
            log_level: toml_config.logging.level,
        }
    }

    /// Reject values the server and clients cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients == 0 {
            return Err(ConfigError::Invalid("clients must be at least 1"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be at least 1"));
        }
        Ok(())
    }

    /// Resolve `host:port` into a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .map_err(|e| ConfigError::InvalidAddress(target.clone(), e.to_string()))?
            .next()
            .ok_or_else(|| ConfigError::InvalidAddress(target, "no address resolved".to_string()))
    }

    /// Number of connections the server accepts before waiting for shutdown.
    pub fn max_connections(&self) -> usize {
        self.clients
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String, String),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidAddress(addr, reason) => {
                write!(f, "Invalid listen address '{addr}': {reason}")
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
