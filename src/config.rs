//! Configuration management
//!
//! The JSON file describes the managed server and who may talk to the bot.
//! The two secrets (bot token, SSH password) only ever come from the
//! environment.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable holding the Telegram bot token
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Environment variable holding the SSH password
pub const PASSWORD_ENV: &str = "VPNBOT_SSH_PASSWORD";

/// Environment variable pointing at the config file
pub const CONFIG_PATH_ENV: &str = "VPNBOT_CONFIG";

/// Default config file name (relative to the working directory)
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is corrupted: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("environment variable {0} must be set")]
    MissingSecret(&'static str),

    #[error("config value `{0}` must not be empty")]
    Empty(&'static str),
}

/// A secret string. Redacted in `Debug`, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Remote command lines, run verbatim on the managed server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteCommands {
    pub reboot: String,
    pub speedtest: String,
    pub status: String,
}

impl Default for RemoteCommands {
    fn default() -> Self {
        Self {
            reboot: "sudo reboot".to_string(),
            speedtest: "speedtest --accept-license --accept-gdpr --format=json".to_string(),
            status: "sudo ipsec statusall".to_string(),
        }
    }
}

/// On-disk shape of the config file
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(alias = "host")]
    ip: String,
    #[serde(default = "default_port")]
    port: u16,
    login: String,
    users: Vec<i64>,
    #[serde(default)]
    clients: Vec<String>,
    #[serde(default)]
    known_hosts: Option<PathBuf>,
    #[serde(default = "default_ssh_timeout")]
    ssh_timeout_secs: u64,
    #[serde(default = "default_rate_limit")]
    rate_limit_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_secs: u64,
    #[serde(default = "default_history_file")]
    history_file: PathBuf,
    #[serde(default = "default_chart_file")]
    chart_file: PathBuf,
    #[serde(default = "default_log_dir")]
    log_dir: PathBuf,
    #[serde(default = "default_log_file")]
    log_file: String,
    #[serde(default)]
    commands: RemoteCommands,
}

fn default_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    120
}

fn default_rate_limit() -> u64 {
    5
}

fn default_reconnect_delay() -> u64 {
    15
}

fn default_history_file() -> PathBuf {
    PathBuf::from("spddata.csv")
}

fn default_chart_file() -> PathBuf {
    PathBuf::from("graph.png")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_file() -> String {
    "vpnbotlog.txt".to_string()
}

/// Bot configuration, loaded once at startup and never mutated
#[derive(Debug, Clone)]
pub struct Config {
    /// Managed server address
    pub host: String,

    /// SSH port
    pub port: u16,

    /// SSH login name
    pub login: String,

    /// SSH password
    pub password: Secret,

    /// Telegram bot token
    pub token: Secret,

    /// Telegram user ids allowed to use the bot
    pub users: Vec<i64>,

    /// VPN client names expected in the status output
    pub clients: Vec<String>,

    /// known_hosts file used to verify the server key
    pub known_hosts: PathBuf,

    /// Upper bound for one remote exchange
    pub ssh_timeout: Duration,

    /// Minimum interval between two accepted commands of one user
    pub rate_limit: Duration,

    /// Pause before reconnecting to Telegram
    pub reconnect_delay: Duration,

    /// Speed history CSV
    pub history_file: PathBuf,

    /// Rendered speed chart
    pub chart_file: PathBuf,

    /// Directory of the log file
    pub log_dir: PathBuf,

    /// Log file name
    pub log_file: String,

    /// Commands run on the server
    pub commands: RemoteCommands,
}

impl Config {
    /// Load the JSON file at `path` and the secrets from the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let token = secret_from_env(TOKEN_ENV)?;
        let password = secret_from_env(PASSWORD_ENV)?;
        Self::load_with_secrets(path, token, password)
    }

    /// Load the JSON file at `path` with explicitly provided secrets
    pub fn load_with_secrets(
        path: impl AsRef<Path>,
        token: Secret,
        password: Secret,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw, token, password).map_err(|e| match e {
            FromJsonError::Parse(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            FromJsonError::Config(e) => e,
        })
    }

    fn from_json(raw: &str, token: Secret, password: Secret) -> Result<Self, FromJsonError> {
        let file: FileConfig = serde_json::from_str(raw).map_err(FromJsonError::Parse)?;

        if file.ip.trim().is_empty() {
            return Err(FromJsonError::Config(ConfigError::Empty("ip")));
        }
        if file.login.trim().is_empty() {
            return Err(FromJsonError::Config(ConfigError::Empty("login")));
        }

        let known_hosts = file.known_hosts.unwrap_or_else(default_known_hosts);

        Ok(Self {
            host: file.ip,
            port: file.port,
            login: file.login,
            password,
            token,
            users: file.users,
            clients: file.clients,
            known_hosts,
            ssh_timeout: Duration::from_secs(file.ssh_timeout_secs),
            rate_limit: Duration::from_secs(file.rate_limit_secs),
            reconnect_delay: Duration::from_secs(file.reconnect_delay_secs),
            history_file: file.history_file,
            chart_file: file.chart_file,
            log_dir: file.log_dir,
            log_file: file.log_file,
            commands: file.commands,
        })
    }

    /// Whether `user_id` may use the bot
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.users.contains(&user_id)
    }
}

#[derive(Debug)]
enum FromJsonError {
    Parse(serde_json::Error),
    Config(ConfigError),
}

fn secret_from_env(name: &'static str) -> Result<Secret, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(Secret::new(value)),
        _ => Err(ConfigError::MissingSecret(name)),
    }
}

fn default_known_hosts() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
        .join("known_hosts")
}

/// Resolve the config path from CLI args, then env, then the default
pub fn config_path_from_args(args: &[String]) -> PathBuf {
    let from_flag = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    from_flag
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
