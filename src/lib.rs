//! VPN Bot
//!
//! Telegram bot for a single VPN server. Authorized users can reboot the
//! server, run a speed test, chart the speed history and see which VPN
//! clients are connected.
//!
//! # Features
//!
//! - **Access control**: fixed list of Telegram user ids
//! - **Remote commands**: one SSH session per command, known_hosts verified
//! - **Speed history**: CSV log of speed tests, rendered as a PNG chart
//! - **VPN status**: uptime and per-client connection state from strongSwan
//! - **Cooldown**: one accepted command per user per interval
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► telegram (teloxide) ──► CommandDispatcher ──► RemoteExecutor (SSH)
//!                                            │                     │
//!                                            │                     ▼
//!                                            │               parsers (status / speedtest)
//!                                            │
//!                                            ├── RateLimiter (per-user cooldown)
//!                                            ├── SpeedHistory (CSV)
//!                                            └── chart (PNG)
//! ```

pub mod chart;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod history;
pub mod logging;
pub mod parsers;
pub mod rate_limit;
pub mod remote;
pub mod telegram;

pub use chart::{render_chart, ChartError};
pub use commands::Command;
pub use config::{Config, ConfigError, Secret};
pub use dispatcher::{CommandDispatcher, InboundCommand, Outcome, ReplySink};
pub use history::{HistoryError, SpeedHistory, SpeedRecord};
pub use parsers::{parse_speedtest, parse_status, SpeedTestResult, StatusReport};
pub use rate_limit::RateLimiter;
pub use remote::{RemoteExecutor, SshExecutor};
