//! Command dispatcher and handlers
//!
//! Every inbound event goes through the same pipeline:
//!
//! ```text
//! received ──► authorized? ──► known command? ──► rate limited? ──► handler ──► replies
//!                  │ no              │ no               │ yes
//!                  ▼                 ▼                  ▼
//!            rejection reply      ignored          dropped silently
//! ```
//!
//! Handlers return `anyhow::Result`. Errors and panics stop at the handler
//! boundary: they are logged and the user gets one generic reply.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chart::render_chart;
use crate::commands::{Command, HELP};
use crate::config::Config;
use crate::history::{SpeedHistory, SpeedRecord};
use crate::parsers::{parse_speedtest, parse_status};
use crate::rate_limit::RateLimiter;
use crate::remote::RemoteExecutor;

pub const NOT_ALLOWED: &str = "Not allowed to talk to strangers.";
pub const GENERIC_ERROR: &str = "An error occurred, please try again later.";
pub const REBOOTING: &str = "Rebooting...";
pub const REBOOT_SENT: &str = "Reboot command sent.";
pub const REBOOT_FAILED: &str = "Failed to reach the server, reboot was not confirmed.";
pub const MEASURING: &str = "Measuring. It usually takes about 1 minute...";
pub const SPEEDTEST_FAILED: &str = "Failed to reach the server, speed test did not run.";
pub const COLLECTING: &str = "Collecting statistics...";
pub const STATS_FAILED: &str = "Failed to reach the server, statistics are unavailable.";
pub const UPTIME_PARSE_FAILED: &str = "Failed to parse server uptime.";
pub const NO_DATA: &str = "No speed data recorded yet.";

/// Timestamp format of stored speed records
pub const RECORD_DATE_FORMAT: &str = "%d %b %H:%M";

/// A chat message, independent of the transport
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub text: String,
    /// When the transport delivered the message. The cooldown is measured
    /// against this, not against the time the event is finally handled.
    pub received_at: Instant,
}

impl InboundCommand {
    /// Event stamped with the current time
    pub fn new(
        user_id: i64,
        chat_id: i64,
        username: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            chat_id,
            username,
            text: text.into(),
            received_at: Instant::now(),
        }
    }

    fn who(&self) -> String {
        match &self.username {
            Some(name) => format!("{} ({})", name, self.user_id),
            None => self.user_id.to_string(),
        }
    }
}

/// Where replies go
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
    async fn send_image(&self, chat_id: i64, path: &Path) -> anyhow::Result<()>;
}

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Sender is not authorized
    Rejected,
    /// Not a known command
    Ignored,
    /// Dropped by the cooldown
    RateLimited,
    /// Handler completed
    Handled,
    /// Handler failed, generic error sent
    Failed,
}

/// Process-wide bot state: config, remote executor, history, cooldowns
pub struct CommandDispatcher {
    config: Arc<Config>,
    executor: Arc<dyn RemoteExecutor>,
    history: SpeedHistory,
    rate_limiter: RateLimiter,
    /// One event at a time
    serial: Mutex<()>,
}

impl CommandDispatcher {
    pub fn new(config: Arc<Config>, executor: Arc<dyn RemoteExecutor>) -> Self {
        let history = SpeedHistory::new(config.history_file.clone());
        let rate_limiter = RateLimiter::new(config.rate_limit);
        Self {
            config,
            executor,
            history,
            rate_limiter,
            serial: Mutex::new(()),
        }
    }

    pub fn history(&self) -> &SpeedHistory {
        &self.history
    }

    /// Run one inbound event through the pipeline
    pub async fn handle(&self, event: &InboundCommand, replies: &dyn ReplySink) -> Outcome {
        let _serial = self.serial.lock().await;

        if !self.config.is_allowed(event.user_id) {
            warn!("User {} tried to run the bot", event.who());
            if let Err(e) = replies.send_text(event.chat_id, NOT_ALLOWED).await {
                error!("Failed to send rejection to chat {}: {:#}", event.chat_id, e);
            }
            return Outcome::Rejected;
        }

        let Some(command) = Command::parse(&event.text) else {
            debug!("Ignoring non-command message from {}", event.who());
            return Outcome::Ignored;
        };

        if !self.rate_limiter.check_at(event.user_id, event.received_at) {
            debug!(
                "Dropping {} from {}: arrived within the {:?} cooldown",
                command,
                event.who(),
                self.rate_limiter.cooldown()
            );
            return Outcome::RateLimited;
        }

        info!("User {} {}", event.who(), command.action());

        let result = AssertUnwindSafe(self.run_command(command, event, replies))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(())) => return Outcome::Handled,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string()),
        };

        error!("{} failed for {}: {}", command, event.who(), failure);
        if let Err(e) = replies.send_text(event.chat_id, GENERIC_ERROR).await {
            error!("Failed to send error reply to chat {}: {:#}", event.chat_id, e);
        }
        Outcome::Failed
    }

    async fn run_command(
        &self,
        command: Command,
        event: &InboundCommand,
        replies: &dyn ReplySink,
    ) -> anyhow::Result<()> {
        let chat_id = event.chat_id;
        match command {
            Command::Start | Command::Help => replies.send_text(chat_id, HELP).await,
            Command::Reboot => self.reboot(chat_id, replies).await,
            Command::SpeedTest => self.speedtest(chat_id, replies).await,
            Command::Stats => self.stats(chat_id, replies).await,
            Command::SpeedHistory => self.speed_history(chat_id, replies).await,
        }
    }

    async fn reboot(&self, chat_id: i64, replies: &dyn ReplySink) -> anyhow::Result<()> {
        replies.send_text(chat_id, REBOOTING).await?;

        match self.executor.run(&self.config.commands.reboot).await {
            Some(_) => {
                info!("Reboot command accepted by {}", self.config.host);
                replies.send_text(chat_id, REBOOT_SENT).await
            }
            None => {
                error!("Reboot of {} failed: no response", self.config.host);
                replies.send_text(chat_id, REBOOT_FAILED).await
            }
        }
    }

    async fn speedtest(&self, chat_id: i64, replies: &dyn ReplySink) -> anyhow::Result<()> {
        replies.send_text(chat_id, MEASURING).await?;

        let Some(output) = self.executor.run(&self.config.commands.speedtest).await else {
            error!("Speed test on {} failed: no response", self.config.host);
            return replies.send_text(chat_id, SPEEDTEST_FAILED).await;
        };

        let result = parse_speedtest(&output);

        replies
            .send_text(chat_id, &format_speed("Download", result.download_mbps))
            .await?;
        replies
            .send_text(chat_id, &format_speed("Upload", result.upload_mbps))
            .await?;
        let url_reply = match &result.result_url {
            Some(url) => format!("Result: {}", url),
            None => "Result URL not found.".to_string(),
        };
        replies.send_text(chat_id, &url_reply).await?;

        if result.has_measurement() {
            let date = chrono::Local::now().format(RECORD_DATE_FORMAT).to_string();
            let record = SpeedRecord::new(date, result.download_mbps, result.upload_mbps);
            self.history
                .append(&record)
                .context("storing speed record")?;
        } else {
            warn!("Speed test returned no measurements, nothing stored");
        }

        Ok(())
    }

    async fn stats(&self, chat_id: i64, replies: &dyn ReplySink) -> anyhow::Result<()> {
        replies.send_text(chat_id, COLLECTING).await?;

        let Some(output) = self.executor.run(&self.config.commands.status).await else {
            error!("Status query on {} failed: no response", self.config.host);
            return replies.send_text(chat_id, STATS_FAILED).await;
        };

        let report = parse_status(&output, &self.config.clients);

        match &report.uptime {
            Some(uptime) => replies.send_text(chat_id, &uptime.to_string()).await?,
            None => {
                warn!("Status output has no uptime field");
                replies.send_text(chat_id, UPTIME_PARSE_FAILED).await?
            }
        }

        for client in &report.clients {
            replies.send_text(chat_id, &client.to_string()).await?;
        }

        Ok(())
    }

    async fn speed_history(&self, chat_id: i64, replies: &dyn ReplySink) -> anyhow::Result<()> {
        let Some(records) = self.history.read_all().context("reading speed history")? else {
            return replies.send_text(chat_id, NO_DATA).await;
        };

        let chart_file = self.config.chart_file.clone();
        let count = records.len();
        tokio::task::spawn_blocking(move || render_chart(&records, &chart_file))
            .await
            .context("chart renderer panicked")?
            .context("rendering speed chart")?;

        debug!("Sending chart with {} records", count);
        replies.send_image(chat_id, &self.config.chart_file).await
    }
}

fn format_speed(label: &str, mbps: Option<f64>) -> String {
    match mbps {
        Some(v) => format!("{}: {:.2} Mbit/s", label, v),
        None => format!("{} speed not found.", label),
    }
}
