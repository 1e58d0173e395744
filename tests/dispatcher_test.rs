//! Command Dispatcher Integration Tests
//!
//! Drives the full command pipeline with a scripted remote server and a
//! recording reply sink. No Telegram or SSH connection is made.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vpnbot::dispatcher::{
    COLLECTING, GENERIC_ERROR, MEASURING, NOT_ALLOWED, NO_DATA, REBOOTING, REBOOT_FAILED,
    REBOOT_SENT, SPEEDTEST_FAILED, STATS_FAILED,
};
use vpnbot::{
    CommandDispatcher, Config, InboundCommand, Outcome, RemoteExecutor, ReplySink, Secret,
};

const ADMIN: i64 = 1001;
const OPERATOR: i64 = 1002;
const STRANGER: i64 = 6666;

const SPEEDTEST_JSON: &str = r#"{
    "type": "result",
    "download": {"bandwidth": 12500000, "bytes": 120000000, "elapsed": 9000},
    "upload": {"bandwidth": 2500000, "bytes": 25000000, "elapsed": 9000},
    "result": {"id": "abc", "url": "https://www.speedtest.net/result/c/abc"}
}"#;

const STATUSALL: &str = "\
Status of IKE charon daemon (strongSwan 5.9.5, Linux 5.15.0-91-generic, x86_64):
  uptime: 3 days, since Jan 10 09:15:02 2024
  worker threads: 11 of 16 idle, 5/0/0/0 working, job queue: 0/0/0/0, scheduled: 4
Listening IP addresses:
  203.0.113.10
Connections:
    ikev2-vpn:  %any...%any  IKEv2, dpddelay=300s
Security Associations (1 up, 0 connecting):
   ikev2-vpn[7]: ESTABLISHED 42 minutes ago, 203.0.113.10[vpn.example.org]...198.51.100.23[alice]
   ikev2-vpn[7]: Remote EAP identity: alice
   ikev2-vpn{9}:  INSTALLED, TUNNEL, reqid 9, ESP in UDP SPIs: c1d2e3f4_i 0a0b0c0d_o
";

/// Remote server with canned replies per command line
#[derive(Default)]
struct ScriptedServer {
    replies: Mutex<HashMap<String, Option<String>>>,
    calls: Mutex<Vec<String>>,
    /// How long each command takes
    latency: Mutex<Duration>,
}

impl ScriptedServer {
    fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    fn reply(&self, command: &str, output: Option<&str>) {
        self.replies
            .lock()
            .insert(command.to_string(), output.map(str::to_string));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedServer {
    async fn run(&self, command: &str) -> Option<String> {
        self.calls.lock().push(command.to_string());
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.replies.lock().get(command).cloned().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Text(i64, String),
    Image(i64, PathBuf),
}

/// Captures every reply in order
#[derive(Default)]
struct RecordingSink {
    replies: Mutex<Vec<Reply>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.replies.lock())
    }

    fn texts(replies: &[Reply]) -> Vec<String> {
        replies
            .iter()
            .filter_map(|r| match r {
                Reply::Text(_, text) => Some(text.clone()),
                Reply::Image(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.replies.lock().push(Reply::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_image(&self, chat_id: i64, path: &Path) -> anyhow::Result<()> {
        self.replies
            .lock()
            .push(Reply::Image(chat_id, path.to_path_buf()));
        Ok(())
    }
}

/// A dispatcher wired to a scripted server, with all files in a temp dir
struct TestBot {
    temp_dir: TempDir,
    config: Arc<Config>,
    server: Arc<ScriptedServer>,
    dispatcher: CommandDispatcher,
    sink: RecordingSink,
}

impl TestBot {
    fn new(rate_limit_secs: u64) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self::with_history(temp_dir, rate_limit_secs, None)
    }

    fn with_history(temp_dir: TempDir, rate_limit_secs: u64, history: Option<PathBuf>) -> Self {
        let history = history.unwrap_or_else(|| temp_dir.path().join("spddata.csv"));
        let raw = serde_json::json!({
            "ip": "203.0.113.10",
            "login": "admin",
            "users": [ADMIN, OPERATOR],
            "clients": ["alice", "bob"],
            "rate_limit_secs": rate_limit_secs,
            "history_file": history,
            "chart_file": temp_dir.path().join("graph.png"),
            "log_dir": temp_dir.path(),
        });
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(&config_path, raw.to_string()).expect("Failed to write config");

        let config = Config::load_with_secrets(
            &config_path,
            Secret::new("123:abc"),
            Secret::new("hunter2"),
        )
        .expect("Failed to load config");
        let config = Arc::new(config);

        let server = Arc::new(ScriptedServer::default());
        let executor: Arc<dyn RemoteExecutor> = server.clone();
        let dispatcher = CommandDispatcher::new(Arc::clone(&config), executor);

        Self {
            temp_dir,
            config,
            server,
            dispatcher,
            sink: RecordingSink::default(),
        }
    }

    async fn send(&self, user_id: i64, text: &str) -> Outcome {
        let event = InboundCommand::new(user_id, user_id, Some(format!("user{}", user_id)), text);
        self.dispatcher.handle(&event, &self.sink).await
    }

    fn history_path(&self) -> &Path {
        &self.config.history_file
    }

    fn chart_path(&self) -> &Path {
        &self.config.chart_file
    }
}

// ============ Authorization ============

mod authorization {
    use super::*;

    #[tokio::test]
    async fn test_stranger_only_gets_rejection() {
        let bot = TestBot::new(0);
        bot.server.reply(&bot.config.commands.reboot, Some(""));

        for text in ["/reboot", "/speedtest", "/stats", "/spdhist", "hello"] {
            assert_eq!(bot.send(STRANGER, text).await, Outcome::Rejected);
        }

        let replies = bot.sink.take();
        assert_eq!(replies.len(), 5);
        assert!(replies
            .iter()
            .all(|r| *r == Reply::Text(STRANGER, NOT_ALLOWED.to_string())));

        assert!(bot.server.calls().is_empty());
        assert!(!bot.history_path().exists());
        assert!(!bot.chart_path().exists());
    }

    #[tokio::test]
    async fn test_admin_gets_help() {
        let bot = TestBot::new(0);

        assert_eq!(bot.send(ADMIN, "/start").await, Outcome::Handled);
        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("/reboot"));
        assert!(texts[0].contains("/spdhist"));
        assert_eq!(texts[0], texts[1]);
    }

    #[tokio::test]
    async fn test_admin_free_text_is_ignored() {
        let bot = TestBot::new(60);

        assert_eq!(bot.send(ADMIN, "hello there").await, Outcome::Ignored);
        assert!(bot.sink.take().is_empty());

        // Free text does not start the cooldown
        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);
    }
}

// ============ Rate Limiting ============

mod rate_limiting {
    use super::*;

    #[tokio::test]
    async fn test_second_command_within_cooldown_is_dropped() {
        let bot = TestBot::new(60);
        bot.server.reply(&bot.config.commands.reboot, Some(""));

        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);
        bot.sink.take();

        assert_eq!(bot.send(ADMIN, "/reboot").await, Outcome::RateLimited);
        assert!(bot.sink.take().is_empty());
        assert!(bot.server.calls().is_empty());
    }

    #[tokio::test]
    async fn test_command_queued_behind_slow_handler_is_dropped() {
        let bot = TestBot::new(1);
        bot.server.reply(&bot.config.commands.reboot, Some(""));
        bot.server.set_latency(Duration::from_millis(1500));

        // The second /reboot arrives 100 ms after the first and waits for the
        // first handler, which outlasts the cooldown.
        let (first, second) = tokio::join!(bot.send(ADMIN, "/reboot"), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            bot.send(ADMIN, "/reboot").await
        });

        assert_eq!(first, Outcome::Handled);
        assert_eq!(second, Outcome::RateLimited);
        assert_eq!(bot.server.calls().len(), 1);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts, vec![REBOOTING.to_string(), REBOOT_SENT.to_string()]);
    }

    #[tokio::test]
    async fn test_stale_event_is_dropped() {
        let bot = TestBot::new(60);

        let earlier = InboundCommand::new(ADMIN, ADMIN, None, "/help");
        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);

        // Delivered before the accepted command, handled after it
        assert_eq!(
            bot.dispatcher.handle(&earlier, &bot.sink).await,
            Outcome::RateLimited
        );
    }

    #[tokio::test]
    async fn test_zero_cooldown_allows_back_to_back_commands() {
        let bot = TestBot::new(0);
        bot.server.reply(&bot.config.commands.reboot, Some(""));

        assert_eq!(bot.send(ADMIN, "/reboot").await, Outcome::Handled);
        assert_eq!(bot.send(ADMIN, "/reboot").await, Outcome::Handled);
        assert_eq!(bot.server.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_user() {
        let bot = TestBot::new(60);

        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);
        assert_eq!(bot.send(OPERATOR, "/help").await, Outcome::Handled);
        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::RateLimited);
        // Strangers are rejected, never rate limited
        assert_eq!(bot.send(STRANGER, "/help").await, Outcome::Rejected);
        assert_eq!(bot.send(STRANGER, "/help").await, Outcome::Rejected);
    }
}

// ============ Reboot ============

mod reboot {
    use super::*;

    #[tokio::test]
    async fn test_reboot_success() {
        let bot = TestBot::new(0);
        bot.server.reply(&bot.config.commands.reboot, Some(""));

        assert_eq!(bot.send(ADMIN, "/reboot").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts, vec![REBOOTING.to_string(), REBOOT_SENT.to_string()]);
        assert_eq!(bot.server.calls(), vec!["sudo reboot".to_string()]);
    }

    #[tokio::test]
    async fn test_reboot_failure_keeps_bot_running() {
        let bot = TestBot::new(0);
        bot.server.reply(&bot.config.commands.reboot, None);

        assert_eq!(bot.send(ADMIN, "/reboot").await, Outcome::Handled);
        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts, vec![REBOOTING.to_string(), REBOOT_FAILED.to_string()]);

        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);
        assert_eq!(bot.sink.take().len(), 1);
    }
}

// ============ Speed Test ============

mod speedtest {
    use super::*;

    #[tokio::test]
    async fn test_speedtest_reports_and_stores_record() {
        let bot = TestBot::new(0);
        bot.server
            .reply(&bot.config.commands.speedtest, Some(SPEEDTEST_JSON));

        assert_eq!(bot.send(ADMIN, "/speedtest").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(
            texts,
            vec![
                MEASURING.to_string(),
                "Download: 100.00 Mbit/s".to_string(),
                "Upload: 20.00 Mbit/s".to_string(),
                "Result: https://www.speedtest.net/result/c/abc".to_string(),
            ]
        );

        let records = bot.dispatcher.history().read_all().unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].download, Some(100.0));
        assert_eq!(records[0].upload, Some(20.0));
    }

    #[tokio::test]
    async fn test_speedtest_with_partial_output() {
        let bot = TestBot::new(0);
        bot.server.reply(
            &bot.config.commands.speedtest,
            Some(r#"{"download": {"bandwidth": 1250000}}"#),
        );

        assert_eq!(bot.send(ADMIN, "/speedtest").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts[1], "Download: 10.00 Mbit/s");
        assert_eq!(texts[2], "Upload speed not found.");
        assert_eq!(texts[3], "Result URL not found.");

        let records = bot.dispatcher.history().read_all().unwrap().unwrap();
        assert_eq!(records[0].download, Some(10.0));
        assert_eq!(records[0].upload, None);
    }

    #[tokio::test]
    async fn test_speedtest_garbage_stores_nothing() {
        let bot = TestBot::new(0);
        bot.server
            .reply(&bot.config.commands.speedtest, Some("speedtest: command not found"));

        assert_eq!(bot.send(ADMIN, "/speedtest").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts.len(), 4);
        assert_eq!(texts[1], "Download speed not found.");
        assert!(bot.dispatcher.history().read_all().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_speedtest_unreachable_server() {
        let bot = TestBot::new(0);

        assert_eq!(bot.send(ADMIN, "/speedtest").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts, vec![MEASURING.to_string(), SPEEDTEST_FAILED.to_string()]);
        assert!(!bot.history_path().exists());
    }

    #[tokio::test]
    async fn test_history_write_failure_sends_generic_error() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the CSV file should be
        let history = temp_dir.path().join("spddata.csv");
        std::fs::create_dir(&history).unwrap();

        let bot = TestBot::with_history(temp_dir, 0, Some(history));
        bot.server
            .reply(&bot.config.commands.speedtest, Some(SPEEDTEST_JSON));

        assert_eq!(bot.send(ADMIN, "/speedtest").await, Outcome::Failed);
        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts.last().map(String::as_str), Some(GENERIC_ERROR));

        // Still serving
        assert_eq!(bot.send(ADMIN, "/help").await, Outcome::Handled);
    }
}

// ============ Statistics ============

mod stats {
    use super::*;

    #[tokio::test]
    async fn test_stats_reports_uptime_and_clients() {
        let bot = TestBot::new(0);
        bot.server.reply(&bot.config.commands.status, Some(STATUSALL));

        assert_eq!(bot.send(ADMIN, "/stats").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(
            texts,
            vec![
                COLLECTING.to_string(),
                "Server uptime: 3 days since Jan 10 09:15:02 2024.".to_string(),
                "Client alice connected 42 minutes ago.\nIP-address: 198.51.100.23".to_string(),
                "Client bob is not connected.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_unreachable_server() {
        let bot = TestBot::new(0);

        assert_eq!(bot.send(ADMIN, "/stats").await, Outcome::Handled);

        let texts = RecordingSink::texts(&bot.sink.take());
        assert_eq!(texts, vec![COLLECTING.to_string(), STATS_FAILED.to_string()]);
    }
}

// ============ Speed History ============

mod speed_history {
    use super::*;
    use vpnbot::SpeedRecord;

    #[tokio::test]
    async fn test_no_data_reply() {
        let bot = TestBot::new(0);

        assert_eq!(bot.send(ADMIN, "/spdhist").await, Outcome::Handled);

        let replies = bot.sink.take();
        assert_eq!(replies, vec![Reply::Text(ADMIN, NO_DATA.to_string())]);
        assert!(!bot.chart_path().exists());
    }

    #[tokio::test]
    async fn test_chart_is_rendered_and_sent() {
        let bot = TestBot::new(0);
        let history = bot.dispatcher.history();
        history
            .append(&SpeedRecord::new("10 Jan 09:00", Some(95.5), Some(18.2)))
            .unwrap();
        history
            .append(&SpeedRecord::new("11 Jan 09:00", Some(101.0), None))
            .unwrap();

        assert_eq!(bot.send(ADMIN, "/spdhist").await, Outcome::Handled);

        let replies = bot.sink.take();
        assert_eq!(
            replies,
            vec![Reply::Image(ADMIN, bot.chart_path().to_path_buf())]
        );

        let png = std::fs::read(bot.chart_path()).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(bot.temp_dir.path().join("graph.png").exists());
    }
}
