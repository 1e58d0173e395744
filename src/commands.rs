//! Chat command table

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

pub const HELP: &str = "\
/start - run the bot
/help - show this help
/reboot - restart server
/speedtest - check internet speed
/spdhist - view speed history
/stats - display statistics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Help,
    Reboot,
    SpeedTest,
    Stats,
    SpeedHistory,
}

static COMMANDS: Lazy<HashMap<&'static str, Command>> = Lazy::new(|| {
    Command::ALL
        .iter()
        .map(|cmd| (cmd.as_str(), *cmd))
        .collect()
});

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Start,
        Command::Help,
        Command::Reboot,
        Command::SpeedTest,
        Command::Stats,
        Command::SpeedHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "/start",
            Self::Help => "/help",
            Self::Reboot => "/reboot",
            Self::SpeedTest => "/speedtest",
            Self::Stats => "/stats",
            Self::SpeedHistory => "/spdhist",
        }
    }

    /// What the user did, for the usage log
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start | Self::Help => "opened help",
            Self::Reboot => "rebooted server",
            Self::SpeedTest => "measured speed",
            Self::Stats => "collected stats",
            Self::SpeedHistory => "viewed speed history",
        }
    }

    /// Look up the command in the first word of `text`.
    ///
    /// Case-insensitive; a `@botname` suffix (group chats) is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        if !word.starts_with('/') {
            return None;
        }
        let name = word.split('@').next().unwrap_or(word).to_lowercase();
        COMMANDS.get(name.as_str()).copied()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
