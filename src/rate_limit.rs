//! Per-user command cooldown
//!
//! A user's command is accepted only if their previous accepted command is at
//! least `cooldown` old. Rejected attempts do not move the window.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Rate limiter keyed by chat user id
pub struct RateLimiter {
    cooldown: Duration,
    /// user_id -> last accepted command
    last_accepted: Mutex<HashMap<i64, Instant>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Check and record a command from `user_id` that arrived at `now`.
    /// Returns true if allowed.
    ///
    /// An arrival older than the last accepted command counts as inside the
    /// cooldown.
    pub fn check_at(&self, user_id: i64, now: Instant) -> bool {
        let mut entries = self.last_accepted.lock();

        if let Some(last) = entries.get(&user_id) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.cooldown {
                debug!(
                    "User {} in cooldown ({:?} left)",
                    user_id,
                    self.cooldown - elapsed
                );
                return false;
            }
        }

        entries.insert(user_id, now);
        true
    }

}
