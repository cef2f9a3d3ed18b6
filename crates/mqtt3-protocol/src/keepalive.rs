use std::time::Duration;

/// Server side keep-alive policy. A connection must show traffic within
/// `timeout_percent` of the keep-alive interval the client announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub timeout_percent: u16,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            timeout_percent: 150,
        }
    }
}

impl KeepaliveConfig {
    #[must_use]
    pub const fn new(timeout_percent: u16) -> Self {
        Self { timeout_percent }
    }

    /// Grace period for a client keep-alive given in seconds, or `None` when
    /// the client disabled keep-alive with `0`.
    #[must_use]
    pub fn timeout_duration(&self, keep_alive_secs: u16) -> Option<Duration> {
        if keep_alive_secs == 0 {
            return None;
        }
        let millis = u64::from(keep_alive_secs) * 1000;
        Some(Duration::from_millis(
            millis * u64::from(self.timeout_percent) / 100,
        ))
    }

    #[must_use]
    pub fn is_expired(&self, keep_alive_secs: u16, idle: Duration) -> bool {
        self.timeout_duration(keep_alive_secs)
            .is_some_and(|timeout| idle > timeout)
    }
}
