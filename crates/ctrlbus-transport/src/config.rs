use std::time::Duration;

use serde::Deserialize;

/// Default bound for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default pause between two reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound for flushing one outbound frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Connection behavior shared by every ctrlbus client.
///
/// Reconnection is unconditional and unbounded: after a failed attempt or a
/// lost connection the client waits `reconnect_interval` and tries again,
/// forever. The interval is fixed; there is no backoff.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Upper bound for one connect attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Fixed pause between reconnection attempts.
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    /// Upper bound for flushing one outbound frame.
    #[serde(with = "millis")]
    pub write_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectConfig {
    /// Same configuration with a different write bound.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }
}

/// Serde helper: durations are written as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde helper for optional millisecond durations.
pub mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
