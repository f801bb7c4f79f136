use crate::errors::ConfigError;
use std::time::Duration;

type Result<T> = std::result::Result<T, ConfigError>;

/// Per-lane dispatch concurrency configuration.
///
/// Bounds how many tasks from a single priority lane may execute
/// concurrently. Each lane loop holds a semaphore sized to this value.
#[derive(Clone, Debug)]
pub struct LaneConcurrency(usize);

impl Default for LaneConcurrency {
    fn default() -> Self {
        Self(4)
    }
}

impl TryFrom<String> for LaneConcurrency {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let permits = value
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidNumber {
                var_name: "TASK_LANE_CONCURRENCY".to_string(),
                value: value.clone(),
            })?;

        if permits == 0 {
            return Err(ConfigError::InvalidNumber {
                var_name: "TASK_LANE_CONCURRENCY".to_string(),
                value,
            });
        }

        Ok(Self(permits))
    }
}

impl AsRef<usize> for LaneConcurrency {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

/// Dequeue poll timeout configuration.
///
/// How long a lane consumer blocks on an empty queue before yielding.
/// This is the only timeout in the dispatch path.
#[derive(Clone, Debug)]
pub struct DequeueTimeoutSeconds(u64);

impl Default for DequeueTimeoutSeconds {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<String> for DequeueTimeoutSeconds {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let seconds = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber {
                var_name: "TASK_DEQUEUE_TIMEOUT_SECONDS".to_string(),
                value,
            })?;
        Ok(Self(seconds))
    }
}

impl DequeueTimeoutSeconds {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

/// Idle interval between polls after an empty dequeue.
#[derive(Clone, Debug)]
pub struct IdleIntervalMillis(u64);

impl Default for IdleIntervalMillis {
    fn default() -> Self {
        Self(250)
    }
}

impl TryFrom<String> for IdleIntervalMillis {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let millis = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber {
                var_name: "TASK_IDLE_INTERVAL_MS".to_string(),
                value,
            })?;
        Ok(Self(millis))
    }
}

impl IdleIntervalMillis {
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

/// Minimum age before a terminal task is eligible for sweeping.
#[derive(Clone, Debug)]
pub struct SweepAgeSeconds(u64);

impl Default for SweepAgeSeconds {
    fn default() -> Self {
        Self(3600)
    }
}

impl TryFrom<String> for SweepAgeSeconds {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let seconds = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber {
                var_name: "TASK_SWEEP_AGE_SECONDS".to_string(),
                value,
            })?;
        Ok(Self(seconds))
    }
}

impl SweepAgeSeconds {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

/// Spam detection threshold: the number of messages a single user may send
/// within the window before the next message is flagged.
#[derive(Clone, Debug)]
pub struct SpamThreshold(u32);

impl Default for SpamThreshold {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<String> for SpamThreshold {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let threshold = value
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidNumber {
                var_name: "SPAM_THRESHOLD".to_string(),
                value: value.clone(),
            })?;

        if threshold == 0 {
            return Err(ConfigError::InvalidNumber {
                var_name: "SPAM_THRESHOLD".to_string(),
                value,
            });
        }

        Ok(Self(threshold))
    }
}

impl AsRef<u32> for SpamThreshold {
    fn as_ref(&self) -> &u32 {
        &self.0
    }
}

/// Spam detection sliding-window width.
#[derive(Clone, Debug)]
pub struct SpamWindowSeconds(u64);

impl Default for SpamWindowSeconds {
    fn default() -> Self {
        Self(60)
    }
}

impl TryFrom<String> for SpamWindowSeconds {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let seconds = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber {
                var_name: "SPAM_WINDOW_SECONDS".to_string(),
                value: value.clone(),
            })?;

        if seconds == 0 {
            return Err(ConfigError::InvalidNumber {
                var_name: "SPAM_WINDOW_SECONDS".to_string(),
                value,
            });
        }

        Ok(Self(seconds))
    }
}

impl SpamWindowSeconds {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

/// Service configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// Redis connection URL for queueing, task records, and pub/sub.
    pub redis_url: String,

    /// Postgres connection URL. Optional: when unset the service falls
    /// back to in-memory firewall config storage and logs a warning.
    pub database_url: Option<String>,

    pub lane_concurrency: LaneConcurrency,
    pub dequeue_timeout: DequeueTimeoutSeconds,
    pub idle_interval: IdleIntervalMillis,
    pub sweep_age: SweepAgeSeconds,

    pub spam_threshold: SpamThreshold,
    pub spam_window: SpamWindowSeconds,

    /// Whether the firewall posts a notice to the chat when it removes
    /// a message.
    pub firewall_notify: bool,
}

impl Config {
    pub fn new() -> Result<Self> {
        let redis_url = optional_env("REDIS_URL")
            .unwrap_or_else(|| "redis://localhost:6379/0".to_string());

        let database_url = optional_env("DATABASE_URL");

        let lane_concurrency = parse_env("TASK_LANE_CONCURRENCY")?;
        let dequeue_timeout = parse_env("TASK_DEQUEUE_TIMEOUT_SECONDS")?;
        let idle_interval = parse_env("TASK_IDLE_INTERVAL_MS")?;
        let sweep_age = parse_env("TASK_SWEEP_AGE_SECONDS")?;
        let spam_threshold = parse_env("SPAM_THRESHOLD")?;
        let spam_window = parse_env("SPAM_WINDOW_SECONDS")?;

        let firewall_notify = match optional_env("FIREWALL_NOTIFY") {
            None => true,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidBool {
                        var_name: "FIREWALL_NOTIFY".to_string(),
                        value,
                    });
                }
            },
        };

        Ok(Self {
            redis_url,
            database_url,
            lane_concurrency,
            dequeue_timeout,
            idle_interval,
            sweep_age,
            spam_threshold,
            spam_window,
            firewall_notify,
        })
    }
}

fn optional_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(var_name: &str) -> Result<T>
where
    T: Default + TryFrom<String, Error = ConfigError>,
{
    match optional_env(var_name) {
        Some(value) => T::try_from(value),
        None => Ok(T::default()),
    }
}

/// Return the crate version for `--version` output.
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
