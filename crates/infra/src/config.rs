//! Runtime settings.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. optional file named by `ORDERFLOW_CONFIG` (format picked from the extension)
//! 3. environment variables `ORDERFLOW__<SECTION>__<KEY>` (e.g. `ORDERFLOW__HTTP__BIND_ADDR`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::consumers::NotificationPolicy;
use crate::retry::RetryPolicy;

/// Environment variable naming an optional settings file.
pub const CONFIG_FILE_ENV: &str = "ORDERFLOW_CONFIG";

const ENV_PREFIX: &str = "ORDERFLOW";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpSettings {
    pub bind_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelSettings {
    pub max_deliveries: u32,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationSettings {
    pub dedupe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecoverySettings {
    pub stale_after_secs: u64,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub http: HttpSettings,
    pub log: LogSettings,
    pub channel: ChannelSettings,
    pub publish: PublishSettings,
    pub notifications: NotificationSettings,
    pub recovery: RecoverySettings,
    /// JSON file with customers and products to load into the lookups.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl Settings {
    /// Load from defaults, `ORDERFLOW_CONFIG` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("http.bind_addr", "0.0.0.0:8080")?
            .set_default("log.filter", "info")?
            .set_default("log.json", true)?
            .set_default("channel.max_deliveries", 5_i64)?
            .set_default("channel.poll_interval_ms", 250_i64)?
            .set_default("publish.max_attempts", 3_i64)?
            .set_default("publish.initial_backoff_ms", 50_i64)?
            .set_default("publish.max_backoff_ms", 1_000_i64)?
            .set_default("notifications.dedupe", false)?
            .set_default("recovery.stale_after_secs", 30_i64)?
            .set_default("recovery.interval_secs", 10_i64)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn publish_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.publish.initial_backoff_ms),
            max_delay: Duration::from_millis(self.publish.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.channel.poll_interval_ms.max(1))
    }

    pub fn notification_policy(&self) -> NotificationPolicy {
        NotificationPolicy::from_dedupe_flag(self.notifications.dedupe)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.recovery.stale_after_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery.interval_secs.max(1))
    }
}
