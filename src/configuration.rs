use serde;
use std::time::Duration;

use crate::services::{LivenessPolicy, OrchestratorConfig, RetryPolicy};

#[derive(Debug, serde::Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub app_host: String,
    #[serde(default = "default_port")]
    pub app_port: u16,
    /// Postgres record store. Without it the server falls back to the inventory file.
    pub database: Option<DatabaseSettings>,
    pub inventory_path: Option<String>,
    #[serde(default)]
    pub deploy: DeploySettings,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }
}

/// Timing of remote operations, in seconds unless noted.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    pub settle_secs: u64,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    pub stop_settle_secs: u64,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// 1 handles target servers one after another.
    pub max_parallel_servers: usize,
    /// Buffered messages per notification channel.
    pub notification_capacity: usize,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            settle_secs: 3,
            poll_interval_secs: 6,
            max_poll_attempts: 30,
            stop_settle_secs: 1,
            connect_attempts: 3,
            connect_backoff_secs: 2,
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
            max_parallel_servers: 1,
            notification_capacity: 256,
        }
    }
}

impl DeploySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            liveness: LivenessPolicy {
                settle: Duration::from_secs(self.settle_secs),
                interval: Duration::from_secs(self.poll_interval_secs),
                max_attempts: self.max_poll_attempts,
                probe_timeout: self.command_timeout(),
            },
            stop_settle: Duration::from_secs(self.stop_settle_secs),
            connect_retry: RetryPolicy {
                attempts: self.connect_attempts,
                backoff: Duration::from_secs(self.connect_backoff_secs),
            },
            max_parallel_servers: self.max_parallel_servers,
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // `configuration.{yaml,toml,json}` is optional, ROLLOUT__DEPLOY__SETTLE_SECS=5 style
    // variables override it.
    config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("ROLLOUT")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
}
