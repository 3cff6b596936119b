/// Config schema: supervisor timings, Telegram transport, database.
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotpanelConfig {
    pub supervisor: SupervisorConfig,
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
}

/// Worker lifecycle and reconciliation timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds between reconciliation passes.
    pub reconcile_interval_secs: u64,
    /// Wait used instead of the interval after a failed pass.
    pub error_backoff_secs: u64,
    /// How long `start` waits for a worker to report it is polling.
    pub start_timeout_secs: u64,
    /// How long `stop` waits before force-releasing the registry slot.
    pub stop_timeout_secs: u64,
    /// Pause after a transient receive error before polling again.
    pub receive_retry_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 10,
            error_backoff_secs: 30,
            start_timeout_secs: 15,
            stop_timeout_secs: 5,
            receive_retry_secs: 5,
        }
    }
}

/// Telegram Bot API client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelegramConfig {
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
    /// HTTP client timeout; must exceed `poll_timeout_secs`.
    pub client_timeout_secs: u64,
    /// HTTP timeout for the one-shot credential check.
    pub probe_timeout_secs: u64,
    /// Alternative Bot API endpoint (self-hosted server or test double).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            client_timeout_secs: 45,
            probe_timeout_secs: 5,
            api_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://botpanel.db?mode=rwc".into(),
        }
    }
}
