//! Configuration for the updater daemon.

use std::time::Duration;

use anyhow::Result;

/// Updater daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the admin configuration JSON (settings source).
    pub admin_config_path: String,

    /// Path to the persistent system configuration (image history).
    pub state_path: String,

    /// Path to the JSON-lines audit log.
    pub audit_log_path: String,

    /// Seconds between ticks.
    pub tick_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let admin_config_path = std::env::var("DRYDOCK_ADMIN_CONFIG")
            .unwrap_or_else(|_| "/var/lib/drydock/admin.json".to_string());

        let state_path = std::env::var("DRYDOCK_STATE_PATH")
            .unwrap_or_else(|_| "/var/lib/drydock/state.json".to_string());

        let audit_log_path = std::env::var("DRYDOCK_AUDIT_LOG")
            .unwrap_or_else(|_| "/var/lib/drydock/audit.jsonl".to_string());

        let tick_interval_secs = std::env::var("DRYDOCK_TICK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1800);

        let log_level = std::env::var("DRYDOCK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            admin_config_path,
            state_path,
            audit_log_path,
            tick_interval_secs,
            log_level,
        })
    }

    /// Interval between ticks, floored at one minute.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(60))
    }
}
