//! Watchdog tunables resolved from the settings table.

use std::time::Duration;

use crate::db::{DbError, Store};

pub const SETTING_INTERVAL_MS: &str = "watchdog_interval_ms";
pub const SETTING_RETENTION_DAYS: &str = "health_retention_days";
pub const SETTING_GLOBAL_WEBHOOK_URL: &str = "global_webhook_url";

pub const DEFAULT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Tunables read from the settings table, with defaults applied for
/// absent, empty, or unparseable values.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub retention_days: i64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl WatchdogSettings {
    /// Load current settings. The global webhook URL is intentionally
    /// not part of this snapshot; webhook resolution reads it fresh at
    /// dispatch time.
    pub fn load(store: &Store) -> Result<Self, DbError> {
        let interval_ms = read_number(store, SETTING_INTERVAL_MS)?.unwrap_or(DEFAULT_INTERVAL_MS);
        let retention_days =
            read_number(store, SETTING_RETENTION_DAYS)?.unwrap_or(DEFAULT_RETENTION_DAYS);

        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            retention_days,
        })
    }
}

/// Read the global webhook URL setting, treating absent or empty as None.
pub fn global_webhook_url(store: &Store) -> Result<Option<String>, DbError> {
    let value = store.get_setting(SETTING_GLOBAL_WEBHOOK_URL)?;
    Ok(value.filter(|v| !v.is_empty()))
}

fn read_number<T: std::str::FromStr>(store: &Store, key: &str) -> Result<Option<T>, DbError> {
    let value = match store.get_setting(key)? {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    match value.parse() {
        Ok(n) => Ok(Some(n)),
        Err(_) => {
            tracing::warn!("Setting {} has unparseable value {:?}, using default", key, value);
            Ok(None)
        }
    }
}
