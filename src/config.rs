//! Configuration module for relaywatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the SQLite database file (default: "relaywatch.db")
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "relaywatch.db".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RELAYWATCH_DB_PATH`: Database file path (default: "relaywatch.db")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(db_path) = env::var("RELAYWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg
    }
}
