//! Process-level bootstrap configuration.
//!
//! Distinct from [`crate::settings`] (C1): this is read once at startup from
//! the environment (and an optional TOML file), never mutated at runtime,
//! and never persisted to the database.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PulseWatchError, Result};

/// Process-level knobs: database connection, scheduler toggle, logging,
/// exporter destination. Loaded once via [`AppConfig::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// If false, the daemon wires everything up but never starts the
    /// scheduler loops (used by `--dry-run`).
    pub scheduler_enabled: bool,
    /// `tracing` env-filter directive, e.g. `"info"` or `"pulsewatch=debug"`.
    pub log_level: String,
    /// Directory for rolling log files; `None` logs to stdout only.
    pub log_dir: Option<String>,
    /// Destination path for the NotArb export document.
    pub notarb_export_path: String,
    /// Bind address for the liveness endpoint handler (router itself is
    /// out of scope; this crate only computes the health snapshot).
    pub http_health_bind_addr: String,
    /// Seconds given to in-flight scheduler operations on graceful
    /// shutdown before they are cancelled.
    pub graceful_shutdown_timeout_secs: u64,
    /// DEX Screener API base URL.
    pub dexscreener_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/pulsewatch".to_string(),
            scheduler_enabled: true,
            log_level: "info".to_string(),
            log_dir: None,
            notarb_export_path: "./notarb_tokens.json".to_string(),
            http_health_bind_addr: "127.0.0.1:9090".to_string(),
            graceful_shutdown_timeout_secs: 30,
            dexscreener_base_url: "https://api.dexscreener.com".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads configuration by layering environment variables prefixed
    /// `PULSEWATCH_` over an optional TOML file, falling back to
    /// documented defaults for anything unset.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("PULSEWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants that are cheap and worth catching at startup
    /// rather than as a confusing failure deep in the scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(PulseWatchError::Validation {
                key: "database_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.graceful_shutdown_timeout_secs == 0 {
            return Err(PulseWatchError::Validation {
                key: "graceful_shutdown_timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_database_url_rejected() {
        let mut cfg = AppConfig::default();
        cfg.database_url = String::new();
        assert!(cfg.validate().is_err());
    }
}
