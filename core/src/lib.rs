//! # PulseWatch Core
//!
//! Token lifecycle and activity-scoring engine for freshly migrated Solana
//! memecoins: the state machine that moves tokens between `monitoring`,
//! `active`, and `archived`; the two-tier scheduler that refreshes hot and
//! cold token groups at different cadences; the metrics aggregator that
//! collapses DEX pool snapshots into a feature vector; and the
//! Hybrid-Momentum scoring model with EWMA-smoothed components fed by a
//! resilient external-API client.

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod apis;
pub mod config;
pub mod error;
pub mod exporter;
pub mod intake;
pub mod lifecycle;
pub mod metrics;
pub mod repository;
pub mod scheduler;
pub mod scoring;
pub mod settings;
pub mod types;

pub use error::{PulseWatchError, Result};

/// Current version of the PulseWatch core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the process-wide `tracing` subscriber. Logs to stdout, and
/// additionally to a rolling daily file under `log_dir` when configured.
pub fn init_tracing(log_level: &str, log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "pulsewatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .init();
            None
        }
    }
}
