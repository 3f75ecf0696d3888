//! Crate-wide error taxonomy.

use thiserror::Error;

/// Errors surfaced by any fallible operation in this crate.
#[derive(Debug, Error)]
pub enum PulseWatchError {
    /// A transient external failure (network timeout, 5xx, 429) that was
    /// retried and ultimately did not succeed within the retry budget.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The circuit breaker short-circuited the call.
    #[error("circuit open")]
    CircuitOpen,

    /// A setting value failed validation; the caller should keep the
    /// previous value and fall back to the documented default.
    #[error("invalid setting {key}: {reason}")]
    Validation {
        /// Setting key that failed validation.
        key: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A per-token computation failure, tagged with the mint and the phase
    /// of the scoring pipeline in which it occurred.
    #[error("computation failed for {mint} in {phase}: {source}")]
    Computation {
        /// Mint address of the token being scored.
        mint: String,
        /// Pipeline phase (`aggregate`, `components`, `smooth`, `persist`).
        phase: &'static str,
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// A repository (persistence) failure.
    #[error("repository error: {0}")]
    Repository(#[from] sqlx::Error),

    /// A process bootstrap / configuration failure.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = PulseWatchError> = std::result::Result<T, E>;
