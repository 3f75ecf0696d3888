//! C1 — typed settings provider.
//!
//! Settings are a `key -> value` mapping persisted in `app_settings` and
//! read through a short-TTL in-process cache so a single scoring cycle sees
//! a consistent configuration even under concurrent `set` calls from an
//! (out-of-scope) admin surface.

use std::str::FromStr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sqlx::PgPool;
use tracing::warn;

use crate::error::{PulseWatchError, Result};
use crate::types::ScoringModelName;

/// How long a cached read is trusted before re-querying the database.
const CACHE_TTL: Duration = Duration::from_secs(5);

/// Declared settings keys and their compiled-in defaults (`spec.md` §4.1).
pub mod keys {
    /// `scoring_model_active`
    pub const SCORING_MODEL_ACTIVE: &str = "scoring_model_active";
    /// `w_tx`
    pub const W_TX: &str = "w_tx";
    /// `w_vol`
    pub const W_VOL: &str = "w_vol";
    /// `w_fresh`
    pub const W_FRESH: &str = "w_fresh";
    /// `w_oi`
    pub const W_OI: &str = "w_oi";
    /// `ewma_alpha`
    pub const EWMA_ALPHA: &str = "ewma_alpha";
    /// `freshness_threshold_hours`
    pub const FRESHNESS_THRESHOLD_HOURS: &str = "freshness_threshold_hours";
    /// `min_score`
    pub const MIN_SCORE: &str = "min_score";
    /// `activation_min_liquidity_usd`
    pub const ACTIVATION_MIN_LIQUIDITY_USD: &str = "activation_min_liquidity_usd";
    /// `min_pool_liquidity_usd`
    pub const MIN_POOL_LIQUIDITY_USD: &str = "min_pool_liquidity_usd";
    /// `hot_interval_sec`
    pub const HOT_INTERVAL_SEC: &str = "hot_interval_sec";
    /// `cold_interval_sec`
    pub const COLD_INTERVAL_SEC: &str = "cold_interval_sec";
    /// `archive_below_hours`
    pub const ARCHIVE_BELOW_HOURS: &str = "archive_below_hours";
    /// `monitoring_timeout_hours`
    pub const MONITORING_TIMEOUT_HOURS: &str = "monitoring_timeout_hours";
    /// `notarb_min_score`
    pub const NOTARB_MIN_SCORE: &str = "notarb_min_score";
    /// `notarb_max_spam_percentage`
    pub const NOTARB_MAX_SPAM_PERCENTAGE: &str = "notarb_max_spam_percentage";
    /// `arbitrage_min_tx_5m`
    pub const ARBITRAGE_MIN_TX_5M: &str = "arbitrage_min_tx_5m";
    /// `arbitrage_optimal_tx_5m`
    pub const ARBITRAGE_OPTIMAL_TX_5M: &str = "arbitrage_optimal_tx_5m";
    /// `arbitrage_acceleration_weight`
    pub const ARBITRAGE_ACCELERATION_WEIGHT: &str = "arbitrage_acceleration_weight";
    /// `tx_calculation_mode`
    pub const TX_CALCULATION_MODE: &str = "tx_calculation_mode";
}

fn default_for(key: &str) -> &'static str {
    match key {
        keys::SCORING_MODEL_ACTIVE => "hybrid_momentum",
        keys::W_TX | keys::W_VOL | keys::W_FRESH | keys::W_OI => "0.25",
        keys::EWMA_ALPHA => "0.3",
        keys::FRESHNESS_THRESHOLD_HOURS => "6.0",
        keys::MIN_SCORE => "0.1",
        keys::ACTIVATION_MIN_LIQUIDITY_USD => "200",
        keys::MIN_POOL_LIQUIDITY_USD => "500",
        keys::HOT_INTERVAL_SEC => "10",
        keys::COLD_INTERVAL_SEC => "45",
        keys::ARCHIVE_BELOW_HOURS => "12",
        keys::MONITORING_TIMEOUT_HOURS => "12",
        keys::NOTARB_MIN_SCORE => "0.1",
        keys::NOTARB_MAX_SPAM_PERCENTAGE => "50",
        keys::ARBITRAGE_MIN_TX_5M => "100",
        keys::ARBITRAGE_OPTIMAL_TX_5M => "500",
        keys::ARBITRAGE_ACCELERATION_WEIGHT => "0.5",
        keys::TX_CALCULATION_MODE => "standard",
        _ => "",
    }
}

struct CacheEntry {
    value: String,
    cached_at: Instant,
}

/// Typed read/write access to tunable parameters, backed by `app_settings`
/// and fronted by a process-wide short-TTL cache.
pub struct Settings {
    pool: PgPool,
    cache: DashMap<String, CacheEntry>,
}

impl Settings {
    /// Builds a settings provider over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
        }
    }

    /// Reads a raw string value, consulting the cache first.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.cache.get(key) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                return Ok(Some(entry.value.clone()));
            }
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((value,)) = &row {
            self.cache.insert(
                key.to_string(),
                CacheEntry {
                    value: value.clone(),
                    cached_at: Instant::now(),
                },
            );
        }

        Ok(row.map(|(v,)| v))
    }

    /// Reads and parses a typed value, falling back to the documented
    /// default (and logging once) on a missing key or a parse failure.
    pub async fn get_typed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Clone,
    {
        match self.get(key).await {
            Ok(Some(raw)) => raw.parse::<T>().unwrap_or_else(|_| {
                warn!(key, raw, "failed to parse setting, using default");
                default.clone()
            }),
            Ok(None) => default_for(key)
                .parse::<T>()
                .unwrap_or(default),
            Err(err) => {
                warn!(key, %err, "settings read failed, using default");
                default
            }
        }
    }

    /// Resolves the active scoring model.
    pub async fn scoring_model(&self) -> ScoringModelName {
        let raw = self
            .get_typed(keys::SCORING_MODEL_ACTIVE, "hybrid_momentum".to_string())
            .await;
        raw.parse().unwrap_or(ScoringModelName::HybridMomentum)
    }

    /// Writes a setting, validating it first. Rejected writes leave the
    /// previous value (and cache entry) untouched.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.validate(key, value)?;

        sqlx::query(
            "INSERT INTO app_settings (key, value, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        self.cache.remove(key);
        Ok(())
    }

    fn validate(&self, key: &str, value: &str) -> Result<()> {
        let reject = |reason: &str| {
            Err(PulseWatchError::Validation {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        match key {
            keys::SCORING_MODEL_ACTIVE => {
                if value.parse::<ScoringModelName>().is_err() {
                    return reject("must be hybrid_momentum or legacy");
                }
            }
            keys::W_TX | keys::W_VOL | keys::W_FRESH | keys::W_OI => match value.parse::<f64>() {
                Ok(v) if (0.0..=1.0).contains(&v) => {}
                _ => return reject("must be a real number in [0, 1]"),
            },
            keys::EWMA_ALPHA => match value.parse::<f64>() {
                Ok(v) if (0.0..=1.0).contains(&v) => {}
                _ => return reject("must be a real number in [0, 1]"),
            },
            keys::FRESHNESS_THRESHOLD_HOURS => match value.parse::<f64>() {
                Ok(v) if v > 0.0 => {}
                _ => return reject("must be positive"),
            },
            keys::ACTIVATION_MIN_LIQUIDITY_USD
            | keys::MIN_POOL_LIQUIDITY_USD
            | keys::HOT_INTERVAL_SEC
            | keys::COLD_INTERVAL_SEC
            | keys::ARCHIVE_BELOW_HOURS
            | keys::MONITORING_TIMEOUT_HOURS => match value.parse::<f64>() {
                Ok(v) if v >= 0.0 => {}
                _ => return reject("must be non-negative"),
            },
            _ => {
                if value.parse::<f64>().is_err() && value.parse::<i64>().is_err() {
                    // Unrecognized keys are accepted as opaque strings
                    // (e.g. tx_calculation_mode), everything else numeric.
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_are_a_quarter() {
        assert_eq!(default_for(keys::W_TX), "0.25");
        assert_eq!(default_for(keys::W_OI), "0.25");
    }

    #[test]
    fn default_model_is_hybrid_momentum() {
        assert_eq!(default_for(keys::SCORING_MODEL_ACTIVE), "hybrid_momentum");
    }
}
