//! C8 — lifecycle manager: status transitions (`spec.md` §4.8).

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{FeatureVector, Token, TokenStatus};

/// DEX identifiers considered "native" to the originating launchpad and
/// therefore excluded from activation eligibility. Kept distinct from
/// [`crate::metrics::is_dust`] — the two filters are never conflated
/// (`spec.md` §9 open question).
const LAUNCHPAD_FAMILY_DEXES: &[&str] = &["pumpfun", "pump", "pumpswap"];

/// True when `dex_id` belongs to the launchpad's own AMM family.
pub fn is_launchpad_native(dex_id: &str) -> bool {
    LAUNCHPAD_FAMILY_DEXES
        .iter()
        .any(|native| native.eq_ignore_ascii_case(dex_id))
}

/// Inputs the lifecycle rules need beyond the token row and current
/// metrics, evaluated once per scoring cycle or sweep.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleContext<'a> {
    /// Token being evaluated.
    pub token: &'a Token,
    /// This cycle's aggregated feature vector (`None` on a timeout sweep
    /// with no fresh data).
    pub metrics: Option<&'a FeatureVector>,
    /// Liquidity required, from a qualifying external pool, to activate.
    pub activation_min_liquidity_usd: f64,
    /// Whether a qualifying external (non-launchpad) pool of sufficient
    /// liquidity exists this cycle.
    pub has_qualifying_external_pool: bool,
    /// How many consecutive hours the latest smoothed score has been below
    /// `min_score` (0 if the most recent reading was at or above it).
    pub hours_below_min_score: f64,
    /// `archive_below_hours` setting.
    pub archive_below_hours: f64,
    /// `monitoring_timeout_hours` setting.
    pub monitoring_timeout_hours: f64,
    /// Current wall-clock time.
    pub now: DateTime<Utc>,
}

/// Evaluates the ordered rules of `spec.md` §4.8 and returns the token's
/// next status, if it differs from the current one. `Archived` is
/// terminal: archived tokens are never re-evaluated.
pub fn next_status(ctx: &LifecycleContext<'_>) -> Option<TokenStatus> {
    if ctx.token.status == TokenStatus::Archived {
        return None;
    }

    // Rule 1: activation.
    if ctx.token.status == TokenStatus::Monitoring && ctx.has_qualifying_external_pool {
        debug!(mint = %ctx.token.mint_address, "activating: qualifying external pool found");
        return Some(TokenStatus::Active);
    }

    // Rule 2: de-activation.
    if ctx.token.status == TokenStatus::Active && !ctx.has_qualifying_external_pool {
        debug!(mint = %ctx.token.mint_address, "deactivating: no qualifying external pool");
        return Some(TokenStatus::Monitoring);
    }

    // Rule 3: monitoring timeout.
    if ctx.token.status == TokenStatus::Monitoring {
        let age_hours = (ctx.now - ctx.token.created_at).num_seconds() as f64 / 3600.0;
        if age_hours >= ctx.monitoring_timeout_hours && !ctx.has_qualifying_external_pool {
            debug!(mint = %ctx.token.mint_address, "archiving: monitoring timeout");
            return Some(TokenStatus::Archived);
        }
    }

    // Rule 4: low-score archival.
    if ctx.token.status == TokenStatus::Active
        && ctx.hours_below_min_score >= ctx.archive_below_hours
    {
        debug!(mint = %ctx.token.mint_address, "archiving: low score for archive_below_hours");
        return Some(TokenStatus::Archived);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn token(status: TokenStatus, created_at: DateTime<Utc>) -> Token {
        Token {
            id: Uuid::new_v4(),
            mint_address: "mint".to_string(),
            symbol: None,
            name: None,
            status,
            created_at,
            last_processed_at: None,
        }
    }

    #[test]
    fn activates_on_qualifying_external_pool() {
        let now = Utc::now();
        let t = token(TokenStatus::Monitoring, now);
        let ctx = LifecycleContext {
            token: &t,
            metrics: None,
            activation_min_liquidity_usd: 200.0,
            has_qualifying_external_pool: true,
            hours_below_min_score: 0.0,
            archive_below_hours: 12.0,
            monitoring_timeout_hours: 12.0,
            now,
        };
        assert_eq!(next_status(&ctx), Some(TokenStatus::Active));
    }

    #[test]
    fn archives_after_monitoring_timeout() {
        let created = Utc::now() - chrono::Duration::hours(13);
        let t = token(TokenStatus::Monitoring, created);
        let ctx = LifecycleContext {
            token: &t,
            metrics: None,
            activation_min_liquidity_usd: 200.0,
            has_qualifying_external_pool: false,
            hours_below_min_score: 0.0,
            archive_below_hours: 12.0,
            monitoring_timeout_hours: 12.0,
            now: Utc::now(),
        };
        assert_eq!(next_status(&ctx), Some(TokenStatus::Archived));
    }

    #[test]
    fn archived_is_terminal() {
        let t = token(TokenStatus::Archived, Utc::now());
        let ctx = LifecycleContext {
            token: &t,
            metrics: None,
            activation_min_liquidity_usd: 200.0,
            has_qualifying_external_pool: true,
            hours_below_min_score: 999.0,
            archive_below_hours: 12.0,
            monitoring_timeout_hours: 12.0,
            now: Utc::now(),
        };
        assert_eq!(next_status(&ctx), None);
    }

    #[test]
    fn launchpad_native_dex_excluded_from_activation() {
        assert!(is_launchpad_native("pumpfun"));
        assert!(!is_launchpad_native("raydium"));
    }
}
