//! C6 — scoring model orchestrator: C3 -> C4 -> C5, weighted total.

use chrono::Utc;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::apis::DexScreenerClient;
use crate::error::PulseWatchError;
use crate::metrics;
use crate::repository::TokenRepository;
use crate::scoring::components::{
    orderflow_imbalance, token_freshness, tx_accel, vol_momentum, ComponentMode,
};
use crate::scoring::smoother;
use crate::settings::{keys, Settings};
use crate::types::{ComponentKey, ComponentVector, ScoreSnapshot, ScoringModelName, Token};

/// What happened when scoring one token.
#[derive(Debug)]
pub enum ScoringOutcome {
    /// A new snapshot was written.
    Scored(ScoreSnapshot),
    /// No data this cycle (client returned `None`); `last_processed_at` was
    /// still updated.
    Skipped,
    /// A per-token computation error was caught and logged; the token's
    /// `last_processed_at` was still updated so the cycle is not retried
    /// immediately. Never propagates to the scheduler.
    Failed,
}

/// Runs one scoring cycle for `token` (`spec.md` §4.6).
#[instrument(skip(client, repository, settings), fields(mint = %token.mint_address))]
pub async fn score_token(
    token: &Token,
    client: &DexScreenerClient,
    repository: &dyn TokenRepository,
    settings: &Settings,
) -> ScoringOutcome {
    let now = Utc::now();

    let model = settings.scoring_model().await;

    let pools = match client.get_pairs(&token.mint_address).await {
        Ok(Some(pools)) => pools,
        Ok(None) => {
            let _ = repository.touch_processed(token.id, now).await;
            return ScoringOutcome::Skipped;
        }
        Err(_) => {
            let _ = repository.touch_processed(token.id, now).await;
            return ScoringOutcome::Skipped;
        }
    };

    match run_pipeline(token, &pools, model, repository, settings).await {
        Ok(snapshot) => {
            let _ = repository.touch_processed(token.id, now).await;
            ScoringOutcome::Scored(snapshot)
        }
        Err(err) => {
            error!(mint = %token.mint_address, %err, "scoring cycle failed, token skipped this tick");
            let _ = repository.touch_processed(token.id, now).await;
            ScoringOutcome::Failed
        }
    }
}

async fn run_pipeline(
    token: &Token,
    pools: &[crate::types::PoolSnapshot],
    model: ScoringModelName,
    repository: &dyn TokenRepository,
    settings: &Settings,
) -> Result<ScoreSnapshot, PulseWatchError> {
    let min_pool_liquidity_usd = settings
        .get_typed(keys::MIN_POOL_LIQUIDITY_USD, 500.0)
        .await;

    let features = metrics::aggregate(pools, token.created_at, min_pool_liquidity_usd);

    let freshness_threshold = settings
        .get_typed(keys::FRESHNESS_THRESHOLD_HOURS, 6.0)
        .await;
    let tx_mode_setting: String = settings
        .get_typed(keys::TX_CALCULATION_MODE, "standard".to_string())
        .await;

    let tx_component = if tx_mode_setting == "arbitrage" {
        let optimal_tx_5m = settings.get_typed(keys::ARBITRAGE_OPTIMAL_TX_5M, 500.0).await;
        let acceleration_weight = settings
            .get_typed(keys::ARBITRAGE_ACCELERATION_WEIGHT, 0.5)
            .await;
        crate::scoring::components::tx_component(
            features.tx_count_5m,
            features.tx_count_1h,
            ComponentMode::Arbitrage {
                optimal_tx_5m,
                acceleration_weight,
            },
        )
    } else {
        tx_accel(features.tx_count_5m, features.tx_count_1h)
    };

    let mut raw = ComponentVector::new();
    raw.insert(ComponentKey::TxAccel, tx_component);
    raw.insert(
        ComponentKey::VolMomentum,
        vol_momentum(features.volume_5m, features.volume_1h),
    );
    raw.insert(
        ComponentKey::TokenFreshness,
        token_freshness(features.hours_since_creation, freshness_threshold),
    );
    raw.insert(
        ComponentKey::OrderflowImbalance,
        orderflow_imbalance(features.buys_volume_5m, features.sells_volume_5m),
    );

    let previous = repository.latest_snapshot(token.id).await?;
    let previous_smoothed = previous.as_ref().map(|s| &s.smoothed_components);
    let previous_smoothed_total = previous.as_ref().map(|s| s.smoothed_total);

    let alpha = settings.get_typed(keys::EWMA_ALPHA, 0.3).await;
    let smoothed = smoother::apply(previous_smoothed, &raw, alpha);

    let raw_total = match model {
        ScoringModelName::HybridMomentum => weighted_total(&raw, settings).await,
        ScoringModelName::Legacy => legacy_total(&features, &raw),
    };
    let smoothed_total = smoother::apply_total(previous_smoothed_total, raw_total, alpha);

    let snapshot = ScoreSnapshot {
        id: Uuid::new_v4(),
        token_id: token.id,
        created_at: Utc::now(),
        raw_components: raw,
        smoothed_components: smoothed,
        raw_total,
        smoothed_total,
        model,
        metrics: features,
    };

    repository.append_score_snapshot(&snapshot).await?;
    Ok(snapshot)
}

async fn weighted_total(raw: &ComponentVector, settings: &Settings) -> f64 {
    let w_tx = settings.get_typed(keys::W_TX, 0.25).await;
    let w_vol = settings.get_typed(keys::W_VOL, 0.25).await;
    let w_fresh = settings.get_typed(keys::W_FRESH, 0.25).await;
    let w_oi = settings.get_typed(keys::W_OI, 0.25).await;

    w_tx * raw.get(&ComponentKey::TxAccel).copied().unwrap_or(0.0)
        + w_vol * raw.get(&ComponentKey::VolMomentum).copied().unwrap_or(0.0)
        + w_fresh
            * raw
                .get(&ComponentKey::TokenFreshness)
                .copied()
                .unwrap_or(0.0)
        + w_oi
            * raw
                .get(&ComponentKey::OrderflowImbalance)
                .copied()
                .unwrap_or(0.0)
}

/// Legacy weighted formula over `{s, l, m, t}` (normalized volatility,
/// normalized log-liquidity, 5m/15m momentum ratio, normalized tx rate),
/// kept selectable during the migration to Hybrid-Momentum (`spec.md` §4.6,
/// §9). Uses equal 0.25 weights, matching the hybrid model's defaults, so
/// switching models does not itself change the weighting scheme.
fn legacy_total(features: &crate::types::FeatureVector, raw: &ComponentVector) -> f64 {
    let s = raw
        .get(&ComponentKey::OrderflowImbalance)
        .copied()
        .unwrap_or(0.0)
        .abs();
    let l = (features.l_tot.max(0.0) + 1.0).ln();
    let m = if features.delta_p_15m.abs() > f64::EPSILON {
        features.delta_p_5m / features.delta_p_15m
    } else {
        0.0
    };
    let t = raw.get(&ComponentKey::TxAccel).copied().unwrap_or(0.0);

    let total = 0.25 * s + 0.25 * l + 0.25 * m + 0.25 * t;
    if total.is_finite() {
        total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::DexScreenerClient;
    use crate::repository::InMemoryTokenRepository;
    use crate::types::TokenId;
    use sqlx::PgPool;

    fn make_settings() -> Settings {
        // A pool is required by the type signature but never connected to
        // in these tests; all reads fall through to compiled-in defaults
        // because no rows are ever inserted.
        let pool = PgPool::connect_lazy("postgres://localhost/pulsewatch_test")
            .expect("lazy connect never touches the network");
        Settings::new(pool)
    }

    #[tokio::test]
    async fn skips_without_writing_snapshot_when_client_has_no_data() {
        let repo = InMemoryTokenRepository::new();
        let token_id = repo
            .upsert_token("Mint111", crate::types::TokenStatus::Monitoring, Utc::now())
            .await
            .unwrap();
        let token = repo.get_token_by_id(token_id).await.unwrap().unwrap();

        // Base URL resolves to nothing reachable; the breaker stays closed
        // but every fetch attempt fails, exhausting retries quickly because
        // there is no listener on this host:port combination within the
        // backoff cap used by the client's own test build.
        let client = DexScreenerClient::new("http://127.0.0.1:1");
        let settings = make_settings();

        let outcome = score_token(&token, &client, &repo, &settings).await;
        assert!(matches!(outcome, ScoringOutcome::Skipped));
    }

    /// A repository whose `latest_snapshot` always fails, simulating a
    /// database outage mid-pipeline. Used to exercise C6's per-token error
    /// isolation (`spec.md` §4.6 error policy): `run_pipeline` must surface
    /// the failure as an `Err` rather than panicking or writing a partial
    /// snapshot, so `score_token` can catch it and continue the tick.
    struct FailingLatestSnapshotRepository {
        inner: InMemoryTokenRepository,
    }

    #[async_trait::async_trait]
    impl TokenRepository for FailingLatestSnapshotRepository {
        async fn upsert_token(
            &self,
            mint: &str,
            initial_status: crate::types::TokenStatus,
            created_at: chrono::DateTime<Utc>,
        ) -> crate::error::Result<TokenId> {
            self.inner.upsert_token(mint, initial_status, created_at).await
        }

        async fn get_token(&self, mint: &str) -> crate::error::Result<Option<Token>> {
            self.inner.get_token(mint).await
        }

        async fn get_token_by_id(&self, id: TokenId) -> crate::error::Result<Option<Token>> {
            self.inner.get_token_by_id(id).await
        }

        async fn set_status(
            &self,
            id: TokenId,
            new_status: crate::types::TokenStatus,
        ) -> crate::error::Result<()> {
            self.inner.set_status(id, new_status).await
        }

        async fn touch_processed(&self, id: TokenId, ts: chrono::DateTime<Utc>) -> crate::error::Result<()> {
            self.inner.touch_processed(id, ts).await
        }

        async fn append_score_snapshot(&self, snapshot: &ScoreSnapshot) -> crate::error::Result<Uuid> {
            self.inner.append_score_snapshot(snapshot).await
        }

        async fn latest_snapshot(&self, _id: TokenId) -> crate::error::Result<Option<ScoreSnapshot>> {
            Err(PulseWatchError::Repository(sqlx::Error::PoolClosed))
        }

        async fn list_due(
            &self,
            group: crate::types::SchedulerGroup,
            now: chrono::DateTime<Utc>,
            interval_sec: i64,
            min_score: f64,
            limit: i64,
        ) -> crate::error::Result<Vec<Token>> {
            self.inner.list_due(group, now, interval_sec, min_score, limit).await
        }

        async fn list_with_latest(
            &self,
            filter: &crate::types::TokenListFilter,
        ) -> crate::error::Result<Vec<(Token, Option<ScoreSnapshot>)>> {
            self.inner.list_with_latest(filter).await
        }

        async fn top_active_by_score(&self, limit: i64) -> crate::error::Result<Vec<(Token, ScoreSnapshot)>> {
            self.inner.top_active_by_score(limit).await
        }

        async fn stats(&self) -> crate::error::Result<crate::types::TokenStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn run_pipeline_surfaces_repository_failure_without_writing_a_snapshot() {
        let repo = FailingLatestSnapshotRepository {
            inner: InMemoryTokenRepository::new(),
        };
        let token_id = repo
            .inner
            .upsert_token("Mint222", crate::types::TokenStatus::Monitoring, Utc::now())
            .await
            .unwrap();
        let token = repo.inner.get_token_by_id(token_id).await.unwrap().unwrap();
        let settings = make_settings();

        let pools = vec![crate::types::PoolSnapshot {
            dex_id: "raydium".to_string(),
            pool_address: "addr".to_string(),
            quote: crate::types::QuoteAsset::Sol,
            liquidity_usd: 10_000.0,
            tx_count_5m: 200,
            tx_count_1h: 2000,
            buys_5m: 120,
            sells_5m: 80,
            volume_5m: 5_000.0,
            volume_1h: 40_000.0,
            price_delta_5m: Some(0.01),
            price_delta_15m: Some(0.03),
            price_delta_1h: Some(0.08),
        }];

        let result = run_pipeline(
            &token,
            &pools,
            ScoringModelName::HybridMomentum,
            &repo,
            &settings,
        )
        .await;

        assert!(result.is_err());
        assert!(repo.inner.latest_snapshot(token_id).await.unwrap().is_none());
    }
}
