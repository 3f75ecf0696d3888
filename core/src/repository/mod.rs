//! C7 — token repository: exclusive owner of persistence.
//!
//! All other components receive token identifiers and may read prior
//! snapshots through this trait but never mutate storage directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    ScoreSnapshot, SchedulerGroup, Token, TokenId, TokenListFilter, TokenStats, TokenStatus,
};

/// Contract-level operations from `spec.md` §4.7.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Idempotent insert: returns the existing id if `mint` is already
    /// known, otherwise creates a new row with `initial_status`.
    async fn upsert_token(
        &self,
        mint: &str,
        initial_status: TokenStatus,
        created_at: DateTime<Utc>,
    ) -> Result<TokenId>;

    /// Looks up a token by mint address.
    async fn get_token(&self, mint: &str) -> Result<Option<Token>>;

    /// Looks up a token by surrogate key.
    async fn get_token_by_id(&self, id: TokenId) -> Result<Option<Token>>;

    /// Transitions a token's status (`archived` is terminal; callers
    /// enforce this via [`crate::lifecycle`], not this trait).
    async fn set_status(&self, id: TokenId, new_status: TokenStatus) -> Result<()>;

    /// Records the most recent scoring attempt, successful or not.
    async fn touch_processed(&self, id: TokenId, ts: DateTime<Utc>) -> Result<()>;

    /// Atomically appends a new, immutable score snapshot.
    async fn append_score_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<Uuid>;

    /// Returns the most recent snapshot for a token, if any.
    async fn latest_snapshot(&self, id: TokenId) -> Result<Option<ScoreSnapshot>>;

    /// Selects tokens due for processing in `group` (`spec.md` §4.7/§4.9):
    /// "hot" = active tokens whose `last_processed_at` is older than
    /// `hot_interval_sec`; "cold" = monitoring tokens older than
    /// `cold_interval_sec`, plus active tokens with a sub-threshold latest
    /// score older than `cold_interval_sec`.
    async fn list_due(
        &self,
        group: SchedulerGroup,
        now: DateTime<Utc>,
        interval_sec: i64,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<Token>>;

    /// Public read path: status/min-score/pagination filter.
    async fn list_with_latest(
        &self,
        filter: &TokenListFilter,
    ) -> Result<Vec<(Token, Option<ScoreSnapshot>)>>;

    /// Returns the top-N active tokens ordered by smoothed score
    /// descending — the exporter's (C11) query.
    async fn top_active_by_score(&self, limit: i64) -> Result<Vec<(Token, ScoreSnapshot)>>;

    /// Aggregate counts across all tokens.
    async fn stats(&self) -> Result<TokenStats>;
}

/// Postgres-backed implementation.
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    /// Wraps an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_status(raw: &str) -> TokenStatus {
        match raw {
            "active" => TokenStatus::Active,
            "archived" => TokenStatus::Archived,
            _ => TokenStatus::Monitoring,
        }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn upsert_token(
        &self,
        mint: &str,
        initial_status: TokenStatus,
        created_at: DateTime<Utc>,
    ) -> Result<TokenId> {
        let row = sqlx::query(
            "INSERT INTO tokens (id, mint_address, status, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (mint_address) DO UPDATE SET mint_address = EXCLUDED.mint_address
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(mint)
        .bind(initial_status.to_string())
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn get_token(&self, mint: &str) -> Result<Option<Token>> {
        let row = sqlx::query(
            "SELECT id, mint_address, symbol, name, status, created_at, last_processed_at
             FROM tokens WHERE mint_address = $1",
        )
        .bind(mint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Token {
            id: r.get("id"),
            mint_address: r.get("mint_address"),
            symbol: r.get("symbol"),
            name: r.get("name"),
            status: Self::parse_status(r.get::<String, _>("status").as_str()),
            created_at: r.get("created_at"),
            last_processed_at: r.get("last_processed_at"),
        }))
    }

    async fn get_token_by_id(&self, id: TokenId) -> Result<Option<Token>> {
        let row = sqlx::query(
            "SELECT id, mint_address, symbol, name, status, created_at, last_processed_at
             FROM tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Token {
            id: r.get("id"),
            mint_address: r.get("mint_address"),
            symbol: r.get("symbol"),
            name: r.get("name"),
            status: Self::parse_status(r.get::<String, _>("status").as_str()),
            created_at: r.get("created_at"),
            last_processed_at: r.get("last_processed_at"),
        }))
    }

    async fn set_status(&self, id: TokenId, new_status: TokenStatus) -> Result<()> {
        sqlx::query("UPDATE tokens SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(new_status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_processed(&self, id: TokenId, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE tokens SET last_processed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_score_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<Uuid> {
        let raw = serde_json::to_value(&snapshot.raw_components).unwrap_or_default();
        let smoothed = serde_json::to_value(&snapshot.smoothed_components).unwrap_or_default();
        let metrics = serde_json::to_value(&snapshot.metrics).unwrap_or_default();

        let row = sqlx::query(
            "INSERT INTO token_scores
                (id, token_id, created_at, raw_components, smoothed_components,
                 raw_total, smoothed_total, model, metrics)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(snapshot.id)
        .bind(snapshot.token_id)
        .bind(snapshot.created_at)
        .bind(raw)
        .bind(smoothed)
        .bind(snapshot.raw_total)
        .bind(snapshot.smoothed_total)
        .bind(snapshot.model.to_string())
        .bind(metrics)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn latest_snapshot(&self, id: TokenId) -> Result<Option<ScoreSnapshot>> {
        let row = sqlx::query(
            "SELECT id, token_id, created_at, raw_components, smoothed_components,
                    raw_total, smoothed_total, model, metrics
             FROM token_scores WHERE token_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_snapshot))
    }

    async fn list_due(
        &self,
        group: SchedulerGroup,
        now: DateTime<Utc>,
        interval_sec: i64,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<Token>> {
        let cutoff = now - chrono::Duration::seconds(interval_sec);

        let rows = match group {
            SchedulerGroup::Hot => {
                sqlx::query(
                    "SELECT id, mint_address, symbol, name, status, created_at, last_processed_at
                     FROM tokens
                     WHERE status = 'active'
                       AND (last_processed_at IS NULL OR last_processed_at < $1)
                     ORDER BY last_processed_at NULLS FIRST
                     LIMIT $2",
                )
                .bind(cutoff)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            SchedulerGroup::Cold => {
                sqlx::query(
                    "SELECT t.id, t.mint_address, t.symbol, t.name, t.status, t.created_at, t.last_processed_at
                     FROM tokens t
                     LEFT JOIN LATERAL (
                         SELECT smoothed_total FROM token_scores s
                         WHERE s.token_id = t.id ORDER BY s.created_at DESC LIMIT 1
                     ) latest ON true
                     WHERE (t.last_processed_at IS NULL OR t.last_processed_at < $1)
                       AND (
                            t.status = 'monitoring'
                            OR (t.status = 'active' AND COALESCE(latest.smoothed_total, 0) < $3)
                       )
                     ORDER BY t.last_processed_at NULLS FIRST
                     LIMIT $2",
                )
                .bind(cutoff)
                .bind(limit)
                .bind(min_score)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|r| Token {
                id: r.get("id"),
                mint_address: r.get("mint_address"),
                symbol: r.get("symbol"),
                name: r.get("name"),
                status: Self::parse_status(r.get::<String, _>("status").as_str()),
                created_at: r.get("created_at"),
                last_processed_at: r.get("last_processed_at"),
            })
            .collect())
    }

    async fn list_with_latest(
        &self,
        filter: &TokenListFilter,
    ) -> Result<Vec<(Token, Option<ScoreSnapshot>)>> {
        let status_filter = filter.status.map(|s| s.to_string());

        let rows = sqlx::query(
            "SELECT t.id, t.mint_address, t.symbol, t.name, t.status, t.created_at, t.last_processed_at,
                    s.id as score_id, s.created_at as score_created_at, s.raw_components,
                    s.smoothed_components, s.raw_total, s.smoothed_total, s.model, s.metrics
             FROM tokens t
             LEFT JOIN LATERAL (
                 SELECT * FROM token_scores s WHERE s.token_id = t.id
                 ORDER BY s.created_at DESC LIMIT 1
             ) s ON true
             WHERE ($1::text IS NULL OR t.status = $1)
               AND ($2::double precision IS NULL OR COALESCE(s.smoothed_total, 0) >= $2)
             ORDER BY t.created_at DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(status_filter)
        .bind(filter.min_score)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let token = Token {
                    id: r.get("id"),
                    mint_address: r.get("mint_address"),
                    symbol: r.get("symbol"),
                    name: r.get("name"),
                    status: Self::parse_status(r.get::<String, _>("status").as_str()),
                    created_at: r.get("created_at"),
                    last_processed_at: r.get("last_processed_at"),
                };
                let snapshot: Option<Uuid> = r.try_get("score_id").ok();
                let snapshot = snapshot.map(|_| row_to_snapshot_prefixed(&r, token.id));
                (token, snapshot)
            })
            .collect())
    }

    async fn top_active_by_score(&self, limit: i64) -> Result<Vec<(Token, ScoreSnapshot)>> {
        let rows = sqlx::query(
            "SELECT t.id, t.mint_address, t.symbol, t.name, t.status, t.created_at, t.last_processed_at,
                    s.id as score_id, s.created_at as score_created_at, s.raw_components,
                    s.smoothed_components, s.raw_total, s.smoothed_total, s.model, s.metrics
             FROM tokens t
             JOIN LATERAL (
                 SELECT * FROM token_scores s WHERE s.token_id = t.id
                 ORDER BY s.created_at DESC LIMIT 1
             ) s ON true
             WHERE t.status = 'active'
             ORDER BY s.smoothed_total DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let token = Token {
                    id: r.get("id"),
                    mint_address: r.get("mint_address"),
                    symbol: r.get("symbol"),
                    name: r.get("name"),
                    status: Self::parse_status(r.get::<String, _>("status").as_str()),
                    created_at: r.get("created_at"),
                    last_processed_at: r.get("last_processed_at"),
                };
                let snapshot = row_to_snapshot_prefixed(&r, token.id);
                (token, snapshot)
            })
            .collect())
    }

    async fn stats(&self) -> Result<TokenStats> {
        let row = sqlx::query(
            "SELECT
                count(*) FILTER (WHERE status = 'active') as active,
                count(*) FILTER (WHERE status = 'monitoring') as monitoring,
                count(*) FILTER (WHERE status = 'archived') as archived,
                count(*) as total
             FROM tokens",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TokenStats {
            active: row.get("active"),
            monitoring: row.get("monitoring"),
            archived: row.get("archived"),
            total: row.get("total"),
        })
    }
}

fn row_to_snapshot(row: sqlx::postgres::PgRow) -> ScoreSnapshot {
    ScoreSnapshot {
        id: row.get("id"),
        token_id: row.get("token_id"),
        created_at: row.get("created_at"),
        raw_components: serde_json::from_value(row.get("raw_components")).unwrap_or_default(),
        smoothed_components: serde_json::from_value(row.get("smoothed_components"))
            .unwrap_or_default(),
        raw_total: row.get("raw_total"),
        smoothed_total: row.get("smoothed_total"),
        model: row
            .get::<String, _>("model")
            .parse()
            .unwrap_or(crate::types::ScoringModelName::HybridMomentum),
        metrics: serde_json::from_value(row.get("metrics"))
            .unwrap_or_else(|_| crate::types::FeatureVector::zero()),
    }
}

fn row_to_snapshot_prefixed(row: &sqlx::postgres::PgRow, token_id: TokenId) -> ScoreSnapshot {
    ScoreSnapshot {
        id: row.get("score_id"),
        token_id,
        created_at: row.get("score_created_at"),
        raw_components: serde_json::from_value(row.get("raw_components")).unwrap_or_default(),
        smoothed_components: serde_json::from_value(row.get("smoothed_components"))
            .unwrap_or_default(),
        raw_total: row.get("raw_total"),
        smoothed_total: row.get("smoothed_total"),
        model: row
            .get::<String, _>("model")
            .parse()
            .unwrap_or(crate::types::ScoringModelName::HybridMomentum),
        metrics: serde_json::from_value(row.get("metrics"))
            .unwrap_or_else(|_| crate::types::FeatureVector::zero()),
    }
}

/// In-memory test double used by unit tests for C6/C8/C9 that don't need a
/// live database.
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        tokens: Vec<Token>,
        snapshots: Vec<ScoreSnapshot>,
    }

    /// `TokenRepository` backed by an in-process `Mutex<Vec<_>>`.
    #[derive(Default)]
    pub struct InMemoryTokenRepository {
        state: Mutex<State>,
    }

    impl InMemoryTokenRepository {
        /// Builds an empty repository.
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TokenRepository for InMemoryTokenRepository {
        async fn upsert_token(
            &self,
            mint: &str,
            initial_status: TokenStatus,
            created_at: DateTime<Utc>,
        ) -> Result<TokenId> {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.tokens.iter().find(|t| t.mint_address == mint) {
                return Ok(existing.id);
            }
            let id = Uuid::new_v4();
            state.tokens.push(Token {
                id,
                mint_address: mint.to_string(),
                symbol: None,
                name: None,
                status: initial_status,
                created_at,
                last_processed_at: None,
            });
            Ok(id)
        }

        async fn get_token(&self, mint: &str) -> Result<Option<Token>> {
            let state = self.state.lock().unwrap();
            Ok(state.tokens.iter().find(|t| t.mint_address == mint).cloned())
        }

        async fn get_token_by_id(&self, id: TokenId) -> Result<Option<Token>> {
            let state = self.state.lock().unwrap();
            Ok(state.tokens.iter().find(|t| t.id == id).cloned())
        }

        async fn set_status(&self, id: TokenId, new_status: TokenStatus) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(t) = state.tokens.iter_mut().find(|t| t.id == id) {
                t.status = new_status;
            }
            Ok(())
        }

        async fn touch_processed(&self, id: TokenId, ts: DateTime<Utc>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(t) = state.tokens.iter_mut().find(|t| t.id == id) {
                t.last_processed_at = Some(ts);
            }
            Ok(())
        }

        async fn append_score_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<Uuid> {
            let mut state = self.state.lock().unwrap();
            state.snapshots.push(snapshot.clone());
            Ok(snapshot.id)
        }

        async fn latest_snapshot(&self, id: TokenId) -> Result<Option<ScoreSnapshot>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .snapshots
                .iter()
                .filter(|s| s.token_id == id)
                .max_by_key(|s| s.created_at)
                .cloned())
        }

        async fn list_due(
            &self,
            group: SchedulerGroup,
            now: DateTime<Utc>,
            interval_sec: i64,
            min_score: f64,
            limit: i64,
        ) -> Result<Vec<Token>> {
            let state = self.state.lock().unwrap();
            let cutoff = now - chrono::Duration::seconds(interval_sec);
            let is_due = |t: &Token| t.last_processed_at.map(|p| p < cutoff).unwrap_or(true);

            let mut due: Vec<Token> = match group {
                SchedulerGroup::Hot => state
                    .tokens
                    .iter()
                    .filter(|t| t.status == TokenStatus::Active && is_due(t))
                    .cloned()
                    .collect(),
                SchedulerGroup::Cold => state
                    .tokens
                    .iter()
                    .filter(|t| {
                        if !is_due(t) {
                            return false;
                        }
                        match t.status {
                            TokenStatus::Monitoring => true,
                            TokenStatus::Active => {
                                let latest = state
                                    .snapshots
                                    .iter()
                                    .filter(|s| s.token_id == t.id)
                                    .max_by_key(|s| s.created_at);
                                latest.map(|s| s.smoothed_total < min_score).unwrap_or(false)
                            }
                            TokenStatus::Archived => false,
                        }
                    })
                    .cloned()
                    .collect(),
            };
            due.truncate(limit.max(0) as usize);
            Ok(due)
        }

        async fn list_with_latest(
            &self,
            filter: &TokenListFilter,
        ) -> Result<Vec<(Token, Option<ScoreSnapshot>)>> {
            let state = self.state.lock().unwrap();
            let mut out: Vec<(Token, Option<ScoreSnapshot>)> = state
                .tokens
                .iter()
                .filter(|t| filter.status.map(|s| s == t.status).unwrap_or(true))
                .map(|t| {
                    let latest = state
                        .snapshots
                        .iter()
                        .filter(|s| s.token_id == t.id)
                        .max_by_key(|s| s.created_at)
                        .cloned();
                    (t.clone(), latest)
                })
                .filter(|(_, snap)| match (filter.min_score, snap) {
                    (Some(min), Some(s)) => s.smoothed_total >= min,
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .collect();
            out.truncate(filter.limit.max(0) as usize);
            Ok(out)
        }

        async fn top_active_by_score(&self, limit: i64) -> Result<Vec<(Token, ScoreSnapshot)>> {
            let state = self.state.lock().unwrap();
            let mut out: Vec<(Token, ScoreSnapshot)> = state
                .tokens
                .iter()
                .filter(|t| t.status == TokenStatus::Active)
                .filter_map(|t| {
                    state
                        .snapshots
                        .iter()
                        .filter(|s| s.token_id == t.id)
                        .max_by_key(|s| s.created_at)
                        .map(|s| (t.clone(), s.clone()))
                })
                .collect();
            out.sort_by(|a, b| b.1.smoothed_total.total_cmp(&a.1.smoothed_total));
            out.truncate(limit.max(0) as usize);
            Ok(out)
        }

        async fn stats(&self) -> Result<TokenStats> {
            let state = self.state.lock().unwrap();
            let mut stats = TokenStats::default();
            for t in &state.tokens {
                stats.total += 1;
                match t.status {
                    TokenStatus::Active => stats.active += 1,
                    TokenStatus::Monitoring => stats.monitoring += 1,
                    TokenStatus::Archived => stats.archived += 1,
                }
            }
            Ok(stats)
        }
    }
}

pub use memory::InMemoryTokenRepository;
