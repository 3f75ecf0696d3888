//! Domain types shared across the lifecycle and scoring pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Surrogate key for a [`Token`] row.
pub type TokenId = Uuid;

/// Lifecycle status of a token. `Archived` is terminal; `Monitoring` and
/// `Active` are bidirectional until archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Newly registered, not yet meeting activation criteria.
    Monitoring,
    /// Has at least one qualifying external pool.
    Active,
    /// Terminal: no further scoring or reactivation.
    Archived,
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenStatus::Monitoring => "monitoring",
            TokenStatus::Active => "active",
            TokenStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// A token tracked by the lifecycle engine, unique by `mint_address`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Surrogate key.
    pub id: TokenId,
    /// Case-sensitive Base58 mint address; immutable identity.
    pub mint_address: String,
    /// Optional ticker symbol.
    pub symbol: Option<String>,
    /// Optional display name.
    pub name: Option<String>,
    /// Current lifecycle status.
    pub status: TokenStatus,
    /// Wall-clock time of first registration.
    pub created_at: DateTime<Utc>,
    /// Most recent successful (or attempted) scoring pass.
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Quote asset a pool is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteAsset {
    /// Native SOL.
    Sol,
    /// Wrapped SOL.
    WSol,
    /// USD Coin.
    Usdc,
    /// Any other quote asset.
    Other,
}

impl QuoteAsset {
    /// Parses a DEX Screener `quoteToken.symbol` string.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.to_ascii_uppercase().as_str() {
            "SOL" => QuoteAsset::Sol,
            "WSOL" => QuoteAsset::WSol,
            "USDC" => QuoteAsset::Usdc,
            _ => QuoteAsset::Other,
        }
    }
}

/// One pool/pair reading for a mint at a single scoring cycle. Ephemeral —
/// never persisted standalone, only folded into a [`ScoreSnapshot`]'s
/// aggregated metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// DEX identifier, e.g. `"raydium"`.
    pub dex_id: String,
    /// On-chain pool/pair address.
    pub pool_address: String,
    /// Quote asset this pool is denominated in.
    pub quote: QuoteAsset,
    /// Liquidity in USD.
    pub liquidity_usd: f64,
    /// Transaction count (buys + sells) in the trailing 5 minutes.
    pub tx_count_5m: u64,
    /// Transaction count (buys + sells) in the trailing 1 hour.
    pub tx_count_1h: u64,
    /// Buy transaction count in the trailing 5 minutes.
    pub buys_5m: u64,
    /// Sell transaction count in the trailing 5 minutes.
    pub sells_5m: u64,
    /// Trading volume (USD) in the trailing 5 minutes.
    pub volume_5m: f64,
    /// Trading volume (USD) in the trailing 1 hour.
    pub volume_1h: f64,
    /// Price delta over 5 minutes, fraction (e.g. `0.05` = +5%).
    pub price_delta_5m: Option<f64>,
    /// Price delta over 15 minutes, fraction.
    pub price_delta_15m: Option<f64>,
    /// Price delta over 1 hour, fraction — used to estimate a missing
    /// 15-minute figure.
    pub price_delta_1h: Option<f64>,
}

/// Output of the metrics aggregator (C3): one feature vector per mint per
/// scoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Sum of liquidity across retained pools.
    pub l_tot: f64,
    /// Price delta at 5 minutes, from the most-liquid retained pool.
    pub delta_p_5m: f64,
    /// Price delta at 15 minutes (falls back to a quarter of the 1h figure).
    pub delta_p_15m: f64,
    /// Buy+sell transaction count at 5 minutes, summed across pools.
    pub n_5m: u64,
    /// Transaction count at 5 minutes, summed across pools.
    pub tx_count_5m: u64,
    /// Transaction count at 1 hour, summed across pools.
    pub tx_count_1h: u64,
    /// Trading volume at 5 minutes, summed across pools.
    pub volume_5m: f64,
    /// Trading volume at 1 hour, summed across pools.
    pub volume_1h: f64,
    /// Estimated buy-side volume at 5 minutes.
    pub buys_volume_5m: f64,
    /// Estimated sell-side volume at 5 minutes.
    pub sells_volume_5m: f64,
    /// Wall-clock hours since the token's `created_at`.
    pub hours_since_creation: f64,
    /// DEX identifier of the most-liquid retained pool.
    pub primary_dex: Option<String>,
    /// Retained pools, as `(dex, quote, address, liquidity_usd)`, restricted
    /// to SOL/WSOL/USDC-quoted pools. Per-pool liquidity is kept (rather than
    /// only the `l_tot` sum) because the activation rule (`spec.md` §4.8
    /// rule 1) requires a single qualifying pool at or above the activation
    /// threshold, not the sum across all pools.
    pub pools: Vec<(String, QuoteAsset, String, f64)>,
}

impl FeatureVector {
    /// The zero vector produced when every pool is filtered out.
    pub fn zero() -> Self {
        FeatureVector {
            l_tot: 0.0,
            delta_p_5m: 0.0,
            delta_p_15m: 0.0,
            n_5m: 0,
            tx_count_5m: 0,
            tx_count_1h: 0,
            volume_5m: 0.0,
            volume_1h: 0.0,
            buys_volume_5m: 0.0,
            sells_volume_5m: 0.0,
            hours_since_creation: 0.0,
            primary_dex: None,
            pools: Vec::new(),
        }
    }
}

/// Name of the four scoring components, used as map keys so the same
/// blending code serves both the raw and smoothed vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKey {
    /// Transaction acceleration.
    TxAccel,
    /// Volume momentum.
    VolMomentum,
    /// Token freshness.
    TokenFreshness,
    /// Orderflow imbalance.
    OrderflowImbalance,
}

/// A component vector: raw or smoothed, keyed by [`ComponentKey`].
pub type ComponentVector = HashMap<ComponentKey, f64>;

/// Which scoring model produced a [`ScoreSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringModelName {
    /// The default model (`spec.md` §4.1).
    HybridMomentum,
    /// The legacy weighted formula, kept selectable during migration.
    Legacy,
}

impl std::fmt::Display for ScoringModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScoringModelName::HybridMomentum => "hybrid_momentum",
            ScoringModelName::Legacy => "legacy",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ScoringModelName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid_momentum" => Ok(ScoringModelName::HybridMomentum),
            "legacy" => Ok(ScoringModelName::Legacy),
            other => Err(format!("unknown scoring model {other}")),
        }
    }
}

/// Immutable, append-only record of one scoring cycle for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    /// Surrogate key, set once persisted.
    pub id: Uuid,
    /// Token this snapshot belongs to.
    pub token_id: TokenId,
    /// Creation timestamp (UTC).
    pub created_at: DateTime<Utc>,
    /// Raw component vector for this cycle.
    pub raw_components: ComponentVector,
    /// Smoothed (EWMA) component vector.
    pub smoothed_components: ComponentVector,
    /// Weighted sum of the raw components.
    pub raw_total: f64,
    /// EWMA-smoothed total score.
    pub smoothed_total: f64,
    /// Which model produced this snapshot.
    pub model: ScoringModelName,
    /// Aggregated metrics vector the components were computed from.
    pub metrics: FeatureVector,
}

/// Filter applied by `list_with_latest` (the out-of-scope read API's only
/// entry point into the repository).
#[derive(Debug, Clone, Default)]
pub struct TokenListFilter {
    /// Restrict to a specific status.
    pub status: Option<TokenStatus>,
    /// Minimum smoothed score (inclusive).
    pub min_score: Option<f64>,
    /// Maximum rows to return.
    pub limit: i64,
    /// Rows to skip.
    pub offset: i64,
}

/// Aggregate counts across all tokens.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenStats {
    /// Count of `active` tokens.
    pub active: i64,
    /// Count of `monitoring` tokens.
    pub monitoring: i64,
    /// Count of `archived` tokens.
    pub archived: i64,
    /// Total tokens across all statuses.
    pub total: i64,
}

/// Which scheduler group a tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerGroup {
    /// Active tokens, refreshed frequently.
    Hot,
    /// Monitoring tokens and sub-threshold active tokens.
    Cold,
}

impl std::fmt::Display for SchedulerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulerGroup::Hot => "hot",
            SchedulerGroup::Cold => "cold",
        };
        f.write_str(s)
    }
}
