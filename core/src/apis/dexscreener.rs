//! C2 — resilient DEX Screener client: retry with backoff, a process-wide
//! circuit breaker, and a short-TTL response cache.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{PulseWatchError, Result};
use crate::types::{PoolSnapshot, QuoteAsset};

const FAILURE_THRESHOLD: u32 = 5;
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
const HALF_OPEN_MAX_CALLS: u32 = 3;
const CACHE_TTL: Duration = Duration::from_secs(5);
const MAX_RETRIES: usize = 3;
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

struct CircuitBreaker {
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
    half_open_calls: AtomicU32,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
        }
    }

    /// Returns `Ok(())` if a call may proceed, `Err(CircuitOpen)` if it must
    /// short-circuit. Admits at most `HALF_OPEN_MAX_CALLS` probes once the
    /// recovery timeout has elapsed.
    fn admit(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= RECOVERY_TIMEOUT {
                    *state = BreakerState::HalfOpen;
                    self.half_open_calls.store(0, Ordering::SeqCst);
                    Ok(())
                } else {
                    Err(PulseWatchError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                if self.half_open_calls.fetch_add(1, Ordering::SeqCst) < HALF_OPEN_MAX_CALLS {
                    Ok(())
                } else {
                    Err(PulseWatchError::CircuitOpen)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *state = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            BreakerState::HalfOpen => {
                *state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= FAILURE_THRESHOLD {
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            BreakerState::Open { .. } => {}
        }
    }
}

struct CacheEntry {
    pools: Vec<PoolSnapshot>,
    cached_at: Instant,
}

/// Whether an HTTP failure should be retried or fails fast.
#[derive(Debug)]
enum FetchError {
    Transient(String),
    Permanent(String),
}

#[derive(Debug, Deserialize)]
struct DexScreenerResponse {
    #[serde(default)]
    pairs: Vec<DexScreenerPair>,
}

#[derive(Debug, Deserialize)]
struct DexScreenerPair {
    #[serde(rename = "dexId")]
    dex_id: String,
    #[serde(rename = "pairAddress")]
    pair_address: String,
    #[serde(rename = "quoteToken")]
    quote_token: QuoteToken,
    #[serde(default)]
    liquidity: Liquidity,
    #[serde(default)]
    txns: Txns,
    #[serde(default)]
    volume: Volume,
    #[serde(rename = "priceChange", default)]
    price_change: PriceChange,
}

#[derive(Debug, Deserialize)]
struct QuoteToken {
    symbol: String,
}

#[derive(Debug, Default, Deserialize)]
struct Liquidity {
    #[serde(default)]
    usd: f64,
}

#[derive(Debug, Default, Deserialize)]
struct TxnWindow {
    #[serde(default)]
    buys: u64,
    #[serde(default)]
    sells: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Txns {
    #[serde(default)]
    m5: TxnWindow,
    #[serde(default)]
    h1: TxnWindow,
}

#[derive(Debug, Default, Deserialize)]
struct Volume {
    #[serde(default)]
    m5: f64,
    #[serde(default)]
    h1: f64,
}

#[derive(Debug, Default, Deserialize)]
struct PriceChange {
    #[serde(default)]
    m5: Option<f64>,
    #[serde(default)]
    m15: Option<f64>,
    #[serde(default)]
    h1: Option<f64>,
}

/// Resilient client for the DEX pair/liquidity data provider.
pub struct DexScreenerClient {
    http: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
    cache: DashMap<String, CacheEntry>,
}

impl DexScreenerClient {
    /// Builds a client targeting `base_url` (e.g.
    /// `https://api.dexscreener.com`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("pulsewatch/1.0")
            .build()
            .expect("reqwest client builder should not fail with static config");

        Self {
            http,
            base_url: base_url.into(),
            breaker: CircuitBreaker::new(),
            cache: DashMap::new(),
        }
    }

    /// Fetches pool snapshots for `mint`. Returns `Ok(None)` when no data is
    /// available this cycle (retries exhausted, circuit open, or a cached
    /// fallback was also unavailable) — callers treat this as "skip, keep
    /// last known state" per `spec.md` §4.2/§7.
    pub async fn get_pairs(&self, mint: &str) -> Result<Option<Vec<PoolSnapshot>>> {
        if self.breaker.admit().is_err() {
            debug!(mint, "circuit open, serving cache if available");
            return Ok(self.cached(mint));
        }

        match self.fetch_with_retry(mint).await {
            Ok(pools) => {
                self.breaker.record_success();
                self.cache.insert(
                    mint.to_string(),
                    CacheEntry {
                        pools: pools.clone(),
                        cached_at: Instant::now(),
                    },
                );
                Ok(Some(pools))
            }
            Err(FetchError::Permanent(reason)) => {
                warn!(mint, reason, "malformed dexscreener response, skipping mint");
                Ok(self.cached(mint))
            }
            Err(FetchError::Transient(reason)) => {
                self.breaker.record_failure();
                warn!(mint, reason, "dexscreener fetch failed after retries");
                Ok(self.cached(mint))
            }
        }
    }

    fn cached(&self, mint: &str) -> Option<Vec<PoolSnapshot>> {
        self.cache.get(mint).and_then(|entry| {
            if entry.cached_at.elapsed() < CACHE_TTL {
                Some(entry.pools.clone())
            } else {
                None
            }
        })
    }

    async fn fetch_with_retry(&self, mint: &str) -> std::result::Result<Vec<PoolSnapshot>, FetchError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_multiplier(2.0)
            .with_max_interval(BACKOFF_CAP)
            .with_max_elapsed_time(Some(BACKOFF_CAP))
            .build();

        let mut attempt = 0usize;
        loop {
            match self.fetch_once(mint).await {
                Ok(pools) => return Ok(pools),
                Err(FetchError::Permanent(reason)) => return Err(FetchError::Permanent(reason)),
                Err(FetchError::Transient(reason)) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(FetchError::Transient(reason));
                    }
                    match backoff.next_backoff() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(FetchError::Transient(reason)),
                    }
                }
            }
        }
    }

    async fn fetch_once(&self, mint: &str) -> std::result::Result<Vec<PoolSnapshot>, FetchError> {
        let url = format!("{}/latest/dex/tokens/{mint}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Transient(format!("status {status}")));
        }
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!("status {status}")));
        }

        let body: DexScreenerResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Permanent(e.to_string()))?;

        Ok(body.pairs.into_iter().map(Into::into).collect())
    }
}

impl From<DexScreenerPair> for PoolSnapshot {
    fn from(pair: DexScreenerPair) -> Self {
        PoolSnapshot {
            dex_id: pair.dex_id,
            pool_address: pair.pair_address,
            quote: QuoteAsset::from_symbol(&pair.quote_token.symbol),
            liquidity_usd: pair.liquidity.usd,
            tx_count_5m: pair.txns.m5.buys + pair.txns.m5.sells,
            tx_count_1h: pair.txns.h1.buys + pair.txns.h1.sells,
            buys_5m: pair.txns.m5.buys,
            sells_5m: pair.txns.m5.sells,
            volume_5m: pair.volume.m5,
            volume_1h: pair.volume.h1,
            price_delta_5m: pair.price_change.m5,
            price_delta_15m: pair.price_change.m15,
            price_delta_1h: pair.price_change.h1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            assert!(breaker.admit().is_ok());
            breaker.record_failure();
        }
        assert!(matches!(breaker.admit(), Err(PulseWatchError::CircuitOpen)));
    }

    #[test]
    fn breaker_closes_on_success() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures.load(Ordering::SeqCst), 0);
        assert!(breaker.admit().is_ok());
    }
}
