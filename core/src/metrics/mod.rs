//! C3 — metrics aggregator: reduces a mint's pool snapshots into one
//! feature vector.

use chrono::{DateTime, Utc};

use crate::types::{FeatureVector, PoolSnapshot, QuoteAsset};

/// True when a pool's liquidity is below the configured dust threshold.
/// Kept distinct from [`crate::lifecycle::is_launchpad_native`] — the two
/// filters are never conflated (`spec.md` §9 open question).
pub fn is_dust(pool: &PoolSnapshot, min_pool_liquidity_usd: f64) -> bool {
    pool.liquidity_usd < min_pool_liquidity_usd
}

/// Reduces `pools` for one mint into a [`FeatureVector`].
///
/// Filtering order (`spec.md` §4.3): drop dust pools first, then drop pools
/// whose quote is the launchpad-native quote asset for *activation*
/// purposes (callers pass `launchpad_quote` only when that filtering step
/// applies; trading metrics still see those pools). If every pool is
/// dropped, returns the zero vector with `primary_dex = None`.
pub fn aggregate(
    pools: &[PoolSnapshot],
    created_at: DateTime<Utc>,
    min_pool_liquidity_usd: f64,
) -> FeatureVector {
    let retained: Vec<&PoolSnapshot> = pools
        .iter()
        .filter(|p| !is_dust(p, min_pool_liquidity_usd))
        .collect();

    if retained.is_empty() {
        let mut zero = FeatureVector::zero();
        zero.hours_since_creation = hours_since(created_at);
        return zero;
    }

    let l_tot: f64 = retained.iter().map(|p| p.liquidity_usd).sum();

    let most_liquid = retained
        .iter()
        .max_by(|a, b| a.liquidity_usd.total_cmp(&b.liquidity_usd))
        .expect("retained is non-empty");

    let delta_p_5m = most_liquid.price_delta_5m.unwrap_or(0.0);
    let delta_p_15m = most_liquid
        .price_delta_15m
        .or_else(|| most_liquid.price_delta_1h.map(|h1| h1 / 4.0))
        .unwrap_or(0.0);

    let n_5m: u64 = retained.iter().map(|p| p.buys_5m + p.sells_5m).sum();
    let tx_count_5m: u64 = retained.iter().map(|p| p.tx_count_5m).sum();
    let tx_count_1h: u64 = retained.iter().map(|p| p.tx_count_1h).sum();
    let volume_5m: f64 = retained.iter().map(|p| p.volume_5m).sum();
    let volume_1h: f64 = retained.iter().map(|p| p.volume_1h).sum();

    let (buys_volume_5m, sells_volume_5m) = apportion_buy_sell_volume(&retained, volume_5m);

    let pools_out = retained
        .iter()
        .filter(|p| matches!(p.quote, QuoteAsset::Sol | QuoteAsset::WSol | QuoteAsset::Usdc))
        .map(|p| (p.dex_id.clone(), p.quote, p.pool_address.clone(), p.liquidity_usd))
        .collect();

    FeatureVector {
        l_tot,
        delta_p_5m,
        delta_p_15m,
        n_5m,
        tx_count_5m,
        tx_count_1h,
        volume_5m,
        volume_1h,
        buys_volume_5m,
        sells_volume_5m,
        hours_since_creation: hours_since(created_at),
        primary_dex: Some(most_liquid.dex_id.clone()),
        pools: pools_out,
    }
}

/// Apportions aggregate 5-minute volume between buys and sells using each
/// pool's buy/sell transaction-count ratio as a weight.
fn apportion_buy_sell_volume(retained: &[&PoolSnapshot], volume_5m: f64) -> (f64, f64) {
    let total_tx: u64 = retained.iter().map(|p| p.buys_5m + p.sells_5m).sum();
    if total_tx == 0 || volume_5m == 0.0 {
        return (0.0, 0.0);
    }

    let buys: u64 = retained.iter().map(|p| p.buys_5m).sum();
    let sells: u64 = retained.iter().map(|p| p.sells_5m).sum();

    let buy_fraction = buys as f64 / total_tx as f64;
    let sell_fraction = sells as f64 / total_tx as f64;

    (volume_5m * buy_fraction, volume_5m * sell_fraction)
}

fn hours_since(created_at: DateTime<Utc>) -> f64 {
    (Utc::now() - created_at).num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pool(liquidity: f64, quote: QuoteAsset) -> PoolSnapshot {
        PoolSnapshot {
            dex_id: "raydium".to_string(),
            pool_address: "addr".to_string(),
            quote,
            liquidity_usd: liquidity,
            tx_count_5m: 10,
            tx_count_1h: 100,
            buys_5m: 6,
            sells_5m: 4,
            volume_5m: 1000.0,
            volume_1h: 5000.0,
            price_delta_5m: Some(0.02),
            price_delta_15m: None,
            price_delta_1h: Some(0.08),
        }
    }

    #[test]
    fn dropping_dust_pools_yields_same_vector_as_if_absent() {
        let created_at = Utc::now();
        let with_dust = vec![pool(100.0, QuoteAsset::Sol), pool(1000.0, QuoteAsset::Sol)];
        let without_dust = vec![pool(1000.0, QuoteAsset::Sol)];

        let a = aggregate(&with_dust, created_at, 500.0);
        let b = aggregate(&without_dust, created_at, 500.0);

        assert_eq!(a.l_tot, b.l_tot);
        assert_eq!(a.tx_count_5m, b.tx_count_5m);
    }

    #[test]
    fn all_pools_dropped_yields_zero_vector() {
        let created_at = Utc::now();
        let pools = vec![pool(10.0, QuoteAsset::Sol)];
        let v = aggregate(&pools, created_at, 500.0);
        assert_eq!(v.l_tot, 0.0);
        assert!(v.primary_dex.is_none());
    }

    #[test]
    fn missing_15m_falls_back_to_quarter_of_1h() {
        let created_at = Utc::now();
        let pools = vec![pool(1000.0, QuoteAsset::Sol)];
        let v = aggregate(&pools, created_at, 500.0);
        assert_eq!(v.delta_p_15m, 0.02);
    }

    #[test]
    fn retained_pools_carry_per_pool_liquidity_for_activation_checks() {
        let created_at = Utc::now();
        let pools = vec![pool(1000.0, QuoteAsset::Sol)];
        let v = aggregate(&pools, created_at, 500.0);
        assert_eq!(v.pools, vec![("raydium".to_string(), QuoteAsset::Sol, "addr".to_string(), 1000.0)]);
    }

    proptest! {
        /// For any liquidity split into retained (>= threshold) and dust
        /// (< threshold) pools, removing the dust pools up front yields the
        /// same feature vector as aggregating without them — `spec.md` §8's
        /// "dropping dust pools yields the same vector as if they never
        /// existed" invariant, generalized over arbitrary pool counts.
        #[test]
        fn dust_filter_invariant(
            retained_liquidity in proptest::collection::vec(500.0f64..1_000_000.0, 0..5),
            dust_liquidity in proptest::collection::vec(0.0f64..499.99, 0..5),
        ) {
            let created_at = Utc::now();
            let retained_pools: Vec<PoolSnapshot> = retained_liquidity
                .iter()
                .map(|&l| pool(l, QuoteAsset::Sol))
                .collect();
            let dust_pools: Vec<PoolSnapshot> = dust_liquidity
                .iter()
                .map(|&l| pool(l, QuoteAsset::Sol))
                .collect();

            let mut with_dust = retained_pools.clone();
            with_dust.extend(dust_pools);

            let a = aggregate(&with_dust, created_at, 500.0);
            let b = aggregate(&retained_pools, created_at, 500.0);

            prop_assert!((a.l_tot - b.l_tot).abs() < 1e-9);
            prop_assert_eq!(a.tx_count_5m, b.tx_count_5m);
            prop_assert_eq!(a.volume_5m, b.volume_5m);
            prop_assert_eq!(a.pools.len(), b.pools.len());
        }
    }
}
