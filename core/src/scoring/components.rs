//! C4 — pure component calculator functions (`spec.md` §4.4).
//!
//! Every function returns `0.0` when a denominator is zero, non-finite, or
//! an explicit hard floor fails — never `NaN`/`inf`.

/// Selects between the standard `tx_accel` formula and the optional
/// "arbitrage activity" blend (`spec.md` §4.4, §9 open question). Kept as a
/// tagged enum rather than a boolean flag so call sites read as intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentMode {
    /// The default, documented formula.
    Standard,
    /// Blends a saturation term with the standard acceleration term.
    Arbitrage {
        /// `arbitrage_optimal_tx_5m`.
        optimal_tx_5m: f64,
        /// `arbitrage_acceleration_weight`.
        acceleration_weight: f64,
    },
}

/// Transaction acceleration: ratio of the 5-minute per-minute transaction
/// rate to the 1-hour per-minute rate, gated by two hard floors.
///
/// `tx_5m = 100, tx_1h = 1200` -> `1.0`. `tx_5m = 99` -> `0.0` regardless of
/// `tx_1h` (5-minute floor not met).
pub fn tx_accel(tx_5m: u64, tx_1h: u64) -> f64 {
    if tx_5m < 100 || tx_1h < 1200 {
        return 0.0;
    }
    let rate_5m = tx_5m as f64 / 5.0;
    let rate_1h = tx_1h as f64 / 60.0;
    finite_or_zero(rate_5m / rate_1h)
}

/// `tx_accel` blended with an absolute saturation term, per the optional
/// arbitrage-activity mode. Does not alter [`tx_accel`]'s own contract.
pub fn tx_component(tx_5m: u64, tx_1h: u64, mode: ComponentMode) -> f64 {
    let accel = tx_accel(tx_5m, tx_1h);
    match mode {
        ComponentMode::Standard => accel,
        ComponentMode::Arbitrage {
            optimal_tx_5m,
            acceleration_weight,
        } => {
            if optimal_tx_5m <= 0.0 {
                return accel;
            }
            let saturation = (tx_5m as f64 / optimal_tx_5m).min(1.0);
            let weight = acceleration_weight.clamp(0.0, 1.0);
            finite_or_zero(weight * accel + (1.0 - weight) * saturation)
        }
    }
}

/// Volume momentum: 5-minute volume against the implied 5-minute-bucket
/// average of the 1-hour volume (12 buckets per hour), gated by two hard
/// floors.
pub fn vol_momentum(vol_5m: f64, vol_1h: f64) -> f64 {
    if vol_5m < 500.0 || vol_1h < 2000.0 {
        return 0.0;
    }
    finite_or_zero(vol_5m / (vol_1h / 12.0))
}

/// A 0-to-1 decay bonus for tokens younger than `threshold` hours.
/// `hours <= 0` yields `1.0`; `hours >= threshold` yields `0.0`.
pub fn token_freshness(hours: f64, threshold: f64) -> f64 {
    if !hours.is_finite() || !threshold.is_finite() || threshold <= 0.0 {
        return 0.0;
    }
    if hours <= 0.0 {
        return 1.0;
    }
    if hours >= threshold {
        return 0.0;
    }
    finite_or_zero(((threshold - hours) / threshold).max(0.0))
}

/// Signed fraction of buy-vs-sell dollar volume over the 5-minute window,
/// gated by a combined-volume floor. Codomain `[-1, 1]`.
pub fn orderflow_imbalance(buys_volume_5m: f64, sells_volume_5m: f64) -> f64 {
    let total = buys_volume_5m + sells_volume_5m;
    if total < 500.0 {
        return 0.0;
    }
    finite_or_zero((buys_volume_5m - sells_volume_5m) / total)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_accel_normal_case() {
        assert_eq!(tx_accel(100, 1200), 1.0);
    }

    #[test]
    fn tx_accel_hard_floor() {
        assert_eq!(tx_accel(99, 5000), 0.0);
    }

    #[test]
    fn token_freshness_midpoint_and_edges() {
        assert_eq!(token_freshness(3.0, 6.0), 0.5);
        assert_eq!(token_freshness(6.0, 6.0), 0.0);
        assert_eq!(token_freshness(7.0, 6.0), 0.0);
        assert_eq!(token_freshness(0.0, 6.0), 1.0);
    }

    #[test]
    fn orderflow_imbalance_cases() {
        assert_eq!(orderflow_imbalance(300.0, 100.0), 0.5);
        assert_eq!(orderflow_imbalance(100.0, 100.0), 0.0);
        assert_eq!(orderflow_imbalance(100.0, 50.0), 0.0);
    }

    #[test]
    fn vol_momentum_gated_by_floors() {
        assert_eq!(vol_momentum(499.0, 10_000.0), 0.0);
        assert_eq!(vol_momentum(600.0, 1999.0), 0.0);
        assert!(vol_momentum(1200.0, 12_000.0) > 0.0);
    }

    #[test]
    fn arbitrage_mode_does_not_change_standard_tx_accel() {
        let standard = tx_component(100, 1200, ComponentMode::Standard);
        assert_eq!(standard, tx_accel(100, 1200));
    }
}
