//! C5 — EWMA smoother (`spec.md` §4.5).

use crate::types::{ComponentKey, ComponentVector};

/// Blends `raw` into `previous` with coefficient `alpha`, clamped to
/// `[0, 1]`. Keys present in `raw` but absent from `previous` cold-start at
/// the raw value. Deterministic: identical inputs always produce a
/// bit-identical output.
pub fn apply(
    previous: Option<&ComponentVector>,
    raw: &ComponentVector,
    alpha: f64,
) -> ComponentVector {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut smoothed = ComponentVector::new();

    for (&key, &raw_value) in raw {
        let value = match previous.and_then(|p| p.get(&key)) {
            Some(&prev) => alpha * raw_value + (1.0 - alpha) * prev,
            None => raw_value,
        };
        smoothed.insert(key, value);
    }

    smoothed
}

/// Same blending rule applied to the scalar total score.
pub fn apply_total(previous: Option<f64>, raw_total: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    match previous {
        Some(prev) => alpha * raw_total + (1.0 - alpha) * prev,
        None => raw_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cold_start_passes_raw_through() {
        let mut raw = ComponentVector::new();
        raw.insert(ComponentKey::TxAccel, 0.8);
        let smoothed = apply(None, &raw, 0.3);
        assert_eq!(smoothed[&ComponentKey::TxAccel], 0.8);
    }

    #[test]
    fn second_step_matches_worked_example() {
        let mut prev = ComponentVector::new();
        prev.insert(ComponentKey::TxAccel, 0.8);
        let mut raw = ComponentVector::new();
        raw.insert(ComponentKey::TxAccel, 0.2);

        let smoothed = apply(Some(&prev), &raw, 0.3);
        assert!((smoothed[&ComponentKey::TxAccel] - 0.62).abs() < 1e-12);
    }

    #[test]
    fn idempotence_on_constant_input_converges_monotonically() {
        let raw_value = 1.0;
        let mut raw = ComponentVector::new();
        raw.insert(ComponentKey::VolMomentum, raw_value);

        let alpha = 0.3;
        let mut previous = ComponentVector::new();
        previous.insert(ComponentKey::VolMomentum, 0.0);

        let mut last_diff = (raw_value - previous[&ComponentKey::VolMomentum]).abs();
        for _ in 0..20 {
            let smoothed = apply(Some(&previous), &raw, alpha);
            let diff = (raw_value - smoothed[&ComponentKey::VolMomentum]).abs();
            assert!(diff <= last_diff + 1e-12);
            last_diff = diff;
            previous = smoothed;
        }
        assert!(last_diff < 1e-3);
    }

    proptest! {
        /// `spec.md` §8: "given identical raw vectors forever, smoothed[k]
        /// converges monotonically to raw[k], difference shrinking by a
        /// factor of (1 - alpha) each step" — generalized over arbitrary
        /// raw/start values and alpha in (0, 1].
        #[test]
        fn ewma_converges_monotonically_for_any_alpha(
            raw_value in -1000.0f64..1000.0,
            start_value in -1000.0f64..1000.0,
            alpha in 0.01f64..1.0,
        ) {
            let mut raw = ComponentVector::new();
            raw.insert(ComponentKey::VolMomentum, raw_value);

            let mut previous = ComponentVector::new();
            previous.insert(ComponentKey::VolMomentum, start_value);

            let mut last_diff = (raw_value - start_value).abs();
            for _ in 0..30 {
                let smoothed = apply(Some(&previous), &raw, alpha);
                let diff = (raw_value - smoothed[&ComponentKey::VolMomentum]).abs();
                prop_assert!(diff <= last_diff + 1e-9);
                last_diff = diff;
                previous = smoothed;
            }
            prop_assert!(last_diff < 1.0);
        }

        /// Bit-identical determinism: the same `(previous, raw, alpha)`
        /// triple always produces the same output.
        #[test]
        fn deterministic_given_identical_inputs(
            raw_value in -1000.0f64..1000.0,
            prev_value in -1000.0f64..1000.0,
            alpha in 0.0f64..1.0,
        ) {
            let mut raw = ComponentVector::new();
            raw.insert(ComponentKey::TxAccel, raw_value);
            let mut previous = ComponentVector::new();
            previous.insert(ComponentKey::TxAccel, prev_value);

            let a = apply(Some(&previous), &raw, alpha);
            let b = apply(Some(&previous), &raw, alpha);
            prop_assert_eq!(a[&ComponentKey::TxAccel], b[&ComponentKey::TxAccel]);
        }
    }
}
