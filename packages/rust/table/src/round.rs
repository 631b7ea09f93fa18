//! Floor rounding.
//!
//! Published values are always truncated toward negative infinity at a fixed
//! number of decimals, never rounded to nearest. A value that is exactly
//! representable at the target precision in decimal (e.g. `12.345`) but sits a
//! few ULPs below it in binary is treated as that decimal, so rounding twice
//! gives the same result as rounding once.

/// Relative slack, in ULPs of the scaled value, for binary representation error.
const REPRESENTATION_SLACK: f64 = 4.0 * f64::EPSILON;

/// `floor(value * 10^decimals) / 10^decimals`.
pub fn floor_round(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10f64.powi(decimals as i32);
    let scaled = value * scale;
    floor_scaled(scaled) / scale
}

/// Floor to a whole number, with the same representation slack as [`floor_round`].
pub fn floor_to_int(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let floored = floor_scaled(value);
    if floored < i64::MIN as f64 || floored > i64::MAX as f64 {
        return None;
    }
    Some(floored as i64)
}

fn floor_scaled(scaled: f64) -> f64 {
    let floored = scaled.floor();
    let next = floored + 1.0;
    if next - scaled <= scaled.abs().max(1.0) * REPRESENTATION_SLACK {
        next
    } else {
        floored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn floors_instead_of_rounding_up() {
        assert_eq!(floor_round(12.3459, 3), 12.345);
        assert_eq!(floor_round(0.999, 2), 0.99);
        assert_eq!(floor_round(-1.231, 2), -1.24);
        assert_eq!(floor_round(7.0, 0), 7.0);
    }

    #[test]
    fn exact_decimals_survive_binary_error() {
        // 12.345 * 1000 is 12344.999999999998 in binary.
        assert_eq!(floor_round(12.345, 3), 12.345);
        // 0.29 * 100 is 28.999999999999996 in binary.
        assert_eq!(floor_to_int(0.29 * 100.0), Some(29));
    }

    #[test]
    fn non_finite_passes_through() {
        assert!(floor_round(f64::NAN, 2).is_nan());
        assert_eq!(floor_round(f64::INFINITY, 2), f64::INFINITY);
        assert_eq!(floor_to_int(f64::NAN), None);
    }

    proptest! {
        #[test]
        fn floor_round_is_idempotent(x in -1.0e6_f64..1.0e6, p in 0_u32..7) {
            let once = floor_round(x, p);
            prop_assert_eq!(floor_round(once, p), once);
        }

        #[test]
        fn floor_round_never_rounds_up(x in -1.0e6_f64..1.0e6, p in 0_u32..7) {
            let rounded = floor_round(x, p);
            prop_assert!(rounded <= x + x.abs() * 1e-12 + 1e-12);
            prop_assert!(x - rounded < 10f64.powi(-(p as i32)) + 1e-9);
        }
    }
}
