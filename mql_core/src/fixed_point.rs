//! Fixed-point flow arithmetic helpers.
//!
//! Flow values travel as `i32` hundredths of a unit (x100) and calibration
//! factors as thousandths (x1000). Widening to 64-bit for every product keeps
//! the control path free of floating point and overflow.

/// Scale an x100 value by an x100 factor: `value * factor / 100`.
/// Uses 64-bit intermediates; truncates toward zero like the integer
/// arithmetic it models.
#[inline]
pub fn scale_by_factor_x100(value_x100: i32, factor_x100: u16) -> i32 {
    ((i64::from(value_x100) * i64::from(factor_x100)) / 100) as i32
}

/// Linear interpolation between two x100 endpoints at `num/den`.
/// `den == 0` yields the low endpoint. Truncates toward zero.
#[inline]
pub fn lerp_x100(lo_x100: i32, hi_x100: i32, num: u32, den: u32) -> i32 {
    if den == 0 {
        return lo_x100;
    }
    let span = i64::from(hi_x100) - i64::from(lo_x100);
    let part = span * i64::from(num.min(den)) / i64::from(den);
    (i64::from(lo_x100) + part) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_truncates_toward_zero() {
        assert_eq!(scale_by_factor_x100(55, 130), 71); // 55 * 1.30 = 71.5 -> 71
        assert_eq!(scale_by_factor_x100(35, 130), 45); // 45.5 -> 45
        assert_eq!(scale_by_factor_x100(-55, 130), -71);
        assert_eq!(scale_by_factor_x100(0, 200), 0);
    }

    #[test]
    fn scale_survives_extremes() {
        // i32::MAX * 600 / 100 would overflow in 32 bits; must not here.
        let v = scale_by_factor_x100(i32::MAX, 100);
        assert_eq!(v, i32::MAX);
    }

    #[test]
    fn lerp_endpoints_and_midpoint() {
        assert_eq!(lerp_x100(100, 300, 0, 1023), 100);
        assert_eq!(lerp_x100(100, 300, 1023, 1023), 300);
        assert_eq!(lerp_x100(100, 300, 512, 1024), 200);
        // num beyond den clamps to the high endpoint
        assert_eq!(lerp_x100(100, 300, 2000, 1023), 300);
    }

    #[test]
    fn lerp_zero_den_yields_low() {
        assert_eq!(lerp_x100(42, 999, 5, 0), 42);
    }
}
