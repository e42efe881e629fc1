//! Integer helpers for pool arithmetic.
//!
//! All intermediates run in `u128` so `u64` reserves can never overflow
//! a product. Rounding direction is chosen by the caller: required
//! inputs round up, proceeds round down — always in the pool's favour.

/// Ceiling division.
#[must_use]
pub fn div_ceil(numerator: u128, denominator: u128) -> u128 {
    debug_assert!(denominator > 0);
    numerator.div_ceil(denominator)
}

/// Integer square root (Newton's method, rounding down).
#[must_use]
pub fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_ceil_rounds_up() {
        assert_eq!(div_ceil(10, 3), 4);
        assert_eq!(div_ceil(9, 3), 3);
        assert_eq!(div_ceil(1, 9), 1);
        assert_eq!(div_ceil(0, 9), 0);
    }

    #[test]
    fn isqrt_exact_squares() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(1_000_000), 1_000);
    }

    #[test]
    fn isqrt_rounds_down() {
        assert_eq!(isqrt(2), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(8), 2);
        assert_eq!(isqrt(999_999), 999);
    }

    #[test]
    fn isqrt_large_values() {
        let n = u128::from(u64::MAX);
        let r = isqrt(n * n);
        assert_eq!(r, n);
    }
}
