//! Q17.14 signed fixed-point arithmetic, used by the MLFQS load-average and
//! recent-cpu statistics. All operations are total on the representable
//! range; overflow is not checked, matching the donor formulae.

/// Fixed-point scaling factor: 2^14.
const F: i64 = 1 << 14;

/// A Q17.14 fixed-point value, stored as a plain `i64` scaled by `F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Fixed(i64);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    /// Convert an integer to fixed-point.
    pub fn from_int(n: i64) -> Fixed {
        Fixed(n * F)
    }

    /// Convert to integer, truncating toward zero.
    pub fn to_int_trunc(self) -> i64 {
        self.0 / F
    }

    /// Convert to integer, rounding to nearest (ties away from zero).
    pub fn to_int_round(self) -> i64 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    pub fn add(self, other: Fixed) -> Fixed {
        Fixed(self.0 + other.0)
    }

    pub fn sub(self, other: Fixed) -> Fixed {
        Fixed(self.0 - other.0)
    }

    pub fn add_int(self, n: i64) -> Fixed {
        Fixed(self.0 + n * F)
    }

    pub fn sub_int(self, n: i64) -> Fixed {
        Fixed(self.0 - n * F)
    }

    pub fn mul(self, other: Fixed) -> Fixed {
        Fixed(((self.0 as i128 * other.0 as i128) / F as i128) as i64)
    }

    pub fn mul_int(self, n: i64) -> Fixed {
        Fixed(self.0 * n)
    }

    pub fn div(self, other: Fixed) -> Fixed {
        Fixed(((self.0 as i128 * F as i128) / other.0 as i128) as i64)
    }

    pub fn div_int(self, n: i64) -> Fixed {
        Fixed(self.0 / n)
    }

    /// Raw Q17.14 bit pattern, for debug display only.
    pub fn raw(self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip() {
        let f = Fixed::from_int(59);
        assert_eq!(f.to_int_trunc(), 59);
        assert_eq!(f.to_int_round(), 59);
    }

    #[test]
    fn rounding_toward_nearest() {
        // 5 / 2 = 2.5 in fixed point -> rounds to 3 (away from zero at .5)
        let half = Fixed::from_int(5).div_int(2);
        assert_eq!(half.to_int_round(), 3);
        assert_eq!(half.to_int_trunc(), 2);

        let neg_half = Fixed::from_int(-5).div_int(2);
        assert_eq!(neg_half.to_int_round(), -3);
        assert_eq!(neg_half.to_int_trunc(), -2);
    }

    #[test]
    fn mul_div_inverse() {
        let a = Fixed::from_int(17);
        let b = Fixed::from_int(3);
        let product = a.mul(b);
        assert_eq!(product.to_int_trunc(), 51);
        let back = product.div(b);
        assert_eq!(back.to_int_round(), 17);
    }

    #[test]
    fn load_avg_formula_shape() {
        // load_avg = (59/60) * load_avg + (1/60) * ready_count, starting at 0
        // with one ready thread, should converge toward 1 over many ticks.
        let fifty_nine_sixtieths = Fixed::from_int(59).div_int(60);
        let one_sixtieth = Fixed::from_int(1).div_int(60);
        let mut load_avg = Fixed::ZERO;
        for _ in 0..10_000 {
            load_avg = fifty_nine_sixtieths.mul(load_avg).add(one_sixtieth.mul_int(1));
        }
        assert_eq!(load_avg.to_int_round(), 1);
    }
}
