//! Exact rational arithmetic.
//!
//! [`Fraction`] is an arbitrary-precision signed rational kept in lowest
//! terms with the sign normalized onto the numerator. Division by zero
//! evaluates to the rational 1 — a long-standing product decision that
//! callers treat as a recoverable fault rather than an error.

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use thiserror::Error;

/// Domain error for a zero denominator at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("fraction denominator is zero")]
pub struct ZeroDenominator;

/// Arbitrary-precision signed rational in lowest terms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fraction(BigRational);

impl Fraction {
    /// Builds `numer / denom`, reduced, sign on the numerator.
    ///
    /// A zero denominator is rejected with a domain error.
    pub fn new(numer: i64, denom: i64) -> Result<Self, ZeroDenominator> {
        Self::from_big(BigInt::from(numer), BigInt::from(denom))
    }

    /// Builds `numer / denom` from arbitrary-precision parts.
    pub fn from_big(numer: BigInt, denom: BigInt) -> Result<Self, ZeroDenominator> {
        if denom.is_zero() {
            return Err(ZeroDenominator);
        }
        Ok(Self(BigRational::new(numer, denom)))
    }

    /// The integer `n`.
    pub fn integer(n: i64) -> Self {
        Self(BigRational::from_integer(BigInt::from(n)))
    }

    /// The rational 0.
    pub fn zero() -> Self {
        Self::integer(0)
    }

    /// The rational 1.
    pub fn one() -> Self {
        Self::integer(1)
    }

    /// Numerator in lowest terms; carries the sign.
    pub fn numer(&self) -> &BigInt {
        self.0.numer()
    }

    /// Denominator in lowest terms; always positive.
    pub fn denom(&self) -> &BigInt {
        self.0.denom()
    }

    pub fn add(&self, other: &Self) -> Self {
        Self(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self(&self.0 - &other.0)
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self(&self.0 * &other.0)
    }

    /// Division; a zero divisor yields the rational 1.
    pub fn div(&self, other: &Self) -> Self {
        if other.is_zero() {
            return Self::one();
        }
        Self(&self.0 / &other.0)
    }

    /// Division that refuses a zero divisor. Used under strict mode.
    pub fn checked_div(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        Some(Self(&self.0 / &other.0))
    }

    pub fn neg(&self) -> Self {
        Self(-&self.0)
    }

    /// Reciprocal; the reciprocal of 0 is 1, matching [`Fraction::div`].
    pub fn inverse(&self) -> Self {
        if self.is_zero() {
            return Self::one();
        }
        Self(self.0.recip())
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Integer power by repeated squaring. `0^0 = 1`; a negative exponent
    /// inverts the result.
    pub fn integer_pow(&self, n: i64) -> Self {
        if n == 0 {
            return Self::one();
        }

        let mut result = BigRational::from_integer(BigInt::from(1));
        let mut current = self.0.clone();
        let mut remaining = n.unsigned_abs();

        while remaining > 0 {
            if remaining & 1 == 1 {
                result *= &current;
            }
            remaining >>= 1;
            if remaining > 0 {
                current = &current * &current;
            }
        }

        let result = Self(result);
        if n < 0 {
            result.inverse()
        } else {
            result
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_one(&self) -> bool {
        self.0 == BigRational::from_integer(BigInt::from(1))
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn equals(&self, other: &Self) -> bool {
        self.0 == other.0
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }

    /// Best-effort float approximation.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}

impl From<i64> for Fraction {
    fn from(n: i64) -> Self {
        Self::integer(n)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.denom() == &BigInt::from(1) {
            write!(f, "{}", self.0.numer())
        } else {
            write!(f, "{}/{}", self.0.numer(), self.0.denom())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use quickcheck_macros::quickcheck;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).expect("nonzero denominator")
    }

    #[test]
    fn normalizes_to_lowest_terms() {
        let f = frac(6, -4);
        assert_eq!(f.numer(), &BigInt::from(-3));
        assert_eq!(f.denom(), &BigInt::from(2));
    }

    #[test]
    fn rejects_zero_denominator() {
        assert_eq!(Fraction::new(1, 0), Err(ZeroDenominator));
    }

    #[test]
    fn division_by_zero_is_one() {
        assert!(frac(7, 3).div(&Fraction::zero()).is_one());
        assert!(Fraction::zero().inverse().is_one());
        assert_eq!(frac(7, 3).checked_div(&Fraction::zero()), None);
    }

    #[test]
    fn integer_pow_edges() {
        assert!(Fraction::zero().integer_pow(0).is_one());
        assert_eq!(frac(2, 3).integer_pow(-2), frac(9, 4));
        assert_eq!(frac(2, 1).integer_pow(10), frac(1024, 1));
    }

    #[test]
    fn display_elides_unit_denominator() {
        assert_eq!(frac(8, 2).to_string(), "4");
        assert_eq!(frac(-3, 2).to_string(), "-3/2");
    }

    #[quickcheck]
    fn add_commutes(a: i32, b: i32, c: i32, d: i32) -> bool {
        let (c, d) = (c.max(1), d.max(1));
        let x = frac(a as i64, c as i64);
        let y = frac(b as i64, d as i64);
        x.add(&y) == y.add(&x)
    }

    #[quickcheck]
    fn mul_div_round_trips(a: i32, b: i32, c: i32, d: i32) -> bool {
        let (c, d) = (c.max(1), d.max(1));
        let x = frac(a as i64, c as i64);
        let y = frac(b.max(1) as i64, d as i64);
        x.mul(&y).div(&y) == x
    }

    #[quickcheck]
    fn reduction_is_canonical(a: i32, c: i32) -> bool {
        use num_integer::Integer;
        let f = frac(a as i64, c.max(1) as i64);
        f.numer().gcd(f.denom()) == BigInt::from(1) || f.is_zero()
    }
}
