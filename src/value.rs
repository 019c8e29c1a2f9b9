//! Numeric values and the rational/irrational lift.
//!
//! A [`Value`] is an exact [`Fraction`], a symbolic power product, or a
//! plain `f64` approximation. Exactness survives every operation except a
//! power whose result fails the rational-power test; such results keep
//! their algebraic shape `coefficient * prod(base_i ^ exp_i)` so that
//! multiplicative chains can still collapse back to a rational. Twelve
//! semitone factors `2^(1/12)` multiply out to `2^(12/12)` and certify as
//! exactly 2; only operations with no algebraic rendering (mixed sums,
//! irrational exponents) demote to a raw float.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use num_bigint::BigInt;
use num_integer::Roots;
use num_traits::{Pow, Signed, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::consts::*;
use crate::fraction::Fraction;

/// The six expressible note variables, in operand-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum Variable {
    #[strum(serialize = "startTime")]
    StartTime = 0,
    #[strum(serialize = "duration")]
    Duration = 1,
    #[strum(serialize = "frequency")]
    Frequency = 2,
    #[strum(serialize = "tempo")]
    Tempo = 3,
    #[strum(serialize = "beatsPerMeasure")]
    BeatsPerMeasure = 4,
    #[strum(serialize = "measureLength")]
    MeasureLength = 5,
}

impl Variable {
    /// Operand-index encoding used in bytecode.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes an operand index.
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::StartTime),
            1 => Some(Self::Duration),
            2 => Some(Self::Frequency),
            3 => Some(Self::Tempo),
            4 => Some(Self::BeatsPerMeasure),
            5 => Some(Self::MeasureLength),
            _ => None,
        }
    }

    /// The documented default substituted when a reference cannot be
    /// resolved from the evaluation cache.
    pub fn default_value(self) -> Fraction {
        let n = match self {
            Self::StartTime => DEFAULT_START_TIME,
            Self::Duration => DEFAULT_DURATION,
            Self::Frequency => DEFAULT_FREQUENCY,
            Self::Tempo => DEFAULT_TEMPO,
            Self::BeatsPerMeasure => DEFAULT_BEATS_PER_MEASURE,
            Self::MeasureLength => DEFAULT_MEASURE_LENGTH,
        };
        Fraction::integer(n)
    }

    /// The corruption bit tracking this variable.
    pub const fn corruption_flag(self) -> Corruption {
        match self {
            Self::StartTime => Corruption::START_TIME,
            Self::Duration => Corruption::DURATION,
            Self::Frequency => Corruption::FREQUENCY,
            Self::Tempo => Corruption::TEMPO,
            Self::BeatsPerMeasure => Corruption::BEATS_PER_MEASURE,
            Self::MeasureLength => Corruption::MEASURE_LENGTH,
        }
    }
}

bitflags! {
    /// Per-property corruption mask: a set bit means the property's
    /// evaluation involved a power that could not be certified rational.
    pub struct Corruption: u8 {
        const START_TIME = 0x01;
        const DURATION = 0x02;
        const FREQUENCY = 0x04;
        const TEMPO = 0x08;
        const BEATS_PER_MEASURE = 0x10;
        const MEASURE_LENGTH = 0x20;
    }
}

impl Default for Corruption {
    fn default() -> Self {
        Corruption::empty()
    }
}

/// A rational, symbolic-power, or irrational numeric value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Exact rational, no precision loss.
    Rational(Fraction),
    /// Product form `coefficient * prod(base_i ^ exp_i)` whose factors are
    /// individually irrational but algebraically exact.
    Symbolic(SymbolicPower),
    /// `f64` approximation with no recoverable algebraic shape.
    Irrational(f64),
}

/// Normalized power product.
///
/// Invariants: the coefficient is nonzero, the factor list is non-empty
/// and sorted by base, each base occurs once, and no factor passes the
/// rational-power test (anything that does has been folded into the
/// coefficient). A product that loses all factors is not a
/// `SymbolicPower`; normalization returns it as [`Value::Rational`].
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicPower {
    coefficient: Fraction,
    factors: Vec<PowerFactor>,
}

/// One `base ^ exponent` term of a power product.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerFactor {
    base: Fraction,
    exponent: Fraction,
}

impl SymbolicPower {
    pub fn coefficient(&self) -> &Fraction {
        &self.coefficient
    }

    pub fn factors(&self) -> &[PowerFactor] {
        &self.factors
    }

    pub fn to_f64(&self) -> f64 {
        self.factors.iter().fold(self.coefficient.to_f64(), |acc, factor| {
            acc * factor.base.to_f64().powf(factor.exponent.to_f64())
        })
    }

    /// Folds certifiable factors into the coefficient and decides the
    /// final shape.
    fn normalize(coefficient: Fraction, factors: Vec<PowerFactor>) -> Value {
        let mut coefficient = coefficient;
        let mut merged: BTreeMap<Fraction, Fraction> = BTreeMap::new();
        for factor in factors {
            match merged.entry(factor.base) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(factor.exponent);
                }
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    let sum = slot.get().add(&factor.exponent);
                    *slot.get_mut() = sum;
                }
            }
        }

        let mut surviving = Vec::with_capacity(merged.len());
        for (base, exponent) in merged {
            if exponent.is_zero() {
                continue;
            }
            match try_rational_power(&base, &exponent) {
                Some(exact) => coefficient = coefficient.mul(&exact),
                None => surviving.push(PowerFactor { base, exponent }),
            }
        }

        if coefficient.is_zero() || surviving.is_empty() {
            return Value::Rational(coefficient);
        }
        Value::Symbolic(SymbolicPower {
            coefficient,
            factors: surviving,
        })
    }

    fn scale(&self, by: &Fraction) -> Value {
        Self::normalize(self.coefficient.mul(by), self.factors.clone())
    }

    fn merge(&self, other: &Self) -> Value {
        let mut factors = self.factors.clone();
        factors.extend(other.factors.iter().cloned());
        Self::normalize(self.coefficient.mul(&other.coefficient), factors)
    }

    fn inverted(&self) -> Value {
        let factors = self
            .factors
            .iter()
            .map(|factor| PowerFactor {
                base: factor.base.clone(),
                exponent: factor.exponent.neg(),
            })
            .collect();
        Self::normalize(self.coefficient.inverse(), factors)
    }

    /// Raises the product to a rational exponent.
    fn powi(&self, exponent: &Fraction) -> Value {
        let mut factors: Vec<PowerFactor> = self
            .factors
            .iter()
            .map(|factor| PowerFactor {
                base: factor.base.clone(),
                exponent: factor.exponent.mul(exponent),
            })
            .collect();

        // The coefficient is raised like any other base.
        let coefficient = match try_rational_power(&self.coefficient, exponent) {
            Some(exact) => exact,
            None => {
                factors.push(PowerFactor {
                    base: self.coefficient.clone(),
                    exponent: exponent.clone(),
                });
                Fraction::one()
            }
        };
        Self::normalize(coefficient, factors)
    }
}

impl Value {
    pub fn rational(numer: i64, denom: i64) -> Option<Value> {
        Fraction::new(numer, denom).ok().map(Value::Rational)
    }

    pub fn integer(n: i64) -> Value {
        Value::Rational(Fraction::integer(n))
    }

    pub fn is_rational(&self) -> bool {
        matches!(self, Value::Rational(_))
    }

    /// Whether the value failed rational certification, in either the
    /// symbolic or the raw-float shape.
    pub fn is_irrational(&self) -> bool {
        !self.is_rational()
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Rational(f) => f.is_zero(),
            // A symbolic product has a nonzero coefficient by invariant.
            Value::Symbolic(_) => false,
            Value::Irrational(v) => *v == 0.0,
        }
    }

    pub fn as_fraction(&self) -> Option<&Fraction> {
        match self {
            Value::Rational(f) => Some(f),
            _ => None,
        }
    }

    /// Float approximation for playback and display.
    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Rational(f) => f.to_f64(),
            Value::Symbolic(s) => s.to_f64(),
            Value::Irrational(v) => *v,
        }
    }

    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Rational(a), Value::Rational(b)) => Value::Rational(a.add(b)),
            // Like products differ only in coefficient and stay symbolic.
            (Value::Symbolic(a), Value::Symbolic(b)) if a.factors == b.factors => {
                SymbolicPower::normalize(a.coefficient.add(&b.coefficient), a.factors.clone())
            }
            _ => Value::Irrational(self.to_f64() + other.to_f64()),
        }
    }

    pub fn sub(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Rational(a), Value::Rational(b)) => Value::Rational(a.sub(b)),
            (Value::Symbolic(a), Value::Symbolic(b)) if a.factors == b.factors => {
                SymbolicPower::normalize(a.coefficient.sub(&b.coefficient), a.factors.clone())
            }
            _ => Value::Irrational(self.to_f64() - other.to_f64()),
        }
    }

    pub fn mul(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Rational(a), Value::Rational(b)) => Value::Rational(a.mul(b)),
            (Value::Rational(r), Value::Symbolic(s))
            | (Value::Symbolic(s), Value::Rational(r)) => s.scale(r),
            (Value::Symbolic(a), Value::Symbolic(b)) => a.merge(b),
            _ => Value::Irrational(self.to_f64() * other.to_f64()),
        }
    }

    /// Division; a zero divisor yields 1 on every path.
    pub fn div(&self, other: &Value) -> Value {
        if other.is_zero() {
            return Value::Rational(Fraction::one());
        }
        match (self, other) {
            (Value::Rational(a), Value::Rational(b)) => Value::Rational(a.div(b)),
            (Value::Symbolic(s), Value::Rational(r)) => s.scale(&r.inverse()),
            (Value::Rational(r), Value::Symbolic(s)) => match s.inverted() {
                Value::Symbolic(inverse) => inverse.scale(r),
                inverse => inverse.mul(&Value::Rational(r.clone())),
            },
            (Value::Symbolic(a), Value::Symbolic(b)) => match b.inverted() {
                Value::Symbolic(inverse) => a.merge(&inverse),
                inverse => inverse.mul(&Value::Symbolic(a.clone())),
            },
            _ => Value::Irrational(self.to_f64() / other.to_f64()),
        }
    }

    pub fn neg(&self) -> Value {
        match self {
            Value::Rational(f) => Value::Rational(f.neg()),
            Value::Symbolic(s) => SymbolicPower::normalize(s.coefficient.neg(), s.factors.clone()),
            Value::Irrational(v) => Value::Irrational(-v),
        }
    }

    pub fn inverse(&self) -> Value {
        match self {
            Value::Rational(f) => Value::Rational(f.inverse()),
            Value::Symbolic(s) => s.inverted(),
            Value::Irrational(v) => {
                if *v == 0.0 {
                    Value::Rational(Fraction::one())
                } else {
                    Value::Irrational(1.0 / v)
                }
            }
        }
    }

    pub fn abs(&self) -> Value {
        match self {
            Value::Rational(f) => Value::Rational(f.abs()),
            Value::Symbolic(s) => {
                SymbolicPower::normalize(s.coefficient.abs(), s.factors.clone())
            }
            Value::Irrational(v) => Value::Irrational(v.abs()),
        }
    }

    /// Power, attempting to stay exact.
    ///
    /// `2^(2/1) = 4` and `4^(1/2) = 2` certify as rational; `2^(1/12)`
    /// becomes the symbolic factor it is, ready to recombine with later
    /// multiplications. Only an irrational exponent forces the float path.
    pub fn pow(&self, exponent: &Value) -> Value {
        match (self, exponent) {
            (Value::Rational(base), Value::Rational(exp)) => {
                match try_rational_power(base, exp) {
                    Some(result) => Value::Rational(result),
                    None => SymbolicPower::normalize(
                        Fraction::one(),
                        vec![PowerFactor {
                            base: base.clone(),
                            exponent: exp.clone(),
                        }],
                    ),
                }
            }
            (Value::Symbolic(base), Value::Rational(exp)) => base.powi(exp),
            _ => Value::Irrational(self.to_f64().powf(exponent.to_f64())),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Rational(Fraction::zero())
    }
}

impl From<Fraction> for Value {
    fn from(f: Fraction) -> Self {
        Value::Rational(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Rational(frac) => write!(f, "{frac}"),
            Value::Symbolic(s) => write!(f, "{:.10}", s.to_f64()),
            Value::Irrational(v) => write!(f, "{v:.10}"),
        }
    }
}

/// Tries to compute `base^(s/t)` as a rational.
///
/// `s = 0` is 1; `t = 1` falls back to integer power; otherwise the result
/// must have an exact `t`-th root of both magnitudes, verified as
/// `candidate^t == x`. Odd roots preserve sign; an even root of a negative
/// has no real rational value.
fn try_rational_power(base: &Fraction, exp: &Fraction) -> Option<Fraction> {
    let s = exp.numer().to_i64()?;
    let t = exp.denom().to_i64()?;

    if s == 0 {
        return Some(Fraction::one());
    }
    if t == 1 {
        return Some(base.integer_pow(s));
    }

    let powered = base.integer_pow(s);
    let t = u32::try_from(t).ok()?;

    let negative = powered.numer().is_negative();
    if negative && t % 2 == 0 {
        return None;
    }

    let numer_root = exact_nth_root(&powered.numer().abs(), t)?;
    let denom_root = exact_nth_root(powered.denom(), t)?;

    let signed = if negative { -numer_root } else { numer_root };
    Fraction::from_big(signed, denom_root).ok()
}

/// Exact integer `n`-th root, or `None` when `value` is not a perfect
/// `n`-th power.
fn exact_nth_root(value: &BigInt, n: u32) -> Option<BigInt> {
    let candidate = value.nth_root(n);
    if Pow::pow(&candidate, n) == *value {
        Some(candidate)
    } else {
        None
    }
}

/// Compact serializable rendering of a [`Value`], used wherever an
/// evaluated value crosses a serialization boundary. Symbolic products
/// serialize as their float approximation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRepr {
    /// Decimal numerator, present for rational values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Decimal denominator, present for rational values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Float approximation, present for irrational values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f: Option<f64>,
    /// Whether the value is irrational.
    pub corrupted: bool,
}

impl ValueRepr {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Rational(frac) => ValueRepr {
                n: Some(frac.numer().to_string()),
                d: Some(frac.denom().to_string()),
                f: None,
                corrupted: false,
            },
            irrational => ValueRepr {
                n: None,
                d: None,
                f: Some(irrational.to_f64()),
                corrupted: true,
            },
        }
    }

    pub fn to_value(&self) -> Option<Value> {
        if self.corrupted {
            return self.f.map(Value::Irrational);
        }
        let numer: BigInt = self.n.as_ref()?.parse().ok()?;
        let denom: BigInt = self.d.as_ref()?.parse().ok()?;
        Fraction::from_big(numer, denom).ok().map(Value::Rational)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rational(n: i64, d: i64) -> Value {
        Value::rational(n, d).unwrap()
    }

    fn semitone() -> Value {
        rational(2, 1).pow(&rational(1, 12))
    }

    #[test]
    fn rational_arithmetic_stays_exact() {
        let sum = rational(1, 2).add(&rational(1, 4));
        assert_eq!(sum, rational(3, 4));
        assert!(sum.is_rational());
    }

    #[test]
    fn irrational_operand_contaminates() {
        let result = rational(2, 1).add(&Value::Irrational(std::f64::consts::PI));
        assert!(result.is_irrational());
    }

    #[test]
    fn integer_power_is_rational() {
        assert_eq!(rational(2, 1).pow(&rational(3, 1)), rational(8, 1));
        assert_eq!(rational(2, 1).pow(&rational(-2, 1)), rational(1, 4));
        assert_eq!(rational(123, 456).pow(&rational(0, 1)), rational(1, 1));
    }

    #[test]
    fn perfect_roots_stay_rational() {
        assert_eq!(rational(4, 1).pow(&rational(1, 2)), rational(2, 1));
        assert_eq!(rational(8, 27).pow(&rational(1, 3)), rational(2, 3));
        assert_eq!(rational(-8, 1).pow(&rational(1, 3)), rational(-2, 1));
    }

    #[test]
    fn imperfect_roots_go_symbolic() {
        let root2 = rational(2, 1).pow(&rational(1, 2));
        assert!(root2.is_irrational());
        assert!(matches!(root2, Value::Symbolic(_)));
        assert!((root2.to_f64() - std::f64::consts::SQRT_2).abs() < 1e-10);

        let semitone = semitone();
        assert!(semitone.is_irrational());
        assert!((semitone.to_f64() - 2f64.powf(1.0 / 12.0)).abs() < 1e-10);
    }

    #[test]
    fn twelve_semitones_collapse_to_the_octave() {
        let mut frequency = rational(440, 1);
        for _ in 0..12 {
            frequency = frequency.mul(&semitone());
        }
        assert_eq!(frequency, rational(880, 1));
    }

    #[test]
    fn symbolic_division_cancels() {
        let up = rational(440, 1).mul(&semitone());
        let down = up.div(&semitone());
        assert_eq!(down, rational(440, 1));
    }

    #[test]
    fn symbolic_power_distributes_over_factors() {
        let twelfth = semitone();
        let octave = twelfth.pow(&rational(12, 1));
        assert_eq!(octave, rational(2, 1));
    }

    #[test]
    fn like_symbolic_terms_combine_additively() {
        let a = rational(3, 1).mul(&semitone());
        let b = rational(5, 1).mul(&semitone());
        let sum = a.add(&b);
        assert_eq!(sum, rational(8, 1).mul(&semitone()));
        // Cancelling coefficients certifies back to zero.
        assert_eq!(a.sub(&a), rational(0, 1));
    }

    #[test]
    fn unlike_symbolic_sums_demote_to_floats() {
        let sum = semitone().add(&rational(1, 1));
        assert!(matches!(sum, Value::Irrational(_)));
    }

    #[test]
    fn even_root_of_negative_is_not_rational() {
        assert!(rational(-4, 1).pow(&rational(1, 2)).is_irrational());
    }

    #[test]
    fn division_by_zero_is_one_on_every_path() {
        assert_eq!(rational(7, 2).div(&rational(0, 1)), rational(1, 1));
        assert_eq!(semitone().div(&rational(0, 1)), rational(1, 1));
        let float_path = Value::Irrational(3.5).div(&Value::Irrational(0.0));
        assert_eq!(float_path, rational(1, 1));
    }

    #[test]
    fn zero_times_symbolic_is_zero() {
        assert_eq!(rational(0, 1).mul(&semitone()), rational(0, 1));
    }

    #[test]
    fn variable_round_trips_operand_index() {
        use strum::IntoEnumIterator;
        for var in Variable::iter() {
            assert_eq!(Variable::from_index(var.index() as u8), Some(var));
        }
        assert_eq!(Variable::from_index(6), None);
    }

    #[test]
    fn corruption_flags_match_operand_order() {
        assert_eq!(Variable::StartTime.corruption_flag().bits(), 0x01);
        assert_eq!(Variable::MeasureLength.corruption_flag().bits(), 0x20);
    }

    #[test]
    fn value_repr_round_trips() {
        let exact = rational(-3, 4);
        let repr = ValueRepr::from_value(&exact);
        assert_eq!(repr.to_value(), Some(exact));

        let approx = Value::Irrational(std::f64::consts::E);
        let repr = ValueRepr::from_value(&approx);
        assert!(repr.corrupted);
        assert_eq!(repr.to_value(), Some(approx));

        let symbolic = ValueRepr::from_value(&semitone());
        assert!(symbolic.corrupted);
        assert!((symbolic.f.unwrap() - 2f64.powf(1.0 / 12.0)).abs() < 1e-10);

        let json = serde_json::to_string(&ValueRepr::from_value(&rational(3, 2))).unwrap();
        assert_eq!(json, r#"{"n":"3","d":"2","corrupted":false}"#);
    }
}
