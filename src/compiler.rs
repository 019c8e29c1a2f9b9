//! Expression compiler.
//!
//! Turns source text into a [`BinaryExpression`]: the modern operator DSL
//! (`base.f * (3/2)`, `[2].t + [2].d`, `2^(1/12)`, `tempo(·)`, `measure(·)`,
//! `beat(·)`) and the legacy verbose method-chain form
//! (`module.baseNote.getVariable('frequency').mul(new Fraction(3, 2))`) both
//! compile to the same bytecode. Compilation is pure; the compiler caches by
//! source text and hands out clones.

use std::collections::HashMap;

use num_bigint::BigInt;
use num_traits::{One, Pow};

use crate::bytecode::{BinaryExpression, NoteId};
use crate::consts::MAX_DECIMAL_DENOMINATOR;
use crate::error::ExpressionError;
use crate::fraction::Fraction;
use crate::value::Variable;

mod decompiler;
mod emitter;
mod legacy;
mod lexer;
mod parser;

pub use decompiler::decompile;

/// Longest accepted numeric literal, in characters.
const MAX_LITERAL_LEN: usize = 10_000;

/// Parsed expression tree, shared by both grammars.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Fraction),
    /// A base-note variable read.
    Base(Variable),
    /// A referenced note's variable read.
    Ref(NoteId, Variable),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Inherited-tempo lookup (legacy `module.findTempo`).
    FindTempo(RefTarget),
    /// Inherited-measure-length lookup (legacy `module.findMeasureLength`).
    FindMeasure(RefTarget),
    /// Seconds-per-beat helper, lowered to `60 / findTempo(target)`.
    Beat(RefTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Argument of `tempo(·)`, `measure(·)`, `beat(·)` and the legacy lookup
/// functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefTarget {
    Base,
    Note(NoteId),
}

/// Maps a property name, short or full, to its variable.
pub(crate) fn lookup_variable(name: &str) -> Option<Variable> {
    match name {
        "f" | "freq" | "frequency" => Some(Variable::Frequency),
        "t" | "s" | "start" | "startTime" => Some(Variable::StartTime),
        "d" | "dur" | "duration" => Some(Variable::Duration),
        "tempo" => Some(Variable::Tempo),
        "bpm" | "beatsPerMeasure" => Some(Variable::BeatsPerMeasure),
        "ml" | "measureLength" => Some(Variable::MeasureLength),
        _ => None,
    }
}

/// Rationalizes a numeric literal.
///
/// Plain integers parse exactly. Decimals consult a short table of common
/// repeating decimals first (so a typed `0.333333` means one third), then
/// convert exactly when the reduced denominator stays within
/// [`MAX_DECIMAL_DENOMINATOR`], and otherwise round to the closest
/// continued-fraction convergent under that cap. Inputs needing finer
/// resolution are silently rounded; this is load-bearing for stored sources
/// and must not be tightened without a migration plan.
pub(crate) fn parse_number(raw: &str, offset: usize) -> Result<Fraction, ExpressionError> {
    if raw.len() > MAX_LITERAL_LEN {
        return Err(ExpressionError::parse(offset, "numeric literal too large"));
    }

    let Some((int_digits, frac_digits)) = raw.split_once('.') else {
        let numer: BigInt = raw
            .parse()
            .map_err(|_| ExpressionError::parse(offset, "malformed number"))?;
        return Ok(Fraction::from_big(numer, BigInt::one())
            .expect("unit denominator is nonzero"));
    };

    if frac_digits.is_empty() {
        return Err(ExpressionError::parse(offset, "malformed number"));
    }
    let int_digits = if int_digits.is_empty() { "0" } else { int_digits };

    if let Some(fraction) = common_decimal(int_digits, frac_digits) {
        return Ok(fraction);
    }

    let mut digits = String::with_capacity(int_digits.len() + frac_digits.len());
    digits.push_str(int_digits);
    digits.push_str(frac_digits);
    let numer: BigInt = digits
        .parse()
        .map_err(|_| ExpressionError::parse(offset, "malformed number"))?;
    let denom = Pow::pow(BigInt::from(10), frac_digits.len() as u32);
    let exact = Fraction::from_big(numer, denom).expect("powers of ten are nonzero");

    if exact.denom() <= &BigInt::from(MAX_DECIMAL_DENOMINATOR) {
        return Ok(exact);
    }
    Ok(approximate(exact.to_f64(), MAX_DECIMAL_DENOMINATOR))
}

/// Common repeating decimals a user is likely to have typed by value.
const COMMON_DECIMALS: &[(i64, i64)] = &[
    (1, 3),
    (2, 3),
    (1, 6),
    (5, 6),
    (1, 12),
    (5, 12),
    (7, 12),
    (11, 12),
];

fn common_decimal(int_digits: &str, frac_digits: &str) -> Option<Fraction> {
    if frac_digits.len() < 3 {
        return None;
    }
    let typed: f64 = format!("0.{frac_digits}").parse().ok()?;
    let tolerance = 0.5 * 10f64.powi(-(frac_digits.len().min(15) as i32));

    for &(numer, denom) in COMMON_DECIMALS {
        let candidate = numer as f64 / denom as f64;
        if (typed - candidate).abs() <= tolerance {
            let int_part: BigInt = int_digits.parse().ok()?;
            let whole = Fraction::from_big(int_part, BigInt::one()).ok()?;
            let frac = Fraction::new(numer, denom).expect("table denominators are nonzero");
            return Some(whole.add(&frac));
        }
    }
    None
}

/// Closest continued-fraction convergent with a bounded denominator.
fn approximate(value: f64, max_denom: i64) -> Fraction {
    let negative = value < 0.0;
    let mut x = value.abs();
    let (mut h0, mut h1) = (0i64, 1i64);
    let (mut k0, mut k1) = (1i64, 0i64);

    for _ in 0..64 {
        let a = x.floor();
        if a > i64::MAX as f64 {
            break;
        }
        let a_int = a as i64;
        let (h, overflow_h) = match a_int.checked_mul(h1).and_then(|v| v.checked_add(h0)) {
            Some(v) => (v, false),
            None => (0, true),
        };
        let (k, overflow_k) = match a_int.checked_mul(k1).and_then(|v| v.checked_add(k0)) {
            Some(v) => (v, false),
            None => (0, true),
        };
        if overflow_h || overflow_k || k > max_denom {
            break;
        }
        h0 = h1;
        h1 = h;
        k0 = k1;
        k1 = k;

        let fractional = x - a;
        if fractional < 1e-12 {
            break;
        }
        x = 1.0 / fractional;
    }

    let numer = if negative { -h1 } else { h1 };
    Fraction::new(numer, k1.max(1)).expect("convergent denominators are positive")
}

/// Source-keyed compiler with a clone-on-hit cache.
#[derive(Debug, Default)]
pub struct Compiler {
    cache: HashMap<String, BinaryExpression>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `source`, consulting the cache first.
    ///
    /// The same source always yields the same bytecode, so cache hits
    /// return clones of the stored expression.
    pub fn compile(&mut self, source: &str) -> Result<BinaryExpression, ExpressionError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::EmptySource);
        }
        if let Some(hit) = self.cache.get(trimmed) {
            return Ok(hit.clone());
        }

        let expression = compile_source(trimmed)?;
        self.cache.insert(trimmed.to_string(), expression.clone());
        Ok(expression)
    }
}

/// One-shot compilation without the cache.
pub fn compile_source(source: &str) -> Result<BinaryExpression, ExpressionError> {
    let ast = if legacy::is_legacy(source) {
        legacy::parse(source)?
    } else {
        parser::parse(source)?
    };
    Ok(emitter::emit(&ast, Some(source.to_string())))
}

/// Emits a fit-for-storage program for a literal value, used where the
/// module synthesizes expressions (base-note defaults, measure markers).
pub(crate) fn literal_source(fraction: &Fraction) -> String {
    if fraction.denom() == &BigInt::one() {
        fraction.numer().to_string()
    } else {
        format!("({}/{})", fraction.numer(), fraction.denom())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("0.5", 1, 2)]
    #[case("0.25", 1, 4)]
    #[case("1.75", 7, 4)]
    #[case(".5", 1, 2)]
    #[case("0.333333", 1, 3)]
    #[case("2.666667", 8, 3)]
    #[case("0.083333", 1, 12)]
    #[case("0.0001", 1, 10_000)]
    fn decimals_rationalize(#[case] raw: &str, #[case] numer: i64, #[case] denom: i64) {
        assert_eq!(
            parse_number(raw, 0).unwrap(),
            Fraction::new(numer, denom).unwrap()
        );
    }

    #[test]
    fn short_decimals_stay_literal() {
        // Two digits are too coarse to mean one third.
        assert_eq!(
            parse_number("0.33", 0).unwrap(),
            Fraction::new(33, 100).unwrap()
        );
    }

    #[test]
    fn fine_decimals_round_to_the_denominator_cap() {
        let approximated = parse_number("0.14159265", 0).unwrap();
        assert!(approximated.denom() <= &BigInt::from(MAX_DECIMAL_DENOMINATOR));
        assert!((approximated.to_f64() - 0.14159265).abs() < 1e-6);
    }

    #[test]
    fn integers_parse_exactly_past_i64() {
        let big = parse_number("123456789012345678901234567890", 0).unwrap();
        assert_eq!(
            big.numer().to_string(),
            "123456789012345678901234567890"
        );
    }

    #[test]
    fn compile_cache_returns_equal_programs() {
        let mut compiler = Compiler::new();
        let first = compiler.compile("base.f * (3/2)").unwrap();
        let second = compiler.compile("  base.f * (3/2)  ").unwrap();
        assert_eq!(first, second);
    }
}
