//! Stack evaluator for compiled expressions.
//!
//! Executes a [`BinaryExpression`] against a read-only evaluation cache.
//! The evaluate path never fails across the module boundary: faults are
//! logged and the target variable's default is substituted, so a single
//! corrupt expression cannot stall an interactive batch.

use crate::bytecode::BinaryExpression;
use crate::module::EvaluationCache;
use crate::pool::StackPool;
use crate::value::{Value, Variable};

mod executors;

/// The expression stack machine.
#[derive(Debug, Default)]
pub struct Interpreter {
    pool: StackPool,
    strict_division: bool,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes division by zero a fault instead of the compatibility value 1.
    pub fn set_strict_division(&mut self, strict: bool) {
        self.strict_division = strict;
    }

    pub const fn strict_division(&self) -> bool {
        self.strict_division
    }

    /// Executes `expression`, producing the value for `target`.
    ///
    /// On any fault the target variable's documented default is returned
    /// and a warning is emitted; no error reaches the caller.
    pub fn evaluate(
        &mut self,
        expression: &BinaryExpression,
        target: Variable,
        cache: &EvaluationCache,
    ) -> Value {
        let mut stack = self.pool.take();
        let result = executors::run(expression, &mut stack, cache, self.strict_division);
        self.pool.recycle(stack);

        match result {
            Ok(value) => value,
            Err(fault) => {
                tracing::warn!(
                    %fault,
                    variable = %target,
                    source = expression.source().unwrap_or("<bytecode>"),
                    "expression fault; substituting the variable default",
                );
                Value::Rational(target.default_value())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::compiler::compile_source;
    use crate::fraction::Fraction;

    fn evaluate(source: &str) -> Value {
        let expression = compile_source(source).unwrap();
        Interpreter::new().evaluate(&expression, Variable::Frequency, &EvaluationCache::default())
    }

    #[test]
    fn arithmetic_against_an_empty_cache() {
        assert_eq!(evaluate("2 + 3 * 4"), Value::integer(14));
        assert_eq!(evaluate("(3/2) * 440"), Value::integer(660));
    }

    #[test]
    fn missing_references_substitute_defaults() {
        // No cache entries: base frequency defaults to 440.
        assert_eq!(evaluate("base.f * (3/2)"), Value::integer(660));
        assert_eq!(evaluate("[9].d"), Value::integer(1));
    }

    #[test]
    fn division_by_zero_follows_the_compatibility_rule() {
        assert_eq!(evaluate("5 / 0"), Value::integer(1));
    }

    #[test]
    fn strict_division_faults_to_the_default() {
        let expression = compile_source("5 / 0").unwrap();
        let mut interpreter = Interpreter::new();
        interpreter.set_strict_division(true);
        let value =
            interpreter.evaluate(&expression, Variable::Duration, &EvaluationCache::default());
        // Fault recovery substitutes the duration default.
        assert_eq!(value, Value::integer(1));

        let value =
            interpreter.evaluate(&expression, Variable::Frequency, &EvaluationCache::default());
        assert_eq!(value, Value::integer(440));
    }

    #[test]
    fn malformed_bytecode_recovers_with_the_default() {
        let expression = crate::bytecode::BinaryExpression::new(
            vec![0xff],
            None,
            Default::default(),
            false,
        );
        let value =
            Interpreter::new().evaluate(&expression, Variable::Tempo, &EvaluationCache::default());
        assert_eq!(value, Value::Rational(Fraction::integer(60)));
    }

    #[test]
    fn powers_demote_exactly_when_irrational() {
        assert_eq!(evaluate("4^(1/2)"), Value::integer(2));
        assert!(evaluate("2^(1/12)").is_irrational());
    }
}
