//! Instruction dispatch for the stack evaluator.

use crate::bytecode::{BinaryExpression, Instruction, NoteId};
use crate::error::Fault;
use crate::fraction::Fraction;
use crate::module::EvaluationCache;
use crate::pool::OperandStack;
use crate::value::Value;

pub(super) fn run(
    expression: &BinaryExpression,
    stack: &mut OperandStack,
    cache: &EvaluationCache,
    strict_division: bool,
) -> Result<Value, Fault> {
    for instruction in expression.instructions() {
        match instruction? {
            Instruction::Const { numer, denom } => {
                let fraction = Fraction::new(i64::from(numer), i64::from(denom))?;
                stack.push(Value::Rational(fraction))?;
            }
            Instruction::BigConst(fraction) => stack.push(Value::Rational(fraction))?,
            Instruction::Ref { note, var } => {
                stack.push(cache.value_or_default(note, var))?;
            }
            Instruction::Base { var } => {
                stack.push(cache.value_or_default(crate::consts::BASE_NOTE, var))?;
            }
            Instruction::Add => binary(stack, |a, b| a.add(b))?,
            Instruction::Sub => binary(stack, |a, b| a.sub(b))?,
            Instruction::Mul => binary(stack, |a, b| a.mul(b))?,
            Instruction::Div => {
                let divisor = stack.pop()?;
                let dividend = stack.pop()?;
                if strict_division && divisor.is_zero() {
                    return Err(Fault::DivisionByZero);
                }
                stack.push(dividend.div(&divisor))?;
            }
            Instruction::Neg => {
                let value = stack.pop()?;
                stack.push(value.neg())?;
            }
            Instruction::Pow => binary(stack, |a, b| a.pow(b))?,
            Instruction::FindTempo => {
                let target = note_ref(&stack.pop()?);
                stack.push(cache.find_tempo(target))?;
            }
            Instruction::FindMeasure => {
                let target = note_ref(&stack.pop()?);
                stack.push(cache.find_measure_length(target))?;
            }
            Instruction::Dup => {
                let top = stack.last()?.clone();
                stack.push(top)?;
            }
            Instruction::Swap => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.push(b)?;
                stack.push(a)?;
            }
        }
    }

    match stack.len() {
        1 => stack.pop(),
        0 => Err(Fault::StackUnderflow),
        depth => Err(Fault::UnbalancedStack(depth)),
    }
}

fn binary(stack: &mut OperandStack, op: impl FnOnce(&Value, &Value) -> Value) -> Result<(), Fault> {
    let rhs = stack.pop()?;
    let lhs = stack.pop()?;
    stack.push(op(&lhs, &rhs))
}

/// Interprets a popped value as a note reference.
///
/// References are emitted as integer constants; anything else rounds to
/// the nearest id in the note domain rather than faulting.
fn note_ref(value: &Value) -> NoteId {
    let id = value.to_f64();
    if id.is_nan() {
        return crate::consts::BASE_NOTE;
    }
    id.round().clamp(0.0, f64::from(NoteId::MAX)) as NoteId
}
