//! Bytecode emission from the parsed expression tree.

use std::collections::BTreeSet;

use num_traits::ToPrimitive;

use super::{BinOp, Expr, RefTarget};
use crate::bytecode::{BinaryExpression, Instruction, NoteId};
use crate::consts::SECONDS_PER_MINUTE;
use crate::fraction::Fraction;

/// Emits postorder stack code for `expr` and collects its reference
/// metadata. Base-note reads set the flag only; no explicit `0` edge is
/// recorded, which keeps the base note's own expressions free of self
/// edges.
pub(crate) fn emit(expr: &Expr, source: Option<String>) -> BinaryExpression {
    let mut emitter = Emitter {
        buf: Vec::new(),
        references: BTreeSet::new(),
        references_base: false,
    };
    emitter.expr(expr);
    BinaryExpression::new(
        emitter.buf,
        source,
        emitter.references,
        emitter.references_base,
    )
}

struct Emitter {
    buf: Vec<u8>,
    references: BTreeSet<NoteId>,
    references_base: bool,
}

impl Emitter {
    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(fraction) => self.constant(fraction),
            Expr::Base(var) => {
                Instruction::Base { var: *var }.encode(&mut self.buf);
                self.references_base = true;
            }
            Expr::Ref(note, var) => {
                Instruction::Ref {
                    note: *note,
                    var: *var,
                }
                .encode(&mut self.buf);
                self.references.insert(*note);
            }
            Expr::Neg(inner) => {
                self.expr(inner);
                Instruction::Neg.encode(&mut self.buf);
            }
            Expr::Binary(op, lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
                let instruction = match op {
                    BinOp::Add => Instruction::Add,
                    BinOp::Sub => Instruction::Sub,
                    BinOp::Mul => Instruction::Mul,
                    BinOp::Div => Instruction::Div,
                    BinOp::Pow => Instruction::Pow,
                };
                instruction.encode(&mut self.buf);
            }
            Expr::FindTempo(target) => {
                self.target(target);
                Instruction::FindTempo.encode(&mut self.buf);
            }
            Expr::FindMeasure(target) => {
                self.target(target);
                Instruction::FindMeasure.encode(&mut self.buf);
            }
            Expr::Beat(target) => {
                self.constant(&Fraction::integer(SECONDS_PER_MINUTE));
                self.target(target);
                Instruction::FindTempo.encode(&mut self.buf);
                Instruction::Div.encode(&mut self.buf);
            }
        }
    }

    /// Pushes the target's note id for an inherited lookup.
    fn target(&mut self, target: &RefTarget) {
        match target {
            RefTarget::Base => {
                self.constant(&Fraction::zero());
                self.references_base = true;
            }
            RefTarget::Note(note) => {
                self.constant(&Fraction::integer(i64::from(*note)));
                self.references.insert(*note);
            }
        }
    }

    fn constant(&mut self, fraction: &Fraction) {
        match (fraction.numer().to_i32(), fraction.denom().to_i32()) {
            (Some(numer), Some(denom)) => {
                Instruction::Const { numer, denom }.encode(&mut self.buf);
            }
            _ => Instruction::BigConst(fraction.clone()).encode(&mut self.buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bytecode::Opcode;
    use crate::compiler::compile_source;
    use crate::value::Variable;

    fn opcodes(source: &str) -> Vec<Opcode> {
        compile_source(source)
            .unwrap()
            .instructions()
            .map(|instruction| instruction.unwrap().opcode())
            .collect()
    }

    #[test]
    fn sums_emit_operand_then_operator() {
        assert_eq!(
            opcodes("1 + 2 - 3"),
            vec![
                Opcode::LoadConst,
                Opcode::LoadConst,
                Opcode::Add,
                Opcode::LoadConst,
                Opcode::Sub,
            ]
        );
    }

    #[test]
    fn base_reads_set_the_flag_without_an_edge() {
        let expr = compile_source("base.f * (3/2)").unwrap();
        assert!(expr.references_base());
        assert!(expr.references().is_empty());
    }

    #[test]
    fn note_reads_record_dependencies() {
        let expr = compile_source("[1].t + [1].d + [2].t").unwrap();
        assert!(!expr.references_base());
        assert_eq!(
            expr.references().iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn beat_lowers_to_tempo_walk_division() {
        assert_eq!(
            opcodes("beat([5])"),
            vec![
                Opcode::LoadConst,
                Opcode::LoadConst,
                Opcode::FindTempo,
                Opcode::Div,
            ]
        );
        let expr = compile_source("beat([5])").unwrap();
        assert_eq!(
            expr.references().iter().copied().collect::<Vec<_>>(),
            vec![5]
        );
    }

    #[test]
    fn tempo_of_base_is_a_plain_base_read() {
        let expr = compile_source("tempo(base)").unwrap();
        let decoded: Vec<_> = expr.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            decoded,
            vec![Instruction::Base {
                var: Variable::Tempo
            }]
        );
        assert!(expr.references_base());
    }

    #[test]
    fn oversized_integers_use_the_big_encoding() {
        assert_eq!(opcodes("2147483647"), vec![Opcode::LoadConst]);
        assert_eq!(opcodes("2147483648"), vec![Opcode::LoadConstBig]);
    }
}
