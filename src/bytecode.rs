//! Compact stack bytecode for note expressions.
//!
//! An expression compiles to a byte-addressable instruction stream: one-byte
//! opcodes followed by big-endian operands. [`BinaryExpression`] couples the
//! stream with its reference metadata; [`Instructions`] decodes it back into
//! [`Instruction`] values, failing softly on malformed input so a corrupt
//! expression can never take down an evaluation batch.

use std::collections::BTreeSet;
use std::convert::TryFrom;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

use crate::error::Fault;
use crate::fraction::Fraction;
use crate::value::Variable;

mod opcode;

pub use opcode::Opcode;

/// Identifier of a note. Id 0 is the base note.
pub type NoteId = u16;

/// A decoded instruction of the expression stack machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push a small rational constant.
    Const { numer: i32, denom: i32 },
    /// Push a rational constant outside the `i32` range.
    BigConst(Fraction),
    /// Push a referenced note's variable from the evaluation cache.
    Ref { note: NoteId, var: Variable },
    /// Push a base-note variable from the evaluation cache.
    Base { var: Variable },
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    FindTempo,
    FindMeasure,
    Dup,
    Swap,
}

impl Instruction {
    /// The opcode this instruction encodes to.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Const { .. } => Opcode::LoadConst,
            Self::BigConst(_) => Opcode::LoadConstBig,
            Self::Ref { .. } => Opcode::LoadRef,
            Self::Base { .. } => Opcode::LoadBase,
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Mul => Opcode::Mul,
            Self::Div => Opcode::Div,
            Self::Neg => Opcode::Neg,
            Self::Pow => Opcode::Pow,
            Self::FindTempo => Opcode::FindTempo,
            Self::FindMeasure => Opcode::FindMeasure,
            Self::Dup => Opcode::Dup,
            Self::Swap => Opcode::Swap,
        }
    }

    /// Appends the encoded instruction to `buf`.
    ///
    /// Operands are written big-endian regardless of host byte order.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode() as u8);
        match self {
            Self::Const { numer, denom } => {
                buf.extend_from_slice(&numer.to_be_bytes());
                buf.extend_from_slice(&denom.to_be_bytes());
            }
            Self::BigConst(fraction) => {
                let negative = fraction.numer().sign() == Sign::Minus;
                buf.push(negative as u8);
                encode_magnitude(fraction.numer().magnitude(), buf);
                encode_magnitude(fraction.denom().magnitude(), buf);
            }
            Self::Ref { note, var } => {
                buf.extend_from_slice(&note.to_be_bytes());
                buf.push(var.index() as u8);
            }
            Self::Base { var } => buf.push(var.index() as u8),
            _ => (),
        }
    }
}

fn encode_magnitude(magnitude: &BigUint, buf: &mut Vec<u8>) {
    let bytes = magnitude.to_bytes_be();
    // Compiled literals are capped well below the u16 length domain.
    let len = u16::try_from(bytes.len()).expect("constant magnitude exceeds the wire format");
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes);
}

/// Fallible decoder over an encoded instruction stream.
///
/// Yields one [`Instruction`] per opcode; a malformed byte ends iteration
/// with the describing [`Fault`].
pub struct Instructions<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Instructions<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], Fault> {
        let end = self.offset.checked_add(count).ok_or(Fault::TruncatedOperand)?;
        if end > self.bytes.len() {
            return Err(Fault::TruncatedOperand);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, Fault> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, Fault> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_i32(&mut self) -> Result<i32, Fault> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_variable(&mut self) -> Result<Variable, Fault> {
        let index = self.take_u8()?;
        Variable::from_index(index).ok_or(Fault::InvalidVariable(index))
    }

    fn take_magnitude(&mut self) -> Result<BigUint, Fault> {
        let len = self.take_u16()? as usize;
        Ok(BigUint::from_bytes_be(self.take(len)?))
    }

    fn decode(&mut self) -> Result<Instruction, Fault> {
        let op = Opcode::try_from(self.take_u8()?)?;
        let instruction = match op {
            Opcode::LoadConst => Instruction::Const {
                numer: self.take_i32()?,
                denom: self.take_i32()?,
            },
            Opcode::LoadConstBig => {
                let negative = self.take_u8()? != 0;
                let numer = self.take_magnitude()?;
                let denom = self.take_magnitude()?;
                let sign = if numer.is_zero() {
                    Sign::NoSign
                } else if negative {
                    Sign::Minus
                } else {
                    Sign::Plus
                };
                let fraction = Fraction::from_big(
                    BigInt::from_biguint(sign, numer),
                    BigInt::from_biguint(Sign::Plus, denom),
                )?;
                Instruction::BigConst(fraction)
            }
            Opcode::LoadRef => Instruction::Ref {
                note: self.take_u16()?,
                var: self.take_variable()?,
            },
            Opcode::LoadBase => Instruction::Base {
                var: self.take_variable()?,
            },
            Opcode::Add => Instruction::Add,
            Opcode::Sub => Instruction::Sub,
            Opcode::Mul => Instruction::Mul,
            Opcode::Div => Instruction::Div,
            Opcode::Neg => Instruction::Neg,
            Opcode::Pow => Instruction::Pow,
            Opcode::FindTempo => Instruction::FindTempo,
            Opcode::FindMeasure => Instruction::FindMeasure,
            Opcode::Dup => Instruction::Dup,
            Opcode::Swap => Instruction::Swap,
        };
        Ok(instruction)
    }
}

impl Iterator for Instructions<'_> {
    type Item = Result<Instruction, Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let result = self.decode();
        if result.is_err() {
            // Fuse after the first malformed instruction.
            self.offset = self.bytes.len();
        }
        Some(result)
    }
}

/// A compiled expression: instruction stream plus reference metadata.
///
/// Immutable after compile. The source text is kept for round-trip display
/// and persistence; expressions loaded from decompiled output carry `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    bytecode: Vec<u8>,
    source: Option<String>,
    references: BTreeSet<NoteId>,
    references_base: bool,
}

impl BinaryExpression {
    /// Builds an expression from raw parts.
    ///
    /// Callers normally obtain expressions from the compiler, which keeps
    /// the reference metadata in lockstep with the emitted stream; this
    /// constructor exists for hand-assembled programs.
    pub fn new(
        bytecode: Vec<u8>,
        source: Option<String>,
        references: BTreeSet<NoteId>,
        references_base: bool,
    ) -> Self {
        Self {
            bytecode,
            source,
            references,
            references_base,
        }
    }

    /// The encoded instruction stream, used length only.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Used length of the stream, in bytes.
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    /// Original source text, when known.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Ids of the notes this expression reads.
    ///
    /// Base-note reads are tracked by [`Self::references_base`] instead of
    /// an explicit id, so the base note's own expressions never carry a
    /// self-edge.
    pub fn references(&self) -> &BTreeSet<NoteId> {
        &self.references
    }

    /// Whether the expression reads any base-note variable.
    pub fn references_base(&self) -> bool {
        self.references_base
    }

    /// Decoding iterator over the instruction stream.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions::new(&self.bytecode)
    }

    /// Whether any power instruction occurs in the stream.
    ///
    /// The stream has no control flow, so this is exactly "a power will
    /// execute" and drives the corruption over-approximation.
    pub fn uses_pow(&self) -> bool {
        self.instructions()
            .any(|instruction| matches!(instruction, Ok(Instruction::Pow)))
    }
}
