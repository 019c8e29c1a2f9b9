//! Opcode set of the expression stack machine.

use crate::error::Fault;

use std::convert::TryFrom;

/// One-byte opcode of the expression stack machine.
///
/// Multi-byte operands follow the opcode in big-endian byte order; the
/// encoding is independent of host endianness. Binary operators pop the
/// right operand first, so `a b SUB` computes `a - b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum Opcode {
    /// Pushes the rational `numer / denom`.
    ///
    /// | Operation   | push `Rational(numer / denom)`    |
    /// | Encoding    | `0x01 numer:i32 denom:i32`        |
    ///
    /// A zero denominator is a recoverable evaluation fault.
    LoadConst = 0x01,

    /// Pushes a rational whose parts exceed the `i32` range.
    ///
    /// | Operation   | push `Rational(±numer / denom)`                          |
    /// | Encoding    | `0x02 sign:u8 len:u16 numer[len] dlen:u16 denom[dlen]`   |
    ///
    /// Magnitudes are unsigned big-endian; `sign` is `0x01` for negative.
    LoadConstBig = 0x02,

    /// Pushes a variable of a referenced note from the evaluation cache.
    ///
    /// | Operation   | push `cache[note].var(index)`     |
    /// | Encoding    | `0x03 note:u16 index:u8`          |
    ///
    /// A missing cache entry substitutes the variable's default.
    LoadRef = 0x03,

    /// Pushes a variable of the base note from the evaluation cache.
    ///
    /// | Operation   | push `cache[0].var(index)`        |
    /// | Encoding    | `0x04 index:u8`                   |
    LoadBase = 0x04,

    /// Adds the two topmost values.
    ///
    /// | Operation   | `a b -> a + b`                    |
    /// | Encoding    | `0x10`                            |
    Add = 0x10,

    /// Subtracts the top value from the one beneath it.
    ///
    /// | Operation   | `a b -> a - b`                    |
    /// | Encoding    | `0x11`                            |
    Sub = 0x11,

    /// Multiplies the two topmost values.
    ///
    /// | Operation   | `a b -> a * b`                    |
    /// | Encoding    | `0x12`                            |
    Mul = 0x12,

    /// Divides the value beneath the top by the top value.
    ///
    /// | Operation   | `a b -> a / b`                    |
    /// | Encoding    | `0x13`                            |
    ///
    /// Division by zero yields 1 unless strict division is enabled.
    Div = 0x13,

    /// Negates the top value.
    ///
    /// | Operation   | `a -> -a`                         |
    /// | Encoding    | `0x14`                            |
    Neg = 0x14,

    /// Raises the value beneath the top to the top value.
    ///
    /// | Operation   | `a b -> a ^ b`                    |
    /// | Encoding    | `0x15`                            |
    ///
    /// Stays rational when the rational-power test succeeds; otherwise the
    /// result demotes to an irrational and the target property is marked
    /// corrupted.
    Pow = 0x15,

    /// Resolves the inherited tempo of the note whose id is on the stack.
    ///
    /// | Operation   | `noteRef -> tempo`                |
    /// | Encoding    | `0x20`                            |
    ///
    /// Walks note, then base note, then the tempo default.
    FindTempo = 0x20,

    /// Resolves the inherited measure length of the note whose id is on
    /// the stack.
    ///
    /// | Operation   | `noteRef -> measureLength`        |
    /// | Encoding    | `0x21`                            |
    ///
    /// Uses the nearest cached value, deriving
    /// `beatsPerMeasure * 60 / tempo` when none is cached.
    FindMeasure = 0x21,

    /// Duplicates the top value.
    ///
    /// | Operation   | `a -> a a`                        |
    /// | Encoding    | `0x30`                            |
    Dup = 0x30,

    /// Swaps the two topmost values.
    ///
    /// | Operation   | `a b -> b a`                      |
    /// | Encoding    | `0x31`                            |
    Swap = 0x31,
}

impl TryFrom<u8> for Opcode {
    type Error = Fault;

    fn try_from(byte: u8) -> Result<Self, Fault> {
        match byte {
            0x01 => Ok(Self::LoadConst),
            0x02 => Ok(Self::LoadConstBig),
            0x03 => Ok(Self::LoadRef),
            0x04 => Ok(Self::LoadBase),
            0x10 => Ok(Self::Add),
            0x11 => Ok(Self::Sub),
            0x12 => Ok(Self::Mul),
            0x13 => Ok(Self::Div),
            0x14 => Ok(Self::Neg),
            0x15 => Ok(Self::Pow),
            0x20 => Ok(Self::FindTempo),
            0x21 => Ok(Self::FindMeasure),
            0x30 => Ok(Self::Dup),
            0x31 => Ok(Self::Swap),
            _ => Err(Fault::InvalidOpcode(byte)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use strum::IntoEnumIterator;

    #[test]
    fn byte_round_trip_is_exhaustive() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        for byte in [0x00u8, 0x05, 0x16, 0x22, 0x32, 0xff] {
            assert_eq!(Opcode::try_from(byte), Err(Fault::InvalidOpcode(byte)));
        }
    }
}
