//! Parser for the legacy verbose expression form.
//!
//! The original surface chained value methods off module accessors:
//!
//! ```text
//! module.baseNote.getVariable('frequency').mul(new Fraction(3, 2))
//! module.getNoteById(7).getVariable('startTime')
//!     .add(module.getNoteById(7).getVariable('duration'))
//! new Fraction(60).div(module.findTempo(module.baseNote))
//! ```
//!
//! Stored documents still carry this form, so it must keep compiling to the
//! same bytecode as the modern DSL.

use super::lexer::{Cursor, Token};
use super::parser::note_id;
use super::{lookup_variable, parse_number, BinOp, Expr, RefTarget};
use crate::error::ExpressionError;

/// Textual cues that select the legacy grammar.
///
/// The surfaces are syntactically disjoint (method chains vs. operators),
/// so the presence of any legacy token deterministically picks this branch.
pub(crate) fn is_legacy(source: &str) -> bool {
    source.contains(".getVariable")
        || source.contains("new Fraction(")
        || source.contains("module.")
}

pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let mut cursor = Cursor::new(source)?;
    let expr = chain(&mut cursor)?;
    cursor.expect_end()?;
    Ok(expr)
}

/// A primary expression followed by any number of postfix method calls.
fn chain(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    let mut expr = primary(cursor)?;

    while cursor.peek() == Some(&Token::Dot) {
        cursor.advance(1);
        let offset = cursor.offset();
        let method = match cursor.next().map(|spanned| spanned.token) {
            Some(Token::Ident(name)) => name,
            _ => return Err(ExpressionError::parse(offset, "expected a method name")),
        };

        cursor.expect(&Token::LParen)?;
        expr = match method.as_str() {
            "neg" => Expr::Neg(Box::new(expr)),
            "add" | "sub" | "mul" | "div" | "pow" => {
                let argument = chain(cursor)?;
                let op = match method.as_str() {
                    "add" => BinOp::Add,
                    "sub" => BinOp::Sub,
                    "mul" => BinOp::Mul,
                    "div" => BinOp::Div,
                    _ => BinOp::Pow,
                };
                Expr::Binary(op, Box::new(expr), Box::new(argument))
            }
            other => {
                return Err(ExpressionError::parse(
                    offset,
                    format!("unknown method `{other}`"),
                ));
            }
        };
        cursor.expect(&Token::RParen)?;
    }

    Ok(expr)
}

fn primary(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Ident(name)) if name == "new" => fraction_literal(cursor),
        Some(Token::Ident(name)) if name == "module" => module_accessor(cursor),
        Some(Token::LParen) => {
            let inner = chain(cursor)?;
            cursor.expect(&Token::RParen)?;
            Ok(inner)
        }
        Some(Token::Minus) => {
            let inner = primary(cursor)?;
            Ok(Expr::Neg(Box::new(inner)))
        }
        Some(Token::Number(raw)) => Ok(Expr::Literal(parse_number(&raw, offset)?)),
        _ => Err(ExpressionError::parse(
            offset,
            "expected `new Fraction(...)` or a `module.` accessor",
        )),
    }
}

/// `new Fraction(n)` or `new Fraction(n, d)`; parts may be signed decimals.
fn fraction_literal(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    cursor.expect_ident("Fraction")?;
    cursor.expect(&Token::LParen)?;
    let numer = signed_number(cursor)?;
    let value = if cursor.peek() == Some(&Token::Comma) {
        cursor.advance(1);
        let denom = signed_number(cursor)?;
        numer.div(&denom)
    } else {
        numer
    };
    cursor.expect(&Token::RParen)?;
    Ok(Expr::Literal(value))
}

fn signed_number(
    cursor: &mut Cursor,
) -> Result<crate::fraction::Fraction, ExpressionError> {
    let negative = if cursor.peek() == Some(&Token::Minus) {
        cursor.advance(1);
        true
    } else {
        false
    };
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Number(raw)) => {
            let value = parse_number(&raw, offset)?;
            Ok(if negative { value.neg() } else { value })
        }
        _ => Err(ExpressionError::parse(offset, "expected a number")),
    }
}

/// Accessors hanging off `module.`: variable reads and inherited lookups.
fn module_accessor(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    cursor.expect(&Token::Dot)?;
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Ident(name)) => match name.as_str() {
            "baseNote" => {
                cursor.expect(&Token::Dot)?;
                get_variable(cursor).map(Expr::Base)
            }
            "getNoteById" => {
                cursor.expect(&Token::LParen)?;
                let note = note_id(cursor)?;
                cursor.expect(&Token::RParen)?;
                cursor.expect(&Token::Dot)?;
                get_variable(cursor).map(|var| Expr::Ref(note, var))
            }
            "findTempo" => lookup_call(cursor).map(Expr::FindTempo),
            "findMeasureLength" => lookup_call(cursor).map(Expr::FindMeasure),
            other => Err(ExpressionError::parse(
                offset,
                format!("unknown module accessor `{other}`"),
            )),
        },
        _ => Err(ExpressionError::parse(offset, "expected a module accessor")),
    }
}

fn get_variable(cursor: &mut Cursor) -> Result<crate::value::Variable, ExpressionError> {
    cursor.expect_ident("getVariable")?;
    cursor.expect(&Token::LParen)?;
    let offset = cursor.offset();
    let name = match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Quoted(name)) => name,
        _ => {
            return Err(ExpressionError::parse(
                offset,
                "expected a quoted variable name",
            ));
        }
    };
    cursor.expect(&Token::RParen)?;
    lookup_variable(&name).ok_or(ExpressionError::UnknownVariable(name))
}

/// `(module.baseNote)` or `(module.getNoteById(n))` as a lookup argument.
fn lookup_call(cursor: &mut Cursor) -> Result<RefTarget, ExpressionError> {
    cursor.expect(&Token::LParen)?;
    cursor.expect_ident("module")?;
    cursor.expect(&Token::Dot)?;
    let offset = cursor.offset();
    let target = match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Ident(name)) if name == "baseNote" => RefTarget::Base,
        Some(Token::Ident(name)) if name == "getNoteById" => {
            cursor.expect(&Token::LParen)?;
            let note = note_id(cursor)?;
            cursor.expect(&Token::RParen)?;
            RefTarget::Note(note)
        }
        _ => {
            return Err(ExpressionError::parse(
                offset,
                "expected `module.baseNote` or `module.getNoteById(id)`",
            ));
        }
    };
    cursor.expect(&Token::RParen)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fraction::Fraction;
    use crate::value::Variable;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(n, d).unwrap()
    }

    #[test]
    fn detector_keys_on_legacy_tokens() {
        assert!(is_legacy("module.baseNote.getVariable('frequency')"));
        assert!(is_legacy("new Fraction(3, 2)"));
        assert!(!is_legacy("base.f * (3/2)"));
    }

    #[test]
    fn parses_variable_reads() {
        assert_eq!(
            parse("module.baseNote.getVariable('frequency')").unwrap(),
            Expr::Base(Variable::Frequency)
        );
        assert_eq!(
            parse("module.getNoteById(7).getVariable('startTime')").unwrap(),
            Expr::Ref(7, Variable::StartTime)
        );
    }

    #[test]
    fn parses_method_chains_left_to_right() {
        let expr = parse("new Fraction(1).add(new Fraction(2)).mul(new Fraction(3))").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Mul,
                Box::new(Expr::Binary(
                    BinOp::Add,
                    Box::new(Expr::Literal(frac(1, 1))),
                    Box::new(Expr::Literal(frac(2, 1))),
                )),
                Box::new(Expr::Literal(frac(3, 1))),
            )
        );
    }

    #[test]
    fn fraction_arguments_take_signs_and_decimals() {
        assert_eq!(
            parse("new Fraction(-3, 2)").unwrap(),
            Expr::Literal(frac(-3, 2))
        );
        assert_eq!(parse("new Fraction(0.5)").unwrap(), Expr::Literal(frac(1, 2)));
    }

    #[test]
    fn parses_inherited_lookups() {
        assert_eq!(
            parse("module.findTempo(module.baseNote)").unwrap(),
            Expr::FindTempo(RefTarget::Base)
        );
        assert_eq!(
            parse("module.findMeasureLength(module.getNoteById(3))").unwrap(),
            Expr::FindMeasure(RefTarget::Note(3))
        );
    }

    #[test]
    fn neg_takes_no_argument() {
        assert_eq!(
            parse("new Fraction(3).neg()").unwrap(),
            Expr::Neg(Box::new(Expr::Literal(frac(3, 1))))
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(
            parse("new Fraction(1).frobnicate(new Fraction(2))"),
            Err(ExpressionError::Parse { .. })
        ));
    }
}
