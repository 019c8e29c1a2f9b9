//! Recursive-descent parser for the modern DSL.
//!
//! ```text
//! expr     := sum
//! sum      := product (('+' | '-') product)*
//! product  := power   (('*' | '/') power)*
//! power    := unary   ('^' unary)?
//! unary    := '-' unary | atom
//! atom     := number
//!           | '(' expr ')'
//!           | '(' int '/' int ')'            ratio literal, one constant
//!           | 'base' '.' prop
//!           | '[' int ']' '.' prop
//!           | ('tempo' | 'measure' | 'beat') '(' ('base' | '[' int ']') ')'
//! ```

use super::lexer::{Cursor, Token};
use super::{lookup_variable, parse_number, BinOp, Expr, RefTarget};
use crate::bytecode::NoteId;
use crate::error::ExpressionError;
use crate::value::Variable;

pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let mut cursor = Cursor::new(source)?;
    let expr = sum(&mut cursor)?;
    cursor.expect_end()?;
    Ok(expr)
}

fn sum(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    let mut lhs = product(cursor)?;
    loop {
        let op = match cursor.peek() {
            Some(Token::Plus) => BinOp::Add,
            Some(Token::Minus) => BinOp::Sub,
            _ => return Ok(lhs),
        };
        cursor.advance(1);
        let rhs = product(cursor)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }
}

fn product(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    let mut lhs = power(cursor)?;
    loop {
        let op = match cursor.peek() {
            Some(Token::Star) => BinOp::Mul,
            Some(Token::Slash) => BinOp::Div,
            _ => return Ok(lhs),
        };
        cursor.advance(1);
        let rhs = power(cursor)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }
}

fn power(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    let base = unary(cursor)?;
    if cursor.peek() == Some(&Token::Caret) {
        cursor.advance(1);
        let exponent = unary(cursor)?;
        return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
    }
    Ok(base)
}

fn unary(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    if cursor.peek() == Some(&Token::Minus) {
        cursor.advance(1);
        let inner = unary(cursor)?;
        return Ok(Expr::Neg(Box::new(inner)));
    }
    atom(cursor)
}

fn atom(cursor: &mut Cursor) -> Result<Expr, ExpressionError> {
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Number(raw)) => Ok(Expr::Literal(parse_number(&raw, offset)?)),
        Some(Token::LParen) => {
            if let Some(literal) = ratio_literal(cursor)? {
                return Ok(literal);
            }
            let inner = sum(cursor)?;
            cursor.expect(&Token::RParen)?;
            Ok(inner)
        }
        Some(Token::LBracket) => {
            let note = note_id(cursor)?;
            cursor.expect(&Token::RBracket)?;
            cursor.expect(&Token::Dot)?;
            let var = property(cursor)?;
            Ok(Expr::Ref(note, var))
        }
        Some(Token::Ident(name)) => match name.as_str() {
            "base" => {
                cursor.expect(&Token::Dot)?;
                let var = property(cursor)?;
                Ok(Expr::Base(var))
            }
            "tempo" | "measure" | "beat" => {
                cursor.expect(&Token::LParen)?;
                let target = ref_target(cursor)?;
                cursor.expect(&Token::RParen)?;
                Ok(match name.as_str() {
                    // `tempo`/`measure` on a concrete target are plain
                    // variable reads; only `beat` needs the inherited walk.
                    "tempo" => target_read(target, Variable::Tempo),
                    "measure" => target_read(target, Variable::MeasureLength),
                    _ => Expr::Beat(target),
                })
            }
            _ => Err(ExpressionError::parse(
                offset,
                format!("unknown name `{name}`"),
            )),
        },
        Some(token) => Err(ExpressionError::parse(
            offset,
            format!("expected expression, found {token}"),
        )),
        None => Err(ExpressionError::parse(
            offset,
            "expected expression, found end of input",
        )),
    }
}

/// Folds `(int / int)` into a single constant so a ratio written as a
/// grouping compiles identically to a fraction literal. The opening paren
/// has already been consumed.
fn ratio_literal(cursor: &mut Cursor) -> Result<Option<Expr>, ExpressionError> {
    let mut lookahead = 0;
    let negative = if cursor.peek_at(lookahead) == Some(&Token::Minus) {
        lookahead += 1;
        true
    } else {
        false
    };

    let numer = match cursor.peek_at(lookahead) {
        Some(Token::Number(raw)) if !raw.contains('.') => raw.clone(),
        _ => return Ok(None),
    };
    if cursor.peek_at(lookahead + 1) != Some(&Token::Slash) {
        return Ok(None);
    }
    let denom = match cursor.peek_at(lookahead + 2) {
        Some(Token::Number(raw)) if !raw.contains('.') => raw.clone(),
        _ => return Ok(None),
    };
    if cursor.peek_at(lookahead + 3) != Some(&Token::RParen) {
        return Ok(None);
    }

    let offset = cursor.offset();
    cursor.advance(lookahead + 4);

    let numer = parse_number(&numer, offset)?;
    let denom = parse_number(&denom, offset)?;
    if denom.is_zero() {
        return Err(ExpressionError::parse(offset, "ratio denominator is zero"));
    }
    let ratio = numer.div(&denom);
    Ok(Some(Expr::Literal(if negative { ratio.neg() } else { ratio })))
}

fn target_read(target: RefTarget, var: Variable) -> Expr {
    match target {
        RefTarget::Base => Expr::Base(var),
        RefTarget::Note(note) => Expr::Ref(note, var),
    }
}

fn ref_target(cursor: &mut Cursor) -> Result<RefTarget, ExpressionError> {
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Ident(name)) if name == "base" => Ok(RefTarget::Base),
        Some(Token::LBracket) => {
            let note = note_id(cursor)?;
            cursor.expect(&Token::RBracket)?;
            Ok(RefTarget::Note(note))
        }
        _ => Err(ExpressionError::parse(
            offset,
            "expected `base` or `[id]` reference",
        )),
    }
}

pub(super) fn note_id(cursor: &mut Cursor) -> Result<NoteId, ExpressionError> {
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Number(raw)) if !raw.contains('.') => raw
            .parse::<NoteId>()
            .map_err(|_| ExpressionError::parse(offset, "note id out of range")),
        _ => Err(ExpressionError::parse(offset, "expected a note id")),
    }
}

fn property(cursor: &mut Cursor) -> Result<Variable, ExpressionError> {
    let offset = cursor.offset();
    match cursor.next().map(|spanned| spanned.token) {
        Some(Token::Ident(name)) => lookup_variable(&name)
            .ok_or(ExpressionError::UnknownVariable(name)),
        Some(token) => Err(ExpressionError::parse(
            offset,
            format!("expected a property name, found {token}"),
        )),
        None => Err(ExpressionError::parse(
            offset,
            "expected a property name, found end of input",
        )),
    }
}
