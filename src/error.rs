//! Error taxonomy for the expression core.
//!
//! The compile path fails eagerly: [`ExpressionError`] is returned from
//! `Module::set_expression` and friends and the module is left untouched.
//! The evaluate path never fails: an [`Fault`] is recorded, the target
//! variable's default is substituted, and the batch continues.

use crate::bytecode::NoteId;
use crate::fraction::ZeroDenominator;

use thiserror::Error;

/// User-input errors surfaced from the compile path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The source text does not parse under either grammar.
    #[error("parse error at byte {offset}: {message}")]
    Parse {
        /// Byte offset of the offending token in the source.
        offset: usize,
        /// Human-readable description.
        message: String,
    },
    /// An empty (or all-whitespace) source was supplied.
    #[error("expression source is empty")]
    EmptySource,
    /// A variable name outside the known property set.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    /// The expression references the note it is being assigned to.
    #[error("note {0} may not reference itself")]
    SelfReference(NoteId),
    /// Accepting the expression would close a dependency cycle.
    #[error("assigning note {note} would close a cycle through note {through}")]
    Cycle {
        /// The note being written.
        note: NoteId,
        /// The referenced note that already depends on `note`.
        through: NoteId,
    },
}

impl ExpressionError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

/// Module-level operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// Compilation or validation of an expression failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// The referenced note does not exist in the module.
    #[error("no note with id {0}")]
    UnknownNote(NoteId),
    /// The base note exists for the module's entire lifetime.
    #[error("the base note cannot be removed")]
    BaseNoteRemoval,
    /// The 16-bit note id domain is exhausted.
    #[error("note id space is exhausted")]
    NoteIdsExhausted,
}

/// Recoverable evaluation faults.
///
/// Never surfaced across the module boundary: the evaluator substitutes the
/// target variable's default and emits a warning instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// An operation popped from an empty operand stack.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// The operand stack grew past its hard bound.
    #[error("operand stack exceeded {0} values")]
    StackOverflow(usize),
    /// The byte does not map to any opcode.
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    /// The operand byte does not map to any variable.
    #[error("invalid variable index {0}")]
    InvalidVariable(u8),
    /// The bytecode stream ended inside an operand.
    #[error("bytecode ended inside an operand")]
    TruncatedOperand,
    /// A constant operand carried a zero denominator.
    #[error(transparent)]
    ZeroDenominator(#[from] ZeroDenominator),
    /// Division by zero under strict mode.
    #[error("division by zero")]
    DivisionByZero,
    /// Execution finished with other than one value on the stack.
    #[error("expression left {0} values on the stack")]
    UnbalancedStack(usize),
}

/// Errors loading a module from its JSON representation.
#[derive(Debug, Error)]
pub enum ModuleFileError {
    /// The document is not well-formed module JSON.
    #[error("malformed module JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// An embedded expression source failed to compile.
    #[error("note {id}: {source}")]
    Expression {
        /// Note the bad source belongs to (0 for the base note).
        id: NoteId,
        /// Underlying compile error.
        source: ExpressionError,
    },
    /// Note id 0 is reserved for the base note.
    #[error("note id 0 is reserved for the base note")]
    ReservedId,
    /// The same note id appears twice in the notes array.
    #[error("duplicate note id {0}")]
    DuplicateId(NoteId),
    /// A note id outside the 16-bit note domain.
    #[error("note id {0} is out of range")]
    IdOutOfRange(u32),
}
