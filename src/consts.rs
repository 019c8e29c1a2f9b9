//! Engine parameters

use crate::bytecode::NoteId;

/* NOTE DOMAIN */

/// The distinguished base note present in every module.
pub const BASE_NOTE: NoteId = 0;

/// Number of expressible variables per note.
pub const VARIABLE_COUNT: usize = 6;

/* VARIABLE DEFAULTS */

/// Default `startTime`, in whole beats.
pub const DEFAULT_START_TIME: i64 = 0;

/// Default `duration`, in whole beats.
pub const DEFAULT_DURATION: i64 = 1;

/// Default `frequency`, in Hz.
pub const DEFAULT_FREQUENCY: i64 = 440;

/// Default `tempo`, in beats per minute.
pub const DEFAULT_TEMPO: i64 = 60;

/// Default `beatsPerMeasure`.
pub const DEFAULT_BEATS_PER_MEASURE: i64 = 4;

/// Default `measureLength`, in seconds.
pub const DEFAULT_MEASURE_LENGTH: i64 = 4;

/// Seconds per minute, the constant in the measure-length derivation
/// `beatsPerMeasure * 60 / tempo`.
pub const SECONDS_PER_MINUTE: i64 = 60;

/* EVALUATOR SIZING */

/// Initial operand stack capacity, in values.
pub const INITIAL_STACK_CAPACITY: usize = 32;

/// Hard bound on operand stack depth. Well-formed expressions stay far
/// below this; exceeding it is a recoverable evaluation fault.
pub const MAX_STACK_DEPTH: usize = 4096;

/* COMPILER LIMITS */

/// Largest denominator produced when rationalizing a decimal literal.
/// Inputs requiring finer resolution are silently rounded.
pub const MAX_DECIMAL_DENOMINATOR: i64 = 10_000;
