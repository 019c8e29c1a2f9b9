//! Stable JSON representation of a module.
//!
//! Expressions persist as source text, never bytecode: the stored source is
//! preferred, with a decompiled canonical form as the fallback when the
//! source has been lost. Omitted properties are absent keys, not empty
//! strings. Note id 0 is reserved for the base note object.

use serde::{Deserialize, Serialize};

use super::{BaseNoteConfig, Module, Note};
use crate::bytecode::{BinaryExpression, NoteId};
use crate::compiler::decompile;
use crate::consts::BASE_NOTE;
use crate::error::{ExpressionError, ModuleError, ModuleFileError};
use crate::value::Variable;

#[derive(Debug, Serialize, Deserialize)]
struct ModuleFile {
    #[serde(rename = "baseNote")]
    base_note: BaseNoteFile,
    notes: Vec<NoteFile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BaseNoteFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<String>,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tempo: Option<String>,
    #[serde(rename = "beatsPerMeasure", skip_serializing_if = "Option::is_none")]
    beats_per_measure: Option<String>,
    #[serde(rename = "measureLength", skip_serializing_if = "Option::is_none")]
    measure_length: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteFile {
    id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<String>,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instrument: Option<String>,
}

impl Module {
    /// Loads a module from its JSON representation.
    ///
    /// The base note is built first, then each note in array order, so
    /// notes may reference later entries and resolve once the whole
    /// document is in.
    pub fn from_json(text: &str) -> Result<Self, ModuleFileError> {
        let file: ModuleFile = serde_json::from_str(text)?;

        let defaults = BaseNoteConfig::default();
        let config = BaseNoteConfig {
            frequency: file.base_note.frequency.unwrap_or(defaults.frequency),
            start_time: file.base_note.start_time.unwrap_or(defaults.start_time),
            duration: defaults.duration,
            tempo: file.base_note.tempo.unwrap_or(defaults.tempo),
            beats_per_measure: file
                .base_note
                .beats_per_measure
                .unwrap_or(defaults.beats_per_measure),
            measure_length: file.base_note.measure_length,
        };
        let mut module = Module::new(config).map_err(|error| expression_error(BASE_NOTE, error))?;

        for entry in file.notes {
            if entry.id == u32::from(BASE_NOTE) {
                return Err(ModuleFileError::ReservedId);
            }
            let id = NoteId::try_from(entry.id)
                .map_err(|_| ModuleFileError::IdOutOfRange(entry.id))?;
            if module.notes.contains_key(&id) {
                return Err(ModuleFileError::DuplicateId(id));
            }

            let mut note = Note::new(id);
            let sources = [
                (Variable::Frequency, entry.frequency),
                (Variable::StartTime, entry.start_time),
                (Variable::Duration, entry.duration),
            ];
            for (var, source) in sources {
                let Some(source) = source else { continue };
                let compiled = module
                    .compiler
                    .compile(&source)
                    .map_err(|error| expression_error(id, error.into()))?;
                if compiled.references().contains(&id) {
                    return Err(ModuleFileError::Expression {
                        id,
                        source: ExpressionError::SelfReference(id),
                    });
                }
                note.expressions[var.index()] = Some(compiled);
            }
            note.color = entry.color;
            note.instrument = entry.instrument;

            module.insert_note(note);
            module.next_id = module.next_id.max(id.saturating_add(1));
        }

        Ok(module)
    }

    /// Serializes the module to its JSON representation.
    pub fn to_json(&self) -> Result<String, ModuleFileError> {
        let base = self.base_note();
        let file = ModuleFile {
            base_note: BaseNoteFile {
                frequency: source_of(base.expression(Variable::Frequency)),
                start_time: source_of(base.expression(Variable::StartTime)),
                tempo: source_of(base.expression(Variable::Tempo)),
                beats_per_measure: source_of(base.expression(Variable::BeatsPerMeasure)),
                measure_length: source_of(base.expression(Variable::MeasureLength)),
            },
            notes: self
                .notes_iter()
                .filter(|note| note.id() != BASE_NOTE)
                .map(|note| NoteFile {
                    id: u32::from(note.id()),
                    frequency: source_of(note.expression(Variable::Frequency)),
                    start_time: source_of(note.expression(Variable::StartTime)),
                    duration: source_of(note.expression(Variable::Duration)),
                    color: note.color().map(str::to_string),
                    instrument: note.instrument().map(str::to_string),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

fn expression_error(id: NoteId, error: ModuleError) -> ModuleFileError {
    match error {
        ModuleError::Expression(source) => ModuleFileError::Expression { id, source },
        // Module construction surfaces compile errors only.
        other => ModuleFileError::Expression {
            id,
            source: ExpressionError::Parse {
                offset: 0,
                message: other.to_string(),
            },
        },
    }
}

/// Stored source text, or the decompiled canonical form when lost.
fn source_of(expression: Option<&BinaryExpression>) -> Option<String> {
    let expression = expression?;
    if let Some(source) = expression.source() {
        return Some(source.to_string());
    }
    match decompile(expression.bytecode()) {
        Ok(rendered) => Some(rendered),
        Err(fault) => {
            tracing::warn!(%fault, "undecompilable expression skipped on save");
            None
        }
    }
}
