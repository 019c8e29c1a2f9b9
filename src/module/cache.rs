//! Evaluation cache.
//!
//! Maps note ids to their latest fully evaluated variables plus corruption
//! mask. Entries hold owned values only, never views into evaluator state,
//! so callers may hold the cache across batches. Iteration order is
//! ascending by id.

use std::collections::BTreeMap;

use crate::bytecode::NoteId;
use crate::consts::{BASE_NOTE, SECONDS_PER_MINUTE, VARIABLE_COUNT};
use crate::fraction::Fraction;
use crate::value::{Corruption, Value, Variable};

/// Evaluated variables of one note.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatedNote {
    values: [Option<Value>; VARIABLE_COUNT],
    corruption: Corruption,
}

impl EvaluatedNote {
    /// The evaluated value of `var`, when the note expresses it.
    pub fn get(&self, var: Variable) -> Option<&Value> {
        self.values[var.index()].as_ref()
    }

    pub(crate) fn set(&mut self, var: Variable, value: Value) {
        self.values[var.index()] = Some(value);
    }

    /// Corruption mask over the six variables.
    pub fn corruption(&self) -> Corruption {
        self.corruption
    }

    pub fn is_corrupted(&self, var: Variable) -> bool {
        self.corruption.contains(var.corruption_flag())
    }

    pub(crate) fn mark_corrupted(&mut self, var: Variable) {
        self.corruption.insert(var.corruption_flag());
    }
}

/// Read-only-between-batches map of evaluated notes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationCache {
    entries: BTreeMap<NoteId, EvaluatedNote>,
}

impl EvaluationCache {
    pub fn get(&self, id: NoteId) -> Option<&EvaluatedNote> {
        self.entries.get(&id)
    }

    /// The cached value of one variable, when present.
    pub fn value(&self, id: NoteId, var: Variable) -> Option<&Value> {
        self.entries.get(&id).and_then(|note| note.get(var))
    }

    /// The cached value of one variable, or its documented default.
    ///
    /// An unresolved reference never aborts an expression; it reads as the
    /// default and evaluation continues.
    pub(crate) fn value_or_default(&self, id: NoteId, var: Variable) -> Value {
        self.value(id, var)
            .cloned()
            .unwrap_or_else(|| Value::Rational(var.default_value()))
    }

    /// Inherited tempo: the note's own cached tempo, the base note's, or
    /// the tempo default, in that order.
    pub fn find_tempo(&self, id: NoteId) -> Value {
        self.value(id, Variable::Tempo)
            .or_else(|| self.value(BASE_NOTE, Variable::Tempo))
            .cloned()
            .unwrap_or_else(|| Value::Rational(Variable::Tempo.default_value()))
    }

    /// Inherited measure length.
    ///
    /// Prefers a cached `measureLength` on the note, then on the base
    /// note; with neither cached it derives
    /// `beatsPerMeasure * 60 / tempo` over the same inheritance walk.
    pub fn find_measure_length(&self, id: NoteId) -> Value {
        if let Some(value) = self
            .value(id, Variable::MeasureLength)
            .or_else(|| self.value(BASE_NOTE, Variable::MeasureLength))
        {
            return value.clone();
        }

        let beats = self
            .value(id, Variable::BeatsPerMeasure)
            .or_else(|| self.value(BASE_NOTE, Variable::BeatsPerMeasure))
            .cloned()
            .unwrap_or_else(|| Value::Rational(Variable::BeatsPerMeasure.default_value()));
        let tempo = self.find_tempo(id);

        beats
            .mul(&Value::Rational(Fraction::integer(SECONDS_PER_MINUTE)))
            .div(&tempo)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (NoteId, &EvaluatedNote)> {
        self.entries.iter().map(|(&id, note)| (id, note))
    }

    pub(crate) fn insert(&mut self, id: NoteId, note: EvaluatedNote) {
        self.entries.insert(id, note);
    }

    pub(crate) fn remove(&mut self, id: NoteId) {
        self.entries.remove(&id);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_walk_note_then_base_then_default() {
        let mut cache = EvaluationCache::default();
        assert_eq!(cache.find_tempo(7), Value::integer(60));

        let mut base = EvaluatedNote::default();
        base.set(Variable::Tempo, Value::integer(120));
        cache.insert(BASE_NOTE, base);
        assert_eq!(cache.find_tempo(7), Value::integer(120));

        let mut note = EvaluatedNote::default();
        note.set(Variable::Tempo, Value::integer(90));
        cache.insert(7, note);
        assert_eq!(cache.find_tempo(7), Value::integer(90));
    }

    #[test]
    fn measure_length_derives_from_the_walk() {
        let mut cache = EvaluationCache::default();
        // Defaults: 4 * 60 / 60.
        assert_eq!(cache.find_measure_length(3), Value::integer(4));

        let mut base = EvaluatedNote::default();
        base.set(Variable::Tempo, Value::integer(120));
        base.set(Variable::BeatsPerMeasure, Value::integer(3));
        cache.insert(BASE_NOTE, base);
        assert_eq!(
            cache.find_measure_length(3),
            Value::rational(3, 2).unwrap()
        );

        // An explicit cached measure length short-circuits the derivation.
        let mut base = EvaluatedNote::default();
        base.set(Variable::MeasureLength, Value::integer(5));
        cache.insert(BASE_NOTE, base);
        assert_eq!(cache.find_measure_length(3), Value::integer(5));
    }

    #[test]
    fn corruption_mask_is_per_variable() {
        let mut note = EvaluatedNote::default();
        note.mark_corrupted(Variable::Frequency);
        assert!(note.is_corrupted(Variable::Frequency));
        assert!(!note.is_corrupted(Variable::Duration));
        assert_eq!(note.corruption(), Corruption::FREQUENCY);
    }
}
