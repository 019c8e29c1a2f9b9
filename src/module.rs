//! Module façade.
//!
//! A [`Module`] owns the notes, the dependency graph, the compiler cache,
//! the evaluator, and the evaluation cache, and keeps them in lockstep:
//! every accepted expression edit atomically re-registers its edges and
//! marks the affected notes dirty, and [`Module::evaluate`] re-evaluates
//! exactly the dirty set in deterministic topological order.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;

use crate::bytecode::{BinaryExpression, NoteId};
use crate::compiler::{literal_source, Compiler};
use crate::consts::{BASE_NOTE, VARIABLE_COUNT};
use crate::error::{ExpressionError, ModuleError};
use crate::fraction::Fraction;
use crate::graph::DependencyGraph;
use crate::interpreter::Interpreter;
use crate::value::{Value, Variable};

mod cache;
mod json;
mod scheduler;

pub use cache::{EvaluatedNote, EvaluationCache};

use scheduler::Scheduler;

/// Evaluation order within one note: timing-independent variables first,
/// then measure length, then the timing pair.
const EVALUATION_ORDER: [Variable; VARIABLE_COUNT] = [
    Variable::Tempo,
    Variable::BeatsPerMeasure,
    Variable::Frequency,
    Variable::MeasureLength,
    Variable::StartTime,
    Variable::Duration,
];

/// A note: six optional expression slots plus opaque display attributes.
#[derive(Debug, Clone)]
pub struct Note {
    id: NoteId,
    expressions: [Option<BinaryExpression>; VARIABLE_COUNT],
    color: Option<String>,
    instrument: Option<String>,
}

impl Note {
    fn new(id: NoteId) -> Self {
        Self {
            id,
            expressions: Default::default(),
            color: None,
            instrument: None,
        }
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn expression(&self, var: Variable) -> Option<&BinaryExpression> {
        self.expressions[var.index()].as_ref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    /// A note carrying a start time but neither duration nor frequency
    /// marks a bar line rather than a sounding note.
    pub fn is_measure_marker(&self) -> bool {
        self.expression(Variable::StartTime).is_some()
            && self.expression(Variable::Duration).is_none()
            && self.expression(Variable::Frequency).is_none()
    }

    /// Union of reference metadata over all six expression slots.
    fn combined_references(&self) -> (BTreeSet<NoteId>, bool) {
        let mut references = BTreeSet::new();
        let mut references_base = false;
        for expression in self.expressions.iter().flatten() {
            references.extend(expression.references().iter().copied());
            references_base |= expression.references_base();
        }
        (references, references_base)
    }
}

/// Source overrides for the base note created with every module.
#[derive(Debug, Clone)]
pub struct BaseNoteConfig {
    pub frequency: String,
    pub start_time: String,
    pub duration: String,
    pub tempo: String,
    pub beats_per_measure: String,
    /// Usually absent; the measure length then derives from
    /// `beatsPerMeasure * 60 / tempo`.
    pub measure_length: Option<String>,
}

impl Default for BaseNoteConfig {
    fn default() -> Self {
        Self {
            frequency: "440".into(),
            start_time: "0".into(),
            duration: "1".into(),
            tempo: "60".into(),
            beats_per_measure: "4".into(),
            measure_length: None,
        }
    }
}

impl BaseNoteConfig {
    fn sources(&self) -> Vec<(Variable, &str)> {
        let mut sources = vec![
            (Variable::Frequency, self.frequency.as_str()),
            (Variable::StartTime, self.start_time.as_str()),
            (Variable::Duration, self.duration.as_str()),
            (Variable::Tempo, self.tempo.as_str()),
            (Variable::BeatsPerMeasure, self.beats_per_measure.as_str()),
        ];
        if let Some(measure_length) = &self.measure_length {
            sources.push((Variable::MeasureLength, measure_length.as_str()));
        }
        sources
    }
}

/// Owner of the note graph and its incremental evaluation state.
#[derive(Debug)]
pub struct Module {
    notes: HashMap<NoteId, Note>,
    next_id: NoteId,
    graph: DependencyGraph,
    compiler: Compiler,
    interpreter: Interpreter,
    scheduler: Scheduler,
    cache: EvaluationCache,
}

impl Default for Module {
    fn default() -> Self {
        Self::new(BaseNoteConfig::default()).expect("default base note sources compile")
    }
}

impl Module {
    /// Creates a module whose base note carries the configured sources.
    pub fn new(config: BaseNoteConfig) -> Result<Self, ModuleError> {
        let mut module = Self {
            notes: HashMap::new(),
            next_id: 1,
            graph: DependencyGraph::new(),
            compiler: Compiler::new(),
            interpreter: Interpreter::new(),
            scheduler: Scheduler::default(),
            cache: EvaluationCache::default(),
        };

        let mut base = Note::new(BASE_NOTE);
        for (var, source) in config.sources() {
            let compiled = module.compiler.compile(source)?;
            if compiled.references_base() || compiled.references().contains(&BASE_NOTE) {
                return Err(ExpressionError::SelfReference(BASE_NOTE).into());
            }
            base.expressions[var.index()] = Some(compiled);
        }
        module.insert_note(base);
        Ok(module)
    }

    /// Adds a note from its expression sources and returns its id.
    ///
    /// All sources compile before anything is inserted; on error the
    /// module is unchanged.
    pub fn add_note<'a>(
        &mut self,
        expressions: impl IntoIterator<Item = (Variable, &'a str)>,
    ) -> Result<NoteId, ModuleError> {
        let id = self.next_id;
        let next = id.checked_add(1).ok_or(ModuleError::NoteIdsExhausted)?;

        let mut note = Note::new(id);
        for (var, source) in expressions {
            let compiled = self.compiler.compile(source)?;
            if compiled.references().contains(&id) {
                return Err(ExpressionError::SelfReference(id).into());
            }
            note.expressions[var.index()] = Some(compiled);
        }

        self.insert_note(note);
        self.next_id = next;
        Ok(id)
    }

    /// Removes a note. Dependents keep their now-stale references and are
    /// marked dirty so they re-evaluate against defaults.
    pub fn remove_note(&mut self, id: NoteId) -> Result<(), ModuleError> {
        if id == BASE_NOTE {
            return Err(ModuleError::BaseNoteRemoval);
        }
        if self.notes.remove(&id).is_none() {
            return Err(ModuleError::UnknownNote(id));
        }

        let dependents: Vec<NoteId> = self.graph.dependents(id).collect();
        for dependent in dependents {
            self.scheduler.invalidate(dependent, &self.graph);
        }

        self.graph.remove_note(id);
        self.cache.remove(id);
        self.scheduler.discard(id);
        Ok(())
    }

    /// Compiles and validates `source`, then atomically swaps it into the
    /// note's slot for `var`.
    ///
    /// Rejected edits (parse errors, self-references, cycles) leave the
    /// module untouched.
    pub fn set_expression(
        &mut self,
        id: NoteId,
        var: Variable,
        source: &str,
    ) -> Result<(), ModuleError> {
        if !self.notes.contains_key(&id) {
            return Err(ModuleError::UnknownNote(id));
        }

        let compiled = self.compiler.compile(source)?;
        self.validate_assignment(id, &compiled)?;

        let note = self.notes.get_mut(&id).expect("existence checked above");
        note.expressions[var.index()] = Some(compiled);
        self.register_edges(id);
        self.scheduler.invalidate(id, &self.graph);
        Ok(())
    }

    /// Applies several expression edits with one edge update and one dirty
    /// propagation pass. Validation is all-or-nothing: any rejected edit
    /// leaves the module untouched.
    pub fn batch_set_expressions(
        &mut self,
        edits: &[(NoteId, Variable, &str)],
    ) -> Result<(), ModuleError> {
        // Stage per-note expression arrays against a tentative graph.
        let mut staged: HashMap<NoteId, [Option<BinaryExpression>; VARIABLE_COUNT]> =
            HashMap::new();
        for &(id, var, source) in edits {
            if !self.notes.contains_key(&id) {
                return Err(ModuleError::UnknownNote(id));
            }
            let compiled = self.compiler.compile(source)?;
            if compiled.references().contains(&id)
                || (id == BASE_NOTE && compiled.references_base())
            {
                return Err(ExpressionError::SelfReference(id).into());
            }
            let slots = staged
                .entry(id)
                .or_insert_with(|| self.notes[&id].expressions.clone());
            slots[var.index()] = Some(compiled);
        }

        let mut tentative = self.graph.clone();
        for (&id, slots) in &staged {
            let (references, references_base) = combined_of(slots);
            tentative.add_note(id, references, references_base);
        }
        if let Some(cycle) = tentative.detect_cycles().into_iter().next() {
            let note = cycle[0];
            let through = cycle.get(1).copied().unwrap_or(note);
            return Err(ExpressionError::Cycle { note, through }.into());
        }

        let ids: Vec<NoteId> = staged.keys().copied().sorted().collect();
        for (id, slots) in staged {
            self.notes
                .get_mut(&id)
                .expect("existence checked above")
                .expressions = slots;
        }
        self.graph = tentative;
        for id in ids {
            self.scheduler.invalidate(id, &self.graph);
        }
        Ok(())
    }

    /// Marks a note and its transitive dependents for re-evaluation.
    pub fn mark_dirty(&mut self, id: NoteId) {
        self.scheduler.invalidate(id, &self.graph);
    }

    pub fn mark_dirty_batch(&mut self, ids: impl IntoIterator<Item = NoteId>) {
        for id in ids {
            self.scheduler.invalidate(id, &self.graph);
        }
    }

    /// Clears the cache and marks every note dirty.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
        self.scheduler.mark_all(self.notes.keys().copied());
    }

    /// Runs the incremental evaluator over the dirty set and returns the
    /// cache view. With nothing dirty this does zero work.
    pub fn evaluate(&mut self) -> &EvaluationCache {
        if self.scheduler.is_empty() {
            return &self.cache;
        }

        let order = self.scheduler.take_order(&self.graph);
        tracing::debug!(batch = order.len(), "evaluating dirty notes");

        for id in order {
            let Some(note) = self.notes.get(&id) else {
                continue;
            };

            let mut evaluated = EvaluatedNote::default();
            for var in EVALUATION_ORDER {
                if let Some(expression) = note.expression(var) {
                    let value = self.interpreter.evaluate(expression, var, &self.cache);
                    if expression.uses_pow() || value.is_irrational() {
                        evaluated.mark_corrupted(var);
                    }
                    evaluated.set(var, value);
                }
            }

            if evaluated.get(Variable::MeasureLength).is_none()
                && (id == BASE_NOTE || note.is_measure_marker())
            {
                let derived = derive_measure_length(&evaluated, &self.cache);
                if derived.is_irrational() {
                    evaluated.mark_corrupted(Variable::MeasureLength);
                }
                evaluated.set(Variable::MeasureLength, derived);
            }

            self.cache.insert(id, evaluated);
        }

        debug_assert!(
            self.check_consistency().is_empty(),
            "graph diverged from expression reference sets",
        );
        &self.cache
    }

    pub fn get_note_by_id(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub fn base_note(&self) -> &Note {
        self.notes
            .get(&BASE_NOTE)
            .expect("the base note exists for the module lifetime")
    }

    /// Notes in ascending id order.
    pub fn notes_iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values().sorted_by_key(|note| note.id)
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn set_color(&mut self, id: NoteId, color: Option<String>) -> Result<(), ModuleError> {
        let note = self.notes.get_mut(&id).ok_or(ModuleError::UnknownNote(id))?;
        note.color = color;
        Ok(())
    }

    pub fn set_instrument(
        &mut self,
        id: NoteId,
        instrument: Option<String>,
    ) -> Result<(), ModuleError> {
        let note = self.notes.get_mut(&id).ok_or(ModuleError::UnknownNote(id))?;
        note.instrument = instrument;
        Ok(())
    }

    /// Makes division by zero an evaluation fault instead of the
    /// compatibility value 1.
    pub fn set_strict_division(&mut self, strict: bool) {
        self.interpreter.set_strict_division(strict);
    }

    pub fn strict_division(&self) -> bool {
        self.interpreter.strict_division()
    }

    /// Inherited tempo of `id` against the current cache.
    pub fn find_tempo(&self, id: NoteId) -> Value {
        self.cache.find_tempo(id)
    }

    /// Inherited measure length of `id` against the current cache.
    pub fn find_measure_length(&self, id: NoteId) -> Value {
        self.cache.find_measure_length(id)
    }

    /// Adds `count` measure-marker notes. The first starts at `start`;
    /// each subsequent marker starts one base-note measure after its
    /// predecessor.
    pub fn generate_measure_markers(
        &mut self,
        start: Fraction,
        count: usize,
    ) -> Result<Vec<NoteId>, ModuleError> {
        let mut ids = Vec::with_capacity(count);
        let mut previous: Option<NoteId> = None;

        for _ in 0..count {
            let source = match previous {
                None => literal_source(&start),
                Some(marker) => format!("[{marker}].t + base.ml"),
            };
            let id = self.add_note([(Variable::StartTime, source.as_str())])?;
            previous = Some(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Audits the lockstep invariant: the graph's edges for every note
    /// must equal the union of its expressions' reference sets. Returns
    /// the violations.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for note in self.notes_iter() {
            let (references, references_base) = note.combined_references();
            let edges: BTreeSet<NoteId> = self.graph.dependencies(note.id).collect();
            if edges != references {
                violations.push(format!(
                    "note {}: graph edges {edges:?} != references {references:?}",
                    note.id
                ));
            }
            if self.graph.references_base(note.id) != references_base {
                violations.push(format!("note {}: base-dependency flag diverged", note.id));
            }
        }
        violations
    }

    /// Audits reference closure: every referenced id must name a live
    /// note. Violations are expected transiently after `remove_note`
    /// until the caller rewrites the dependents.
    pub fn check_reference_closure(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for note in self.notes_iter() {
            let (references, _) = note.combined_references();
            for reference in references {
                if !self.notes.contains_key(&reference) {
                    violations.push(format!(
                        "note {} references missing note {reference}",
                        note.id
                    ));
                }
            }
        }
        violations
    }

    /// Inserts a fully built note, registering edges and dirtying it plus
    /// any notes already referencing its id.
    fn insert_note(&mut self, note: Note) {
        let id = note.id;
        self.notes.insert(id, note);
        self.register_edges(id);
        self.scheduler.invalidate(id, &self.graph);
    }

    fn register_edges(&mut self, id: NoteId) {
        let (references, references_base) = self.notes[&id].combined_references();
        self.graph.add_note(id, references, references_base);
    }

    /// Rejects self-references and edits whose new edges would close a
    /// cycle. The cycle pre-check asks whether any newly referenced note
    /// already depends, transitively, on the edited note.
    fn validate_assignment(
        &self,
        id: NoteId,
        compiled: &BinaryExpression,
    ) -> Result<(), ModuleError> {
        if compiled.references().contains(&id) {
            return Err(ExpressionError::SelfReference(id).into());
        }
        if id == BASE_NOTE && compiled.references_base() {
            return Err(ExpressionError::SelfReference(BASE_NOTE).into());
        }
        for &reference in compiled.references() {
            if self.graph.has_path(reference, id) {
                return Err(ExpressionError::Cycle {
                    note: id,
                    through: reference,
                }
                .into());
            }
        }
        Ok(())
    }
}

fn combined_of(
    slots: &[Option<BinaryExpression>; VARIABLE_COUNT],
) -> (BTreeSet<NoteId>, bool) {
    let mut references = BTreeSet::new();
    let mut references_base = false;
    for expression in slots.iter().flatten() {
        references.extend(expression.references().iter().copied());
        references_base |= expression.references_base();
    }
    (references, references_base)
}

/// Measure length of a note being evaluated, from its own fresh values
/// with the base note's cached values as fallback.
fn derive_measure_length(evaluated: &EvaluatedNote, cache: &EvaluationCache) -> Value {
    let beats = evaluated
        .get(Variable::BeatsPerMeasure)
        .cloned()
        .unwrap_or_else(|| cache.value_or_default(BASE_NOTE, Variable::BeatsPerMeasure));
    let tempo = evaluated
        .get(Variable::Tempo)
        .cloned()
        .unwrap_or_else(|| cache.value_or_default(BASE_NOTE, Variable::Tempo));

    beats
        .mul(&Value::Rational(Fraction::integer(
            crate::consts::SECONDS_PER_MINUTE,
        )))
        .div(&tempo)
}
