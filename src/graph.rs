//! Note dependency graph.
//!
//! Keeps forward adjacency (note to the notes it depends on), the inverted
//! adjacency (note to the notes depending on it), and the set of notes that
//! read base-note variables. Neighbor sets are ordered so every traversal
//! enumerates ascending ids; unordered iteration here would make evaluation
//! order irreproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::bytecode::NoteId;

/// Forward and inverted dependency adjacency over notes.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    forward: BTreeMap<NoteId, BTreeSet<NoteId>>,
    inverse: BTreeMap<NoteId, BTreeSet<NoteId>>,
    base_dependents: BTreeSet<NoteId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the edges of `id`.
    ///
    /// Existing edges are removed first, so this is the single atomic point
    /// keeping graph state in lockstep with expression reference sets.
    pub fn add_note(
        &mut self,
        id: NoteId,
        dependencies: BTreeSet<NoteId>,
        references_base: bool,
    ) {
        self.drop_edges(id);

        for &dependency in &dependencies {
            self.inverse.entry(dependency).or_default().insert(id);
        }
        self.forward.insert(id, dependencies);

        if references_base {
            self.base_dependents.insert(id);
        } else {
            self.base_dependents.remove(&id);
        }
    }

    /// Removes `id`: drops its own outgoing edges and its base-dependent
    /// membership.
    ///
    /// Dependents keep their now-stale edges to `id`, mirroring the
    /// unchanged reference sets of their expressions; rewriting those is
    /// the caller's policy decision.
    pub fn remove_note(&mut self, id: NoteId) {
        self.drop_edges(id);
        self.base_dependents.remove(&id);
    }

    fn drop_edges(&mut self, id: NoteId) {
        if let Some(old) = self.forward.remove(&id) {
            for dependency in old {
                if let Some(dependents) = self.inverse.get_mut(&dependency) {
                    dependents.remove(&id);
                }
            }
        }
    }

    /// Direct dependencies of `id`, ascending.
    pub fn dependencies(&self, id: NoteId) -> impl Iterator<Item = NoteId> + '_ {
        self.forward.get(&id).into_iter().flatten().copied()
    }

    /// Direct dependents of `id`, ascending.
    pub fn dependents(&self, id: NoteId) -> impl Iterator<Item = NoteId> + '_ {
        self.inverse.get(&id).into_iter().flatten().copied()
    }

    /// Whether `id` reads any base-note variable.
    pub fn references_base(&self, id: NoteId) -> bool {
        self.base_dependents.contains(&id)
    }

    /// Notes reading base-note variables, ascending.
    pub fn base_note_dependents(&self) -> impl Iterator<Item = NoteId> + '_ {
        self.base_dependents.iter().copied()
    }

    /// Transitive closure over forward edges, excluding `id` itself.
    pub fn all_dependencies(&self, id: NoteId) -> BTreeSet<NoteId> {
        self.closure(id, &self.forward)
    }

    /// Transitive closure over inverted edges, excluding `id` itself.
    pub fn all_dependents(&self, id: NoteId) -> BTreeSet<NoteId> {
        self.closure(id, &self.inverse)
    }

    fn closure(
        &self,
        id: NoteId,
        adjacency: &BTreeMap<NoteId, BTreeSet<NoteId>>,
    ) -> BTreeSet<NoteId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id]);

        while let Some(node) = queue.pop_front() {
            for &neighbor in adjacency.get(&node).into_iter().flatten() {
                if neighbor != id && seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        seen
    }

    /// Whether a forward path `src -> .. -> dst` exists.
    ///
    /// Used as the pre-check when an expression edit proposes a new edge
    /// `dst -> src`: an existing path back means the edit closes a cycle.
    pub fn has_path(&self, src: NoteId, dst: NoteId) -> bool {
        if src == dst {
            return true;
        }

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([src]);

        while let Some(node) = queue.pop_front() {
            for neighbor in self.dependencies(node) {
                if neighbor == dst {
                    return true;
                }
                if seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        false
    }

    /// Lists dependency cycles by depth-first search.
    ///
    /// Validation-only; the evaluation hot path never calls this.
    pub fn detect_cycles(&self) -> Vec<Vec<NoteId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Visiting,
            Done,
        }

        let mut states: BTreeMap<NoteId, State> = BTreeMap::new();
        let mut path: Vec<NoteId> = Vec::new();
        let mut cycles = Vec::new();

        fn visit(
            graph: &DependencyGraph,
            node: NoteId,
            states: &mut BTreeMap<NoteId, State>,
            path: &mut Vec<NoteId>,
            cycles: &mut Vec<Vec<NoteId>>,
        ) {
            match states.get(&node) {
                Some(State::Done) => return,
                Some(State::Visiting) => {
                    if let Some(start) = path.iter().position(|&n| n == node) {
                        cycles.push(path[start..].to_vec());
                    }
                    return;
                }
                None => (),
            }

            states.insert(node, State::Visiting);
            path.push(node);
            for neighbor in graph.dependencies(node) {
                visit(graph, neighbor, states, path, cycles);
            }
            path.pop();
            states.insert(node, State::Done);
        }

        for &node in self.forward.keys() {
            visit(self, node, &mut states, &mut path, &mut cycles);
        }
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[NoteId]) -> BTreeSet<NoteId> {
        ids.iter().copied().collect()
    }

    fn chain() -> DependencyGraph {
        // 3 -> 2 -> 1, with 1 reading the base note.
        let mut graph = DependencyGraph::new();
        graph.add_note(1, deps(&[]), true);
        graph.add_note(2, deps(&[1]), false);
        graph.add_note(3, deps(&[2]), false);
        graph
    }

    #[test]
    fn edges_are_mirrored() {
        let graph = chain();
        assert_eq!(graph.dependencies(2).collect::<Vec<_>>(), vec![1]);
        assert_eq!(graph.dependents(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(graph.base_note_dependents().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn re_adding_replaces_edges() {
        let mut graph = chain();
        graph.add_note(2, deps(&[3]), true);
        assert_eq!(graph.dependents(1).count(), 0);
        assert_eq!(graph.dependents(3).collect::<Vec<_>>(), vec![2]);
        assert!(graph.references_base(2));
    }

    #[test]
    fn closures_are_transitive_and_exclusive() {
        let graph = chain();
        assert_eq!(graph.all_dependents(1), deps(&[2, 3]));
        assert_eq!(graph.all_dependencies(3), deps(&[1, 2]));
        assert_eq!(graph.all_dependents(3), deps(&[]));
    }

    #[test]
    fn removal_sweeps_the_notes_own_edges() {
        let mut graph = chain();
        graph.remove_note(2);
        assert_eq!(graph.dependents(1).count(), 0);
        assert_eq!(graph.all_dependents(1), deps(&[]));
        // The dependent's stale edge mirrors its unchanged expression.
        assert_eq!(graph.dependencies(3).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn has_path_walks_forward_edges() {
        let graph = chain();
        assert!(graph.has_path(3, 1));
        assert!(!graph.has_path(1, 3));
        assert!(graph.has_path(2, 2));
    }

    #[test]
    fn detect_cycles_reports_the_loop() {
        let mut graph = chain();
        graph.add_note(1, deps(&[3]), false);
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        let cycle: BTreeSet<_> = cycles[0].iter().copied().collect();
        assert_eq!(cycle, deps(&[1, 2, 3]));
    }
}
