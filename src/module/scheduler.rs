//! Dirty-set bookkeeping and incremental evaluation order.
//!
//! The scheduler grows the dirty set by transitive dependents (treating the
//! base note as an implicit predecessor of every base-dependent note) and
//! linearizes it with Kahn's algorithm over the induced subgraph. All ties
//! break by ascending id, which makes every batch order reproducible.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::cmp::Reverse;

use crate::bytecode::NoteId;
use crate::consts::BASE_NOTE;
use crate::graph::DependencyGraph;

#[derive(Debug, Default)]
pub(super) struct Scheduler {
    dirty: BTreeSet<NoteId>,
}

impl Scheduler {
    /// Marks `id` and every transitive dependent dirty.
    pub fn invalidate(&mut self, id: NoteId, graph: &DependencyGraph) {
        let mut queue = vec![id];
        while let Some(node) = queue.pop() {
            if !self.dirty.insert(node) {
                continue;
            }
            queue.extend(graph.dependents(node));
            if node == BASE_NOTE {
                queue.extend(graph.base_note_dependents());
            }
        }
    }

    /// Marks exactly the given set dirty, without propagation.
    pub fn mark_all(&mut self, ids: impl IntoIterator<Item = NoteId>) {
        self.dirty.extend(ids);
    }

    /// Forgets a note, used when it is removed from the module.
    pub fn discard(&mut self, id: NoteId) {
        self.dirty.remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Consumes the dirty set, returning it in evaluation order.
    ///
    /// Kahn's algorithm over the dirty-induced subgraph: a dirty note's
    /// in-degree counts its dirty dependencies, plus one when it reads the
    /// base note and the base note is itself dirty. When a cycle keeps
    /// notes from draining, the leftovers are appended in ascending id
    /// order after a warning so the batch still completes.
    pub fn take_order(&mut self, graph: &DependencyGraph) -> Vec<NoteId> {
        let dirty = std::mem::take(&mut self.dirty);
        if dirty.is_empty() {
            return Vec::new();
        }

        let base_dirty = dirty.contains(&BASE_NOTE);
        let mut in_degree: BTreeMap<NoteId, usize> = BTreeMap::new();
        for &id in &dirty {
            let mut degree = graph
                .dependencies(id)
                .filter(|dependency| dirty.contains(dependency))
                .count();
            if base_dirty && id != BASE_NOTE && graph.references_base(id) {
                degree += 1;
            }
            in_degree.insert(id, degree);
        }

        let mut ready: BinaryHeap<Reverse<NoteId>> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(dirty.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);

            let release = |target: NoteId, in_degree: &mut BTreeMap<NoteId, usize>,
                           ready: &mut BinaryHeap<Reverse<NoteId>>| {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        in_degree.remove(&target);
                        ready.push(Reverse(target));
                    }
                }
            };

            for dependent in graph.dependents(id) {
                if dirty.contains(&dependent) {
                    release(dependent, &mut in_degree, &mut ready);
                }
            }
            if id == BASE_NOTE {
                for dependent in graph.base_note_dependents() {
                    if dirty.contains(&dependent) {
                        release(dependent, &mut in_degree, &mut ready);
                    }
                }
            }
        }

        if order.len() < dirty.len() {
            let emitted: BTreeSet<NoteId> = order.iter().copied().collect();
            let stuck: Vec<NoteId> = dirty.difference(&emitted).copied().collect();
            tracing::warn!(
                ?stuck,
                "dependency cycle reached evaluation; appending in id order",
            );
            order.extend(stuck);
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    fn deps(ids: &[NoteId]) -> BTreeSet<NoteId> {
        ids.iter().copied().collect()
    }

    fn graph() -> DependencyGraph {
        // 0 is the base; 1 reads it, 2 reads 1, 3 reads 1 and 2.
        let mut graph = DependencyGraph::new();
        graph.add_note(1, deps(&[]), true);
        graph.add_note(2, deps(&[1]), false);
        graph.add_note(3, deps(&[1, 2]), false);
        graph
    }

    #[test]
    fn invalidation_propagates_through_dependents() {
        let graph = graph();
        let mut scheduler = Scheduler::default();
        scheduler.invalidate(1, &graph);
        assert_eq!(scheduler.dirty, deps(&[1, 2, 3]));
    }

    #[test]
    fn base_invalidation_reaches_base_dependents() {
        let graph = graph();
        let mut scheduler = Scheduler::default();
        scheduler.invalidate(BASE_NOTE, &graph);
        assert_eq!(scheduler.dirty, deps(&[0, 1, 2, 3]));
    }

    #[test]
    fn order_respects_edges_and_breaks_ties_by_id() {
        let graph = graph();
        let mut scheduler = Scheduler::default();
        scheduler.invalidate(BASE_NOTE, &graph);
        assert_eq!(scheduler.take_order(&graph), vec![0, 1, 2, 3]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn clean_dependencies_do_not_count() {
        let graph = graph();
        let mut scheduler = Scheduler::default();
        // Only 3 is dirty; its dependencies are clean and stay cached.
        scheduler.mark_all([3]);
        assert_eq!(scheduler.take_order(&graph), vec![3]);
    }

    #[test]
    fn cycles_drain_in_id_order_after_the_clean_prefix() {
        let mut graph = DependencyGraph::new();
        graph.add_note(1, deps(&[]), false);
        graph.add_note(2, deps(&[1, 3]), false);
        graph.add_note(3, deps(&[2]), false);

        let mut scheduler = Scheduler::default();
        scheduler.mark_all([1, 2, 3]);
        assert_eq!(scheduler.take_order(&graph), vec![1, 2, 3]);
    }
}
