//! Staleness propagation: the affected set of a change, in execution order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::Dfs;
use rustc_hash::{FxHashMap, FxHashSet};

use super::DependencyGraph;
use crate::error::{Error, Result};
use crate::registry::CellId;

impl DependencyGraph {
    /// Get every cell reachable from `changed` (inclusive), in topological
    /// order.
    ///
    /// Cells with no ordering constraint between them keep registration
    /// order. Unknown ids are ignored. Fails with `CycleDetected` instead of
    /// looping when the reachable subgraph is cyclic.
    pub fn affected<'a>(&self, changed: impl IntoIterator<Item = &'a CellId>) -> Result<Vec<CellId>> {
        let mut reachable: FxHashSet<NodeIndex> = FxHashSet::default();
        for cell in changed {
            let Some(&start) = self.node_indices.get(cell) else {
                continue;
            };
            if reachable.contains(&start) {
                continue;
            }
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(idx) = dfs.next(&self.graph) {
                reachable.insert(idx);
            }
        }

        // Kahn's algorithm restricted to the reachable subgraph, with a
        // min-heap on registration order for deterministic tie-breaking.
        let mut in_degree: FxHashMap<NodeIndex, usize> = reachable
            .iter()
            .map(|&idx| {
                let degree = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .filter(|n| reachable.contains(n))
                    .count();
                (idx, degree)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&idx, _)| Reverse((self.order_at(idx), idx)))
            .collect();

        let mut order = Vec::with_capacity(reachable.len());
        while let Some(Reverse((_, idx))) = ready.pop() {
            order.push(self.graph[idx].clone());
            for child in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.order_at(child), child)));
                    }
                }
            }
        }

        if order.len() < reachable.len() {
            let scheduled: FxHashSet<&CellId> = order.iter().collect();
            let blocked: Vec<NodeIndex> = reachable
                .iter()
                .copied()
                .filter(|&idx| !scheduled.contains(&self.graph[idx]))
                .collect();
            return Err(Error::CycleDetected(self.cycle_members(&blocked)));
        }

        Ok(order)
    }

    fn order_at(&self, idx: NodeIndex) -> usize {
        self.order_of(&self.graph[idx]).unwrap_or(usize::MAX)
    }

    /// Cells lying on a cycle among `blocked`, in registration order. Falls
    /// back to every blocked cell if no strongly connected component is found.
    fn cycle_members(&self, blocked: &[NodeIndex]) -> Vec<CellId> {
        use petgraph::algo::kosaraju_scc;

        let blocked_set: FxHashSet<NodeIndex> = blocked.iter().copied().collect();
        let mut members: Vec<NodeIndex> = kosaraju_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.len() > 1 && scc.iter().all(|idx| blocked_set.contains(idx)))
            .unwrap_or_else(|| blocked.to_vec());
        members.sort_by_key(|&idx| self.order_at(idx));
        members
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::graph::DependencyGraph;
    use crate::registry::{CellId, NameSet};

    fn names(items: &[&str]) -> NameSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn id(s: &str) -> CellId {
        CellId::new(s)
    }

    fn ids(order: &[CellId]) -> Vec<&str> {
        order.iter().map(CellId::as_str).collect()
    }

    #[test]
    fn test_linear_chain() {
        let mut graph = DependencyGraph::new();
        graph.update(&id("a"), names(&["x"]), names(&[]));
        graph.update(&id("b"), names(&["y"]), names(&["x"]));
        graph.update(&id("c"), names(&["z"]), names(&["y"]));

        let order = graph.affected([&id("a")]).unwrap();
        assert_eq!(ids(&order), vec!["a", "b", "c"]);

        let order = graph.affected([&id("b")]).unwrap();
        assert_eq!(ids(&order), vec!["b", "c"]);
    }

    #[test]
    fn test_topological_order_beats_registration_order() {
        let mut graph = DependencyGraph::new();
        // "user" is registered before its definer.
        graph.update(&id("user"), names(&[]), names(&["x"]));
        graph.update(&id("def"), names(&["x"]), names(&[]));

        let order = graph.affected([&id("def"), &id("user")]).unwrap();
        assert_eq!(ids(&order), vec!["def", "user"]);
    }

    #[test]
    fn test_diamond_ties_use_registration_order() {
        let mut graph = DependencyGraph::new();
        graph.update(&id("root"), names(&["r"]), names(&[]));
        graph.update(&id("right"), names(&["b"]), names(&["r"]));
        graph.update(&id("left"), names(&["a"]), names(&["r"]));
        graph.update(&id("merge"), names(&[]), names(&["a", "b"]));

        let order = graph.affected([&id("root")]).unwrap();
        assert_eq!(ids(&order), vec!["root", "right", "left", "merge"]);
    }

    #[test]
    fn test_unrelated_cells_excluded() {
        let mut graph = DependencyGraph::new();
        graph.update(&id("a"), names(&["x"]), names(&[]));
        graph.update(&id("b"), names(&[]), names(&["x"]));
        graph.update(&id("other"), names(&["q"]), names(&[]));

        let order = graph.affected([&id("a")]).unwrap();
        assert_eq!(ids(&order), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_changed_cell_ignored() {
        let graph = DependencyGraph::new();
        assert!(graph.affected([&id("ghost")]).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DependencyGraph::new();
        graph.update(&id("a"), names(&["x"]), names(&["y"]));
        graph.update(&id("b"), names(&["y"]), names(&["x"]));
        graph.update(&id("c"), names(&[]), names(&["x"]));

        let err = graph.affected([&id("a")]).unwrap_err();
        match err {
            Error::CycleDetected(cells) => assert_eq!(ids(&cells), vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_outside_affected_set_is_ignored() {
        let mut graph = DependencyGraph::new();
        graph.update(&id("a"), names(&["x"]), names(&["y"]));
        graph.update(&id("b"), names(&["y"]), names(&["x"]));
        graph.update(&id("solo"), names(&["s"]), names(&[]));

        let order = graph.affected([&id("solo")]).unwrap();
        assert_eq!(ids(&order), vec!["solo"]);
    }
}
