//! Incrementally maintained name-based dependency graph.

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::registry::{CellId, NameSet};

/// Per-cell bookkeeping kept alongside the petgraph node.
#[derive(Debug, Clone, Default)]
pub(super) struct NodeMeta {
    pub(super) defines: NameSet,
    pub(super) uses: NameSet,
    /// Definition epoch; higher wins when several cells define a name.
    pub(super) epoch: u64,
    /// Registration order; breaks epoch ties (later registration wins).
    pub(super) order: usize,
}

/// Directed graph over cells: edges go from the authoritative definer of a
/// name to every other cell that uses it.
///
/// A name used and defined by the same cell never produces a self edge; the
/// cell depends on the previous definer of that name instead.
/// Unknown ids are tolerated by all queries and yield empty results.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    pub(super) graph: StableDiGraph<CellId, ()>,
    pub(super) node_indices: FxHashMap<CellId, NodeIndex>,
    pub(super) nodes: FxHashMap<CellId, NodeMeta>,
    /// Name to every cell currently defining it
    definers: FxHashMap<String, Vec<CellId>>,
    /// Name to every cell currently using it
    users: FxHashMap<String, FxHashSet<CellId>>,
    epoch: u64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cell with no names. Registration order is the order of first
    /// insertion. Re-adding a known cell is a no-op.
    pub fn add_cell(&mut self, cell: &CellId) {
        if self.node_indices.contains_key(cell) {
            return;
        }
        let order = self.nodes.len();
        let idx = self.graph.add_node(cell.clone());
        self.node_indices.insert(cell.clone(), idx);
        self.nodes.insert(
            cell.clone(),
            NodeMeta {
                order,
                ..NodeMeta::default()
            },
        );
    }

    /// Replace a cell's names and recompute the edges they affect.
    ///
    /// The cell becomes the most recent definer of everything it defines.
    pub fn update(&mut self, cell: &CellId, defines: NameSet, uses: NameSet) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.apply(cell, defines, uses, epoch);
    }

    /// Update several cells as one batch; they share a definition epoch, so
    /// conflicting definitions among them resolve by registration order.
    pub fn update_batch(&mut self, updates: Vec<(CellId, NameSet, NameSet)>) {
        self.epoch += 1;
        let epoch = self.epoch;
        for (cell, defines, uses) in updates {
            self.apply(&cell, defines, uses, epoch);
        }
    }

    fn apply(&mut self, cell: &CellId, defines: NameSet, uses: NameSet, epoch: u64) {
        self.add_cell(cell);

        let Some(meta) = self.nodes.get_mut(cell) else {
            return;
        };
        let old_defines = std::mem::replace(&mut meta.defines, defines.clone());
        let old_uses = std::mem::replace(&mut meta.uses, uses.clone());
        meta.epoch = epoch;

        for name in &old_defines {
            if let Some(cells) = self.definers.get_mut(name) {
                cells.retain(|c| c != cell);
                if cells.is_empty() {
                    self.definers.remove(name);
                }
            }
        }
        for name in &old_uses {
            if let Some(cells) = self.users.get_mut(name) {
                cells.remove(cell);
                if cells.is_empty() {
                    self.users.remove(name);
                }
            }
        }
        for name in &defines {
            self.definers
                .entry(name.clone())
                .or_default()
                .push(cell.clone());
        }
        for name in &uses {
            self.users
                .entry(name.clone())
                .or_default()
                .insert(cell.clone());
        }

        self.detach(cell);

        // Incoming edges of this cell, plus the incoming edges of every user
        // of a name whose ownership may have moved.
        let mut rewire: Vec<CellId> = vec![cell.clone()];
        let mut seen: FxHashSet<CellId> = FxHashSet::default();
        seen.insert(cell.clone());
        for name in old_defines.iter().chain(defines.iter()) {
            if let Some(users) = self.users.get(name) {
                for user in users {
                    if seen.insert(user.clone()) {
                        rewire.push(user.clone());
                    }
                }
            }
        }
        for target in &rewire {
            self.rewire_incoming(target);
        }
    }

    /// Remove every edge touching a cell.
    fn detach(&mut self, cell: &CellId) {
        let Some(&idx) = self.node_indices.get(cell) else {
            return;
        };
        let edges: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|edge| edge.id())
            .collect();
        for edge in edges {
            self.graph.remove_edge(edge);
        }
    }

    /// Recompute all incoming edges of a cell from its used names.
    fn rewire_incoming(&mut self, cell: &CellId) {
        let Some(&idx) = self.node_indices.get(cell) else {
            return;
        };
        let Some(meta) = self.nodes.get(cell) else {
            return;
        };

        let sources: Vec<NodeIndex> = meta
            .uses
            .iter()
            .filter_map(|name| self.upstream_definer(name, cell))
            .filter_map(|definer| self.node_indices.get(definer).copied())
            .collect();

        let stale: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        for source in sources {
            self.graph.update_edge(source, idx, ());
        }
    }

    /// The authoritative definer of a name, if any cell defines it.
    pub fn definer_of(&self, name: &str) -> Option<&CellId> {
        self.definers.get(name)?.iter().max_by_key(|id| {
            self.nodes
                .get(*id)
                .map(|meta| (meta.epoch, meta.order))
                .unwrap_or_default()
        })
    }

    /// The definer a cell reads `name` from: the best definer other than the
    /// cell itself. A cell that reads a name before redefining it still
    /// depends on whoever defined it before.
    pub fn upstream_definer(&self, name: &str, cell: &CellId) -> Option<&CellId> {
        self.definers
            .get(name)?
            .iter()
            .filter(|id| *id != cell)
            .max_by_key(|id| {
                self.nodes
                    .get(*id)
                    .map(|meta| (meta.epoch, meta.order))
                    .unwrap_or_default()
            })
    }

    /// Registration order of a cell.
    pub fn order_of(&self, cell: &CellId) -> Option<usize> {
        self.nodes.get(cell).map(|meta| meta.order)
    }

    /// Whether the graph knows this cell.
    pub fn contains(&self, cell: &CellId) -> bool {
        self.node_indices.contains_key(cell)
    }

    /// All cells reachable via outgoing edges, excluding `cell` itself.
    pub fn descendants(&self, cell: &CellId) -> FxHashSet<CellId> {
        let Some(&start) = self.node_indices.get(cell) else {
            return FxHashSet::default();
        };
        let mut found = FxHashSet::default();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// All cells from which `cell` is reachable, excluding `cell` itself.
    pub fn ancestors(&self, cell: &CellId) -> FxHashSet<CellId> {
        let Some(&start) = self.node_indices.get(cell) else {
            return FxHashSet::default();
        };
        let reversed = Reversed(&self.graph);
        let mut found = FxHashSet::default();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(idx) = dfs.next(reversed) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Direct dependencies of a cell, in registration order.
    pub fn parents(&self, cell: &CellId) -> Vec<CellId> {
        self.neighbors(cell, Direction::Incoming)
    }

    /// Direct dependents of a cell, in registration order.
    pub fn children(&self, cell: &CellId) -> Vec<CellId> {
        self.neighbors(cell, Direction::Outgoing)
    }

    fn neighbors(&self, cell: &CellId, direction: Direction) -> Vec<CellId> {
        let Some(&idx) = self.node_indices.get(cell) else {
            return Vec::new();
        };
        let mut cells: Vec<CellId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        cells.sort_by_key(|c| self.order_of(c).unwrap_or(usize::MAX));
        cells.dedup();
        cells
    }

    /// All edges as `(producer, consumer)` pairs, sorted by registration order.
    pub fn edges(&self) -> Vec<(CellId, CellId)> {
        let mut edges: Vec<(CellId, CellId)> = self
            .graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_endpoints(edge))
            .map(|(from, to)| (self.graph[from].clone(), self.graph[to].clone()))
            .collect();
        edges.sort_by_key(|(from, to)| {
            (
                self.order_of(from).unwrap_or(usize::MAX),
                self.order_of(to).unwrap_or(usize::MAX),
            )
        });
        edges
    }

    /// Number of cells in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> NameSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn id(s: &str) -> CellId {
        CellId::new(s)
    }

    fn graph_with(cells: &[(&str, &[&str], &[&str])]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (cell, defines, uses) in cells {
            graph.update(&id(cell), names(defines), names(uses));
        }
        graph
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_edge_from_definer_to_user() {
        let graph = graph_with(&[("a", &["x"], &[]), ("b", &["y"], &["x"])]);
        assert_eq!(graph.edges(), vec![(id("a"), id("b"))]);
        assert_eq!(graph.parents(&id("b")), vec![id("a")]);
        assert_eq!(graph.children(&id("a")), vec![id("b")]);
    }

    #[test]
    fn test_user_registered_before_definer() {
        let graph = graph_with(&[("b", &[], &["x"]), ("a", &["x"], &[])]);
        assert_eq!(graph.edges(), vec![(id("a"), id("b"))]);
    }

    #[test]
    fn test_no_self_edge() {
        let graph = graph_with(&[("a", &["x"], &["x"])]);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_read_then_redefine_keeps_upstream_edge() {
        let graph = graph_with(&[
            ("a", &["x"], &[]),
            ("b", &["x"], &["x"]),
            ("c", &[], &["x"]),
        ]);
        assert_eq!(graph.definer_of("x"), Some(&id("b")));
        assert_eq!(graph.upstream_definer("x", &id("b")), Some(&id("a")));
        assert_eq!(graph.parents(&id("b")), vec![id("a")]);
        assert_eq!(graph.parents(&id("c")), vec![id("b")]);
    }

    #[test]
    fn test_update_removes_stale_edges() {
        let mut graph = graph_with(&[("a", &["x"], &[]), ("b", &[], &["x"])]);
        graph.update(&id("b"), names(&[]), names(&["z"]));
        assert!(graph.edges().is_empty());

        graph.update(&id("a"), names(&["z"]), names(&[]));
        assert_eq!(graph.edges(), vec![(id("a"), id("b"))]);
    }

    #[test]
    fn test_definer_dropping_name_removes_edges() {
        let mut graph = graph_with(&[("a", &["x"], &[]), ("b", &[], &["x"])]);
        graph.update(&id("a"), names(&["y"]), names(&[]));
        assert!(graph.edges().is_empty());
        assert_eq!(graph.definer_of("x"), None);
    }

    #[test]
    fn test_redefinition_moves_edges_to_latest_definer() {
        let mut graph = graph_with(&[
            ("a", &["x"], &[]),
            ("b", &[], &["x"]),
            ("c", &["x"], &[]),
        ]);
        assert_eq!(graph.definer_of("x"), Some(&id("c")));
        assert_eq!(graph.parents(&id("b")), vec![id("c")]);

        // Re-running the first definer makes it authoritative again.
        graph.update(&id("a"), names(&["x"]), names(&[]));
        assert_eq!(graph.definer_of("x"), Some(&id("a")));
        assert_eq!(graph.parents(&id("b")), vec![id("a")]);
    }

    #[test]
    fn test_shadowed_definer_keeps_its_own_uses() {
        let graph = graph_with(&[
            ("base", &["y"], &[]),
            ("a", &["x"], &["y"]),
            ("c", &["x"], &[]),
        ]);
        assert_eq!(graph.parents(&id("a")), vec![id("base")]);
    }

    #[test]
    fn test_batch_tie_breaks_by_registration_order() {
        let mut graph = DependencyGraph::new();
        graph.add_cell(&id("first"));
        graph.add_cell(&id("second"));
        graph.add_cell(&id("user"));
        graph.update_batch(vec![
            (id("second"), names(&["x"]), names(&[])),
            (id("first"), names(&["x"]), names(&[])),
            (id("user"), names(&[]), names(&["x"])),
        ]);
        assert_eq!(graph.definer_of("x"), Some(&id("second")));
        assert_eq!(graph.parents(&id("user")), vec![id("second")]);
    }

    #[test]
    fn test_descendants_and_ancestors() {
        let graph = graph_with(&[
            ("a", &["x"], &[]),
            ("b", &["y"], &["x"]),
            ("c", &["z"], &["y"]),
            ("d", &["w"], &[]),
        ]);

        let descendants = graph.descendants(&id("a"));
        assert!(descendants.contains(&id("b")));
        assert!(descendants.contains(&id("c")));
        assert!(!descendants.contains(&id("a")));
        assert!(!descendants.contains(&id("d")));

        let ancestors = graph.ancestors(&id("c"));
        assert_eq!(ancestors.len(), 2);
        assert!(ancestors.contains(&id("a")));
        assert!(ancestors.contains(&id("b")));
    }

    #[test]
    fn test_unknown_cell_queries_are_empty() {
        let graph = graph_with(&[("a", &["x"], &[])]);
        assert!(graph.descendants(&id("nope")).is_empty());
        assert!(graph.ancestors(&id("nope")).is_empty());
        assert!(graph.parents(&id("nope")).is_empty());
        assert_eq!(graph.order_of(&id("nope")), None);
    }

    #[test]
    fn test_multiple_names_single_edge() {
        let graph = graph_with(&[("a", &["x", "y"], &[]), ("b", &[], &["x", "y"])]);
        assert_eq!(graph.edges().len(), 1);
    }
}
