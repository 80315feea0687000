use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

/// Per-prefix directed reachability multigraph. Nodes are ASN strings plus the
/// prefix itself as a sink node; an edge `u -> v` means "u has announced toward
/// v." Node weights are plain `String`s so the graph can't use `GraphMap`
/// (which requires `Copy` node identifiers) -- a side index keeps name lookups
/// O(1) instead of scanning the underlying `petgraph::Graph`.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl ReachabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_insert(&mut self, node: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(node) {
            return idx;
        }
        let idx = self.graph.add_node(node.to_string());
        self.index.insert(node.to_string(), idx);
        idx
    }

    /// Rebuilds the name->index map after a removal, since `remove_node`
    /// invalidates the last node's index.
    fn reindex(&mut self) {
        self.index.clear();
        for idx in self.graph.node_indices() {
            let name = self.graph[idx].clone();
            self.index.insert(name, idx);
        }
    }

    pub fn add_edge(&mut self, u: &str, v: &str) {
        let ui = self.get_or_insert(u);
        let vi = self.get_or_insert(v);
        self.graph.update_edge(ui, vi, ());
    }

    pub fn has_edge(&self, u: &str, v: &str) -> bool {
        match (self.index.get(u), self.index.get(v)) {
            (Some(&ui), Some(&vi)) => self.graph.find_edge(ui, vi).is_some(),
            _ => false,
        }
    }

    pub fn remove_edge(&mut self, u: &str, v: &str) {
        if let (Some(&ui), Some(&vi)) = (self.index.get(u), self.index.get(v)) {
            if let Some(e) = self.graph.find_edge(ui, vi) {
                self.graph.remove_edge(e);
            }
        }
    }

    pub fn remove_node(&mut self, node: &str) {
        if let Some(&idx) = self.index.get(node) {
            self.graph.remove_node(idx);
            self.reindex();
        }
    }

    pub fn has_node(&self, node: &str) -> bool {
        self.index.contains_key(node)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.graph.node_weights().cloned().collect()
    }

    /// Sorted successor list, matching the reference implementation's
    /// `sorted(list(topo.successors(x)))` comparisons.
    pub fn successors(&self, node: &str) -> Vec<String> {
        let mut out = match self.index.get(node) {
            Some(&idx) => self
                .graph
                .edges(idx)
                .map(|e| self.graph[e.target()].clone())
                .collect(),
            None => Vec::new(),
        };
        out.sort();
        out
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_references()
            .map(|e| (self.graph[e.source()].clone(), self.graph[e.target()].clone()))
            .collect()
    }

    /// All simple (no repeated node) directed paths from `from` to `to`,
    /// each returned as a sequence of node names including both endpoints.
    pub fn all_simple_paths(&self, from: &str, to: &str) -> Vec<Vec<String>> {
        let (Some(&fi), Some(&ti)) = (self.index.get(from), self.index.get(to)) else {
            return Vec::new();
        };
        petgraph::algo::all_simple_paths::<Vec<NodeIndex>, _>(&self.graph, fi, ti, 0, None)
            .map(|path| path.into_iter().map(|idx| self.graph[idx].clone()).collect())
            .collect()
    }

    /// Ported from `clear_topo`: after an Assign/Revoke changes ownership of
    /// `prefix` away from `source`, drop the edges that only served the former
    /// holder's subtree while preserving anything still useful for routing to
    /// the prefix.
    pub fn clear_topo(&mut self, prefix: &str, source: &str) {
        if !self.has_edge(source, prefix) {
            return;
        }
        self.remove_edge(source, prefix);

        let mut edges_to_source: HashSet<(String, String)> = HashSet::new();
        let mut edges_to_prefix: HashSet<(String, String)> = HashSet::new();
        let mut my_nodes: HashSet<String> = HashSet::new();

        for node in self.nodes() {
            for path in self.all_simple_paths(&node, source) {
                for w in path.windows(2) {
                    my_nodes.insert(w[0].clone());
                    my_nodes.insert(w[1].clone());
                    edges_to_source.insert((w[0].clone(), w[1].clone()));
                }
            }
        }

        for node in &my_nodes {
            for path in self.all_simple_paths(node, prefix) {
                for w in path.windows(2) {
                    edges_to_prefix.insert((w[0].clone(), w[1].clone()));
                }
            }
        }

        let to_remove: Vec<(String, String)> =
            edges_to_source.difference(&edges_to_prefix).cloned().collect();
        for (u, v) in to_remove {
            self.remove_edge(&u, &v);
        }
    }

    /// Ported from `update_topo_withdraw`: drop the withdrawing node, then any
    /// node (other than `prefix`) left with no path to `prefix`.
    pub fn apply_withdraw(&mut self, prefix: &str, as_source: &str) {
        self.remove_node(as_source);
        let redundant: Vec<String> = self
            .nodes()
            .into_iter()
            .filter(|n| n != prefix && self.all_simple_paths(n, prefix).is_empty())
            .collect();
        for n in redundant {
            self.remove_node(&n);
        }
    }

    /// Cycle search confined to the subgraph reachable from `source`, matching
    /// `nx.find_cycle(topo, source=as_source, orientation='original')`.
    pub fn has_cycle_reachable_from(&self, source: &str) -> bool {
        let Some(&start) = self.index.get(source) else {
            return false;
        };
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        self.dfs_has_cycle(start, &mut visited, &mut on_stack)
    }

    fn dfs_has_cycle(
        &self,
        node: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        on_stack: &mut HashSet<NodeIndex>,
    ) -> bool {
        visited.insert(node);
        on_stack.insert(node);
        for edge in self.graph.edges(node) {
            let next = edge.target();
            if on_stack.contains(&next) {
                return true;
            }
            if !visited.contains(&next) && self.dfs_has_cycle(next, visited, on_stack) {
                return true;
            }
        }
        on_stack.remove(&node);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_seed_creates_edge_to_prefix() {
        let mut g = ReachabilityGraph::new();
        g.add_edge("8522", "139.91.0.0/16");
        assert!(g.has_edge("8522", "139.91.0.0/16"));
        assert_eq!(g.successors("8522"), vec!["139.91.0.0/16".to_string()]);
    }

    #[test]
    fn clear_topo_removes_only_unreachable_subtree() {
        let mut g = ReachabilityGraph::new();
        // 8522 originally holds the prefix; 9999 announces through it.
        g.add_edge("8522", "p");
        g.add_edge("9999", "8522");
        // 8522 assigns away to 13335: clear the edge 8522->p and anything
        // that only reached through it.
        g.add_edge("13335", "p");
        g.clear_topo("p", "8522");
        assert!(!g.has_edge("8522", "p"));
        assert!(g.has_edge("13335", "p"));
    }

    #[test]
    fn withdraw_prunes_nodes_with_no_remaining_path() {
        let mut g = ReachabilityGraph::new();
        g.add_edge("133741", "p");
        g.add_edge("13335", "133741");
        g.add_edge("18046", "133741");
        g.apply_withdraw("p", "13335");
        assert!(!g.has_node("13335"));
        // 18046 had no other path to p through 133741 (now gone), so it's pruned too.
        assert!(!g.has_node("18046"));
    }

    #[test]
    fn withdraw_keeps_node_with_alternative_path() {
        let mut g = ReachabilityGraph::new();
        g.add_edge("133741", "p");
        g.add_edge("13335", "133741");
        g.add_edge("18046", "133741");
        g.add_edge("18046", "p"); // alternative direct path
        g.apply_withdraw("p", "13335");
        assert!(g.has_node("18046"));
    }

    #[test]
    fn detects_cycle_reachable_from_source() {
        let mut g = ReachabilityGraph::new();
        g.add_edge("A", "B");
        g.add_edge("B", "C");
        g.add_edge("C", "A");
        assert!(g.has_cycle_reachable_from("A"));
    }

    #[test]
    fn no_cycle_in_acyclic_graph() {
        let mut g = ReachabilityGraph::new();
        g.add_edge("A", "B");
        g.add_edge("B", "C");
        assert!(!g.has_cycle_reachable_from("A"));
    }
}
