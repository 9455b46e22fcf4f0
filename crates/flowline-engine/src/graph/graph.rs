//! Generic directed multigraph keyed by opaque node identifiers.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A directed multigraph over copyable, hashable identifiers.
///
/// Adjacency is tracked in both directions, preserving duplicate edges as
/// distinct entries in insertion order. All operations are total: adding an
/// edge auto-adds its endpoints, and queries on unknown nodes return empty
/// results rather than errors.
///
/// Instances are never shared across concurrent validations or executions;
/// each call builds (or [`Clone`]s, for speculative what-if mutation) its own
/// graph.
#[derive(Debug, Clone, Default)]
pub struct Graph<N> {
    /// Nodes in insertion order.
    order: Vec<N>,
    /// Node membership set.
    nodes: HashSet<N>,
    /// Outgoing adjacency, duplicates preserved in insertion order.
    outgoing: HashMap<N, Vec<N>>,
    /// Incoming adjacency, duplicates preserved in insertion order.
    incoming: HashMap<N, Vec<N>>,
    /// Total number of edges, counting multiplicity.
    edge_count: usize,
}

impl<N: Copy + Eq + Hash> Graph<N> {
    /// Creates a new empty graph.
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            nodes: HashSet::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            edge_count: 0,
        }
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges, counting duplicates.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Returns whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node. A no-op if the node is already present.
    pub fn add_node(&mut self, node: N) {
        if self.nodes.insert(node) {
            self.order.push(node);
        }
    }

    /// Adds a directed edge, auto-adding missing endpoints.
    ///
    /// Duplicate edges are preserved as distinct entries.
    pub fn add_edge(&mut self, source: N, target: N) {
        self.add_node(source);
        self.add_node(target);
        self.outgoing.entry(source).or_default().push(target);
        self.incoming.entry(target).or_default().push(source);
        self.edge_count += 1;
    }

    /// Returns whether a node is present.
    pub fn has_node(&self, node: N) -> bool {
        self.nodes.contains(&node)
    }

    /// Returns whether at least one `source -> target` edge exists.
    pub fn has_edge(&self, source: N, target: N) -> bool {
        self.outgoing
            .get(&source)
            .is_some_and(|targets| targets.contains(&target))
    }

    /// Returns all successors of a node, including duplicates, in insertion
    /// order.
    pub fn successors(&self, node: N) -> &[N] {
        self.outgoing.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Returns all predecessors of a node, including duplicates, in insertion
    /// order.
    pub fn predecessors(&self, node: N) -> &[N] {
        self.incoming.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Returns the number of incoming edges, counting multiplicity.
    pub fn in_degree(&self, node: N) -> usize {
        self.incoming.get(&node).map_or(0, Vec::len)
    }

    /// Returns the number of outgoing edges, counting multiplicity.
    pub fn out_degree(&self, node: N) -> usize {
        self.outgoing.get(&node).map_or(0, Vec::len)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.order.iter().copied()
    }
}
