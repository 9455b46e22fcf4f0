//! Pure algorithms over [`Graph`].
//!
//! None of these functions error on normal input: absence is represented by
//! `None` or an empty set, and the caller decides what absence means.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use super::Graph;

/// Detects a cycle via depth-first search.
///
/// Returns the cycle as a node path with the entry node repeated at the end
/// (`[a, b, c, a]`), or `None` if the graph is acyclic. Runs in O(V + E).
pub fn detect_cycle<N: Copy + Eq + Hash>(graph: &Graph<N>) -> Option<Vec<N>> {
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();

    for start in graph.nodes() {
        if visited.contains(&start) {
            continue;
        }

        // Iterative DFS; each frame tracks the next successor to explore.
        let mut stack: Vec<(N, usize)> = vec![(start, 0)];
        visited.insert(start);
        on_stack.insert(start);
        path.push(start);

        while let Some(&(node, index)) = stack.last() {
            let successors = graph.successors(node);
            if index < successors.len() {
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                let next = successors[index];

                if on_stack.contains(&next) {
                    // Back edge: the cycle runs from `next`'s position on the
                    // current path back around through `node`.
                    let position = path.iter().position(|&n| n == next)?;
                    let mut cycle = path[position..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }

                if visited.insert(next) {
                    on_stack.insert(next);
                    path.push(next);
                    stack.push((next, 0));
                }
            } else {
                stack.pop();
                on_stack.remove(&node);
                path.pop();
            }
        }
    }

    None
}

/// Detects the cycle a proposed `source -> target` edge would close.
///
/// Breadth-first search from `target` looking for `source`; if reached, the
/// found path is prepended with `source` to represent the would-be cycle.
/// Cheap incremental check for interactive edge editing, avoiding a full
/// graph re-validation.
pub fn detect_cycle_with_edge<N: Copy + Eq + Hash>(
    graph: &Graph<N>,
    source: N,
    target: N,
) -> Option<Vec<N>> {
    if source == target {
        return Some(vec![source, source]);
    }
    if !graph.has_node(target) {
        return None;
    }

    let mut parents: HashMap<N, N> = HashMap::new();
    let mut visited = HashSet::from([target]);
    let mut queue = VecDeque::from([target]);

    while let Some(node) = queue.pop_front() {
        for &next in graph.successors(node) {
            if !visited.insert(next) {
                continue;
            }
            parents.insert(next, node);

            if next == source {
                let mut path = vec![next];
                let mut current = next;
                while let Some(&parent) = parents.get(&current) {
                    path.push(parent);
                    current = parent;
                }
                path.reverse();
                // `path` is target -> ... -> source; the proposed edge closes
                // the loop back to target.
                let mut cycle = Vec::with_capacity(path.len() + 1);
                cycle.push(source);
                cycle.extend(path);
                return Some(cycle);
            }

            queue.push_back(next);
        }
    }

    None
}

/// Groups nodes into topological levels via Kahn's algorithm.
///
/// Every node in a level has all its predecessors in earlier levels, so the
/// nodes of one level may execute concurrently. Returns `None` if the graph
/// contains a cycle. Level ordering follows node insertion order, keeping the
/// result deterministic.
pub fn topological_levels<N: Copy + Eq + Hash>(graph: &Graph<N>) -> Option<Vec<Vec<N>>> {
    let mut in_degrees: HashMap<N, usize> = graph
        .nodes()
        .map(|node| (node, graph.in_degree(node)))
        .collect();

    let mut frontier: Vec<N> = graph
        .nodes()
        .filter(|&node| graph.in_degree(node) == 0)
        .collect();

    let mut levels = Vec::new();
    let mut processed = 0;

    while !frontier.is_empty() {
        let mut next_frontier = Vec::new();

        for &node in &frontier {
            for &successor in graph.successors(node) {
                if let Some(degree) = in_degrees.get_mut(&successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_frontier.push(successor);
                    }
                }
            }
        }

        processed += frontier.len();
        levels.push(std::mem::replace(&mut frontier, next_frontier));
    }

    (processed == graph.node_count()).then_some(levels)
}

/// Returns every node not reachable from any of the start nodes.
///
/// Multi-source BFS; an empty start set means every node is unreachable.
pub fn unreachable_from<N: Copy + Eq + Hash>(graph: &Graph<N>, starts: &[N]) -> HashSet<N> {
    let mut visited: HashSet<N> = starts
        .iter()
        .copied()
        .filter(|&node| graph.has_node(node))
        .collect();
    let mut queue: VecDeque<N> = visited.iter().copied().collect();

    while let Some(node) = queue.pop_front() {
        for &next in graph.successors(node) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    graph
        .nodes()
        .filter(|node| !visited.contains(node))
        .collect()
}

/// Returns nodes with neither incoming nor outgoing edges.
///
/// A graph with at most one node never reports dangling nodes: a lone
/// trigger is a valid workflow.
pub fn dangling_nodes<N: Copy + Eq + Hash>(graph: &Graph<N>) -> HashSet<N> {
    if graph.node_count() <= 1 {
        return HashSet::new();
    }

    graph
        .nodes()
        .filter(|&node| graph.in_degree(node) == 0 && graph.out_degree(node) == 0)
        .collect()
}

/// Returns nodes with no outgoing edges.
///
/// Type-based exemptions (terminal node kinds) are applied by the caller.
pub fn dead_end_nodes<N: Copy + Eq + Hash>(graph: &Graph<N>) -> HashSet<N> {
    graph
        .nodes()
        .filter(|&node| graph.out_degree(node) == 0)
        .collect()
}

/// Computes the longest dependency chain in an acyclic graph.
///
/// Memoized DFS over longest-path-to-sink; returns the global best path and
/// its length in nodes. The caller must have checked acyclicity first, as the
/// memoization assumes it.
pub fn critical_path<N: Copy + Eq + Hash>(graph: &Graph<N>) -> (Vec<N>, usize) {
    let mut lengths: HashMap<N, usize> = HashMap::new();
    let mut next_hop: HashMap<N, N> = HashMap::new();

    for node in graph.nodes() {
        longest_from(graph, node, &mut lengths, &mut next_hop);
    }

    let Some((&best, _)) = lengths.iter().max_by_key(|&(_, &length)| length) else {
        return (Vec::new(), 0);
    };

    // Prefer the earliest-inserted node among ties for determinism.
    let best_length = lengths[&best];
    let best = graph
        .nodes()
        .find(|node| lengths.get(node) == Some(&best_length))
        .unwrap_or(best);

    let mut path = vec![best];
    let mut current = best;
    while let Some(&next) = next_hop.get(&current) {
        path.push(next);
        current = next;
    }

    let length = path.len();
    (path, length)
}

fn longest_from<N: Copy + Eq + Hash>(
    graph: &Graph<N>,
    node: N,
    lengths: &mut HashMap<N, usize>,
    next_hop: &mut HashMap<N, N>,
) -> usize {
    if let Some(&length) = lengths.get(&node) {
        return length;
    }

    let mut best = 1;
    for &successor in graph.successors(node) {
        let through = 1 + longest_from(graph, successor, lengths, next_hop);
        if through > best {
            best = through;
            next_hop.insert(node, successor);
        }
    }

    lengths.insert(node, best);
    best
}
