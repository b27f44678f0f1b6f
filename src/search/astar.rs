//! Single-agent space-time A* under a set of constraints (spec.md §4.1).

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BinaryHeap, HashMap};
use std::hash::{Hash, Hasher};

use crate::constraint::Constraint;
use crate::graph::{Graph, NodeId};
use crate::path::Path;
use crate::stat::{Deadline, Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SearchNode {
    node: NodeId,
    time: usize,
    g: usize,
    h: usize,
}

impl SearchNode {
    fn f(&self) -> usize {
        self.g + self.h
    }

    /// Stable pseudo-random tie value derived from `(node, time)` — load
    /// bearing for exploration diversity, not run-to-run randomness
    /// (spec.md §9 Open Questions).
    fn tie(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        (self.node, self.time).hash(&mut hasher);
        hasher.finish()
    }
}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f()
            .cmp(&self.f())
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| self.time.cmp(&other.time))
            .then_with(|| self.tie().cmp(&other.tie()))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Minimum-cost path from `start` to `goal` under `constraints`, or `None`
/// if no such path exists. `heuristic` is `graph.distances_from(goal)`.
/// `min_arrival_time` enforces a lower bound on the arrival timestep (used
/// by ICBS's target-reasoning path-length constraints).
pub fn space_time_astar(
    graph: &Graph,
    start: NodeId,
    goal: NodeId,
    heuristic: &[usize],
    constraints: &[Constraint],
    min_arrival_time: usize,
    stats: &mut Stats,
    deadline: &Deadline,
) -> Option<Path> {
    let max_constraint_time = constraints
        .iter()
        .map(|c| c.time)
        .max()
        .unwrap_or(0)
        .max(min_arrival_time);

    let mut open = BinaryHeap::new();
    let mut best_g: HashMap<(NodeId, usize), usize> = HashMap::new();
    let mut trace: HashMap<(NodeId, usize), (NodeId, usize)> = HashMap::new();

    best_g.insert((start, 0), 0);
    open.push(SearchNode { node: start, time: 0, g: 0, h: heuristic[start] });

    while let Some(current) = open.pop() {
        if deadline.expired() {
            return None;
        }
        stats.low_level_expand_nodes += 1;

        if current.node == goal && current.time >= max_constraint_time {
            return Some(reconstruct(&trace, (current.node, current.time)));
        }

        if *best_g.get(&(current.node, current.time)).unwrap_or(&usize::MAX) < current.g {
            continue;
        }

        let next_time = current.time + 1;
        let mut candidates: Vec<NodeId> = graph.neighbors(current.node).to_vec();
        candidates.push(current.node); // wait

        for next_node in candidates {
            if is_blocked(constraints, current.node, next_node, next_time) {
                continue;
            }
            let tentative_g = current.g + 1;
            let key = (next_node, next_time);
            if tentative_g < *best_g.get(&key).unwrap_or(&usize::MAX) {
                best_g.insert(key, tentative_g);
                trace.insert(key, (current.node, current.time));
                open.push(SearchNode {
                    node: next_node,
                    time: next_time,
                    g: tentative_g,
                    h: heuristic[next_node],
                });
            }
        }
    }

    None
}

fn is_blocked(constraints: &[Constraint], from: NodeId, to: NodeId, time: usize) -> bool {
    constraints.iter().any(|c| c.is_violated(to, Some(from), time))
}

fn reconstruct(trace: &HashMap<(NodeId, usize), (NodeId, usize)>, mut current: (NodeId, usize)) -> Path {
    let mut path = vec![current.0];
    while let Some(&prev) = trace.get(&current) {
        path.push(prev.0);
        current = prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn grid(rows: &[&str]) -> Graph {
        Graph::from_rows(&rows.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn finds_shortest_path_on_open_grid() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let start = graph.node_at(0, 0).unwrap();
        let goal = graph.node_at(4, 4).unwrap();
        let heuristic = graph.distances_from(goal);
        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));
        let path = space_time_astar(&graph, start, goal, &heuristic, &[], 0, &mut stats, &deadline).unwrap();
        assert_eq!(path.len() - 1, 8);
    }

    #[test]
    fn detours_around_a_vertex_constraint() {
        let graph = grid(&[".....", ".....", "....."]);
        let start = graph.node_at(0, 0).unwrap();
        let goal = graph.node_at(2, 0).unwrap();
        let heuristic = graph.distances_from(goal);
        let blocked = graph.node_at(1, 0).unwrap();
        let constraints = vec![Constraint::vertex(0, blocked, 1)];
        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));
        let path =
            space_time_astar(&graph, start, goal, &heuristic, &constraints, 0, &mut stats, &deadline).unwrap();
        assert!(path.len() - 1 > 2);
        assert_ne!(path[1], blocked);
    }

    #[test]
    fn returns_none_when_disconnected() {
        let graph = grid(&[".@."]);
        let start = graph.node_at(0, 0).unwrap();
        let goal = graph.node_at(2, 0).unwrap();
        let heuristic = graph.distances_from(goal);
        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));
        assert!(space_time_astar(&graph, start, goal, &heuristic, &[], 0, &mut stats, &deadline).is_none());
    }
}
