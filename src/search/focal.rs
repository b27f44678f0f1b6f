//! Focal-search space-time A* for ECBS's low level (spec.md §4.4): OPEN
//! orders by `f = g + h`, FOCAL re-orders the bounded-suboptimal subset
//! `f <= w * f_min` by conflict count against the other agents' current paths.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::constraint::Constraint;
use crate::graph::{Graph, NodeId};
use crate::path::{Path, Paths};
use crate::stat::{Deadline, Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    node: NodeId,
    time: usize,
    g: usize,
    h: usize,
}

impl OpenEntry {
    fn f(&self) -> usize {
        self.g + self.h
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f().cmp(&self.f()).then_with(|| other.g.cmp(&self.g))
    }
}
impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FocalEntry {
    node: NodeId,
    time: usize,
    g: usize,
    h_open: usize,
    h_focal: usize,
}

impl Ord for FocalEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .h_focal
            .cmp(&self.h_focal)
            .then_with(|| (other.g + other.h_open).cmp(&(self.g + self.h_open)))
    }
}
impl PartialOrd for FocalEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Number of vertex/edge conflicts a move into `node` at `time` (arriving
/// from `from`) introduces against every other agent's current path.
fn conflicts_with_others(
    agent: usize,
    node: NodeId,
    from: NodeId,
    time: usize,
    other_paths: &Paths,
) -> usize {
    if time == 0 {
        return 0;
    }
    let mut count = 0;
    for (j, path) in other_paths.paths.iter().enumerate() {
        if j == agent {
            continue;
        }
        let other_here = *path.get(time).unwrap_or_else(|| path.last().unwrap());
        if other_here == node {
            count += 1;
        }
        let other_prev = *path.get(time - 1).unwrap_or_else(|| path.last().unwrap());
        if other_here == from && other_prev == node {
            count += 1;
        }
    }
    count
}

/// Result of a focal-search low-level solve: the path found plus the open
/// list's `f_min` at the moment of termination (used to re-derive the
/// high-level node's aggregate lower bound, per spec.md §4.4).
pub struct FocalResult {
    pub path: Path,
    pub f_min: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn focal_space_time_astar(
    graph: &Graph,
    agent: usize,
    start: NodeId,
    goal: NodeId,
    heuristic: &[usize],
    constraints: &[Constraint],
    min_arrival_time: usize,
    suboptimality: f64,
    other_paths: &Paths,
    stats: &mut Stats,
    deadline: &Deadline,
) -> Option<FocalResult> {
    let max_constraint_time = constraints
        .iter()
        .map(|c| c.time)
        .max()
        .unwrap_or(0)
        .max(min_arrival_time);

    let mut open: BinaryHeap<OpenEntry> = BinaryHeap::new();
    let mut focal: BinaryHeap<FocalEntry> = BinaryHeap::new();
    let mut best_g: HashMap<(NodeId, usize), usize> = HashMap::new();
    let mut generated: HashMap<(NodeId, usize), (usize, usize)> = HashMap::new(); // (g, h_open)
    let mut trace: HashMap<(NodeId, usize), (NodeId, usize)> = HashMap::new();

    best_g.insert((start, 0), 0);
    let start_h = heuristic[start];
    open.push(OpenEntry { node: start, time: 0, g: 0, h: start_h });
    generated.insert((start, 0), (0, start_h));
    focal.push(FocalEntry {
        node: start,
        time: 0,
        g: 0,
        h_open: start_h,
        h_focal: 0,
    });

    let mut f_min = start_h;

    while let Some(current) = focal.pop() {
        if deadline.expired() {
            return None;
        }
        if *best_g.get(&(current.node, current.time)).unwrap_or(&usize::MAX) != current.g {
            continue; // stale, superseded by a cheaper g
        }
        stats.low_level_expand_nodes += 1;

        if current.node == goal && current.time >= max_constraint_time {
            let path = reconstruct(&trace, (current.node, current.time));
            return Some(FocalResult { path, f_min });
        }

        let next_time = current.time + 1;
        let mut candidates: Vec<NodeId> = graph.neighbors(current.node).to_vec();
        candidates.push(current.node);

        for next_node in candidates {
            if constraints.iter().any(|c| c.is_violated(next_node, Some(current.node), next_time)) {
                continue;
            }
            let tentative_g = current.g + 1;
            let key = (next_node, next_time);
            if tentative_g < *best_g.get(&key).unwrap_or(&usize::MAX) {
                best_g.insert(key, tentative_g);
                trace.insert(key, (current.node, current.time));
                let h_open = heuristic[next_node];
                generated.insert(key, (tentative_g, h_open));
                open.push(OpenEntry { node: next_node, time: next_time, g: tentative_g, h: h_open });

                if (tentative_g + h_open) as f64 <= suboptimality * f_min as f64 {
                    let h_focal =
                        conflicts_with_others(agent, next_node, current.node, next_time, other_paths);
                    focal.push(FocalEntry {
                        node: next_node,
                        time: next_time,
                        g: tentative_g,
                        h_open,
                        h_focal,
                    });
                }
            }
        }

        // Recompute f_min from OPEN, discarding stale (superseded) entries.
        let mut new_f_min = f_min;
        while let Some(top) = open.peek() {
            let live = matches!(best_g.get(&(top.node, top.time)), Some(&g) if g == top.g);
            if !live {
                open.pop();
                continue;
            }
            new_f_min = top.f();
            break;
        }

        if new_f_min > f_min {
            for (&(node, time), &(g, h_open)) in generated.iter() {
                let live = matches!(best_g.get(&(node, time)), Some(&bg) if bg == g);
                if !live {
                    continue;
                }
                let f = g + h_open;
                if (f as f64) > suboptimality * f_min as f64 && (f as f64) <= suboptimality * new_f_min as f64
                {
                    let h_focal = conflicts_with_others(
                        agent,
                        node,
                        trace.get(&(node, time)).map(|&(p, _)| p).unwrap_or(node),
                        time,
                        other_paths,
                    );
                    focal.push(FocalEntry { node, time, g, h_open, h_focal });
                }
            }
            f_min = new_f_min;
        }
    }

    None
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
    fn finds_a_path_with_no_other_agents() {
        let graph = grid(&[".....", ".....", "....."]);
        let start = graph.node_at(0, 0).unwrap();
        let goal = graph.node_at(4, 2).unwrap();
        let heuristic = graph.distances_from(goal);
        let other_paths = Paths::new(vec![]);
        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));
        let result = focal_space_time_astar(
            &graph, 0, start, goal, &heuristic, &[], 0, 1.5, &other_paths, &mut stats, &deadline,
        )
        .unwrap();
        assert_eq!(result.path.first().copied(), Some(start));
        assert_eq!(result.path.last().copied(), Some(goal));
    }

    #[test]
    fn bounded_suboptimal_path_never_exceeds_w_times_optimal() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let start = graph.node_at(0, 0).unwrap();
        let goal = graph.node_at(4, 4).unwrap();
        let heuristic = graph.distances_from(goal);
        let optimal = heuristic[start];
        let other_paths = Paths::new(vec![]);
        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));
        let w = 1.5;
        let result = focal_space_time_astar(
            &graph, 0, start, goal, &heuristic, &[], 0, w, &other_paths, &mut stats, &deadline,
        )
        .unwrap();
        assert!((result.path.len() - 1) as f64 <= w * optimal as f64);
    }
}
