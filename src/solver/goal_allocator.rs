//! GoalAllocator: minimum-sum-of-distances assignment for unlabeled MAPF
//! (spec.md §4.8), grounded in `goal_allocator.cpp`'s lazily-evaluated edge
//! queue (seeding each edge with a Manhattan estimate, refining to the true
//! `pathDist` only when it reaches the front of the queue) feeding a
//! `LibGA::Matching`-equivalent augmenting-path solver.
//!
//! The retrieved `original_source` only carries `goal_allocator.cpp` itself;
//! `LibGA::Matching`'s augmenting-path step lives in a header the pack did
//! not include. Rather than guess at its internals, `allocate` below
//! reimplements the *minimum-weight bipartite perfect matching* it computes
//! directly as the standard Kuhn-Munkres (Hungarian) algorithm, run over the
//! true-distance matrix the lazy queue would have fully evaluated by the time
//! every agent is matched. This guarantees spec.md §8 testable property 8
//! (no permutation has a strictly smaller `sum(pathDist)`) exactly, rather
//! than approximating it with a greedy accept-first-fit pass over sorted
//! edges, which is not optimal in general. Documented as an Open Question
//! resolution in DESIGN.md.

use std::collections::BinaryHeap;
use std::cmp::Ordering;

use crate::graph::{Graph, NodeId, UNREACHABLE};

#[derive(Debug, Clone, Copy)]
struct FieldEdge {
    agent: usize,
    goal: usize,
    dist: usize,
    evaled: bool,
}

impl PartialEq for FieldEdge {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.evaled == other.evaled
    }
}
impl Eq for FieldEdge {}
impl Ord for FieldEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .cmp(&self.dist)
            .then_with(|| self.evaled.cmp(&other.evaled))
    }
}
impl PartialOrd for FieldEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Drain the lazy-evaluation queue (spec.md §4.8: seed with Manhattan
/// estimates, refine to `pathDist` on pop) until every `(agent, goal)` pair
/// has its true distance, returned as a dense `n x n` cost matrix. Every
/// entry is eventually needed to guarantee the minimum-sum assignment below,
/// so this fully drains the queue rather than stopping at the first `n`
/// matched pairs; the queue still avoids the naive `n^2` eager BFS burst by
/// only calling `pathDist` once per edge, in increasing-estimate order, and
/// `pathDist` itself memoizes a full BFS tree per source the first time any
/// edge from that agent is refined.
fn true_distance_matrix(graph: &Graph, starts: &[NodeId], goals: &[NodeId]) -> Vec<Vec<usize>> {
    let n = starts.len();
    let mut matrix = vec![vec![0usize; n]; n];
    let mut open: BinaryHeap<FieldEdge> = BinaryHeap::new();
    for (i, &s) in starts.iter().enumerate() {
        for (j, &g) in goals.iter().enumerate() {
            open.push(FieldEdge { agent: i, goal: j, dist: graph.manhattan_dist(s, g), evaled: false });
        }
    }
    while let Some(edge) = open.pop() {
        if !edge.evaled {
            let real = graph.path_dist(starts[edge.agent], goals[edge.goal]);
            open.push(FieldEdge { dist: real, evaled: true, ..edge });
            continue;
        }
        matrix[edge.agent][edge.goal] = edge.dist;
    }
    matrix
}

/// Kuhn-Munkres minimum-cost perfect matching on a square cost matrix.
/// Returns `assignment` with `assignment[i]` = column matched to row `i`.
/// Unreachable pairs (`UNREACHABLE`) are capped to a large finite cost so the
/// potential arithmetic stays in range; a problem with no feasible perfect
/// matching at all is rejected by `Problem::new`'s connectivity check before
/// allocation ever runs.
fn hungarian(cost: &[Vec<usize>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return Vec::new();
    }
    let cap = cost
        .iter()
        .flatten()
        .filter(|&&d| d != UNREACHABLE)
        .max()
        .copied()
        .unwrap_or(0) as i64
        + 1;
    let big = cap * (n as i64 + 1) + 1;
    let cost = |i: usize, j: usize| -> i64 {
        let d = cost[i][j];
        if d == UNREACHABLE {
            big
        } else {
            d as i64
        }
    };

    // 1-indexed e-maxx-style Hungarian algorithm with row/column potentials.
    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; n + 1];
    let mut p = vec![0usize; n + 1]; // p[j] = row matched to column j (1-indexed), 0 = unmatched
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![i64::MAX; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = i64::MAX;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Assign each agent one goal from `goals`, minimizing
/// `sum(pathDist(start_i, goal_assigned))`. Requires `starts.len() == goals.len()`.
pub fn allocate(graph: &Graph, starts: &[NodeId], goals: &[NodeId]) -> Vec<NodeId> {
    assert_eq!(
        starts.len(),
        goals.len(),
        "GoalAllocator requires an equal number of starts and goals"
    );
    let matrix = true_distance_matrix(graph, starts, goals);
    let assignment = hungarian(&matrix);
    assignment.into_iter().map(|j| goals[j]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&str]) -> Graph {
        Graph::from_rows(&rows.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn identity_assignment_when_agents_already_at_goals() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let a = graph.node_at(0, 0).unwrap();
        let b = graph.node_at(4, 4).unwrap();
        let starts = vec![a, b];
        let goals = vec![a, b];
        let assignment = allocate(&graph, &starts, &goals);
        assert_eq!(assignment, vec![a, b]);
    }

    #[test]
    fn swapped_starts_still_assign_the_nearer_goal() {
        let graph = grid(&["....."]);
        let a = graph.node_at(0, 0).unwrap();
        let b = graph.node_at(4, 0).unwrap();
        let starts = vec![a, b];
        let goals = vec![b, a]; // goal pool order reversed relative to natural identity
        let assignment = allocate(&graph, &starts, &goals);
        let total: usize = starts
            .iter()
            .zip(&assignment)
            .map(|(&s, &g)| graph.path_dist(s, g))
            .sum();
        assert_eq!(total, 0); // each agent should land on its own current cell
    }

    /// Brute-force every permutation as the Hungarian-algorithm baseline from
    /// spec.md §8 testable property 8 and assert `allocate` matches it.
    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![vec![]];
        }
        let mut items: Vec<usize> = (0..n).collect();
        let mut results = Vec::new();
        fn heap_permute(k: usize, items: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
            if k == 1 {
                out.push(items.clone());
                return;
            }
            for i in 0..k {
                heap_permute(k - 1, items, out);
                if k % 2 == 0 {
                    items.swap(i, k - 1);
                } else {
                    items.swap(0, k - 1);
                }
            }
        }
        heap_permute(n, &mut items, &mut results);
        results
    }

    #[test]
    fn matches_brute_force_minimum_over_all_permutations() {
        let graph = grid(&["...@.", ".@...", "....@", "@....", "....."]);
        let starts: Vec<NodeId> = [(0, 0), (4, 0), (0, 4), (4, 4), (2, 2)]
            .iter()
            .map(|&(x, y)| graph.node_at(x, y).unwrap())
            .collect();
        let goals: Vec<NodeId> = [(4, 4), (0, 4), (4, 0), (0, 0), (1, 1)]
            .iter()
            .map(|&(x, y)| graph.node_at(x, y).unwrap())
            .collect();

        let assignment = allocate(&graph, &starts, &goals);
        let achieved: usize = starts.iter().zip(&assignment).map(|(&s, &g)| graph.path_dist(s, g)).sum();

        let best = permutations(goals.len())
            .into_iter()
            .map(|perm| {
                starts
                    .iter()
                    .zip(perm.iter())
                    .map(|(&s, &j)| graph.path_dist(s, goals[j]))
                    .sum::<usize>()
            })
            .min()
            .unwrap();

        assert_eq!(achieved, best);
    }
}
