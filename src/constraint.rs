//! Constraint/conflict algebra shared by the CBS family (spec.md §3, §4.2-4.4,
//! "LibCBS" in the component table).

use crate::graph::NodeId;
use crate::path::Paths;

/// A single-agent restriction derived from a conflict: agent `agent` must
/// not occupy `node` at `time` (vertex), or must not traverse `from -> node`
/// at `time` (edge, when `from.is_some()`). `permanent` constraints (from a
/// target conflict) forbid `node` at every `t >= time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub agent: usize,
    pub node: NodeId,
    pub from: Option<NodeId>,
    pub time: usize,
    pub permanent: bool,
}

impl Constraint {
    pub fn vertex(agent: usize, node: NodeId, time: usize) -> Self {
        Constraint { agent, node, from: None, time, permanent: false }
    }

    pub fn edge(agent: usize, from: NodeId, node: NodeId, time: usize) -> Self {
        Constraint { agent, node, from: Some(from), time, permanent: false }
    }

    pub fn permanent(agent: usize, node: NodeId, time: usize) -> Self {
        Constraint { agent, node, from: None, time, permanent: true }
    }

    /// Does stepping into `node` at `time` (optionally from `from`) violate
    /// this constraint for its agent?
    pub fn is_violated(&self, node: NodeId, from: Option<NodeId>, time: usize) -> bool {
        if node != self.node {
            return false;
        }
        if self.from.is_some() && self.from != from {
            return false;
        }
        if self.permanent {
            time >= self.time
        } else {
            time == self.time
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    Vertex { position: NodeId, time: usize },
    Edge { u: NodeId, v: NodeId, time: usize },
    /// One agent has already permanently settled at `position` (its goal);
    /// the other is interfering with it. `settled_agent` is the one at its goal.
    Target { position: NodeId, time: usize, settled_agent: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conflict {
    pub agent_1: usize,
    pub agent_2: usize,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CardinalType {
    Cardinal,
    SemiCardinal,
    NonCardinal,
}

impl Conflict {
    /// Build the pair of constraints branching on this conflict, one per
    /// involved agent (spec.md §4.2). `for_agent_1` picks which side to
    /// return; callers create one child high-level node per side.
    pub fn branch_constraint(&self, for_agent_1: bool) -> Constraint {
        let agent = if for_agent_1 { self.agent_1 } else { self.agent_2 };
        match self.kind {
            ConflictKind::Vertex { position, time } => Constraint::vertex(agent, position, time),
            ConflictKind::Edge { u, v, time } => {
                // agent_1 traverses v->u during the conflicting step; forbid
                // each side its own directed edge.
                if for_agent_1 {
                    Constraint::edge(agent, v, u, time)
                } else {
                    Constraint::edge(agent, u, v, time)
                }
            }
            ConflictKind::Target { position, time, settled_agent } => {
                if agent == settled_agent {
                    // The settled agent only needs to step off its goal at
                    // this one timestep and may return afterward.
                    Constraint::vertex(agent, position, time)
                } else {
                    // The mover is permanently barred from the settled
                    // agent's goal from this timestep onward.
                    Constraint::permanent(agent, position, time)
                }
            }
        }
    }
}

/// Detect every vertex/edge/target conflict between all pairs of paths
/// (spec.md §4.2's root-conflict detection, generalized from the teacher's
/// `detect_conflicts`).
pub fn detect_conflicts(paths: &Paths, goals: &[NodeId]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let n = paths.paths.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let path_i = &paths.paths[i];
            let path_j = &paths.paths[j];
            let max_len = path_i.len().max(path_j.len());

            for t in 1..max_len {
                let pos_i = *path_i.get(t).unwrap_or_else(|| path_i.last().unwrap());
                let pos_j = *path_j.get(t).unwrap_or_else(|| path_j.last().unwrap());

                if pos_i == pos_j {
                    if t >= path_i.len() - 1 && pos_i == goals[i] {
                        conflicts.push(Conflict {
                            agent_1: i,
                            agent_2: j,
                            kind: ConflictKind::Target { position: pos_i, time: t, settled_agent: i },
                        });
                    } else if t >= path_j.len() - 1 && pos_j == goals[j] {
                        conflicts.push(Conflict {
                            agent_1: i,
                            agent_2: j,
                            kind: ConflictKind::Target { position: pos_j, time: t, settled_agent: j },
                        });
                    } else {
                        conflicts.push(Conflict {
                            agent_1: i,
                            agent_2: j,
                            kind: ConflictKind::Vertex { position: pos_i, time: t },
                        });
                    }
                }

                if t >= path_i.len() || t >= path_j.len() {
                    continue;
                }
                let prev_i = path_i[t - 1];
                let prev_j = path_j[t - 1];
                if prev_i == pos_j && prev_j == pos_i {
                    conflicts.push(Conflict {
                        agent_1: i,
                        agent_2: j,
                        kind: ConflictKind::Edge { u: pos_i, v: prev_i, time: t },
                    });
                }
            }
        }
    }

    conflicts
}

/// Order conflicts by topmost agent pair and smallest timestep, matching the
/// "pick the first conflict" rule in spec.md §4.2.
pub fn first_conflict(conflicts: &[Conflict]) -> Option<&Conflict> {
    conflicts.iter().min_by_key(|c| (c.agent_1, c.agent_2, conflict_time(c)))
}

fn conflict_time(c: &Conflict) -> usize {
    match c.kind {
        ConflictKind::Vertex { time, .. } => time,
        ConflictKind::Edge { time, .. } => time,
        ConflictKind::Target { time, .. } => time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::path::Paths;
    use crate::search::space_time_astar;
    use crate::stat::{Deadline, Stats};
    use std::time::Duration;

    fn grid(rows: &[&str]) -> Graph {
        Graph::from_rows(&rows.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn detects_vertex_conflict() {
        let paths = Paths::new(vec![vec![0, 1, 2], vec![5, 1, 6]]);
        let conflicts = detect_conflicts(&paths, &[2, 6]);
        assert_eq!(conflicts.len(), 1);
        assert!(matches!(conflicts[0].kind, ConflictKind::Vertex { time: 1, .. }));
    }

    #[test]
    fn detects_edge_swap_conflict() {
        let paths = Paths::new(vec![vec![0, 1], vec![1, 0]]);
        let conflicts = detect_conflicts(&paths, &[1, 0]);
        assert!(conflicts.iter().any(|c| matches!(c.kind, ConflictKind::Edge { .. })));
    }

    #[test]
    fn constraint_permanent_blocks_all_future_times() {
        let c = Constraint::permanent(0, 7, 3);
        assert!(!c.is_violated(7, None, 2));
        assert!(c.is_violated(7, None, 3));
        assert!(c.is_violated(7, None, 100));
    }

    /// Drive a genuine target conflict (one agent parked at its own goal,
    /// another passing through it) and check both branch constraints leave
    /// a solvable subproblem: the settled agent only needs to step off
    /// momentarily, the mover must permanently detour around the goal cell.
    #[test]
    fn target_conflict_branch_constraints_remain_solvable_for_both_agents() {
        let graph = grid(&["...", "..."]);
        let a_start = graph.node_at(2, 0).unwrap();
        let a_goal = graph.node_at(1, 0).unwrap();
        let b_start = graph.node_at(0, 0).unwrap();
        let b_goal = graph.node_at(2, 0).unwrap();

        // A settles on its goal at t=1 and stays; B passes through that same
        // cell at t=1 on its way across the top row.
        let paths = Paths::new(vec![vec![a_start, a_goal], vec![b_start, a_goal, b_goal]]);
        let conflicts = detect_conflicts(&paths, &[a_goal, b_goal]);
        assert_eq!(conflicts.len(), 1);
        let conflict = conflicts[0];
        assert!(matches!(conflict.kind, ConflictKind::Target { settled_agent: 0, .. }));

        let settled_constraint = conflict.branch_constraint(true); // agent_1 == settled agent
        let mover_constraint = conflict.branch_constraint(false);
        assert!(!settled_constraint.permanent, "the settled agent must only be asked to step off transiently");
        assert!(mover_constraint.permanent, "the mover must be permanently barred from the settled agent's goal");

        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));

        let a_heuristic = graph.distances_from(a_goal);
        let replanned_a = space_time_astar(
            &graph,
            a_start,
            a_goal,
            &a_heuristic,
            &[settled_constraint],
            0,
            &mut stats,
            &deadline,
        );
        assert!(
            replanned_a.is_some(),
            "a transient step-off constraint must not strand the settled agent off its own goal"
        );

        let b_heuristic = graph.distances_from(b_goal);
        let replanned_b = space_time_astar(
            &graph,
            b_start,
            b_goal,
            &b_heuristic,
            &[mover_constraint],
            0,
            &mut stats,
            &deadline,
        );
        assert!(
            replanned_b.is_some(),
            "the mover must still be able to detour around the settled agent's goal"
        );
    }
}
