//! Per-agent and joint path/plan data structures, cost metrics, and plan
//! validation (spec.md §3, §8).

use crate::error::MapfError;
use crate::graph::{Graph, NodeId};
use crate::problem::{GoalSpec, Problem};

/// `[v0, v1, ..., vT]` for one agent.
pub type Path = Vec<NodeId>;

/// Agents' positions at a single timestep. Invariant: no two entries equal.
pub type JointConfig = Vec<NodeId>;

/// The cost of a single agent's path given its goal: the timestep of final
/// arrival at `goal`, i.e. one past the last index where the agent is not
/// yet permanently settled (spec.md §3).
pub fn path_cost(path: &Path, goal: NodeId) -> usize {
    match path.iter().rposition(|&v| v != goal) {
        Some(last_departure) => last_departure + 1,
        None => 0,
    }
}

fn position_at(path: &Path, t: usize) -> NodeId {
    *path.get(t).unwrap_or_else(|| path.last().expect("path must be non-empty"))
}

/// `N` per-agent paths, conceptually padded by repeating the last node out
/// to a common makespan.
#[derive(Debug, Clone, Default)]
pub struct Paths {
    pub paths: Vec<Path>,
}

impl Paths {
    pub fn new(paths: Vec<Path>) -> Self {
        Paths { paths }
    }

    pub fn makespan(&self) -> usize {
        self.paths.iter().map(|p| p.len().saturating_sub(1)).max().unwrap_or(0)
    }

    pub fn soc(&self, goals: &[NodeId]) -> usize {
        self.paths
            .iter()
            .zip(goals)
            .map(|(path, &goal)| path_cost(path, goal))
            .sum()
    }

    pub fn position(&self, agent: usize, t: usize) -> NodeId {
        position_at(&self.paths[agent], t)
    }

    /// Number of vertex + swap conflicts between `candidate` (agent `i`'s
    /// hypothetical path) and every other agent's stored path.
    pub fn count_conflict(&self, i: usize, candidate: &Path) -> usize {
        let max_len = self
            .paths
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, p)| p.len())
            .chain(std::iter::once(candidate.len()))
            .max()
            .unwrap_or(0);

        let mut conflicts = 0;
        for (j, other) in self.paths.iter().enumerate() {
            if j == i {
                continue;
            }
            for t in 0..max_len {
                let mine = position_at(candidate, t);
                let theirs = position_at(other, t);
                if mine == theirs {
                    conflicts += 1;
                }
                if t == 0 {
                    continue;
                }
                let mine_prev = position_at(candidate, t - 1);
                let theirs_prev = position_at(other, t - 1);
                if mine == theirs_prev && theirs == mine_prev {
                    conflicts += 1;
                }
            }
        }
        conflicts
    }

    pub fn insert(&mut self, agent: usize, path: Path) {
        self.paths[agent] = path;
    }

    /// Convert to a timestep-indexed [`Plan`], padding every agent's path to
    /// the joint makespan.
    pub fn to_plan(&self) -> Plan {
        let makespan = self.makespan();
        let configs = (0..=makespan)
            .map(|t| {
                self.paths
                    .iter()
                    .map(|path| position_at(path, t))
                    .collect()
            })
            .collect();
        Plan { configs }
    }
}

/// A sequence of joint configurations, one per timestep.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub configs: Vec<JointConfig>,
}

impl Plan {
    pub fn makespan(&self) -> usize {
        self.configs.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Checks every invariant in spec.md §3/§8: start/goal coverage, no
    /// vertex/swap conflicts, and that every per-agent transition is a stay
    /// or a move to a graph neighbor.
    pub fn validate(&self, problem: &Problem) -> Result<(), MapfError> {
        if problem.num_agents == 0 {
            return Ok(());
        }

        let first = self.configs.first().ok_or_else(|| {
            MapfError::InvalidResult("plan has no initial configuration".to_string())
        })?;
        if first != &problem.starts {
            return Err(MapfError::InvalidResult(
                "initial configuration does not match problem starts".to_string(),
            ));
        }

        let last = self.configs.last().unwrap();
        match &problem.goals {
            GoalSpec::Labeled(goals) => {
                if last != goals {
                    return Err(MapfError::InvalidResult(
                        "terminal configuration does not match problem goals".to_string(),
                    ));
                }
            }
            GoalSpec::Unlabeled(pool) => {
                let mut covered: Vec<NodeId> = last.clone();
                covered.sort_unstable();
                let mut pool_sorted = pool.clone();
                pool_sorted.sort_unstable();
                if covered != pool_sorted {
                    return Err(MapfError::InvalidResult(
                        "terminal configuration does not cover the goal pool".to_string(),
                    ));
                }
            }
        }

        if self.makespan() > problem.max_timestep {
            return Err(MapfError::InvalidResult(format!(
                "makespan {} exceeds max_timestep {}",
                self.makespan(),
                problem.max_timestep
            )));
        }

        self.validate_transitions(&problem.graph)
    }

    fn validate_transitions(&self, graph: &Graph) -> Result<(), MapfError> {
        for t in 0..self.configs.len() {
            let config = &self.configs[t];

            let mut seen = std::collections::HashSet::new();
            for &node in config {
                if !seen.insert(node) {
                    return Err(MapfError::InvalidResult(format!(
                        "vertex conflict at timestep {t} on node {node}"
                    )));
                }
            }

            if t == 0 {
                continue;
            }
            let prev = &self.configs[t - 1];

            for agent in 0..config.len() {
                let from = prev[agent];
                let to = config[agent];
                if from != to && !graph.neighbors(from).contains(&to) {
                    return Err(MapfError::InvalidResult(format!(
                        "agent {agent} made an illegal move at timestep {t}"
                    )));
                }
            }

            for a in 0..config.len() {
                for b in (a + 1)..config.len() {
                    if prev[a] == config[b] && prev[b] == config[a] {
                        return Err(MapfError::InvalidResult(format!(
                            "swap conflict between agents {a} and {b} at timestep {t}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::GoalSpec;
    use std::rc::Rc;
    use std::time::Duration;

    fn grid(rows: &[&str]) -> Rc<Graph> {
        Rc::new(Graph::from_rows(&rows.iter().map(|s| s.to_string()).collect::<Vec<_>>()))
    }

    #[test]
    fn cost_counts_final_arrival_timestep() {
        let path = vec![0usize, 1, 2, 2, 2];
        assert_eq!(path_cost(&path, 2), 2);
        let all_goal = vec![5usize; 4];
        assert_eq!(path_cost(&all_goal, 5), 0);
    }

    #[test]
    fn validate_accepts_trivial_single_cell_plan() {
        let graph = grid(&["."]);
        let s = graph.node_at(0, 0).unwrap();
        let problem = Problem::new(
            graph,
            vec![s],
            GoalSpec::Labeled(vec![s]),
            0,
            Duration::from_secs(1),
        )
        .unwrap();
        let plan = Plan { configs: vec![vec![s]] };
        assert!(plan.validate(&problem).is_ok());
    }

    #[test]
    fn validate_rejects_swap_conflict() {
        let graph = grid(&[".."]);
        let a = graph.node_at(0, 0).unwrap();
        let b = graph.node_at(1, 0).unwrap();
        let problem = Problem::new(
            graph,
            vec![a, b],
            GoalSpec::Labeled(vec![b, a]),
            5,
            Duration::from_secs(1),
        )
        .unwrap();
        let plan = Plan {
            configs: vec![vec![a, b], vec![b, a]],
        };
        assert!(plan.validate(&problem).is_err());
    }

    #[test]
    fn empty_plan_for_zero_agents_succeeds() {
        let graph = grid(&["."]);
        let problem = Problem::new(
            graph,
            vec![],
            GoalSpec::Labeled(vec![]),
            0,
            Duration::from_secs(1),
        )
        .unwrap();
        let plan = Plan { configs: vec![] };
        assert!(plan.validate(&problem).is_ok());
    }
}
