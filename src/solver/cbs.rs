//! Conflict-Based Search: high-level best-first tree search over constraint
//! sets (spec.md §4.2).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use tracing::{debug, trace};

use crate::constraint::{detect_conflicts, first_conflict, Constraint};
use crate::error::MapfResult;
use crate::path::{Path, Paths, Plan};
use crate::problem::Problem;
use crate::search::space_time_astar;
use crate::stat::{Deadline, Stats};

use super::{goal_heuristics, Solver};

struct HighLevelNode {
    id: usize,
    constraints: Vec<Constraint>,
    paths: Paths,
    soc: usize,
    num_conflicts: usize,
}

impl PartialEq for HighLevelNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for HighLevelNode {}

impl Ord for HighLevelNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse every field for min-first order.
        other
            .soc
            .cmp(&self.soc)
            .then_with(|| other.num_conflicts.cmp(&self.num_conflicts))
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for HighLevelNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Plain CBS: optimal w.r.t. sum-of-costs among solutions it returns before
/// hitting `maxCompTime` or the node cap.
pub struct Cbs {
    verbose: bool,
    solved: bool,
    plan: Option<Plan>,
    stats: Stats,
    node_cap: usize,
}

impl Cbs {
    pub fn new() -> Self {
        Cbs {
            verbose: false,
            solved: false,
            plan: None,
            stats: Stats::default(),
            node_cap: 1_000_000,
        }
    }

    pub fn with_node_cap(mut self, cap: usize) -> Self {
        self.node_cap = cap;
        self
    }
}

impl Default for Cbs {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for Cbs {
    fn solve(&mut self, problem: &Problem) -> MapfResult<()> {
        let start_time = Instant::now();
        self.solved = false;
        self.plan = None;
        self.stats = Stats::default();

        if problem.num_agents == 0 {
            self.solved = true;
            self.plan = Some(Plan { configs: vec![] });
            return Ok(());
        }

        let agents = problem.agents();
        let goals: Vec<_> = agents.iter().map(|a| a.goal).collect();
        let heuristics = goal_heuristics(&problem.graph, &goals);
        let deadline = Deadline::new(problem.max_comp_time);

        let mut next_id = 0usize;
        let mut open: BinaryHeap<HighLevelNode> = BinaryHeap::new();

        let mut root_paths = Vec::with_capacity(agents.len());
        for agent in &agents {
            let path = space_time_astar(
                &problem.graph,
                agent.start,
                agent.goal,
                &heuristics[agent.id],
                &[],
                0,
                &mut self.stats,
                &deadline,
            );
            match path {
                Some(p) => root_paths.push(p),
                None => return Ok(()), // unsolved: some agent has no path at all
            }
        }
        let root_paths = Paths::new(root_paths);
        let root_conflicts = detect_conflicts(&root_paths, &goals).len();
        let root_soc = root_paths.soc(&goals);
        open.push(HighLevelNode {
            id: next_id,
            constraints: Vec::new(),
            paths: root_paths,
            soc: root_soc,
            num_conflicts: root_conflicts,
        });
        next_id += 1;

        while let Some(node) = open.pop() {
            if deadline.expired() {
                debug!("CBS: deadline exceeded after {} high-level nodes", self.stats.high_level_expand_nodes);
                return Ok(());
            }
            if next_id > self.node_cap {
                debug!("CBS: high-level node cap {} reached", self.node_cap);
                return Ok(());
            }
            self.stats.high_level_expand_nodes += 1;

            let conflicts = detect_conflicts(&node.paths, &goals);
            let Some(conflict) = first_conflict(&conflicts) else {
                self.stats.costs = node.soc;
                self.stats.time_ms = start_time.elapsed().as_millis();
                self.solved = true;
                self.plan = Some(node.paths.to_plan());
                return Ok(());
            };
            trace!(?conflict, "CBS: branching on conflict");

            for for_agent_1 in [true, false] {
                let branch_constraint = conflict.branch_constraint(for_agent_1);
                let agent = branch_constraint.agent;

                let mut constraints = node.constraints.clone();
                constraints.push(branch_constraint);
                let agent_constraints: Vec<Constraint> =
                    constraints.iter().filter(|c| c.agent == agent).copied().collect();

                let new_path: Option<Path> = space_time_astar(
                    &problem.graph,
                    agents[agent].start,
                    agents[agent].goal,
                    &heuristics[agent],
                    &agent_constraints,
                    0,
                    &mut self.stats,
                    &deadline,
                );

                let Some(new_path) = new_path else { continue };

                let mut paths = node.paths.clone();
                paths.insert(agent, new_path);
                let num_conflicts = detect_conflicts(&paths, &goals).len();
                let soc = paths.soc(&goals);

                open.push(HighLevelNode {
                    id: next_id,
                    constraints,
                    paths,
                    soc,
                    num_conflicts,
                });
                next_id += 1;
            }
        }

        self.stats.time_ms = start_time.elapsed().as_millis();
        Ok(())
    }

    fn succeed(&self) -> bool {
        self.solved
    }

    fn get_solution(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::GoalSpec;
    use std::rc::Rc;
    use std::time::Duration;

    fn grid(rows: &[&str]) -> Rc<crate::graph::Graph> {
        Rc::new(crate::graph::Graph::from_rows(
            &rows.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        ))
    }

    #[test]
    fn solves_corridor_swap_with_detour() {
        let graph = grid(&["...", "..."]);
        let a_start = graph.node_at(0, 0).unwrap();
        let a_goal = graph.node_at(2, 1).unwrap();
        let b_start = graph.node_at(2, 0).unwrap();
        let b_goal = graph.node_at(0, 1).unwrap();
        let problem = Problem::new(
            graph,
            vec![a_start, b_start],
            GoalSpec::Labeled(vec![a_goal, b_goal]),
            50,
            Duration::from_secs(5),
        )
        .unwrap();

        let mut cbs = Cbs::new();
        cbs.solve(&problem).unwrap();
        assert!(cbs.succeed());
        let plan = cbs.get_solution().unwrap();
        assert!(plan.validate(&problem).is_ok());
    }

    #[test]
    fn deadlock_corridor_is_reported_unsolved() {
        let graph = grid(&["....."]);
        let a_start = graph.node_at(0, 0).unwrap();
        let a_goal = graph.node_at(4, 0).unwrap();
        let b_start = graph.node_at(4, 0).unwrap();
        let b_goal = graph.node_at(0, 0).unwrap();
        let problem = Problem::new(
            graph,
            vec![a_start, b_start],
            GoalSpec::Labeled(vec![a_goal, b_goal]),
            6,
            Duration::from_millis(500),
        )
        .unwrap();
        let mut cbs = Cbs::new();
        cbs.solve(&problem).unwrap();
        assert!(!cbs.succeed());
    }

    #[test]
    fn single_agent_open_grid_is_optimal() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let s = graph.node_at(0, 0).unwrap();
        let g = graph.node_at(4, 4).unwrap();
        let problem =
            Problem::new(graph, vec![s], GoalSpec::Labeled(vec![g]), 20, Duration::from_secs(5)).unwrap();
        let mut cbs = Cbs::new();
        cbs.solve(&problem).unwrap();
        assert!(cbs.succeed());
        assert_eq!(cbs.stats().costs, 8);
    }
}
