//! GoalSwapper / NaiveGoalSwapper: the online goal-swap rule for unlabeled
//! MAPF (spec.md §4.9), grounded in `naive_goal_swapper.cpp`. Both variants
//! run the identical per-timestep rule; they differ only in how "who is
//! standing on this cell" is looked up.

use std::collections::HashMap;
use std::time::Instant;

use tracing::trace;

use crate::error::MapfResult;
use crate::graph::NodeId;
use crate::path::{Path, Paths, Plan};
use crate::problem::Problem;
use crate::stat::{Deadline, Stats};

use super::goal_allocator;
use super::Solver;

trait Occupancy {
    fn find_occupant(&self, positions: &[NodeId], node: NodeId, exclude: usize) -> Option<usize>;
    fn on_move(&mut self, agent: usize, from: NodeId, to: NodeId);
}

/// O(1) "who is here" via a maintained `node -> agent` map.
#[derive(Default)]
struct IndexedOccupancy {
    at: HashMap<NodeId, usize>,
}

impl IndexedOccupancy {
    fn seeded(positions: &[NodeId]) -> Self {
        let at = positions.iter().enumerate().map(|(a, &p)| (p, a)).collect();
        IndexedOccupancy { at }
    }
}

impl Occupancy for IndexedOccupancy {
    fn find_occupant(&self, _positions: &[NodeId], node: NodeId, exclude: usize) -> Option<usize> {
        self.at.get(&node).copied().filter(|&a| a != exclude)
    }

    fn on_move(&mut self, agent: usize, from: NodeId, to: NodeId) {
        self.at.remove(&from);
        self.at.insert(to, agent);
    }
}

/// O(A) linear scan over current positions; kept for testing (spec.md §4.9).
struct LinearScanOccupancy;

impl Occupancy for LinearScanOccupancy {
    fn find_occupant(&self, positions: &[NodeId], node: NodeId, exclude: usize) -> Option<usize> {
        positions.iter().position(|&p| p == node).filter(|&a| a != exclude)
    }

    fn on_move(&mut self, _agent: usize, _from: NodeId, _to: NodeId) {}
}

struct RunResult {
    solved: bool,
    configs: Vec<Vec<NodeId>>,
    final_goals: Vec<NodeId>,
}

fn run(problem: &Problem, mut occupancy: impl Occupancy, stats: &mut Stats) -> RunResult {
    let n = problem.num_agents;
    let mut positions = problem.starts.clone();
    let mut goals = goal_allocator::allocate(&problem.graph, &problem.starts, problem.goals.as_slice());
    let mut configs = vec![positions.clone()];
    let deadline = Deadline::new(problem.max_comp_time);

    if n == 0 {
        return RunResult { solved: true, configs, final_goals: goals };
    }

    for _ in 0..problem.max_timestep {
        if deadline.expired() {
            break;
        }
        for a in 0..n {
            if positions[a] == goals[a] {
                continue;
            }
            let heuristic = problem.graph.distances_from(goals[a]);
            let my_dist = heuristic[positions[a]];
            let Some(&u) = problem
                .graph
                .neighbors(positions[a])
                .iter()
                .find(|&&c| heuristic[c] + 1 == my_dist)
            else {
                continue; // should not happen: goal is reachable by construction
            };

            match occupancy.find_occupant(&positions, u, a) {
                None => {
                    occupancy.on_move(a, positions[a], u);
                    positions[a] = u;
                }
                Some(b) => {
                    if positions[b] == goals[b] {
                        goals.swap(a, b);
                        trace!(a, b, "GoalSwapper: swapped goals with parked agent");
                    }
                    // else: b is still moving, wait this step
                }
            }
        }
        stats.high_level_expand_nodes += 1;
        configs.push(positions.clone());

        if positions.iter().zip(&goals).all(|(p, g)| p == g) {
            return RunResult { solved: true, configs, final_goals: goals };
        }
    }

    RunResult { solved: false, configs, final_goals: goals }
}

fn finish(result: RunResult, problem: &Problem, start_time: Instant, stats: &mut Stats) -> (bool, Option<Plan>) {
    stats.time_ms = start_time.elapsed().as_millis();
    if !result.solved {
        return (false, None);
    }
    let paths: Vec<Path> = (0..problem.num_agents)
        .map(|a| result.configs.iter().map(|c| c[a]).collect())
        .collect();
    let paths = Paths::new(paths);
    stats.costs = paths.soc(&result.final_goals);
    (true, Some(Plan { configs: result.configs }))
}

macro_rules! goal_swapper_solver {
    ($name:ident, $occupancy:expr) => {
        pub struct $name {
            verbose: bool,
            solved: bool,
            plan: Option<Plan>,
            stats: Stats,
        }

        impl $name {
            pub fn new() -> Self {
                $name { verbose: false, solved: false, plan: None, stats: Stats::default() }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Solver for $name {
            fn solve(&mut self, problem: &Problem) -> MapfResult<()> {
                let start_time = Instant::now();
                self.stats = Stats::default();
                let occupancy = $occupancy(&problem.starts);
                let result = run(problem, occupancy, &mut self.stats);
                let (solved, plan) = finish(result, problem, start_time, &mut self.stats);
                self.solved = solved;
                self.plan = plan;
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
    };
}

goal_swapper_solver!(GoalSwapper, IndexedOccupancy::seeded);
goal_swapper_solver!(NaiveGoalSwapper, |_starts: &[NodeId]| LinearScanOccupancy);

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
    fn agents_already_at_goal_pool_solve_instantly() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let a = graph.node_at(0, 0).unwrap();
        let b = graph.node_at(4, 4).unwrap();
        let problem = Problem::new(
            graph,
            vec![a, b],
            GoalSpec::Unlabeled(vec![a, b]),
            10,
            Duration::from_secs(1),
        )
        .unwrap();
        let mut solver = GoalSwapper::new();
        solver.solve(&problem).unwrap();
        assert!(solver.succeed());
        assert_eq!(solver.stats().costs, 0);
        assert_eq!(solver.get_solution().unwrap().makespan(), 0);
    }

    #[test]
    fn naive_and_indexed_agree_on_simple_swap() {
        let graph = grid(&["....."]);
        let a = graph.node_at(0, 0).unwrap();
        let b = graph.node_at(4, 0).unwrap();
        let problem = Problem::new(
            graph,
            vec![a, b],
            GoalSpec::Unlabeled(vec![a, b]),
            20,
            Duration::from_secs(1),
        )
        .unwrap();

        let mut indexed = GoalSwapper::new();
        indexed.solve(&problem).unwrap();
        let mut naive = NaiveGoalSwapper::new();
        naive.solve(&problem).unwrap();

        assert_eq!(indexed.succeed(), naive.succeed());
        assert_eq!(indexed.stats().costs, naive.stats().costs);
    }
}
