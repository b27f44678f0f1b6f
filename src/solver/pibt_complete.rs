//! PIBT_COMPLETE: outer loop wrapping PIBT with deadline-driven re-seeding,
//! falling back to CBS for completeness when PIBT alone cannot find a
//! collision-free priority order in time (spec.md §4.6).

use std::time::Instant;

use tracing::debug;

use crate::error::MapfResult;
use crate::path::Plan;
use crate::problem::Problem;
use crate::stat::{Deadline, Stats};

use super::cbs::Cbs;
use super::pibt::Pibt;
use super::Solver;

pub struct PibtComplete {
    verbose: bool,
    solved: bool,
    plan: Option<Plan>,
    stats: Stats,
    base_seed: u64,
}

impl PibtComplete {
    pub fn new(base_seed: u64) -> Self {
        PibtComplete { verbose: false, solved: false, plan: None, stats: Stats::default(), base_seed }
    }
}

impl Solver for PibtComplete {
    fn solve(&mut self, problem: &Problem) -> MapfResult<()> {
        let start_time = Instant::now();
        self.solved = false;
        self.plan = None;
        self.stats = Stats::default();

        let deadline = Deadline::new(problem.max_comp_time);
        let mut attempt = 0u64;

        while !deadline.expired() {
            let mut pibt = Pibt::new(self.base_seed.wrapping_add(attempt));
            pibt.solve(problem)?;
            self.stats.high_level_expand_nodes += pibt.stats().high_level_expand_nodes;
            if pibt.succeed() {
                self.solved = true;
                self.stats.costs = pibt.stats().costs;
                self.plan = pibt.get_solution().cloned();
                self.stats.time_ms = start_time.elapsed().as_millis();
                return Ok(());
            }
            attempt += 1;
            debug!(attempt, "PIBT_COMPLETE: priority order did not resolve, re-seeding");
        }

        // Residual deadlock: fall back to a centralized planner for completeness.
        debug!("PIBT_COMPLETE: falling back to CBS after {attempt} re-seeds");
        let mut cbs = Cbs::new();
        cbs.solve(problem)?;
        self.stats.high_level_expand_nodes += cbs.stats().high_level_expand_nodes;
        self.solved = cbs.succeed();
        self.stats.costs = cbs.stats().costs;
        self.plan = cbs.get_solution().cloned();
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
    fn falls_back_to_completeness_on_corridor_swap() {
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
        let mut solver = PibtComplete::new(1);
        solver.solve(&problem).unwrap();
        assert!(solver.succeed());
        assert!(solver.get_solution().unwrap().validate(&problem).is_ok());
    }
}
