//! PIBT: priority-inheritance rule for one-step joint moves (spec.md §4.5).
//! Decentralized, no high-level tree: one flat decision pass per timestep.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::error::MapfResult;
use crate::graph::{Graph, NodeId};
use crate::path::Plan;
use crate::problem::Problem;
use crate::stat::Stats;

use super::Solver;

/// Runs one PIBT step. Exposed so [`super::pibt_complete::PibtComplete`] can
/// drive the same per-timestep rule across re-seeded priority orders.
pub struct PibtStep<'a> {
    pub graph: &'a Graph,
    pub heuristics: &'a [Vec<usize>],
    pub goals: &'a [NodeId],
}

impl<'a> PibtStep<'a> {
    /// Advance every agent currently not at its goal by exactly one
    /// timestep, honoring priority inheritance. `priority` ranks agents
    /// (earlier = higher priority); ties were already broken when building it.
    pub fn step(&self, positions: &[NodeId], priority: &[usize], rng: &mut StdRng) -> Vec<NodeId> {
        let n = positions.len();
        let mut decided: HashMap<usize, NodeId> = HashMap::new();
        let mut visiting: HashSet<usize> = HashSet::new();

        for &agent in priority {
            if decided.contains_key(&agent) {
                continue;
            }
            visiting.clear();
            self.priority_inheritance(agent, None, positions, &mut decided, &mut visiting, rng);
        }

        (0..n).map(|a| *decided.get(&a).unwrap_or(&positions[a])).collect()
    }

    fn priority_inheritance(
        &self,
        agent: usize,
        parent: Option<usize>,
        positions: &[NodeId],
        decided: &mut HashMap<usize, NodeId>,
        visiting: &mut HashSet<usize>,
        rng: &mut StdRng,
    ) -> bool {
        visiting.insert(agent);

        let mut candidates: Vec<NodeId> = self.graph.neighbors(positions[agent]).to_vec();
        candidates.push(positions[agent]);
        candidates.shuffle(rng);
        candidates.sort_by_key(|&c| self.heuristics[agent][c]);

        for u in candidates {
            if decided.values().any(|&v| v == u) {
                continue;
            }
            // Would-be swap: some already-decided agent sits at u now and is
            // moving into our current cell.
            let causes_swap = decided
                .iter()
                .any(|(&b, &next)| positions[b] == u && next == positions[agent]);
            if causes_swap {
                continue;
            }

            if let Some(occupant) = (0..positions.len())
                .find(|&b| b != agent && positions[b] == u && !decided.contains_key(&b))
            {
                if visiting.contains(&occupant) {
                    continue; // cycle among undecided agents; try another candidate
                }
                let moved = self.priority_inheritance(occupant, Some(agent), positions, decided, visiting, rng);
                if moved && decided.get(&occupant) != Some(&u) {
                    decided.insert(agent, u);
                    return true;
                }
                continue;
            }

            decided.insert(agent, u);
            return true;
        }

        if parent.is_some() {
            false
        } else {
            decided.insert(agent, positions[agent]);
            true
        }
    }
}

pub struct Pibt {
    verbose: bool,
    solved: bool,
    plan: Option<Plan>,
    stats: Stats,
    seed: u64,
}

impl Pibt {
    pub fn new(seed: u64) -> Self {
        Pibt { verbose: false, solved: false, plan: None, stats: Stats::default(), seed }
    }
}

impl Solver for Pibt {
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
        let heuristics = super::goal_heuristics(&problem.graph, &goals);
        let step = PibtStep { graph: &problem.graph, heuristics: &heuristics, goals: &goals };
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut positions: Vec<NodeId> = problem.starts.clone();
        let mut configs = vec![positions.clone()];

        let tie_tokens: Vec<u64> = (0..agents.len()).map(|_| rng.gen()).collect();

        for t in 0..problem.max_timestep {
            if positions.iter().zip(&goals).all(|(p, g)| p == g) {
                break;
            }
            let mut priority: Vec<usize> = (0..agents.len()).collect();
            priority.sort_by_key(|&a| (usize::MAX - heuristics[a][positions[a]], tie_tokens[a]));

            positions = step.step(&positions, &priority, &mut rng);
            configs.push(positions.clone());
            self.stats.high_level_expand_nodes += 1;
            trace!(t, ?positions, "PIBT: advanced one timestep");
        }

        self.stats.time_ms = start_time.elapsed().as_millis();
        let reached_goal = positions.iter().zip(&goals).all(|(p, g)| p == g);
        if reached_goal {
            self.solved = true;
            self.stats.costs = crate::path::Paths::new(
                (0..agents.len())
                    .map(|a| configs.iter().map(|c| c[a]).collect())
                    .collect(),
            )
            .soc(&goals);
            self.plan = Some(Plan { configs });
        }
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
    fn single_agent_reaches_goal() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let s = graph.node_at(0, 0).unwrap();
        let g = graph.node_at(4, 4).unwrap();
        let problem =
            Problem::new(graph, vec![s], GoalSpec::Labeled(vec![g]), 20, Duration::from_secs(5)).unwrap();
        let mut pibt = Pibt::new(42);
        pibt.solve(&problem).unwrap();
        assert!(pibt.succeed());
        assert!(pibt.get_solution().unwrap().validate(&problem).is_ok());
    }

    #[test]
    fn two_agents_in_open_space_never_collide() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let a_start = graph.node_at(0, 0).unwrap();
        let a_goal = graph.node_at(4, 4).unwrap();
        let b_start = graph.node_at(4, 0).unwrap();
        let b_goal = graph.node_at(0, 4).unwrap();
        let problem = Problem::new(
            graph,
            vec![a_start, b_start],
            GoalSpec::Labeled(vec![a_goal, b_goal]),
            30,
            Duration::from_secs(5),
        )
        .unwrap();
        let mut pibt = Pibt::new(7);
        pibt.solve(&problem).unwrap();
        if pibt.succeed() {
            assert!(pibt.get_solution().unwrap().validate(&problem).is_ok());
        }
    }
}
