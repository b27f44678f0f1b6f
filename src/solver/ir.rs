//! Iterative Refinement: repeatedly re-solve a small window of agents,
//! treating everyone else's current path as fixed obstacles, and keep the
//! result only if it strictly lowers SOC (spec.md §4.7).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use tracing::{debug, trace};

use crate::constraint::{detect_conflicts, first_conflict, Constraint};
use crate::error::MapfResult;
use crate::path::{path_cost, Path, Paths, Plan};
use crate::problem::Problem;
use crate::search::space_time_astar;
use crate::stat::{Deadline, Stats};

use super::cbs::Cbs;
use super::pibt::Pibt;
use super::{goal_heuristics, Solver};

/// Number of agents considered together in one refinement window.
const WINDOW_SIZE: usize = 4;

struct SubNode {
    id: usize,
    constraints: Vec<Vec<Constraint>>, // per windowed-agent-index constraint lists
    paths: Vec<Path>,                  // indexed by windowed-agent-index
    soc: usize,
    num_conflicts: usize,
}

impl PartialEq for SubNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for SubNode {}
impl Ord for SubNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .soc
            .cmp(&self.soc)
            .then_with(|| other.num_conflicts.cmp(&self.num_conflicts))
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for SubNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Vertex + swap-edge constraints that make every cell a frozen agent
/// occupies, at every timestep it occupies it, unusable for the windowed
/// agents (a fixed-obstacle reduction of cross-group conflicts).
fn obstacle_constraints(frozen_paths: &[&Path], window_agent: usize, horizon: usize) -> Vec<Constraint> {
    let mut out = Vec::new();
    for path in frozen_paths {
        for t in 0..=horizon {
            let pos = *path.get(t).unwrap_or_else(|| path.last().unwrap());
            out.push(Constraint::vertex(window_agent, pos, t));
            if t > 0 {
                let prev = *path.get(t - 1).unwrap_or_else(|| path.last().unwrap());
                if prev != pos {
                    out.push(Constraint::edge(window_agent, pos, prev, t));
                }
            }
        }
    }
    out
}

/// Solve just the agents in `window` (indices into `starts`/`goals`), with
/// every other agent's path in `incumbent` frozen as an obstacle. Returns
/// new paths for the windowed agents, or `None` if the sub-problem found no
/// conflict-free assignment before `deadline`.
#[allow(clippy::too_many_arguments)]
fn solve_window(
    graph: &crate::graph::Graph,
    window: &[usize],
    starts: &[crate::graph::NodeId],
    goals: &[crate::graph::NodeId],
    heuristics: &[Vec<usize>],
    incumbent: &[Path],
    horizon: usize,
    stats: &mut Stats,
    deadline: &Deadline,
) -> Option<Vec<Path>> {
    let frozen: Vec<&Path> = (0..starts.len()).filter(|i| !window.contains(i)).map(|i| &incumbent[i]).collect();
    let k = window.len();

    let base_constraints: Vec<Vec<Constraint>> =
        (0..k).map(|w| obstacle_constraints(&frozen, w, horizon)).collect();

    let mut next_id = 0usize;
    let mut open: BinaryHeap<SubNode> = BinaryHeap::new();

    let mut root_paths = Vec::with_capacity(k);
    for (w, &agent) in window.iter().enumerate() {
        let path = space_time_astar(
            graph,
            starts[agent],
            goals[agent],
            &heuristics[agent],
            &base_constraints[w],
            0,
            stats,
            deadline,
        )?;
        root_paths.push(path);
    }
    let window_goals: Vec<_> = window.iter().map(|&a| goals[a]).collect();
    let root_conflicts = detect_conflicts(&Paths::new(root_paths.clone()), &window_goals).len();
    let root_soc = Paths::new(root_paths.clone()).soc(&window_goals);
    open.push(SubNode {
        id: next_id,
        constraints: base_constraints.clone(),
        paths: root_paths,
        soc: root_soc,
        num_conflicts: root_conflicts,
    });
    next_id += 1;

    while let Some(node) = open.pop() {
        if deadline.expired() || next_id > 50_000 {
            return None;
        }
        let paths = Paths::new(node.paths.clone());
        let conflicts = detect_conflicts(&paths, &window_goals);
        let Some(conflict) = first_conflict(&conflicts) else {
            return Some(node.paths);
        };
        let conflict = *conflict;

        for for_agent_1 in [true, false] {
            let branch = conflict.branch_constraint(for_agent_1);
            let w = branch.agent; // conflicts were detected over window-local paths, so this is a window index
            let agent = window[w];

            let mut constraints = node.constraints.clone();
            constraints[w].push(branch);

            let new_path = space_time_astar(
                graph,
                starts[agent],
                goals[agent],
                &heuristics[agent],
                &constraints[w],
                0,
                stats,
                deadline,
            );
            let Some(new_path) = new_path else { continue };

            let mut paths = node.paths.clone();
            paths[w] = new_path;
            let num_conflicts = detect_conflicts(&Paths::new(paths.clone()), &window_goals).len();
            let soc = Paths::new(paths.clone()).soc(&window_goals);
            open.push(SubNode { id: next_id, constraints, paths, soc, num_conflicts });
            next_id += 1;
        }
    }

    None
}

pub struct Ir {
    verbose: bool,
    solved: bool,
    plan: Option<Plan>,
    stats: Stats,
}

impl Ir {
    pub fn new() -> Self {
        Ir { verbose: false, solved: false, plan: None, stats: Stats::default() }
    }
}

impl Default for Ir {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for Ir {
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

        let mut pibt = Pibt::new(0);
        pibt.solve(problem)?;
        let mut incumbent: Vec<Path> = if pibt.succeed() {
            let plan = pibt.get_solution().unwrap();
            (0..agents.len()).map(|a| plan.configs.iter().map(|c| c[a]).collect()).collect()
        } else {
            let mut cbs = Cbs::new();
            cbs.solve(problem)?;
            if !cbs.succeed() {
                self.stats.time_ms = start_time.elapsed().as_millis();
                return Ok(()); // no initial plan to refine at all
            }
            let plan = cbs.get_solution().unwrap();
            (0..agents.len()).map(|a| plan.configs.iter().map(|c| c[a]).collect()).collect()
        };

        let mut soc = Paths::new(incumbent.clone()).soc(&goals);
        let n = agents.len();

        'outer: loop {
            let mut improved_this_pass = false;

            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by_key(|&a| std::cmp::Reverse(path_cost(&incumbent[a], goals[a]).saturating_sub(heuristics[a][problem.starts[a]])));

            for chunk in order.chunks(WINDOW_SIZE) {
                if deadline.expired() {
                    break 'outer;
                }
                let horizon = incumbent.iter().map(|p| p.len().saturating_sub(1)).max().unwrap_or(0);
                let window: Vec<usize> = chunk.to_vec();

                if let Some(new_window_paths) = solve_window(
                    &problem.graph,
                    &window,
                    &problem.starts,
                    &goals,
                    &heuristics,
                    &incumbent,
                    horizon,
                    &mut self.stats,
                    &deadline,
                ) {
                    let mut candidate = incumbent.clone();
                    for (w, &agent) in window.iter().enumerate() {
                        candidate[agent] = new_window_paths[w].clone();
                    }
                    let candidate_soc = Paths::new(candidate.clone()).soc(&goals);
                    if candidate_soc < soc {
                        trace!(old = soc, new = candidate_soc, "IR: window improved SOC");
                        incumbent = candidate;
                        soc = candidate_soc;
                        improved_this_pass = true;
                    }
                }
                self.stats.high_level_expand_nodes += 1;
            }

            if !improved_this_pass {
                break;
            }
        }

        debug!(soc, "IR: converged");
        self.stats.costs = soc;
        self.stats.time_ms = start_time.elapsed().as_millis();
        self.solved = true;
        self.plan = Some(Paths::new(incumbent).to_plan());
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
