//! ECBS: bounded-suboptimal CBS. Two priority queues at the high level
//! (OPEN by lower bound, FOCAL by conflict count within `w * lower_bound`)
//! mirror the low-level focal search in [`crate::search::focal`] (spec.md §4.4).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, trace};

use crate::constraint::{detect_conflicts, first_conflict, Constraint};
use crate::error::MapfResult;
use crate::path::{Paths, Plan};
use crate::problem::Problem;
use crate::search::focal_space_time_astar;
use crate::stat::{Deadline, Stats};

use super::{goal_heuristics, Solver};

struct HlNode {
    constraints: Vec<Constraint>,
    paths: Paths,
    soc: usize,
    lower_bound: usize,
    num_conflicts: usize,
}

#[derive(Clone, Copy)]
struct OpenEntry {
    id: usize,
    lower_bound: usize,
}
impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for OpenEntry {}
impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.lower_bound.cmp(&self.lower_bound).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy)]
struct FocalEntry {
    id: usize,
    num_conflicts: usize,
    lower_bound: usize,
}
impl PartialEq for FocalEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for FocalEntry {}
impl Ord for FocalEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .num_conflicts
            .cmp(&self.num_conflicts)
            .then_with(|| other.lower_bound.cmp(&self.lower_bound))
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for FocalEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded-suboptimal CBS with suboptimality factor `w >= 1.0`.
pub struct Ecbs {
    verbose: bool,
    solved: bool,
    plan: Option<Plan>,
    stats: Stats,
    node_cap: usize,
    suboptimality: f64,
}

impl Ecbs {
    pub fn new(suboptimality: f64) -> Self {
        Ecbs {
            verbose: false,
            solved: false,
            plan: None,
            stats: Stats::default(),
            node_cap: 1_000_000,
            suboptimality: suboptimality.max(1.0),
        }
    }
}

impl Solver for Ecbs {
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
        let w = self.suboptimality;

        let mut nodes: HashMap<usize, HlNode> = HashMap::new();
        let mut expanded: HashSet<usize> = HashSet::new();
        let mut open: BinaryHeap<OpenEntry> = BinaryHeap::new();
        let mut focal: BinaryHeap<FocalEntry> = BinaryHeap::new();
        let mut next_id = 0usize;

        // Root: each agent's own bounded-suboptimal path against an empty set
        // of other paths (no conflicts to avoid yet).
        let empty_others = Paths::new(vec![Vec::new(); agents.len()]);
        let mut root_paths = Vec::with_capacity(agents.len());
        let mut root_lb = 0usize;
        for agent in &agents {
            let result = focal_space_time_astar(
                &problem.graph,
                agent.id,
                agent.start,
                agent.goal,
                &heuristics[agent.id],
                &[],
                0,
                w,
                &empty_others,
                &mut self.stats,
                &deadline,
            );
            match result {
                Some(r) => {
                    root_lb += r.f_min;
                    root_paths.push(r.path);
                }
                None => return Ok(()),
            }
        }
        let root_paths = Paths::new(root_paths);
        let root_conflicts = detect_conflicts(&root_paths, &goals).len();
        let root_soc = root_paths.soc(&goals);
        nodes.insert(
            next_id,
            HlNode {
                constraints: Vec::new(),
                paths: root_paths,
                soc: root_soc,
                lower_bound: root_lb,
                num_conflicts: root_conflicts,
            },
        );
        open.push(OpenEntry { id: next_id, lower_bound: root_lb });
        focal.push(FocalEntry { id: next_id, num_conflicts: root_conflicts, lower_bound: root_lb });
        next_id += 1;

        let mut lb_min = root_lb;

        while let Some(top) = focal.pop() {
            if expanded.contains(&top.id) {
                continue;
            }
            if deadline.expired() {
                debug!("ECBS: deadline exceeded after {} high-level nodes", self.stats.high_level_expand_nodes);
                return Ok(());
            }
            if next_id > self.node_cap {
                debug!("ECBS: high-level node cap {} reached", self.node_cap);
                return Ok(());
            }

            expanded.insert(top.id);
            self.stats.high_level_expand_nodes += 1;
            let node = nodes.get(&top.id).expect("focal entry must reference a live node");

            let conflicts = detect_conflicts(&node.paths, &goals);
            let Some(conflict) = first_conflict(&conflicts) else {
                self.stats.costs = node.soc;
                self.stats.time_ms = start_time.elapsed().as_millis();
                self.solved = true;
                self.plan = Some(node.paths.to_plan());
                return Ok(());
            };
            let conflict = *conflict;
            trace!(?conflict, "ECBS: branching on conflict");

            let parent_constraints = node.constraints.clone();
            let parent_paths = node.paths.clone();
            let parent_lb = node.lower_bound;

            for for_agent_1 in [true, false] {
                let branch_constraint = conflict.branch_constraint(for_agent_1);
                let agent = branch_constraint.agent;

                let mut constraints = parent_constraints.clone();
                constraints.push(branch_constraint);
                let agent_constraints: Vec<Constraint> =
                    constraints.iter().filter(|c| c.agent == agent).copied().collect();

                let mut other_paths = parent_paths.clone();
                other_paths.paths[agent] = Vec::new();

                let result = focal_space_time_astar(
                    &problem.graph,
                    agent,
                    agents[agent].start,
                    agents[agent].goal,
                    &heuristics[agent],
                    &agent_constraints,
                    0,
                    w,
                    &other_paths,
                    &mut self.stats,
                    &deadline,
                );
                let Some(result) = result else { continue };

                let mut paths = parent_paths.clone();
                let old_f_min = crate::path::path_cost(&paths.paths[agent], agents[agent].goal);
                paths.insert(agent, result.path);
                let num_conflicts = detect_conflicts(&paths, &goals).len();
                let soc = paths.soc(&goals);
                let lower_bound = parent_lb - old_f_min.min(parent_lb) + result.f_min;

                let id = next_id;
                next_id += 1;
                nodes.insert(id, HlNode { constraints, paths, soc, lower_bound, num_conflicts });
                open.push(OpenEntry { id, lower_bound });
                if (lower_bound as f64) <= w * lb_min as f64 {
                    focal.push(FocalEntry { id, num_conflicts, lower_bound });
                }
            }

            // Recompute lb_min from OPEN, discarding already-expanded entries,
            // and pull newly eligible nodes into FOCAL (mirrors the low-level
            // focal search's f_min rescan).
            let mut new_lb_min = lb_min;
            while let Some(head) = open.peek() {
                if expanded.contains(&head.id) {
                    open.pop();
                    continue;
                }
                new_lb_min = head.lower_bound;
                break;
            }
            if new_lb_min > lb_min {
                for (&id, n) in nodes.iter() {
                    if expanded.contains(&id) {
                        continue;
                    }
                    let lb = n.lower_bound;
                    if (lb as f64) > w * lb_min as f64 && (lb as f64) <= w * new_lb_min as f64 {
                        focal.push(FocalEntry { id, num_conflicts: n.num_conflicts, lower_bound: lb });
                    }
                }
                lb_min = new_lb_min;
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
