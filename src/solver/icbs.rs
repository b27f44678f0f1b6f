//! ICBS: CBS with an MDD-based low level, prioritized-conflict branching,
//! bypass, and lazy evaluation of deferred high-level nodes (spec.md §4.3,
//! grounded in `icbs.cpp`'s `LibCBS` machinery).

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Instant;

use tracing::{debug, trace};

use crate::constraint::{detect_conflicts, Conflict, ConflictKind, Constraint, CardinalType};
use crate::error::MapfResult;
use crate::graph::NodeId;
use crate::mdd::Mdd;
use crate::path::{path_cost, Path, Paths, Plan};
use crate::problem::Problem;
use crate::search::space_time_astar;
use crate::stat::{Deadline, Stats};

use super::{goal_heuristics, Solver};

/// Above this many extra steps beyond an agent's current cost, stop growing
/// its MDD incrementally and defer the node instead (spec.md §9 Open
/// Questions: heuristic, kept as a tunable with the source's default).
const MDD_GROWTH_THRESHOLD: usize = 20;

struct IcbsNode {
    id: usize,
    constraints: Vec<Constraint>,
    paths: Paths,
    mdds: Vec<Mdd>,
    soc: usize,
    num_conflicts: usize,
}

impl PartialEq for IcbsNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for IcbsNode {}

impl Ord for IcbsNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .soc
            .cmp(&self.soc)
            .then_with(|| other.num_conflicts.cmp(&self.num_conflicts))
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for IcbsNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A node whose replan for `agent` exceeded the growth threshold: stashed
/// until the open list's best `soc` reaches `lb_soc` (spec.md §4.3 "lazy
/// evaluation"). `constraints` is the full constraint set of the would-be
/// child; `base_paths`/`base_mdds` are the parent's, with `agent`'s entry
/// still stale until materialized.
struct LazyEntry {
    constraints: Vec<Constraint>,
    agent: usize,
    base_paths: Paths,
    base_mdds: Vec<Mdd>,
}

fn agent_constraints(constraints: &[Constraint], agent: usize) -> Vec<Constraint> {
    constraints.iter().filter(|c| c.agent == agent).copied().collect()
}

fn classify(conflict: &Conflict, mdds: &[Mdd]) -> CardinalType {
    let forced = |mdd: &Mdd, t: usize, node: NodeId| mdd.is_layer_singleton(t) == Some(node);

    let (forced_1, forced_2) = match conflict.kind {
        ConflictKind::Vertex { position, time } => (
            forced(&mdds[conflict.agent_1], time, position),
            forced(&mdds[conflict.agent_2], time, position),
        ),
        ConflictKind::Edge { u, v, time } => (
            mdds[conflict.agent_1].is_layer_singleton(time - 1).is_some()
                && mdds[conflict.agent_1].is_layer_singleton(time).is_some()
                && mdds[conflict.agent_1].layer(time - 1).contains(&v)
                && mdds[conflict.agent_1].layer(time).contains(&u),
            mdds[conflict.agent_2].is_layer_singleton(time - 1).is_some()
                && mdds[conflict.agent_2].is_layer_singleton(time).is_some()
                && mdds[conflict.agent_2].layer(time - 1).contains(&u)
                && mdds[conflict.agent_2].layer(time).contains(&v),
        ),
        ConflictKind::Target { .. } => (false, false),
    };

    match (forced_1, forced_2) {
        (true, true) => CardinalType::Cardinal,
        (true, false) | (false, true) => CardinalType::SemiCardinal,
        (false, false) => CardinalType::NonCardinal,
    }
}

fn pick_conflict<'a>(conflicts: &'a [Conflict], mdds: &[Mdd]) -> Option<(&'a Conflict, CardinalType)> {
    if conflicts.is_empty() {
        return None;
    }
    let classified: Vec<(&Conflict, CardinalType)> =
        conflicts.iter().map(|c| (c, classify(c, mdds))).collect();
    classified
        .iter()
        .find(|(_, t)| *t == CardinalType::Cardinal)
        .or_else(|| classified.iter().find(|(_, t)| *t == CardinalType::SemiCardinal))
        .or_else(|| classified.first())
        .copied()
}

/// Build or grow agent `agent`'s MDD under `constraints` to the smallest
/// valid cost within `MDD_GROWTH_THRESHOLD` steps of `start_cost`. Returns
/// `None` if no valid MDD was found in range (the caller should defer).
fn grow_mdd(
    graph: &crate::graph::Graph,
    agent: usize,
    start: NodeId,
    goal: NodeId,
    heuristic: &[usize],
    constraints: &[Constraint],
    start_cost: usize,
) -> Option<Mdd> {
    for cost in start_cost..=start_cost + MDD_GROWTH_THRESHOLD {
        let mdd = Mdd::build(graph, agent, start, goal, cost, heuristic.to_vec(), constraints);
        if mdd.valid {
            return Some(mdd);
        }
    }
    None
}

pub struct Icbs {
    verbose: bool,
    solved: bool,
    plan: Option<Plan>,
    stats: Stats,
    node_cap: usize,
}

impl Icbs {
    pub fn new() -> Self {
        Icbs {
            verbose: false,
            solved: false,
            plan: None,
            stats: Stats::default(),
            node_cap: 1_000_000,
        }
    }
}

impl Default for Icbs {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for Icbs {
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
        let mut open: BinaryHeap<IcbsNode> = BinaryHeap::new();
        let mut lazy_table: BTreeMap<usize, Vec<LazyEntry>> = BTreeMap::new();

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
                None => return Ok(()),
            }
        }
        let root_mdds: Vec<Mdd> = agents
            .iter()
            .map(|a| {
                let cost = path_cost(&root_paths[a.id], a.goal);
                Mdd::build(&problem.graph, a.id, a.start, a.goal, cost, heuristics[a.id].clone(), &[])
            })
            .collect();
        let root_paths = Paths::new(root_paths);
        let root_conflicts = detect_conflicts(&root_paths, &goals).len();
        let root_soc = root_paths.soc(&goals);
        open.push(IcbsNode {
            id: next_id,
            constraints: Vec::new(),
            paths: root_paths,
            mdds: root_mdds,
            soc: root_soc,
            num_conflicts: root_conflicts,
        });
        next_id += 1;

        while !open.is_empty() || !lazy_table.is_empty() {
            // Materialize every deferred bucket the open frontier has caught up to.
            loop {
                let Some(&key) = lazy_table.keys().next() else { break };
                let ready = match open.peek() {
                    Some(top) => top.soc >= key,
                    None => true,
                };
                if !ready {
                    break;
                }
                let entries = lazy_table.remove(&key).unwrap();
                for entry in entries {
                    if let Some(node) = materialize(
                        &problem.graph,
                        &agents,
                        &heuristics,
                        &goals,
                        entry,
                        &mut next_id,
                        &mut self.stats,
                        &deadline,
                    ) {
                        open.push(node);
                    }
                }
            }

            let Some(mut node) = open.pop() else { break };

            if deadline.expired() {
                debug!("ICBS: deadline exceeded after {} high-level nodes", self.stats.high_level_expand_nodes);
                return Ok(());
            }
            if next_id > self.node_cap {
                debug!("ICBS: high-level node cap {} reached", self.node_cap);
                return Ok(());
            }
            // One expansion covers every bypass applied in place below: a
            // bypass swaps in a better path for the *same* tree node rather
            // than creating a child, so it must not inflate this counter
            // (spec.md §8 "bypass activation": the tree does not expand).
            self.stats.high_level_expand_nodes += 1;

            'resolve_node: loop {
                let conflicts = detect_conflicts(&node.paths, &goals);
                let Some((conflict, cardinality)) = pick_conflict(&conflicts, &node.mdds) else {
                    self.stats.costs = node.soc;
                    self.stats.time_ms = start_time.elapsed().as_millis();
                    self.solved = true;
                    self.plan = Some(node.paths.to_plan());
                    return Ok(());
                };
                let conflict = *conflict;
                trace!(?conflict, ?cardinality, "ICBS: branching on conflict");

                if cardinality != CardinalType::Cardinal {
                    if let Some(bypassed) = try_bypass(&node, &conflict) {
                        node = bypassed;
                        continue 'resolve_node;
                    }
                }

                for for_agent_1 in [true, false] {
                    let branch_constraint = conflict.branch_constraint(for_agent_1);
                    let agent = branch_constraint.agent;

                    let mut constraints = node.constraints.clone();
                    constraints.push(branch_constraint);
                    let filtered = agent_constraints(&constraints, agent);
                    let current_cost = path_cost(&node.paths.paths[agent], agents[agent].goal);

                    let mut mdd = node.mdds[agent].clone();
                    mdd.update(&problem.graph, &filtered);

                    let resolved = if mdd.valid {
                        mdd.get_path().map(|p| (p, mdd))
                    } else {
                        grow_mdd(
                            &problem.graph,
                            agent,
                            agents[agent].start,
                            agents[agent].goal,
                            &heuristics[agent],
                            &filtered,
                            current_cost,
                        )
                        .and_then(|grown| grown.get_path().map(|p| (p, grown)))
                    };

                    match resolved {
                        Some((path, new_mdd)) => {
                            let mut paths = node.paths.clone();
                            paths.insert(agent, path);
                            let mut mdds = node.mdds.clone();
                            mdds[agent] = new_mdd;
                            let num_conflicts = detect_conflicts(&paths, &goals).len();
                            let soc = paths.soc(&goals);
                            open.push(IcbsNode {
                                id: next_id,
                                constraints,
                                paths,
                                mdds,
                                soc,
                                num_conflicts,
                            });
                            next_id += 1;
                        }
                        None => {
                            // Exceeded the growth threshold: defer (spec.md §4.3 lazy evaluation).
                            let t = branch_constraint.time;
                            let lb_soc = node.soc.saturating_sub(current_cost) + t + 1;
                            lazy_table.entry(lb_soc).or_default().push(LazyEntry {
                                constraints,
                                agent,
                                base_paths: node.paths.clone(),
                                base_mdds: node.mdds.clone(),
                            });
                            trace!(lb_soc, agent, "ICBS: deferred node to lazy-eval table");
                        }
                    }
                }
                break 'resolve_node;
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

/// Try to swap in an equal-cost, lower-conflict path for one side of a
/// non-cardinal conflict without creating a new high-level node (spec.md
/// §4.3's bypass).
fn try_bypass(node: &IcbsNode, conflict: &Conflict) -> Option<IcbsNode> {
    for for_agent_1 in [true, false] {
        let branch_constraint = conflict.branch_constraint(for_agent_1);
        let agent = branch_constraint.agent;
        let mdd = &node.mdds[agent];
        let Some(candidate): Option<Path> = mdd.get_path_avoiding(&branch_constraint) else {
            continue;
        };
        let current_conflicts = node.paths.count_conflict(agent, &node.paths.paths[agent]);
        let candidate_conflicts = node.paths.count_conflict(agent, &candidate);
        if candidate_conflicts < current_conflicts {
            let mut paths = node.paths.clone();
            paths.insert(agent, candidate);
            return Some(IcbsNode {
                id: node.id,
                constraints: node.constraints.clone(),
                paths,
                mdds: node.mdds.clone(),
                soc: node.soc,
                num_conflicts: node.num_conflicts.saturating_sub(current_conflicts - candidate_conflicts),
            });
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn materialize(
    graph: &crate::graph::Graph,
    agents: &[crate::problem::Agent],
    heuristics: &[Vec<usize>],
    goals: &[NodeId],
    entry: LazyEntry,
    next_id: &mut usize,
    stats: &mut Stats,
    deadline: &Deadline,
) -> Option<IcbsNode> {
    let agent = entry.agent;
    let filtered = agent_constraints(&entry.constraints, agent);
    let path = space_time_astar(
        graph,
        agents[agent].start,
        agents[agent].goal,
        &heuristics[agent],
        &filtered,
        0,
        stats,
        deadline,
    )?;
    let cost = path_cost(&path, agents[agent].goal);
    let mdd = Mdd::build(graph, agent, agents[agent].start, agents[agent].goal, cost, heuristics[agent].clone(), &filtered);

    let mut paths = entry.base_paths;
    paths.insert(agent, path);
    let mut mdds = entry.base_mdds;
    mdds[agent] = mdd;

    let num_conflicts = detect_conflicts(&paths, goals).len();
    let soc = paths.soc(goals);
    let id = *next_id;
    *next_id += 1;
    Some(IcbsNode {
        id,
        constraints: entry.constraints,
        paths,
        mdds,
        soc,
        num_conflicts,
    })
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
    fn solves_corridor_swap_same_as_cbs() {
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

        let mut icbs = Icbs::new();
        icbs.solve(&problem).unwrap();
        assert!(icbs.succeed());
        assert!(icbs.get_solution().unwrap().validate(&problem).is_ok());
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
        let mut icbs = Icbs::new();
        icbs.solve(&problem).unwrap();
        assert!(!icbs.succeed());
    }

    #[test]
    fn single_agent_matches_cbs_cost() {
        let graph = grid(&[".....", ".....", ".....", ".....", "....."]);
        let s = graph.node_at(0, 0).unwrap();
        let g = graph.node_at(4, 4).unwrap();
        let problem =
            Problem::new(graph, vec![s], GoalSpec::Labeled(vec![g]), 20, Duration::from_secs(5)).unwrap();
        let mut icbs = Icbs::new();
        icbs.solve(&problem).unwrap();
        assert!(icbs.succeed());
        assert_eq!(icbs.stats().costs, 8);
    }

    /// spec.md §8 "bypass activation": a non-cardinal vertex conflict between
    /// an agent with route freedom (a 3x3 open grid gives its MDD width >=2
    /// at every interior layer) and an agent parked on the conflicting cell
    /// must be resolved by swapping in an alternate equal-cost path for the
    /// same tree node, not by creating a high-level child.
    #[test]
    fn try_bypass_resolves_conflict_without_branching() {
        let graph = grid(&["...", "...", "..."]);
        let a_start = graph.node_at(0, 0).unwrap();
        let a_goal = graph.node_at(2, 2).unwrap();
        let parked_at = graph.node_at(1, 0).unwrap();

        let a_heuristic = graph.distances_from(a_goal);
        let a_cost = a_heuristic[a_start];
        assert_eq!(a_cost, 4);
        let mdd_a = Mdd::build(&graph, 0, a_start, a_goal, a_cost, a_heuristic, &[]);
        assert!(mdd_a.valid);
        // Width >=2 at every interior layer: no single cell is forced.
        for t in 1..a_cost {
            assert!(mdd_a.is_layer_singleton(t).is_none());
        }

        let b_heuristic = graph.distances_from(parked_at);
        let mdd_b = Mdd::build(&graph, 1, parked_at, parked_at, 0, b_heuristic, &[]);
        assert!(mdd_b.valid);

        // Agent 0's straight-through route and agent 1 parked on it, meeting
        // only at t=1.
        let current_a = vec![a_start, parked_at, graph.node_at(2, 0).unwrap(), graph.node_at(2, 1).unwrap(), a_goal];
        let parked_path = vec![parked_at; 5];
        let node = IcbsNode {
            id: 7,
            constraints: Vec::new(),
            paths: Paths::new(vec![current_a, parked_path]),
            mdds: vec![mdd_a, mdd_b],
            soc: 4,
            num_conflicts: 1,
        };
        let conflict = Conflict {
            agent_1: 0,
            agent_2: 1,
            kind: ConflictKind::Vertex { position: parked_at, time: 1 },
        };

        let bypassed = try_bypass(&node, &conflict).expect("an alternate equal-cost route exists for agent 0");
        assert_eq!(bypassed.id, node.id, "bypass must reuse the same tree node, not allocate a child");
        assert_eq!(bypassed.num_conflicts, 0);
        let goals = [a_goal, parked_at];
        assert!(detect_conflicts(&bypassed.paths, &goals).is_empty());
    }

    /// spec.md §8 "lazy eval trigger": a replan that would need more than
    /// `MDD_GROWTH_THRESHOLD` extra steps beyond its stale cost is deferred
    /// rather than grown, with a correctly computed `LB_SOC`, and can later
    /// be materialized into a real high-level node once unblocked from the
    /// growth cap.
    #[test]
    fn lazy_eval_defers_past_threshold_then_materializes() {
        let row = ".".repeat(MDD_GROWTH_THRESHOLD + 10);
        let graph = grid(&[row.as_str()]);
        let start = graph.node_at(0, 0).unwrap();
        let goal = graph.node_at(MDD_GROWTH_THRESHOLD + 9, 0).unwrap();
        let heuristic = graph.distances_from(goal);
        let true_cost = heuristic[start];
        assert!(true_cost > MDD_GROWTH_THRESHOLD);

        // A constraint carried along with the deferred branch; its own time
        // is far short of the true cost, so it never actually blocks anything
        // here — it only exercises the LB_SOC formula's `t` term.
        let branch_constraint = Constraint::vertex(0, goal, 7);
        let filtered = agent_constraints(&[branch_constraint], 0);
        let stale_cost = 0;
        assert!(
            grow_mdd(&graph, 0, start, goal, &heuristic, &filtered, stale_cost).is_none(),
            "growing within the threshold window must not reach a corridor this long"
        );

        let node_soc = 5;
        let t = branch_constraint.time;
        let lb_soc = node_soc.saturating_sub(stale_cost) + t + 1;
        assert_eq!(lb_soc, 13);

        let entry = LazyEntry {
            constraints: vec![branch_constraint],
            agent: 0,
            base_paths: Paths::new(vec![vec![start]]),
            base_mdds: vec![Mdd::build(&graph, 0, start, goal, true_cost, heuristic.clone(), &[])],
        };
        let agents = vec![crate::problem::Agent { id: 0, start, goal }];
        let heuristics = vec![heuristic];
        let goals = vec![goal];
        let mut next_id = 42usize;
        let mut stats = Stats::default();
        let deadline = Deadline::new(Duration::from_secs(5));

        let materialized = materialize(
            &graph,
            &agents,
            &heuristics,
            &goals,
            entry,
            &mut next_id,
            &mut stats,
            &deadline,
        )
        .expect("the deferred node is solvable once the growth cap no longer applies");
        assert_eq!(materialized.id, 42);
        assert_eq!(next_id, 43, "materializing must still allocate a fresh node id");
        assert_eq!(materialized.soc, true_cost);
    }
}
