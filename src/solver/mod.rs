//! Solver capability surface and the shared log format (spec.md §6, §9
//! "Polymorphism across solvers"). Every solver variant is a tagged struct
//! implementing [`Solver`]; there is no base class, only this trait.

pub mod cbs;
pub mod ecbs;
pub mod goal_allocator;
pub mod goal_swapper;
pub mod icbs;
pub mod ir;
pub mod pibt;
pub mod pibt_complete;

use std::io::Write;

use crate::error::{MapfError, MapfResult};
use crate::graph::Graph;
use crate::path::Plan;
use crate::problem::Problem;
use crate::stat::Stats;

/// Common surface every solver exposes: run once, report success, hand back
/// the plan and its stats. `set_verbose` toggles per-iteration `tracing`
/// events; it does not change solving semantics.
pub trait Solver {
    fn solve(&mut self, problem: &Problem) -> MapfResult<()>;
    fn succeed(&self) -> bool;
    fn get_solution(&self) -> Option<&Plan>;
    fn stats(&self) -> &Stats;
    fn set_verbose(&mut self, verbose: bool);
}

/// Everything `make_log` needs beyond what a [`Solver`] already tracks.
pub struct LogInfo<'a> {
    pub instance_path: &'a str,
    pub map_file: &'a str,
    pub solver_name: &'a str,
}

/// Render the key=value + `starts:`/`goals:`/`solution:` log format from
/// spec.md §6, and write it to `path`.
pub fn write_log(
    path: &str,
    info: &LogInfo,
    problem: &Problem,
    solved: bool,
    plan: Option<&Plan>,
    stats: &Stats,
) -> MapfResult<()> {
    let mut out = String::new();

    out.push_str(&format!("instance = {}\n", info.instance_path));
    out.push_str(&format!("agents = {}\n", problem.num_agents));
    out.push_str(&format!("map_file = {}\n", info.map_file));
    out.push_str(&format!("solver = {}\n", info.solver_name));
    out.push_str(&format!("solved = {}\n", solved));
    out.push_str(&format!("soc = {}\n", stats.costs));
    out.push_str(&format!(
        "makespan = {}\n",
        plan.map(|p| p.makespan()).unwrap_or(0)
    ));
    out.push_str(&format!("comp_time = {}\n", stats.time_ms));

    out.push_str("starts:\n");
    for &s in &problem.starts {
        let n = problem.graph.node(s);
        out.push_str(&format!("({},{})\n", n.x, n.y));
    }

    out.push_str("goals:\n");
    for &g in problem.goals.as_slice() {
        let n = problem.graph.node(g);
        out.push_str(&format!("({},{})\n", n.x, n.y));
    }

    out.push_str("solution:\n");
    if let Some(plan) = plan {
        for (t, config) in plan.configs.iter().enumerate() {
            out.push_str(&format!("{t}:"));
            let cells: Vec<String> = config
                .iter()
                .map(|&v| {
                    let n = problem.graph.node(v);
                    format!("({},{})", n.x, n.y)
                })
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
    }

    let mut file = std::fs::File::create(path).map_err(|source| MapfError::InstanceIo {
        path: path.to_string(),
        source,
    })?;
    file.write_all(out.as_bytes())
        .map_err(|source| MapfError::InstanceIo { path: path.to_string(), source })?;
    Ok(())
}

/// Unconstrained per-agent heuristic tables, shared by every CBS-family
/// solver's low level: `heuristics[i][v]` is the shortest-path distance
/// from `v` to agent `i`'s goal.
pub fn goal_heuristics(graph: &Graph, goals: &[crate::graph::NodeId]) -> Vec<Vec<usize>> {
    goals.iter().map(|&g| graph.distances_from(g)).collect()
}
