//! Thin CLI entry point: parse args, load an instance, dispatch to a solver,
//! validate the plan, write the log. No solving logic lives here.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use mapf_rust::config::{Cli, Config, SolverKind};
use mapf_rust::graph::Graph;
use mapf_rust::problem::Problem;
use mapf_rust::scenario::Scenario;
use mapf_rust::solver::{goal_swapper::GoalSwapper, write_log, LogInfo, Solver};
use mapf_rust::solver::cbs::Cbs;
use mapf_rust::solver::ecbs::Ecbs;
use mapf_rust::solver::icbs::Icbs;
use mapf_rust::solver::ir::Ir;
use mapf_rust::solver::pibt::Pibt;
use mapf_rust::solver::pibt_complete::PibtComplete;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::new(&cli);
    config.validate()?;

    if config.generate_scenario {
        let map_path = config.map_path.as_ref().expect("validated above");
        let graph = Graph::from_file(map_path)?;
        let out = config.output_path.as_deref().unwrap_or("scenario.json");
        let mut rng = StdRng::seed_from_u64(config.seed);
        Scenario::generate(out, &graph, config.num_agents, &mut rng)?;
        info!(out, "wrote generated scenario");
        return Ok(());
    }

    let instance_path = config.instance_path.as_ref().expect("validated above");
    let problem = Problem::from_instance_file(instance_path)?;
    let map_file = map_file_of(instance_path);

    let kind = SolverKind::parse(&config.solver)?;
    // GoalSwapper is an unlabeled-MAPF mechanism (spec.md §4.9); reinterpret
    // the parsed labeled goals as a pool for both solving and validation.
    let problem = if kind == SolverKind::GoalSwapper { problem.as_unlabeled() } else { problem };
    let (solved, plan, stats) = match kind {
        SolverKind::Pibt => run(Pibt::new(config.seed), &problem, config.verbose),
        SolverKind::Cbs => run(Cbs::new(), &problem, config.verbose),
        SolverKind::Icbs => run(Icbs::new(), &problem, config.verbose),
        SolverKind::Ecbs => run(Ecbs::new(config.suboptimality), &problem, config.verbose),
        SolverKind::PibtComplete => run(PibtComplete::new(config.seed), &problem, config.verbose),
        SolverKind::Ir => run(Ir::new(), &problem, config.verbose),
        SolverKind::GoalSwapper => run(GoalSwapper::new(), &problem, config.verbose),
        SolverKind::NetworkFlow => unreachable!("rejected by Config::validate"),
    }?;

    if let Some(ref plan) = plan {
        plan.validate(&problem)?;
    }

    if let Some(ref output_path) = config.output_path {
        let info = LogInfo { instance_path, map_file: &map_file, solver_name: &config.solver };
        write_log(output_path, &info, &problem, solved, plan.as_ref(), &stats)?;
    }

    info!(solved, soc = stats.costs, comp_time_ms = stats.time_ms, "run complete");
    Ok(())
}

fn run<S: Solver>(
    mut solver: S,
    problem: &Problem,
    verbose: bool,
) -> anyhow::Result<(bool, Option<mapf_rust::path::Plan>, mapf_rust::stat::Stats)> {
    solver.set_verbose(verbose);
    solver.solve(problem)?;
    Ok((solver.succeed(), solver.get_solution().cloned(), solver.stats().clone()))
}

fn map_file_of(instance_path: &str) -> String {
    std::fs::read_to_string(instance_path)
        .ok()
        .and_then(|contents| {
            contents.lines().find_map(|line| {
                let (key, value) = line.split_once('=')?;
                (key.trim() == "map_file").then(|| value.trim().to_string())
            })
        })
        .unwrap_or_default()
}
