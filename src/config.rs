//! CLI surface (spec.md §6), generalized from the teacher's `clap`-derived
//! `Cli`/`Config` pair to the full named solver set.

use anyhow::{anyhow, bail};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "mapf",
    about = "Multi-agent path finding: CBS/ICBS/ECBS, PIBT, iterative refinement, unlabeled goal assignment.",
    version
)]
pub struct Cli {
    #[arg(short = 'i', long = "instance", help = "Path to the instance file")]
    pub instance_path: Option<String>,

    #[arg(short = 'o', long = "output", help = "Path to the output log file")]
    pub output_path: Option<String>,

    #[arg(
        short = 's',
        long = "solver",
        help = "PIBT | CBS | ICBS | ECBS | PIBT_COMPLETE | IR | NetworkFlow | GoalSwapper",
        default_value = "CBS"
    )]
    pub solver: String,

    #[arg(short = 'v', long, help = "Verbose solver logging", default_value_t = false)]
    pub verbose: bool,

    #[arg(
        short = 'P',
        long = "generate",
        help = "Generate a scenario file instead of solving",
        default_value_t = false
    )]
    pub generate_scenario: bool,

    #[arg(long, help = "Map file to draw generated scenarios from (with -P)")]
    pub map_path: Option<String>,

    #[arg(long, help = "Number of agents to generate (with -P)", default_value_t = 10)]
    pub num_agents: usize,

    #[arg(long, help = "Seed for the random number generator", default_value_t = 0)]
    pub seed: u64,

    #[arg(long, help = "Suboptimality bound for ECBS", default_value_t = 1.2)]
    pub suboptimality: f64,
}

/// Which solver a `-s` name resolves to. `NetworkFlow` is accepted (spec.md
/// §6 names it as an external collaborator) but carries no implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Pibt,
    Cbs,
    Icbs,
    Ecbs,
    PibtComplete,
    Ir,
    NetworkFlow,
    GoalSwapper,
}

impl SolverKind {
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name.to_uppercase().as_str() {
            "PIBT" => Ok(SolverKind::Pibt),
            "CBS" => Ok(SolverKind::Cbs),
            "ICBS" => Ok(SolverKind::Icbs),
            "ECBS" => Ok(SolverKind::Ecbs),
            "PIBT_COMPLETE" => Ok(SolverKind::PibtComplete),
            "IR" => Ok(SolverKind::Ir),
            "NETWORKFLOW" => Ok(SolverKind::NetworkFlow),
            "GOALSWAPPER" => Ok(SolverKind::GoalSwapper),
            other => Err(anyhow!("unknown solver: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub instance_path: Option<String>,
    pub output_path: Option<String>,
    pub solver: String,
    pub verbose: bool,
    pub generate_scenario: bool,
    pub map_path: Option<String>,
    pub num_agents: usize,
    pub seed: u64,
    pub suboptimality: f64,
}

impl Config {
    pub fn new(cli: &Cli) -> Self {
        Config {
            instance_path: cli.instance_path.clone(),
            output_path: cli.output_path.clone(),
            solver: cli.solver.clone(),
            verbose: cli.verbose,
            generate_scenario: cli.generate_scenario,
            map_path: cli.map_path.clone(),
            num_agents: cli.num_agents,
            seed: cli.seed,
            suboptimality: cli.suboptimality,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let kind = SolverKind::parse(&self.solver)?;

        if self.generate_scenario {
            if self.map_path.is_none() {
                bail!("-P requires --map-path");
            }
            return Ok(());
        }

        if self.instance_path.is_none() {
            bail!("-i/--instance is required unless -P is given");
        }

        if kind == SolverKind::NetworkFlow {
            bail!("NetworkFlow is named by the CLI surface but has no implementation");
        }

        if kind == SolverKind::Ecbs && self.suboptimality < 1.0 {
            bail!("--suboptimality must be >= 1.0, got {}", self.suboptimality);
        }

        Ok(())
    }
}
