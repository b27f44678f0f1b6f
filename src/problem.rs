//! Immutable MAPF instance: graph, starts, goals, agent count, timestep cap.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::rc::Rc;
use std::time::Duration;

use crate::error::MapfError;
use crate::graph::{Graph, NodeId};

/// A single agent's identity and (for labeled MAPF) its fixed goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    pub id: usize,
    pub start: NodeId,
    pub goal: NodeId,
}

/// Whether goals are bound one-per-agent or form an interchangeable pool.
#[derive(Debug, Clone)]
pub enum GoalSpec {
    Labeled(Vec<NodeId>),
    Unlabeled(Vec<NodeId>),
}

impl GoalSpec {
    pub fn is_unlabeled(&self) -> bool {
        matches!(self, GoalSpec::Unlabeled(_))
    }

    pub fn as_slice(&self) -> &[NodeId] {
        match self {
            GoalSpec::Labeled(g) | GoalSpec::Unlabeled(g) => g,
        }
    }
}

/// `{ Graph, starts[N], goals[N], N, maxTimestep, maxCompTime }`, immutable
/// after construction (spec.md §3).
pub struct Problem {
    pub graph: Rc<Graph>,
    pub starts: Vec<NodeId>,
    pub goals: GoalSpec,
    pub num_agents: usize,
    pub max_timestep: usize,
    pub max_comp_time: Duration,
}

impl Problem {
    pub fn new(
        graph: Rc<Graph>,
        starts: Vec<NodeId>,
        goals: GoalSpec,
        max_timestep: usize,
        max_comp_time: Duration,
    ) -> Result<Self, MapfError> {
        let num_agents = starts.len();
        if goals.as_slice().len() != num_agents {
            return Err(MapfError::InvariantViolation(format!(
                "{} starts but {} goals",
                num_agents,
                goals.as_slice().len()
            )));
        }

        for i in 0..num_agents {
            for j in (i + 1)..num_agents {
                if starts[i] == starts[j] {
                    return Err(MapfError::DuplicateStart { first: i, second: j });
                }
            }
        }

        if let GoalSpec::Labeled(ref goals) = goals {
            for (i, &goal) in goals.iter().enumerate() {
                if graph.path_dist(starts[i], goal) == crate::graph::UNREACHABLE {
                    return Err(MapfError::Disconnected { agent: i });
                }
            }
        }

        Ok(Problem {
            graph,
            starts,
            goals,
            num_agents,
            max_timestep,
            max_comp_time,
        })
    }

    /// Reinterpret this problem's goals as an unlabeled pool, keeping the
    /// same graph/starts/timestep budget. GoalAllocator and GoalSwapper are
    /// unlabeled-MAPF mechanisms by definition (spec.md §4.8/4.9): an
    /// instance parsed from the labeled instance-file format (the only shape
    /// `from_instance_file` produces) still names a valid goal pool, so
    /// dispatching to those solvers goes through this conversion rather than
    /// validating their output against the original per-agent labels.
    pub fn as_unlabeled(&self) -> Problem {
        Problem {
            graph: Rc::clone(&self.graph),
            starts: self.starts.clone(),
            goals: GoalSpec::Unlabeled(self.goals.as_slice().to_vec()),
            num_agents: self.num_agents,
            max_timestep: self.max_timestep,
            max_comp_time: self.max_comp_time,
        }
    }

    /// Per-agent `(start, goal)` pairs for labeled MAPF. Panics if goals are
    /// unlabeled; callers must route through `GoalAllocator` first in that case.
    pub fn agents(&self) -> Vec<Agent> {
        let goals = self.goals.as_slice();
        (0..self.num_agents)
            .map(|id| Agent {
                id,
                start: self.starts[id],
                goal: goals[id],
            })
            .collect()
    }

    /// Parse the line-oriented instance file format from spec.md §6.
    pub fn from_instance_file(path: &str) -> Result<Self, MapfError> {
        let file = File::open(path).map_err(|source| MapfError::InstanceIo {
            path: path.to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let lines: Vec<String> = reader
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|source| MapfError::InstanceIo {
                path: path.to_string(),
                source,
            })?;

        let mut map_file = None;
        let mut agents_count = None;
        let mut max_timestep = 10_000usize;
        let mut max_comp_time_ms = 60_000u64;
        let mut random_problem = false;
        let mut split = lines.splitn(2, |l: &String| l.trim().is_empty());

        let header = split.next().unwrap_or(&[]);
        for line in header {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "map_file" => map_file = Some(value.trim().to_string()),
                "agents" => {
                    agents_count = Some(value.trim().parse::<usize>().map_err(|_| {
                        MapfError::InstanceFormat {
                            path: path.to_string(),
                            reason: format!("bad agents value: {value}"),
                        }
                    })?)
                }
                "max_timestep" => {
                    max_timestep = value.trim().parse().unwrap_or(max_timestep)
                }
                "max_comp_time" => {
                    max_comp_time_ms = value.trim().parse().unwrap_or(max_comp_time_ms)
                }
                "random_problem" => random_problem = value.trim() == "1",
                _ => {}
            }
        }

        let map_file = map_file.ok_or_else(|| MapfError::InstanceFormat {
            path: path.to_string(),
            reason: "missing map_file".to_string(),
        })?;
        let agents_count = agents_count.ok_or_else(|| MapfError::InstanceFormat {
            path: path.to_string(),
            reason: "missing agents count".to_string(),
        })?;

        let graph = Rc::new(Graph::from_file(&map_file)?);

        let mut starts = Vec::with_capacity(agents_count);
        let mut goals = Vec::with_capacity(agents_count);

        if !random_problem {
            let body: Vec<&String> = lines
                .iter()
                .skip_while(|l| !l.trim().is_empty())
                .skip(1)
                .collect();
            for (i, line) in body.iter().take(agents_count).enumerate() {
                let parts: Vec<usize> = line
                    .split_whitespace()
                    .map(|t| t.parse().unwrap_or(0))
                    .collect();
                if parts.len() != 4 {
                    return Err(MapfError::InstanceFormat {
                        path: path.to_string(),
                        reason: format!("agent line {i} malformed: {line}"),
                    });
                }
                let start = graph
                    .node_at(parts[0], parts[1])
                    .ok_or(MapfError::UnpassableStart {
                        agent: i,
                        x: parts[0],
                        y: parts[1],
                    })?;
                let goal = graph
                    .node_at(parts[2], parts[3])
                    .ok_or(MapfError::UnpassableGoal {
                        agent: i,
                        x: parts[2],
                        y: parts[3],
                    })?;
                starts.push(start);
                goals.push(goal);
            }
        }

        Problem::new(
            graph,
            starts,
            GoalSpec::Labeled(goals),
            max_timestep,
            Duration::from_millis(max_comp_time_ms),
        )
    }
}
