//! `.scen` bucket-format parsing and random instance generation (spec.md §6's
//! `-P` scenario mode), grounded in the teacher's `Scenario::load_from_scen`
//! and bucket-sampling routines, retargeted from the teacher's tuple-`Agent`
//! onto this crate's `Graph`/`NodeId` types.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MapfError;
use crate::graph::Graph;

/// One `(start, goal)` cell pair as read from a `.scen` line, in map
/// coordinates (not yet resolved against a particular [`Graph`]).
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub start_x: usize,
    pub start_y: usize,
    pub goal_x: usize,
    pub goal_y: usize,
}

type Bucket = Vec<Route>;

/// A loaded `.scen` file: the map it refers to, plus routes grouped into
/// difficulty buckets (the `.scen` format's first column).
pub struct Scenario {
    pub map_file: String,
    pub map_width: usize,
    pub map_height: usize,
    pub buckets: HashMap<usize, Bucket>,
}

impl Scenario {
    pub fn load_from_scen(path: &str) -> Result<Scenario, MapfError> {
        let file = File::open(path).map_err(|source| MapfError::ScenarioIo {
            path: path.to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>().map_err(|source| {
            MapfError::ScenarioIo { path: path.to_string(), source }
        })?;

        let mut lines = lines.into_iter();
        let _version = lines.next(); // "version 1" header, unused

        let mut scenario = Scenario {
            map_file: String::new(),
            map_width: 0,
            map_height: 0,
            buckets: HashMap::new(),
        };

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 9 {
                return Err(MapfError::ScenarioFormat {
                    path: path.to_string(),
                    reason: format!("expected 9 columns, got {}: {line}", parts.len()),
                });
            }
            let field = |i: usize| -> Result<usize, MapfError> {
                parts[i].parse().map_err(|_| MapfError::ScenarioFormat {
                    path: path.to_string(),
                    reason: format!("bad numeric field {i} in: {line}"),
                })
            };

            let bucket_index = field(0)?;
            let route = Route {
                start_x: field(4)?,
                start_y: field(5)?,
                goal_x: field(6)?,
                goal_y: field(7)?,
            };

            if scenario.map_file.is_empty() {
                scenario.map_file = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }

            scenario.buckets.entry(bucket_index).or_default().push(route);
        }

        Ok(scenario)
    }

    /// Draw one start/goal cell pair per agent, one bucket per agent
    /// (`agent_buckets[i]` selects which bucket supplies agent `i`'s route),
    /// without reusing a route already assigned from that bucket.
    pub fn generate_agents_by_buckets<R: Rng + ?Sized>(
        &self,
        graph: &Graph,
        agent_buckets: &[usize],
        rng: &mut R,
    ) -> Result<(Vec<usize>, Vec<usize>), MapfError> {
        let mut starts = Vec::with_capacity(agent_buckets.len());
        let mut goals = Vec::with_capacity(agent_buckets.len());
        let mut used: HashMap<usize, HashSet<usize>> = HashMap::new();

        for &bucket_index in agent_buckets {
            let bucket = self.buckets.get(&bucket_index).ok_or_else(|| {
                MapfError::ScenarioFormat {
                    path: self.map_file.clone(),
                    reason: format!("bucket {bucket_index} not found"),
                }
            })?;

            let available: Vec<usize> = (0..bucket.len())
                .filter(|idx| !used.get(&bucket_index).is_some_and(|u| u.contains(idx)))
                .collect();
            let &route_index = available
                .choose(rng)
                .ok_or(MapfError::NoAvailableRoute { bucket: bucket_index })?;

            let route = bucket[route_index];
            let start = graph.node_at(route.start_x, route.start_y).ok_or(
                MapfError::UnpassableStart { agent: starts.len(), x: route.start_x, y: route.start_y },
            )?;
            let goal = graph.node_at(route.goal_x, route.goal_y).ok_or(
                MapfError::UnpassableGoal { agent: starts.len(), x: route.goal_x, y: route.goal_y },
            )?;
            starts.push(start);
            goals.push(goal);
            used.entry(bucket_index).or_default().insert(route_index);
        }

        info!(n = starts.len(), "Scenario: generated agents from buckets");
        Ok((starts, goals))
    }

    /// Draw `num_agents` routes uniformly at random across every bucket,
    /// without replacement.
    pub fn generate_agents_randomly<R: Rng + ?Sized>(
        &self,
        num_agents: usize,
        graph: &Graph,
        rng: &mut R,
    ) -> Result<(Vec<usize>, Vec<usize>), MapfError> {
        let mut available: Vec<Route> = self.buckets.values().flatten().copied().collect();
        if available.len() < num_agents {
            return Err(MapfError::ScenarioFormat {
                path: self.map_file.clone(),
                reason: "not enough unique routes to match the requested agent count".to_string(),
            });
        }
        available.shuffle(rng);

        let mut starts = Vec::with_capacity(num_agents);
        let mut goals = Vec::with_capacity(num_agents);
        for route in available.into_iter().take(num_agents) {
            let start = graph.node_at(route.start_x, route.start_y).ok_or(
                MapfError::UnpassableStart { agent: starts.len(), x: route.start_x, y: route.start_y },
            )?;
            let goal = graph.node_at(route.goal_x, route.goal_y).ok_or(
                MapfError::UnpassableGoal { agent: starts.len(), x: route.goal_x, y: route.goal_y },
            )?;
            starts.push(start);
            goals.push(goal);
        }

        info!(n = starts.len(), "Scenario: generated agents at random");
        Ok((starts, goals))
    }

    /// `-P`: sample `num_agents` random start/goal cell pairs on `graph` and
    /// write them as a flat route list to `path` (spec.md §6's scenario
    /// file, one `<x_s> <y_s> <x_g> <y_g>`-shaped route per line via
    /// `serde_json`, since the generated file is consumed only by this
    /// crate and not the original `.scen` bucket format).
    pub fn generate<R: Rng + ?Sized>(
        path: &str,
        graph: &Graph,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<(), MapfError> {
        let passable: Vec<(usize, usize)> = (0..graph.width)
            .flat_map(|x| (0..graph.height).map(move |y| (x, y)))
            .filter(|&(x, y)| graph.is_passable(x, y))
            .collect();

        let mut routes = Vec::with_capacity(num_agents);
        for _ in 0..num_agents {
            let &(sx, sy) = passable.choose(rng).expect("graph has at least one passable cell");
            let &(gx, gy) = passable.choose(rng).expect("graph has at least one passable cell");
            routes.push(Route { start_x: sx, start_y: sy, goal_x: gx, goal_y: gy });
        }

        let mut file = File::create(path).map_err(|source| MapfError::ScenarioIo {
            path: path.to_string(),
            source,
        })?;
        let json = serde_json::to_string_pretty(&routes).expect("Route serializes infallibly");
        file.write_all(json.as_bytes()).map_err(|source| MapfError::ScenarioIo {
            path: path.to_string(),
            source,
        })?;
        info!(path, num_agents, "Scenario: generated and wrote routes");
        Ok(())
    }
}
