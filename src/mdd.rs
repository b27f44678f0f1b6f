//! Multi-value Decision Diagram: the layered DAG of all cost-`c` paths for
//! one agent (spec.md §3, §4.3). Backs ICBS's MDD-based low level,
//! prioritized-conflict classification, and bypass search.

use std::collections::{HashMap, HashSet};

use crate::constraint::Constraint;
use crate::graph::{Graph, NodeId};
use crate::path::Path;

/// `layers[t]` is the set of nodes reachable at timestep `t` on some path of
/// exactly `cost` steps from `start` to `goal` that respects every
/// constraint given at construction time. `edges[t]` holds, for each
/// retained node at layer `t - 1`, its retained successors at layer `t`.
#[derive(Debug, Clone)]
pub struct Mdd {
    pub agent: usize,
    pub start: NodeId,
    pub goal: NodeId,
    pub cost: usize,
    pub valid: bool,
    heuristic: Vec<usize>,
    layers: Vec<HashSet<NodeId>>,
    edges: Vec<HashMap<NodeId, Vec<NodeId>>>,
}

impl Mdd {
    /// Build the MDD for `agent` at exact cost `cost`, honoring `constraints`.
    /// `heuristic` is `graph.distances_from(goal)`.
    pub fn build(
        graph: &Graph,
        agent: usize,
        start: NodeId,
        goal: NodeId,
        cost: usize,
        heuristic: Vec<usize>,
        constraints: &[Constraint],
    ) -> Self {
        let mut mdd = Mdd {
            agent,
            start,
            goal,
            cost,
            valid: false,
            heuristic,
            layers: Vec::new(),
            edges: Vec::new(),
        };
        mdd.rebuild(graph, constraints);
        mdd
    }

    /// Re-derive the MDD at its existing `cost` against a (possibly
    /// extended) constraint set. Mirrors `LibCBS::MDD::update` in the
    /// original implementation, reimplemented as a full forward/backward
    /// rebuild rather than an in-place prune.
    pub fn update(&mut self, graph: &Graph, constraints: &[Constraint]) {
        self.rebuild(graph, constraints);
    }

    fn rebuild(&mut self, graph: &Graph, constraints: &[Constraint]) {
        let agent_constraints: Vec<Constraint> =
            constraints.iter().filter(|c| c.agent == self.agent).copied().collect();

        let mut layers = vec![HashSet::new(); self.cost + 1];
        layers[0].insert(self.start);

        for t in 1..=self.cost {
            let remaining = self.cost - t;
            let prev: Vec<NodeId> = layers[t - 1].iter().copied().collect();
            for &u in &prev {
                let mut candidates = graph.neighbors(u).to_vec();
                candidates.push(u);
                for v in candidates {
                    if self.heuristic[v] > remaining {
                        continue;
                    }
                    if agent_constraints.iter().any(|c| c.is_violated(v, Some(u), t)) {
                        continue;
                    }
                    layers[t].insert(v);
                }
            }
            if layers[t].is_empty() {
                self.layers = layers;
                self.edges = Vec::new();
                self.valid = false;
                return;
            }
        }

        if !layers[self.cost].contains(&self.goal) {
            self.layers = layers;
            self.edges = Vec::new();
            self.valid = false;
            return;
        }
        layers[self.cost] = HashSet::from([self.goal]);

        // Backward prune: keep only nodes/edges that lie on some path to goal.
        let mut edges = vec![HashMap::new(); self.cost];
        for t in (1..=self.cost).rev() {
            let mut kept_prev = HashSet::new();
            for &u in &layers[t - 1] {
                let mut candidates = graph.neighbors(u).to_vec();
                candidates.push(u);
                let succs: Vec<NodeId> = candidates
                    .into_iter()
                    .filter(|v| layers[t].contains(v))
                    .filter(|&v| !agent_constraints.iter().any(|c| c.is_violated(v, Some(u), t)))
                    .collect();
                if !succs.is_empty() {
                    kept_prev.insert(u);
                    edges[t - 1].insert(u, succs);
                }
            }
            layers[t - 1] = kept_prev;
        }

        self.valid = layers[0].contains(&self.start);
        self.layers = layers;
        self.edges = edges;
    }

    pub fn layer(&self, t: usize) -> &HashSet<NodeId> {
        &self.layers[t]
    }

    pub fn is_layer_singleton(&self, t: usize) -> Option<NodeId> {
        if self.layers.get(t).map(|l| l.len()) == Some(1) {
            self.layers[t].iter().next().copied()
        } else {
            None
        }
    }

    /// Any one path of exactly `cost` steps through this (valid) MDD.
    pub fn get_path(&self) -> Option<Path> {
        if !self.valid {
            return None;
        }
        let mut path = vec![self.start];
        let mut current = self.start;
        for t in 0..self.cost {
            let next = *self.edges[t].get(&current)?.first()?;
            path.push(next);
            current = next;
        }
        Some(path)
    }

    /// A path through this MDD that additionally avoids `extra` — used by
    /// ICBS's bypass search (spec.md §4.3b): try each branch constraint
    /// against the *current* MDD before committing to a high-level split.
    pub fn get_path_avoiding(&self, extra: &Constraint) -> Option<Path> {
        if !self.valid {
            return None;
        }
        let mut path = vec![self.start];
        let mut current = self.start;
        for t in 0..self.cost {
            let next_time = t + 1;
            let next = self.edges[t]
                .get(&current)?
                .iter()
                .find(|&&v| !extra.is_violated(v, Some(current), next_time))
                .copied()?;
            path.push(next);
            current = next;
        }
        Some(path)
    }
}
