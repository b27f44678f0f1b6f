//! Grid topology: passable cells, 4-connected adjacency, and an all-pairs
//! unweighted shortest-path cache computed lazily per source node.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::error::MapfError;

/// Stable handle into [`Graph`]. Indexes directly into `Graph`'s node vectors.
pub type NodeId = usize;

/// Grid cell. Owned by [`Graph`]; everything downstream holds a [`NodeId`]
/// rather than a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: NodeId,
    pub x: usize,
    pub y: usize,
}

/// The set of passable nodes on a grid, their adjacency, and a lazily
/// populated all-pairs distance cache.
///
/// `path_dist(u, v) == usize::MAX` iff `u` and `v` are disconnected;
/// `path_dist(u, u) == 0`.
#[derive(Debug)]
pub struct Graph {
    pub width: usize,
    pub height: usize,
    nodes: Vec<Node>,
    /// `node_at[y * width + x]` is `Some(id)` for passable cells, `None` for
    /// blocked/out-of-bounds cells.
    node_at: Vec<Option<NodeId>>,
    /// Up to 4 neighbors per node (no self-loop; "stay" is a search-level
    /// action, not a graph edge).
    neighbors: Vec<Vec<NodeId>>,
    dist_cache: RefCell<HashMap<NodeId, Vec<usize>>>,
}

pub const UNREACHABLE: usize = usize::MAX;

impl Graph {
    /// Parse a MAPF map file: `'.'`/`'G'` passable, anything else blocked,
    /// one row per line, as described in spec.md §6.
    pub fn from_file(path: &str) -> Result<Self, MapfError> {
        let file = File::open(path).map_err(|source| MapfError::MapIo {
            path: path.to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let rows: Vec<String> = reader
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|source| MapfError::MapIo {
                path: path.to_string(),
                source,
            })?;
        Ok(Self::from_rows(&rows))
    }

    /// Build directly from grid rows (used by tests and the scenario generator).
    pub fn from_rows(rows: &[String]) -> Self {
        let height = rows.len();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);

        let mut node_at = vec![None; width * height];
        let mut nodes = Vec::new();

        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                if Self::is_passable_char(ch) {
                    let id = nodes.len();
                    nodes.push(Node { id, x, y });
                    node_at[y * width + x] = Some(id);
                }
            }
        }

        let mut graph = Graph {
            width,
            height,
            nodes,
            node_at,
            neighbors: Vec::new(),
            dist_cache: RefCell::new(HashMap::new()),
        };
        graph.neighbors = graph.compute_adjacency();
        graph
    }

    fn is_passable_char(ch: char) -> bool {
        matches!(ch, '.' | 'G')
    }

    fn compute_adjacency(&self) -> Vec<Vec<NodeId>> {
        self.nodes
            .iter()
            .map(|node| {
                let candidates = [
                    (node.x.wrapping_sub(1), node.y, node.x > 0),
                    (node.x + 1, node.y, true),
                    (node.x, node.y.wrapping_sub(1), node.y > 0),
                    (node.x, node.y + 1, true),
                ];
                candidates
                    .into_iter()
                    .filter(|&(_, _, in_bounds)| in_bounds)
                    .filter_map(|(x, y, _)| self.node_at(x, y))
                    .collect()
            })
            .collect()
    }

    pub fn node_at(&self, x: usize, y: usize) -> Option<NodeId> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.node_at[y * self.width + x]
    }

    pub fn node(&self, id: NodeId) -> Node {
        self.nodes[id]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        self.node_at(x, y).is_some()
    }

    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        &self.neighbors[id]
    }

    /// Unweighted shortest-path distance, memoized per source node via BFS.
    pub fn path_dist(&self, u: NodeId, v: NodeId) -> usize {
        if u == v {
            return 0;
        }
        let mut cache = self.dist_cache.borrow_mut();
        let table = cache
            .entry(u)
            .or_insert_with(|| self.bfs_from(u));
        table[v]
    }

    /// Full distance table from `source`, used directly by heuristics that
    /// need distance-to-goal for every node (the low-level search heuristic).
    pub fn distances_from(&self, source: NodeId) -> Vec<usize> {
        let mut cache = self.dist_cache.borrow_mut();
        cache
            .entry(source)
            .or_insert_with(|| self.bfs_from(source))
            .clone()
    }

    fn bfs_from(&self, source: NodeId) -> Vec<usize> {
        let mut dist = vec![UNREACHABLE; self.nodes.len()];
        dist[source] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(source);
        while let Some(current) = queue.pop_front() {
            let next_dist = dist[current] + 1;
            for &neighbor in self.neighbors(current) {
                if dist[neighbor] == UNREACHABLE {
                    dist[neighbor] = next_dist;
                    queue.push_back(neighbor);
                }
            }
        }
        dist
    }

    pub fn manhattan_dist(&self, u: NodeId, v: NodeId) -> usize {
        let a = self.node(u);
        let b = self.node(v);
        a.x.abs_diff(b.x) + a.y.abs_diff(b.y)
    }
}
