//! Error taxonomy for the MAPF core.
//!
//! Usage errors live at the CLI boundary (`clap` + [`crate::config::Config::validate`])
//! and are reported via `anyhow`. Everything that can happen once a [`crate::problem::Problem`]
//! exists and a solver starts running is one of the variants below: instance-level
//! problems are fatal before solving even starts, invariant violations indicate a solver
//! bug, and an invalid produced plan must never be returned silently.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapfError {
    #[error("failed to read map file {path}: {source}")]
    MapIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read instance file {path}: {source}")]
    InstanceIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed instance file {path}: {reason}")]
    InstanceFormat { path: String, reason: String },

    #[error("failed to read scenario file {path}: {source}")]
    ScenarioIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed scenario file {path}: {reason}")]
    ScenarioFormat { path: String, reason: String },

    #[error("bucket {bucket} has no unused route left to assign")]
    NoAvailableRoute { bucket: usize },

    #[error("agent {agent} start cell ({x}, {y}) is blocked or out of bounds")]
    UnpassableStart { agent: usize, x: usize, y: usize },

    #[error("agent {agent} goal cell ({x}, {y}) is blocked or out of bounds")]
    UnpassableGoal { agent: usize, x: usize, y: usize },

    #[error("agent {agent} start and goal are on disconnected components")]
    Disconnected { agent: usize },

    #[error("duplicate start cell shared by agents {first} and {second}")]
    DuplicateStart { first: usize, second: usize },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("solver produced an invalid plan: {0}")]
    InvalidResult(String),
}

pub type MapfResult<T> = Result<T, MapfError>;
