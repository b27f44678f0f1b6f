//! Multi-agent path finding on 4-connected grids: CBS/ICBS/ECBS, PIBT and
//! PIBT_COMPLETE, iterative refinement, and unlabeled goal assignment.

pub mod config;
pub mod constraint;
pub mod error;
pub mod graph;
pub mod mdd;
pub mod path;
pub mod problem;
pub mod scenario;
pub mod search;
pub mod solver;
pub mod stat;
