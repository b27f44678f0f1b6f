//! Shared single-agent search primitives (spec.md §4.1, §4.4).

mod astar;
mod focal;

pub use astar::space_time_astar;
pub use focal::{focal_space_time_astar, FocalResult};
