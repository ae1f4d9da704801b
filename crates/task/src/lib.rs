#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod builder;
mod causal_graph;
mod cost;
mod generators;
mod state_space;
mod task;

pub use builder::*;
pub use causal_graph::*;
pub use cost::*;
pub use generators::*;
pub use state_space::*;
pub use task::*;
