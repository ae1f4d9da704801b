#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod builder;
mod ld_simulation;
mod options;

pub use builder::*;
pub use ld_simulation::*;
pub use options::*;
