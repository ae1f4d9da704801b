#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod abstraction;
mod construction;
mod distances;
mod equivalence_relation;
mod label;
mod label_map;
mod label_reducer;
mod lts;
mod merge;
mod scc;
mod shrink;
mod state_mapping;
mod variable_order_finder;
mod variable_partition;

pub use abstraction::*;
pub use distances::*;
pub use equivalence_relation::*;
pub use label::*;
pub use label_map::*;
pub use label_reducer::*;
pub use lts::*;
pub use merge::*;
pub use scc::*;
pub use shrink::*;
pub use state_mapping::*;
pub use variable_order_finder::*;
pub use variable_partition::*;
