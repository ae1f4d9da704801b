#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod alternative_label_relation;
mod dominance_relation;
mod label_dominance;
mod label_relation;
mod label_relation_identity;
mod label_relation_noop;
mod numeric;
mod simulation_relation;

pub use alternative_label_relation::*;
pub use dominance_relation::*;
pub use label_dominance::*;
pub use label_relation::*;
pub use label_relation_identity::*;
pub use label_relation_noop::*;
pub use numeric::*;
pub use simulation_relation::*;
