//! Numeric dominance: simulation relations that quantify how much cost a
//! state can save compared to another state.

mod int_epsilon;
mod numeric_dominance_relation;
mod numeric_label_relation;
mod numeric_simulation_relation;
mod tau_labels;

pub use int_epsilon::*;
pub use numeric_dominance_relation::*;
pub use numeric_label_relation::*;
pub use numeric_simulation_relation::*;
pub use tau_labels::*;
