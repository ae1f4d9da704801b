//! Utility types and functions for the ldsim toolset.
//!
//! Forbid unsafe code in this crate.
#![forbid(unsafe_code)]

mod budget;
mod error;
mod random_test;
mod timing;
mod verbosity;

pub use budget::*;
pub use error::*;
pub use random_test::*;
pub use timing::*;
pub use verbosity::*;
