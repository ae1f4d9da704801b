//! Shrink strategies compute a partition of the abstract states and collapse
//! every block of the partition into a single state.

mod bisimulation;
mod bucket_based;
mod composite;
mod fh;
mod own_labels;

pub use bisimulation::*;
pub use bucket_based::*;
pub use composite::*;
pub use fh::*;
pub use own_labels::*;

use log::debug;
use log::info;
use log::warn;

use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::Labels;

/// The size limits that every shrink strategy respects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShrinkOptions {
    /// The maximum size of an abstraction after merging.
    pub max_states: usize,
    /// The maximum size of the two factors right before they are merged.
    pub max_states_before_merge: usize,
}

impl ShrinkOptions {
    pub fn new(max_states: usize, max_states_before_merge: usize) -> Self {
        debug_assert!(max_states_before_merge > 0);
        debug_assert!(max_states >= max_states_before_merge);
        Self {
            max_states,
            max_states_before_merge,
        }
    }

    /// No limits at all.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }

    /// Derives the limits from the optionally given values. When neither is
    /// given the size is limited to 50000 states, when only one is given the
    /// other imposes no further limit.
    pub fn from_options(max_states: Option<usize>, max_states_before_merge: Option<usize>) -> Result<Self, LdsimError> {
        let (max_states, mut max_states_before_merge) = match (max_states, max_states_before_merge) {
            (None, None) => (50000, 50000),
            (Some(max_states), None) => (max_states, max_states),
            (None, Some(before_merge)) => (before_merge.saturating_mul(before_merge), before_merge),
            (Some(max_states), Some(before_merge)) => (max_states, before_merge),
        };

        if max_states_before_merge > max_states {
            warn!("max_states_before_merge exceeds max_states, correcting.");
            max_states_before_merge = max_states;
        }

        if max_states < 1 {
            return Err(LdsimError::config("abstraction size must be at least 1"));
        }

        if max_states_before_merge < 1 {
            return Err(LdsimError::config("abstraction size before merge must be at least 1"));
        }

        Ok(Self::new(max_states, max_states_before_merge))
    }

    /// Computes the sizes to which both factors are shrunk before they are
    /// merged, such that their product respects the size limit.
    pub fn compute_shrink_sizes(&self, size1: usize, size2: usize) -> (usize, usize) {
        let mut new_size1 = size1.min(self.max_states_before_merge).max(1);
        let mut new_size2 = size2.min(self.max_states_before_merge).max(1);

        // Division instead of multiplication to avoid an overflow.
        if self.max_states / new_size1 < new_size2 {
            let balanced_size = (self.max_states as f64).sqrt() as usize;

            if new_size1 <= balanced_size {
                // The first factor is small enough, the second gets the remainder.
                new_size2 = self.max_states / new_size1;
            } else if new_size2 <= balanced_size {
                new_size1 = self.max_states / new_size2;
            } else {
                // Both factors are too big, treat them symmetrically.
                new_size1 = balanced_size;
                new_size2 = balanced_size;
            }
        }

        debug_assert!(new_size1 <= self.max_states_before_merge && new_size2 <= self.max_states_before_merge);
        (new_size1, new_size2)
    }
}

impl Default for ShrinkOptions {
    fn default() -> Self {
        Self::new(50000, 50000)
    }
}

/// A strategy to reduce the number of states of an abstraction.
pub trait ShrinkStrategy {
    fn name(&self) -> &'static str;

    fn options(&self) -> &ShrinkOptions;

    /// Shrinks the abstraction to at most `target` states when it is larger
    /// than the threshold of the strategy. When `force` is set the strategy
    /// is also applied to abstractions within the limit, which prunes the
    /// unreachable and irrelevant states.
    fn shrink(&mut self, abs: &mut Abstraction, labels: &mut Labels, target: usize, force: bool)
    -> Result<(), LdsimError>;

    /// Shrinks an atomic abstraction right after it is built.
    fn shrink_atomic(&mut self, _abs: &mut Abstraction, _labels: &mut Labels) -> Result<(), LdsimError> {
        Ok(())
    }

    /// Shrinks both factors such that their product respects the size limits.
    fn shrink_before_merge(
        &mut self,
        abs1: &mut Abstraction,
        abs2: &mut Abstraction,
        labels: &mut Labels,
    ) -> Result<(), LdsimError> {
        let (new_size1, new_size2) = self.options().compute_shrink_sizes(abs1.size(), abs2.size());
        if new_size2 != abs2.size() {
            self.shrink(abs2, labels, new_size2, false)?;
        }

        if new_size1 != abs1.size() {
            self.shrink(abs1, labels, new_size1, false)?;
        }
        Ok(())
    }

    /// Returns true iff the labels should be reduced before this strategy is applied.
    fn reduce_labels_before_shrinking(&self) -> bool;

    fn dump_options(&self) {
        info!("Shrink strategy: {}", self.name());
        info!("Abstraction size limit: {}", self.options().max_states);
        info!(
            "Abstraction size limit right before merge: {}",
            self.options().max_states_before_merge
        );
    }
}

/// Returns true iff the abstraction exceeds the threshold or shrinking is forced.
pub(crate) fn must_shrink(abs: &Abstraction, threshold: usize, force: bool) -> bool {
    debug_assert!(threshold >= 1);
    debug_assert!(abs.is_solvable());
    if abs.size() > threshold {
        debug!("{}: shrink from size {} (threshold: {})", abs.description(), abs.size(), threshold);
        return true;
    }

    if force {
        debug!(
            "{}: shrink forced to prune unreachable/irrelevant states",
            abs.description()
        );
        return true;
    }
    false
}

/// Collapses the groups of the computed partition.
pub(crate) fn apply(abs: &mut Abstraction, groups: &[Vec<usize>], target: usize) -> Result<(), LdsimError> {
    abs.apply_abstraction(groups)?;
    info!("{}: size after shrink {}, target {}", abs.description(), abs.size(), target);
    Ok(())
}
