mod criterion;
mod dfp;
mod linear;
mod linear_criteria;

pub use criterion::*;
pub use dfp::*;
pub use linear::*;
pub use linear_criteria::*;

use log::info;
use rand::rngs::StdRng;

use ldsim_task::PlanningTask;
use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::Labels;

/// Bounds on the product of two abstractions that a merge strategy may select.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeLimits {
    /// The maximum number of states of the product.
    pub limit_states: Option<usize>,

    /// Products with at most this many states are always allowed, regardless of their transitions.
    pub min_limit_states: Option<usize>,

    /// The maximum estimated number of transitions of the product.
    pub limit_transitions: Option<usize>,
}

impl MergeLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit_states.is_none() && self.limit_transitions.is_none()
    }

    /// Returns true iff the product of both abstractions respects the limits.
    pub fn allows(&self, abs1: &Abstraction, abs2: &Abstraction) -> bool {
        let product = abs1.size().saturating_mul(abs2.size());
        if self.limit_states.is_some_and(|limit| product > limit) {
            return false;
        }

        if self.min_limit_states.is_some_and(|limit| product <= limit) {
            return true;
        }

        if self
            .limit_transitions
            .is_some_and(|limit| abs1.estimate_transitions(abs2) > limit)
        {
            return false;
        }

        true
    }
}

/// Selects the pairs of abstractions to merge.
///
/// The abstractions are passed as a vector in which the atomic abstraction
/// of variable `v` is stored at index `v`, and every product is appended at
/// the end. Merged and removed abstractions are `None`.
pub trait MergeStrategy {
    fn name(&self) -> &'static str;

    /// Returns true iff every merge combines the latest product with an atomic abstraction.
    fn is_linear(&self) -> bool;

    /// Prepares the strategy for the given abstractions.
    fn init(&mut self, task: &PlanningTask, abstractions: &[Option<Abstraction>], rng: &mut StdRng);

    /// Removes variables from consideration, for example because their abstraction was useless.
    fn remove_useless_vars(&mut self, _vars: &[usize]) {}

    /// Returns true iff no merges remain.
    fn done(&self) -> bool;

    /// Returns the indices of the next two abstractions to merge, or None
    /// when no pair respects the limits.
    fn get_next(
        &mut self,
        task: &PlanningTask,
        labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        limits: &MergeLimits,
    ) -> Result<Option<(usize, usize)>, LdsimError>;

    fn dump_options(&self) {
        info!("Merge strategy: {}", self.name());
    }
}

/// The number of merges needed to combine all given abstractions into one.
pub(crate) fn count_merges(abstractions: &[Option<Abstraction>]) -> usize {
    abstractions.iter().flatten().count().saturating_sub(1)
}

/// Returns the index of the last product when it is still present.
pub(crate) fn latest_product(task: &PlanningTask, abstractions: &[Option<Abstraction>]) -> Option<usize> {
    let last = abstractions.len().checked_sub(1)?;
    (last >= task.num_variables() && abstractions[last].is_some()).then_some(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use test_log::test;

    #[test]
    fn test_merge_limits() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        // The product has 2 * 3 states.
        assert!(MergeLimits::unlimited().allows(&atomics[0], &atomics[1]));
        let states = MergeLimits {
            limit_states: Some(5),
            ..MergeLimits::default()
        };
        assert!(!states.allows(&atomics[0], &atomics[1]));

        let transitions = MergeLimits {
            limit_transitions: Some(1),
            ..MergeLimits::default()
        };
        assert!(!transitions.allows(&atomics[0], &atomics[1]));

        let small_products = MergeLimits {
            min_limit_states: Some(6),
            ..transitions
        };
        assert!(small_products.allows(&atomics[0], &atomics[1]));
    }
}
