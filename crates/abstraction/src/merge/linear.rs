use log::debug;
use log::info;
use rand::rngs::StdRng;

use ldsim_task::PlanningTask;
use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::Labels;
use crate::MergeLimits;
use crate::MergeStrategy;
use crate::VariableOrderFinder;
use crate::VariableOrderType;
use crate::count_merges;
use crate::latest_product;

/// Merges the atomic abstractions one by one into a single product, in the
/// order given by a [VariableOrderFinder].
///
/// Variables whose product with the current abstraction exceeds the merge
/// limits are skipped.
pub struct MergeLinear {
    order_type: VariableOrderType,
    order: Option<VariableOrderFinder>,
    remaining_merges: usize,
}

impl MergeLinear {
    pub fn new(order_type: VariableOrderType) -> Self {
        Self {
            order_type,
            order: None,
            remaining_merges: 0,
        }
    }

    /// Returns the next variable in the order that still has an abstraction.
    fn next_present(&mut self, task: &PlanningTask, abstractions: &[Option<Abstraction>]) -> Option<usize> {
        let order = self.order.as_mut()?;
        while let Some(var) = order.next(task) {
            if abstractions[var].is_some() {
                return Some(var);
            }
            debug!("Skipping var {var}");
        }
        None
    }
}

impl MergeStrategy for MergeLinear {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn init(&mut self, task: &PlanningTask, abstractions: &[Option<Abstraction>], rng: &mut StdRng) {
        self.order = Some(VariableOrderFinder::new(task, self.order_type, true, rng));
        self.remaining_merges = count_merges(abstractions);
    }

    fn done(&self) -> bool {
        self.remaining_merges == 0 || self.order.as_ref().is_none_or(|order| order.done())
    }

    fn get_next(
        &mut self,
        task: &PlanningTask,
        _labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        limits: &MergeLimits,
    ) -> Result<Option<(usize, usize)>, LdsimError> {
        if self.done() {
            return Ok(None);
        }

        // The most recent product is appended at the end of the abstractions.
        let first = match latest_product(task, abstractions) {
            Some(first) => first,
            None => match self.next_present(task, abstractions) {
                Some(first) => {
                    info!("First variable: {first}");
                    first
                }
                None => return Ok(None),
            },
        };

        while let Some(second) = self.next_present(task, abstractions) {
            if let (Some(abs1), Some(abs2)) = (&abstractions[first], &abstractions[second]) {
                if limits.allows(abs1, abs2) {
                    info!("Next variable: {second}");
                    self.remaining_merges -= 1;
                    return Ok(Some((first, second)));
                }
            }
            debug!("Skipping var {second}, the product exceeds the merge limits");
        }

        Ok(None)
    }

    fn dump_options(&self) {
        info!("Merge strategy: {}", self.name());
        if let Some(order) = &self.order {
            order.dump();
        } else {
            info!("Variable order type: {:?}", self.order_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;
    use rand::SeedableRng;
    use test_log::test;

    #[test]
    fn test_linear_merge_order() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut abstractions: Vec<Option<Abstraction>> = Abstraction::build_atomic_abstractions(&task, &mut labels, false)
            .into_iter()
            .map(Some)
            .collect();

        let mut rng = StdRng::seed_from_u64(2022);
        let mut strategy = MergeLinear::new(VariableOrderType::Level);
        strategy.init(&task, &abstractions, &mut rng);
        assert!(!strategy.done());

        let next = strategy
            .get_next(&task, &mut labels, &mut abstractions, &MergeLimits::unlimited())
            .unwrap();
        assert_eq!(next, Some((1, 0)));
        assert!(strategy.done());
    }

    #[test]
    fn test_linear_merge_respects_limits() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let mut abstractions: Vec<Option<Abstraction>> = Abstraction::build_atomic_abstractions(&task, &mut labels, false)
            .into_iter()
            .map(Some)
            .collect();

        let mut strategy = MergeLinear::new(VariableOrderType::CgGoalLevel);
        strategy.init(&task, &abstractions, &mut StdRng::seed_from_u64(2022));

        let limits = MergeLimits {
            limit_states: Some(4),
            ..MergeLimits::default()
        };
        let next = strategy.get_next(&task, &mut labels, &mut abstractions, &limits).unwrap();
        assert_eq!(next, None);
    }
}
