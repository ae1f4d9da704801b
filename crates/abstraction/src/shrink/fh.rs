use std::collections::BTreeMap;

use clap::ValueEnum;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;

use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::INFINITY;
use crate::Labels;
use crate::ShrinkOptions;
use crate::ShrinkStrategy;
use crate::apply;
use crate::compute_bucket_abstraction;
use crate::must_shrink;

/// Whether states with high or low values are shrunk first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum HighLow {
    #[default]
    High,
    Low,
}

/// Shrinks by combining states with equal f and h values, starting at the
/// configured ends of both orders.
pub struct ShrinkFh {
    options: ShrinkOptions,
    shrink_f: HighLow,
    shrink_h: HighLow,
    rng: StdRng,
}

impl ShrinkFh {
    pub fn new(options: ShrinkOptions, shrink_f: HighLow, shrink_h: HighLow, rng: StdRng) -> Self {
        Self {
            options,
            shrink_f,
            shrink_h,
            rng,
        }
    }

    /// Prefers shrinking states with a high f value and a low h value.
    pub fn create_default(max_states: usize) -> Self {
        Self::new(
            ShrinkOptions::new(max_states.max(1), max_states.max(1)),
            HighLow::High,
            HighLow::Low,
            StdRng::seed_from_u64(2022),
        )
    }

    /// Puts every state that is both reachable and relevant into the bucket
    /// of its (f, h) pair, the buckets are ordered by shrink priority.
    fn partition_into_buckets(&self, abs: &Abstraction) -> Vec<Vec<usize>> {
        let mut states_by_f_and_h: BTreeMap<i32, BTreeMap<i32, Vec<usize>>> = BTreeMap::new();
        for state in 0..abs.size() {
            let g = abs.get_init_distance(state);
            let h = abs.get_goal_distance(state);
            if g != INFINITY && h != INFINITY {
                states_by_f_and_h.entry(g + h).or_default().entry(h).or_default().push(state);
            }
        }

        let collect_h = |buckets: &mut Vec<Vec<usize>>, by_h: BTreeMap<i32, Vec<usize>>| match self.shrink_h {
            HighLow::High => buckets.extend(by_h.into_values().rev()),
            HighLow::Low => buckets.extend(by_h.into_values()),
        };

        let mut buckets = Vec::new();
        match self.shrink_f {
            HighLow::High => {
                for by_h in states_by_f_and_h.into_values().rev() {
                    collect_h(&mut buckets, by_h);
                }
            }
            HighLow::Low => {
                for by_h in states_by_f_and_h.into_values() {
                    collect_h(&mut buckets, by_h);
                }
            }
        }
        buckets
    }
}

impl ShrinkStrategy for ShrinkFh {
    fn name(&self) -> &'static str {
        "f-preserving"
    }

    fn options(&self) -> &ShrinkOptions {
        &self.options
    }

    fn shrink(&mut self, abs: &mut Abstraction, labels: &mut Labels, target: usize, force: bool) -> Result<(), LdsimError> {
        abs.compute_distances(labels)?;
        if !abs.is_solvable() {
            return Err(LdsimError::Unsolvable);
        }

        if must_shrink(abs, target, force) {
            let buckets = self.partition_into_buckets(abs);
            let groups = compute_bucket_abstraction(&buckets, target, &mut self.rng);
            apply(abs, &groups, target)?;
        }
        Ok(())
    }

    fn reduce_labels_before_shrinking(&self) -> bool {
        false
    }

    fn dump_options(&self) {
        info!("Shrink strategy: {}", self.name());
        info!("Abstraction size limit: {}", self.options.max_states);
        info!("Prefer shrinking high or low f states: {:?}", self.shrink_f);
        info!("Prefer shrinking high or low h states: {:?}", self.shrink_h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;
    use test_log::test;

    #[test]
    fn test_fh_prunes_to_target() {
        let task = gripper_task(3);
        let mut labels = Labels::new(&task);
        let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
        let [robot, ball] = <[Abstraction; 2]>::try_from(atomics).unwrap();

        let mut product = Abstraction::new_composite(&task, &mut labels, &robot, &ball);
        product.compute_distances(&mut labels).unwrap();
        let before = product.size();

        let mut strategy = ShrinkFh::create_default(4);
        strategy.shrink(&mut product, &mut labels, 4, false).unwrap();
        assert!(product.size() <= 4);
        assert!(product.size() < before);
        assert!(product.is_solvable());
        assert!(product.goal_states().iter().any(|&goal| goal));
    }

    #[test]
    fn test_fh_keeps_small_abstractions() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        let mut strategy = ShrinkFh::create_default(10);
        strategy.shrink(&mut atomics[0], &mut labels, 10, false).unwrap();
        assert_eq!(atomics[0].size(), 2);
        assert_eq!(atomics[0].get_goal_distances(), &[1, 0]);
    }
}
