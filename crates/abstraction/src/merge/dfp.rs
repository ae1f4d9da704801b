use log::debug;
use rand::rngs::StdRng;

use ldsim_task::PlanningTask;
use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::INFINITY;
use crate::Labels;
use crate::MergeLimits;
use crate::MergeStrategy;
use crate::count_merges;

/// The non-linear merge strategy of Dräger, Finkbeiner and Podelski.
///
/// Every label gets a rank per abstraction, the lowest goal distance of
/// a target of its transitions. The pair of abstractions, at least one of
/// them goal relevant, with the lowest rank of a label relevant for both is
/// merged first.
#[derive(Default)]
pub struct MergeDfp {
    remaining_merges: usize,
}

impl MergeDfp {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The indices of the present abstractions: the products from the most
/// recent to the oldest, followed by the atomic abstractions in variable order.
fn sorted_indices(num_variables: usize, abstractions: &[Option<Abstraction>]) -> Vec<usize> {
    let num_atomic = num_variables.min(abstractions.len());
    (num_atomic..abstractions.len())
        .rev()
        .chain(0..num_atomic)
        .filter(|&index| abstractions[index].is_some())
        .collect()
}

fn is_goal_relevant(task: &PlanningTask, abs: &Abstraction) -> bool {
    abs.varset().iter().any(|&var| task.is_goal_var(var))
}

impl MergeStrategy for MergeDfp {
    fn name(&self) -> &'static str {
        "dfp"
    }

    fn is_linear(&self) -> bool {
        false
    }

    fn init(&mut self, _task: &PlanningTask, abstractions: &[Option<Abstraction>], _rng: &mut StdRng) {
        self.remaining_merges = count_merges(abstractions);
    }

    fn done(&self) -> bool {
        self.remaining_merges == 0
    }

    fn get_next(
        &mut self,
        task: &PlanningTask,
        labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        limits: &MergeLimits,
    ) -> Result<Option<(usize, usize)>, LdsimError> {
        if self.done() {
            return Ok(None);
        }

        let indices = sorted_indices(task.num_variables(), abstractions);
        let mut label_ranks = Vec::with_capacity(indices.len());
        for &index in &indices {
            if let Some(abs) = abstractions[index].as_mut() {
                label_ranks.push(abs.compute_label_ranks(labels)?);
            }
        }

        let present: Vec<&Abstraction> = indices.iter().filter_map(|&index| abstractions[index].as_ref()).collect();
        let candidate = |i: usize, j: usize| {
            limits.allows(present[i], present[j])
                && (is_goal_relevant(task, present[i]) || is_goal_relevant(task, present[j]))
        };

        let mut best: Option<(usize, usize)> = None;
        let mut minimum_weight = INFINITY;
        for i in 0..present.len() {
            for j in (i + 1)..present.len() {
                if !candidate(i, j) {
                    continue;
                }

                let pair_weight = label_ranks[i]
                    .iter()
                    .zip(&label_ranks[j])
                    .filter_map(|(rank1, rank2)| Some((*rank1)?.max((*rank2)?)))
                    .min()
                    .unwrap_or(INFINITY);

                if pair_weight < minimum_weight {
                    minimum_weight = pair_weight;
                    best = Some((indices[i], indices[j]));
                }
            }
        }

        if best.is_none() {
            // No pair with a finite weight, take the first pair with a goal relevant abstraction.
            best = (0..present.len())
                .flat_map(|i| ((i + 1)..present.len()).map(move |j| (i, j)))
                .find(|&(i, j)| candidate(i, j))
                .map(|(i, j)| (indices[i], indices[j]));
        }

        debug!("Next pair of indices: {best:?}");
        if best.is_some() {
            self.remaining_merges -= 1;
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use ldsim_task::random_task;
    use ldsim_utilities::random_test;
    use rand::SeedableRng;
    use test_log::test;

    #[test]
    fn test_sorted_indices() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
        let mut abstractions: Vec<Option<Abstraction>> = atomics.iter().cloned().map(Some).collect();
        abstractions.push(None);
        abstractions.push(Some(atomics[0].clone()));

        assert_eq!(sorted_indices(2, &abstractions), vec![3, 0, 1]);
    }

    #[test]
    fn test_dfp_merges_goal_relevant_pairs() {
        random_test(50, |rng| {
            let task = random_task(rng, 4, 3, 6, 2);
            let mut labels = Labels::new(&task);
            let mut abstractions: Vec<Option<Abstraction>> =
                Abstraction::build_atomic_abstractions(&task, &mut labels, false)
                    .into_iter()
                    .map(Some)
                    .collect();

            let mut strategy = MergeDfp::new();
            strategy.init(&task, &abstractions, &mut StdRng::seed_from_u64(2022));

            let Ok(Some((first, second))) =
                strategy.get_next(&task, &mut labels, &mut abstractions, &MergeLimits::unlimited())
            else {
                // Pruning during the distance computation found the task unsolvable, or no goal relevant pair exists.
                return;
            };

            assert_ne!(first, second);
            let abs1 = abstractions[first].as_ref().unwrap();
            let abs2 = abstractions[second].as_ref().unwrap();
            assert!(is_goal_relevant(&task, abs1) || is_goal_relevant(&task, abs2));
        });
    }
}
