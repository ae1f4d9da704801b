use clap::ValueEnum;
use itertools::Itertools;
use log::debug;
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use ldsim_task::PlanningTask;
use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::Labels;
use crate::MergeCriterion;
use crate::MergeLimits;
use crate::MergeStrategy;
use crate::count_merges;
use crate::latest_product;

/// The tie breaking order of [MergeLinearCriteria].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum MergeOrder {
    Level,
    ReverseLevel,
    #[default]
    Random,
}

/// A linear merge strategy that selects the next variable by applying a
/// list of criteria to the candidates, until only one candidate is left.
/// Remaining ties are broken by the [MergeOrder].
pub struct MergeLinearCriteria {
    criteria: Vec<Box<dyn MergeCriterion>>,
    order: MergeOrder,
    remaining_vars: Vec<usize>,
    remaining_merges: usize,
}

impl MergeLinearCriteria {
    pub fn new(criteria: Vec<Box<dyn MergeCriterion>>, order: MergeOrder) -> Self {
        Self {
            criteria,
            order,
            remaining_vars: Vec::new(),
            remaining_merges: 0,
        }
    }

    /// Returns true iff one of the criteria needs reduced labels.
    pub fn reduce_labels_before_merge(&self) -> bool {
        self.criteria.iter().any(|criterion| criterion.reduce_labels_before_merge())
    }

    /// Selects the next variable to merge with the current abstraction.
    fn next(
        &mut self,
        task: &PlanningTask,
        labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        current: Option<usize>,
        limits: &MergeLimits,
    ) -> Option<usize> {
        let mut candidates: Vec<usize> = self
            .remaining_vars
            .iter()
            .copied()
            .filter(|&var| match (&abstractions[var], current.and_then(|index| abstractions[index].as_ref())) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(abs), Some(current)) => limits.allows(current, abs),
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        for criterion in &mut self.criteria {
            if candidates.len() <= 1 {
                break;
            }
            criterion.filter(task, labels, abstractions, &mut candidates, current);
        }

        debug!("Candidates: {}", candidates.iter().format(" "));
        let var = candidates[0];
        self.select_next(task, var);
        Some(var)
    }

    fn select_next(&mut self, task: &PlanningTask, var: usize) {
        self.remaining_vars.retain(|&other| other != var);
        for criterion in &mut self.criteria {
            criterion.select_next(task, var);
        }
    }
}

impl MergeStrategy for MergeLinearCriteria {
    fn name(&self) -> &'static str {
        "linear_criteria"
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn init(&mut self, task: &PlanningTask, abstractions: &[Option<Abstraction>], rng: &mut StdRng) {
        self.remaining_vars = (0..task.num_variables())
            .filter(|&var| abstractions.get(var).is_some_and(Option::is_some))
            .collect();

        match self.order {
            MergeOrder::Level => self.remaining_vars.reverse(),
            MergeOrder::ReverseLevel => {}
            MergeOrder::Random => self.remaining_vars.shuffle(rng),
        }

        for criterion in &mut self.criteria {
            criterion.init(task);
        }
        self.remaining_merges = count_merges(abstractions);
    }

    fn remove_useless_vars(&mut self, vars: &[usize]) {
        for var in vars {
            debug!("Remove var from merge consideration: {var}");
        }
        self.remaining_vars.retain(|var| !vars.contains(var));
    }

    fn done(&self) -> bool {
        self.remaining_merges == 0 || self.remaining_vars.is_empty()
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

        let mut first = match latest_product(task, abstractions) {
            Some(first) => first,
            None => match self.next(task, labels, abstractions, None, limits) {
                Some(first) => {
                    info!("First variable: {first}");
                    first
                }
                None => return Ok(None),
            },
        };

        loop {
            if let Some(second) = self.next(task, labels, abstractions, Some(first), limits) {
                info!("Next variable: {second}");
                self.remaining_merges -= 1;
                return Ok(Some((first, second)));
            }

            if self.remaining_vars.len() < 2 {
                return Ok(None);
            }

            // No variable fits the limits, so start a new product.
            match self.next(task, labels, abstractions, None, limits) {
                Some(var) => {
                    info!("First variable: {var}");
                    first = var;
                }
                None => return Ok(None),
            }
        }
    }

    fn dump_options(&self) {
        info!("Merge strategy: {}", self.name());
        info!(
            "Linear merge criteria: {} {:?}",
            self.criteria.iter().map(|criterion| criterion.name()).format("_"),
            self.order
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::random_task;
    use ldsim_utilities::random_test;
    use rand::SeedableRng;
    use test_log::test;

    use crate::MergeCriterionType;
    use crate::create_criterion;

    #[test]
    fn test_linear_criteria_merges_all() {
        random_test(50, |rng| {
            let task = random_task(rng, 4, 3, 6, 2);
            let mut labels = Labels::new(&task);
            let mut abstractions: Vec<Option<Abstraction>> =
                Abstraction::build_atomic_abstractions(&task, &mut labels, false)
                    .into_iter()
                    .map(|mut abs| {
                        abs.normalize(&mut labels);
                        Some(abs)
                    })
                    .collect();

            let criteria = [
                MergeCriterionType::Cg,
                MergeCriterionType::Goal,
                MergeCriterionType::Scc,
                MergeCriterionType::Trs,
            ]
            .into_iter()
            .map(create_criterion)
            .collect();
            let mut strategy = MergeLinearCriteria::new(criteria, MergeOrder::Level);
            assert!(strategy.reduce_labels_before_merge());
            strategy.init(&task, &abstractions, &mut StdRng::seed_from_u64(2022));

            let mut merges = 0;
            while !strategy.done() {
                let (first, second) = strategy
                    .get_next(&task, &mut labels, &mut abstractions, &MergeLimits::unlimited())
                    .unwrap()
                    .expect("An unlimited merge always succeeds");
                let abs1 = abstractions[first].take().unwrap();
                let abs2 = abstractions[second].take().unwrap();
                let mut product = Abstraction::new_composite(&task, &mut labels, &abs1, &abs2);
                product.normalize(&mut labels);
                abstractions.push(Some(product));
                merges += 1;
            }

            assert_eq!(merges, task.num_variables() - 1);
            assert_eq!(abstractions.iter().flatten().count(), 1);
        });
    }
}
