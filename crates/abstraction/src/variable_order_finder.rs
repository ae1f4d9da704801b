use clap::ValueEnum;
use log::info;
use rand::Rng;
use rand::seq::SliceRandom;

use ldsim_task::PlanningTask;

/// The order in which a linear merge strategy adds variables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum VariableOrderType {
    /// Prefer causal graph predecessors of selected variables, then goal variables, ties broken by level.
    #[default]
    CgGoalLevel,
    /// As [VariableOrderType::CgGoalLevel] with ties broken randomly.
    CgGoalRandom,
    /// Prefer goal variables, then causal graph predecessors, ties broken by level.
    GoalCgLevel,
    Random,
    Level,
    ReverseLevel,
}

/// Yields the task variables one at a time according to a [VariableOrderType].
#[derive(Clone, Debug)]
pub struct VariableOrderFinder {
    order_type: VariableOrderType,
    selected_vars: Vec<usize>,
    remaining_vars: Vec<usize>,
    is_goal_variable: Vec<bool>,
    is_causal_predecessor: Vec<bool>,
}

impl VariableOrderFinder {
    /// When `is_first` is false the variables are always shuffled, which is
    /// used to obtain different orders from the same type.
    pub fn new<R: Rng>(task: &PlanningTask, order_type: VariableOrderType, is_first: bool, rng: &mut R) -> Self {
        let num_variables = task.num_variables();
        let mut remaining_vars: Vec<usize> = if order_type == VariableOrderType::ReverseLevel {
            (0..num_variables).collect()
        } else {
            (0..num_variables).rev().collect()
        };

        if matches!(order_type, VariableOrderType::CgGoalRandom | VariableOrderType::Random) || !is_first {
            remaining_vars.shuffle(rng);
        }

        let mut is_goal_variable = vec![false; num_variables];
        for fact in task.goal() {
            is_goal_variable[fact.var] = true;
        }

        Self {
            order_type,
            selected_vars: Vec::new(),
            remaining_vars,
            is_goal_variable,
            is_causal_predecessor: vec![false; num_variables],
        }
    }

    pub fn done(&self) -> bool {
        self.remaining_vars.is_empty()
    }

    pub fn selected_vars(&self) -> &[usize] {
        &self.selected_vars
    }

    /// Returns the next variable, or None when all variables have been selected.
    pub fn next(&mut self, task: &PlanningTask) -> Option<usize> {
        if self.done() {
            return None;
        }

        let position = match self.order_type {
            VariableOrderType::CgGoalLevel | VariableOrderType::CgGoalRandom => self
                .find(|finder, var| finder.is_causal_predecessor[var])
                .or_else(|| self.find(|finder, var| finder.is_goal_variable[var])),
            VariableOrderType::GoalCgLevel => self
                .find(|finder, var| finder.is_goal_variable[var])
                .or_else(|| self.find(|finder, var| finder.is_causal_predecessor[var])),
            VariableOrderType::Random | VariableOrderType::Level | VariableOrderType::ReverseLevel => Some(0),
        };

        // Variables that are neither goals nor connected to the selected ones come last.
        let position = position.unwrap_or(0);
        let var = self.remaining_vars.remove(position);
        self.selected_vars.push(var);
        for &predecessor in task.causal_graph().eff_to_pre(var) {
            self.is_causal_predecessor[predecessor] = true;
        }
        Some(var)
    }

    fn find<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&Self, usize) -> bool,
    {
        self.remaining_vars.iter().position(|&var| predicate(self, var))
    }

    pub fn dump(&self) {
        let description = match self.order_type {
            VariableOrderType::CgGoalLevel => "CG/GOAL, tie breaking on level (main)",
            VariableOrderType::CgGoalRandom => "CG/GOAL, tie breaking random",
            VariableOrderType::GoalCgLevel => "GOAL/CG, tie breaking on level",
            VariableOrderType::Random => "random",
            VariableOrderType::Level => "by level",
            VariableOrderType::ReverseLevel => "by reverse level",
        };
        info!("Variable order type: {description}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::random_task;
    use ldsim_task::two_flip_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    #[test]
    fn test_level_orders() {
        let task = two_flip_task();
        let mut rng = rand::rng();

        let mut finder = VariableOrderFinder::new(&task, VariableOrderType::Level, true, &mut rng);
        assert_eq!(finder.next(&task), Some(1));
        assert_eq!(finder.next(&task), Some(0));
        assert_eq!(finder.next(&task), None);

        let mut finder = VariableOrderFinder::new(&task, VariableOrderType::ReverseLevel, true, &mut rng);
        assert_eq!(finder.next(&task), Some(0));
        assert_eq!(finder.next(&task), Some(1));
        assert!(finder.done());
    }

    #[test]
    fn test_cg_goal_prefers_predecessors() {
        // B is a goal variable and flipping B requires A.
        let task = two_flip_task();
        let mut finder = VariableOrderFinder::new(&task, VariableOrderType::CgGoalLevel, true, &mut rand::rng());
        assert_eq!(finder.next(&task), Some(1));
        assert_eq!(finder.next(&task), Some(0));
    }

    #[test]
    fn test_random_order_is_permutation() {
        random_test(100, |rng| {
            let task = random_task(rng, 5, 3, 6, 2);
            for order_type in VariableOrderType::value_variants() {
                let mut finder = VariableOrderFinder::new(&task, *order_type, true, rng);
                let mut order = Vec::new();
                while let Some(var) = finder.next(&task) {
                    order.push(var);
                }
                order.sort_unstable();
                assert_eq!(order, (0..task.num_variables()).collect::<Vec<_>>());
            }
        });
    }
}
