use log::debug;
use log::info;

use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::Labels;
use crate::SccDecomposition;
use crate::ShrinkOptions;
use crate::ShrinkStrategy;
use crate::apply;

/// Collapses the states on cycles of own labels, labels that no other
/// abstraction is affected by. These cycles can be traversed without
/// changing the rest of the task.
pub struct ShrinkOwnLabels {
    options: ShrinkOptions,

    /// Also merge every state that reaches a goal via own labels with the
    /// goal, when all goal variables are part of the abstraction.
    goal_shrinking: bool,

    /// Only use own labels of cost zero so that goal distances are preserved.
    preserve_optimality: bool,
}

impl ShrinkOwnLabels {
    pub fn new(options: ShrinkOptions, goal_shrinking: bool, preserve_optimality: bool) -> Self {
        Self {
            options,
            goal_shrinking,
            preserve_optimality,
        }
    }

    pub fn create_default() -> Self {
        Self::new(ShrinkOptions::unlimited(), true, true)
    }
}

impl ShrinkStrategy for ShrinkOwnLabels {
    fn name(&self) -> &'static str {
        "own labels"
    }

    fn options(&self) -> &ShrinkOptions {
        &self.options
    }

    fn shrink(&mut self, abs: &mut Abstraction, labels: &mut Labels, target: usize, _force: bool) -> Result<(), LdsimError> {
        let num_states = abs.size();
        let mut is_goal = abs.goal_states().to_vec();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); num_states];
        for label in 0..abs.num_labels() {
            if !abs.is_own_label(labels, label) || (self.preserve_optimality && labels.get_label_cost(label) > 0) {
                continue;
            }

            for t in abs.get_transitions_for_label(label) {
                adjacency[t.src].push(t.target);
            }
        }

        for successors in &mut adjacency {
            successors.sort_unstable();
            successors.dedup();
        }

        let mut components = SccDecomposition::new(&adjacency).propagate_goals(&adjacency, &mut is_goal);
        drop(adjacency);

        if self.goal_shrinking && abs.all_goals_relevant() {
            debug!("{}: also merging the states that reach a goal", abs.description());
            let mut goal_component: Option<usize> = None;
            for i in 0..components.len() {
                if is_goal[components[i][0]] {
                    match goal_component {
                        None => goal_component = Some(i),
                        Some(first) => {
                            let members = std::mem::take(&mut components[i]);
                            components[first].extend(members);
                        }
                    }
                }
            }
            components.retain(|component| !component.is_empty());
        }

        if components.len() < num_states {
            apply(abs, &components, target)?;
        } else {
            debug!("{}: own-label shrinking does not reduce states", abs.description());
        }
        Ok(())
    }

    fn shrink_atomic(&mut self, abs: &mut Abstraction, labels: &mut Labels) -> Result<(), LdsimError> {
        let size = abs.size();
        self.shrink(abs, labels, size, true)
    }

    fn shrink_before_merge(
        &mut self,
        abs1: &mut Abstraction,
        abs2: &mut Abstraction,
        labels: &mut Labels,
    ) -> Result<(), LdsimError> {
        let size1 = abs1.size();
        self.shrink(abs1, labels, size1, true)?;
        let size2 = abs2.size();
        self.shrink(abs2, labels, size2, true)
    }

    fn reduce_labels_before_shrinking(&self) -> bool {
        true
    }

    fn dump_options(&self) {
        info!("Shrink strategy: {}", self.name());
        info!("Aggregate with goal states: {}", if self.goal_shrinking { "yes" } else { "no" });
        info!("Preserve optimality: {}", if self.preserve_optimality { "yes" } else { "no" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::Effect;
    use ldsim_task::Fact;
    use ldsim_task::PlanningTaskBuilder;
    use test_log::test;

    /// A variable x with a zero cost cycle 0 <-> 1, and 1 -> 2 -> 3 where 3 is the goal.
    fn cycle_task(cycle_cost: i32) -> ldsim_task::PlanningTask {
        let mut builder = PlanningTaskBuilder::new();
        let x = builder.add_variable("x", 4);
        builder.set_initial_state(vec![0]);
        builder.add_goal(x, 3);
        builder.add_operator("forth", cycle_cost, &[Fact::new(x, 0)], &[Effect::new(x, 1)]);
        builder.add_operator("back", cycle_cost, &[Fact::new(x, 1)], &[Effect::new(x, 0)]);
        builder.add_operator("up", 1, &[Fact::new(x, 1)], &[Effect::new(x, 2)]);
        builder.add_operator("done", 0, &[Fact::new(x, 2)], &[Effect::new(x, 3)]);
        builder.build().unwrap()
    }

    #[test]
    fn test_own_label_cycle_collapsed() {
        let task = cycle_task(0);
        let mut labels = Labels::new(&task);
        let mut atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        let mut strategy = ShrinkOwnLabels::create_default();
        strategy.shrink_atomic(&mut atomics[0], &mut labels).unwrap();

        // The cycle {0, 1} collapses, and 2 reaches the goal with a zero cost own label.
        assert_eq!(atomics[0].size(), 2);
        assert!(atomics[0].is_solvable());
    }

    #[test]
    fn test_own_label_costly_cycle_kept() {
        let task = cycle_task(1);
        let mut labels = Labels::new(&task);
        let mut atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        let mut strategy = ShrinkOwnLabels::create_default();
        strategy.shrink_atomic(&mut atomics[0], &mut labels).unwrap();

        // Only the zero cost label from 2 to the goal can be used.
        assert_eq!(atomics[0].size(), 3);
    }
}
