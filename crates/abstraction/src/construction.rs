use std::ops::BitAnd;

use bitvec::vec::BitVec;
use log::debug;
use log::info;

use ldsim_task::PlanningTask;

use crate::AbstractTransition;
use crate::Abstraction;
use crate::Labels;
use crate::OperatorSet;
use crate::StateMapping;
use crate::pdb_rank;

impl Abstraction {
    /// Builds one abstraction per variable of the task, in the order of the variables.
    ///
    /// The transitions of all atomic abstractions are generated in a single
    /// pass over the labels. Dead operators induce no transitions.
    pub fn build_atomic_abstractions(
        task: &PlanningTask,
        labels: &mut Labels,
        store_original_operators: bool,
    ) -> Vec<Abstraction> {
        info!("Building atomic abstractions...");

        let num_goals = task.goal().len();
        let mut result: Vec<Abstraction> = (0..task.num_variables())
            .map(|var| {
                let domain = task.domain_size(var);
                let goal_value = task.goal_value(var);
                let mapping = StateMapping::Atomic {
                    variable: var,
                    lookup: (0..domain).map(Some).collect(),
                };

                let id = labels.fresh_abstraction_id();
                let mut abstraction = Abstraction::with_mapping(
                    id,
                    mapping,
                    vec![var],
                    labels.size(),
                    domain,
                    usize::from(goal_value.is_some()) == num_goals,
                    task.num_operators(),
                    store_original_operators,
                );

                for value in 0..domain {
                    abstraction.goal_states[value] = goal_value.is_none_or(|goal| goal == value);
                }
                abstraction.init_state = Some(task.initial_state()[var]);
                abstraction
            })
            .collect();

        for label in 0..labels.size() {
            let op = labels.label(label).operator();
            if labels.label(label).is_composite() || task.is_dead(op) {
                continue;
            }

            let operator = task.operator(op);
            for prevail in operator.prevails() {
                let abstraction = &mut result[prevail.var];
                abstraction.transitions_by_label[label].push(AbstractTransition::new(prevail.value, prevail.value));
                abstraction.relevant_labels[label] = true;
                labels.set_relevant_for(label, abstraction.id);
            }

            for pre_post in operator.pre_posts() {
                let var = pre_post.var;
                let values = match pre_post.pre {
                    Some(pre) => pre..pre + 1,
                    None => 0..task.domain_size(var),
                };

                let mut condition_on_var = None;
                let mut other_condition = false;
                for condition in &pre_post.conditions {
                    if condition.var == var {
                        condition_on_var = Some(condition.value);
                    } else {
                        other_condition = true;
                    }
                }

                let abstraction = &mut result[var];
                let transitions = &mut abstraction.transitions_by_label[label];
                for value in values.clone() {
                    // The effect cannot trigger when its condition on this variable is false.
                    if condition_on_var.is_none_or(|cond| cond == value) {
                        transitions.push(AbstractTransition::new(value, pre_post.post));
                    }
                }

                if !pre_post.conditions.is_empty() {
                    for value in values {
                        // The effect might not trigger, in which case the value is unchanged.
                        if other_condition || condition_on_var != Some(value) {
                            transitions.push(AbstractTransition::new(value, value));
                        }
                    }
                }

                abstraction.relevant_labels[label] = true;
                labels.set_relevant_for(label, abstraction.id);
            }
        }

        for abstraction in &mut result {
            for (label, transitions) in abstraction.transitions_by_label.iter_mut().enumerate() {
                transitions.sort_unstable();
                transitions.dedup();

                if let Some(all) = &mut abstraction.transition_operators {
                    let mut operators: OperatorSet = BitVec::repeat(false, task.num_operators());
                    operators.set(labels.label(label).operator(), true);
                    all[label] = vec![operators; transitions.len()];
                }
            }

            debug_assert!(abstraction.is_normalized(labels), "Atomic abstractions are normalized");
        }

        result
    }

    /// Builds the synchronized product of two normalized and solvable
    /// abstractions. The states are `s1 * abs2.size() + s2`.
    ///
    /// Both components become irrelevant for every label, the product takes their place.
    pub fn new_composite(
        task: &PlanningTask,
        labels: &mut Labels,
        abs1: &Abstraction,
        abs2: &Abstraction,
    ) -> Abstraction {
        debug!("Merging {} and {}", abs1.description(), abs2.description());
        debug_assert!(abs1.is_solvable() && abs2.is_solvable(), "Only solvable abstractions can be merged");
        debug_assert!(
            abs1.is_normalized(labels) && abs2.is_normalized(labels),
            "Only normalized abstractions can be merged"
        );

        let mut varset: Vec<usize> = abs1.varset.iter().chain(&abs2.varset).copied().collect();
        varset.sort_unstable();
        varset.dedup();

        let num_goal_vars = varset.iter().filter(|&&var| task.is_goal_var(var)).count();
        let multiplier = abs2.size();
        let num_states = abs1.size() * multiplier;
        let lookup = (0..abs1.size())
            .map(|s1| (0..multiplier).map(|s2| Some(s1 * multiplier + s2)).collect())
            .collect();
        let mapping = StateMapping::Composite {
            components: Box::new([abs1.mapping.clone(), abs2.mapping.clone()]),
            lookup,
        };

        let id = labels.fresh_abstraction_id();
        let store_original_operators = abs1.stores_original_operators() && abs2.stores_original_operators();
        let mut result = Abstraction::with_mapping(
            id,
            mapping,
            varset,
            labels.size(),
            num_states,
            num_goal_vars == task.goal().len(),
            task.num_operators(),
            store_original_operators,
        );

        for s1 in 0..abs1.size() {
            for s2 in 0..multiplier {
                result.goal_states[s1 * multiplier + s2] = abs1.goal_states[s1] && abs2.goal_states[s2];
            }
        }
        if let (Some(init1), Some(init2)) = (abs1.init_state, abs2.init_state) {
            result.init_state = Some(init1 * multiplier + init2);
        }

        for label in 0..labels.size() {
            let relevant1 = abs1.is_relevant_label(label);
            let relevant2 = abs2.is_relevant_label(label);
            if !relevant1 && !relevant2 {
                continue;
            }

            result.relevant_labels[label] = true;
            labels.set_relevant_for(label, id);

            let bucket1 = abs1.get_transitions_for_label(label);
            let bucket2 = abs2.get_transitions_for_label(label);
            let ops1 = abs1.get_transition_ops_for_label(label);
            let ops2 = abs2.get_transition_ops_for_label(label);
            let mut transitions = Vec::new();
            let mut operators: Vec<OperatorSet> = Vec::new();

            if relevant1 && relevant2 {
                transitions.reserve(bucket1.len() * bucket2.len());
                for (i, t1) in bucket1.iter().enumerate() {
                    for (j, t2) in bucket2.iter().enumerate() {
                        transitions.push(AbstractTransition::new(
                            t1.src * multiplier + t2.src,
                            t1.target * multiplier + t2.target,
                        ));
                        if store_original_operators {
                            operators.push(ops1[i].clone().bitand(&ops2[j]));
                        }
                    }
                }
            } else if relevant1 {
                transitions.reserve(bucket1.len() * multiplier);
                for (i, t1) in bucket1.iter().enumerate() {
                    for s2 in 0..multiplier {
                        transitions.push(AbstractTransition::new(
                            t1.src * multiplier + s2,
                            t1.target * multiplier + s2,
                        ));
                        if store_original_operators {
                            operators.push(ops1[i].clone());
                        }
                    }
                }
            } else {
                transitions.reserve(bucket2.len() * abs1.size());
                for s1 in 0..abs1.size() {
                    for (j, t2) in bucket2.iter().enumerate() {
                        transitions.push(AbstractTransition::new(
                            s1 * multiplier + t2.src,
                            s1 * multiplier + t2.target,
                        ));
                        if store_original_operators {
                            operators.push(ops2[j].clone());
                        }
                    }
                }
            }

            result.transitions_by_label[label] = transitions;
            if let Some(all) = &mut result.transition_operators {
                all[label] = operators;
            }
        }

        result.transitions_sorted_unique = result.are_transitions_sorted_unique();
        labels.set_irrelevant_for_all_labels(abs1.id);
        labels.set_irrelevant_for_all_labels(abs2.id);
        result
    }

    /// Builds the projection of the task onto the given pattern of variables.
    ///
    /// Only the current labels are considered, using the conditions and
    /// effects of their canonical operator. Effect conditions are ignored.
    pub fn new_pdb(task: &PlanningTask, labels: &mut Labels, pattern: Vec<usize>) -> Abstraction {
        let domains: Vec<usize> = pattern.iter().map(|&var| task.domain_size(var)).collect();
        let num_states: usize = domains.iter().product();

        let mut varset = pattern.clone();
        varset.sort_unstable();
        let num_goal_vars = pattern.iter().filter(|&&var| task.is_goal_var(var)).count();

        let id = labels.fresh_abstraction_id();
        let mapping = StateMapping::Pdb {
            pattern: pattern.clone(),
            domains: domains.clone(),
            lookup: (0..num_states).map(Some).collect(),
        };
        let mut result = Abstraction::with_mapping(
            id,
            mapping,
            varset,
            labels.size(),
            num_states,
            num_goal_vars == task.goal().len(),
            task.num_operators(),
            false,
        );
        result.init_state = Some(pdb_rank(&pattern, &domains, task.initial_state()));

        let mut goal_values: Vec<Option<usize>> = pattern.iter().map(|&var| task.goal_value(var)).collect();
        insert_goals(&domains, &mut goal_values, 0, &mut result.goal_states);

        let current: Vec<_> = labels.current_labels().collect();
        for label in current {
            let operator = task.operator(labels.label(label).operator());
            let mut pre_values: Vec<Option<usize>> = vec![None; task.num_variables()];
            let mut eff_values: Vec<Option<usize>> = vec![None; task.num_variables()];
            for prevail in operator.prevails() {
                pre_values[prevail.var] = Some(prevail.value);
                eff_values[prevail.var] = Some(prevail.value);
            }
            for pre_post in operator.pre_posts() {
                pre_values[pre_post.var] = pre_post.pre;
                eff_values[pre_post.var] = Some(pre_post.post);
            }

            if pattern
                .iter()
                .all(|&var| pre_values[var].is_none() && eff_values[var].is_none())
            {
                continue;
            }

            result.relevant_labels[label] = true;
            labels.set_relevant_for(label, id);

            let mut pre: Vec<Option<usize>> = pattern.iter().map(|&var| pre_values[var]).collect();
            let mut eff: Vec<Option<usize>> = pattern.iter().map(|&var| eff_values[var]).collect();
            let transitions = &mut result.transitions_by_label[label];
            insert_transitions(&domains, &mut pre, &mut eff, 0, transitions);
            transitions.sort_unstable();
            transitions.dedup();
        }

        result
    }
}

/// Ranks an assignment to the pattern, all values must be set.
fn rank_assignment(domains: &[usize], values: &[Option<usize>]) -> usize {
    values
        .iter()
        .zip(domains)
        .fold(0, |rank, (value, &domain)| rank * domain + value.unwrap_or_default())
}

/// Marks every completion of the partial goal assignment as a goal state.
fn insert_goals(domains: &[usize], goal_values: &mut [Option<usize>], pos: usize, goal_states: &mut [bool]) {
    if pos == domains.len() {
        goal_states[rank_assignment(domains, goal_values)] = true;
        return;
    }

    if goal_values[pos].is_some() {
        insert_goals(domains, goal_values, pos + 1, goal_states);
    } else {
        for value in 0..domains[pos] {
            goal_values[pos] = Some(value);
            insert_goals(domains, goal_values, pos + 1, goal_states);
        }
        goal_values[pos] = None;
    }
}

/// Adds a transition for every completion of the unset preconditions, an
/// unset effect takes the value of the precondition.
fn insert_transitions(
    domains: &[usize],
    pre: &mut [Option<usize>],
    eff: &mut [Option<usize>],
    pos: usize,
    transitions: &mut Vec<AbstractTransition>,
) {
    if pos == domains.len() {
        transitions.push(AbstractTransition::new(
            rank_assignment(domains, pre),
            rank_assignment(domains, eff),
        ));
        return;
    }

    if pre[pos].is_some() {
        insert_transitions(domains, pre, eff, pos + 1, transitions);
        return;
    }

    let change_eff = eff[pos].is_none();
    for value in 0..domains[pos] {
        pre[pos] = Some(value);
        if change_eff {
            eff[pos] = Some(value);
        }
        insert_transitions(domains, pre, eff, pos + 1, transitions);
    }

    pre[pos] = None;
    if change_eff {
        eff[pos] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::StateSpace;
    use ldsim_task::gripper_task;
    use ldsim_task::random_task;
    use ldsim_task::two_flip_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    #[test]
    fn test_atomic_abstractions() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let atomic = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        assert_eq!(atomic.len(), 2);
        let ball = &atomic[1];
        assert_eq!(ball.size(), 3);
        assert_eq!(ball.goal_states(), &[false, true, false]);
        assert!(ball.all_goals_relevant());

        // The move operators only have prevail conditions on the robot.
        assert!(!ball.is_relevant_label(0));
        for label in labels.current_labels() {
            assert_eq!(
                labels.get_relevant_for(label).len(),
                atomic.iter().filter(|abs| abs.is_relevant_label(label)).count()
            );
        }
    }

    #[test]
    fn test_product_is_exact() {
        random_test(100, |rng| {
            let task = random_task(rng, 2, 3, 6, 2);
            let mut labels = Labels::new(&task);
            let atomic = Abstraction::build_atomic_abstractions(&task, &mut labels, true);
            let mut product = Abstraction::new_composite(&task, &mut labels, &atomic[0], &atomic[1]);
            product.normalize(&mut labels);

            // With two variables the product is the state space itself.
            let space = StateSpace::new(&task, 1000).unwrap();
            for rank in 0..space.num_states() {
                let state = space.state(rank);
                let abstract_state = product.get_state_mapping(&state).unwrap();
                assert_eq!(product.is_goal_state(abstract_state), task.is_goal(&state));

                for (op, operator) in task.operators().iter().enumerate() {
                    if !operator.is_applicable(&state) {
                        continue;
                    }

                    let target = product.get_state_mapping(&operator.apply(&state)).unwrap();
                    let transition = AbstractTransition::new(abstract_state, target);
                    if product.is_relevant_label(op) {
                        assert!(product.get_transitions_for_label(op).contains(&transition));
                    } else {
                        assert!(transition.is_self_loop());
                    }
                }
            }

            assert!(labels.iter().all(|label| {
                !label.is_relevant_for(atomic[0].id()) && !label.is_relevant_for(atomic[1].id())
            }));
        });
    }

    #[test]
    fn test_pdb_abstraction() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let pdb = Abstraction::new_pdb(&task, &mut labels, vec![0, 1]);

        assert_eq!(pdb.size(), 4);
        assert_eq!(pdb.init_state(), Some(0));
        assert_eq!(pdb.goal_states(), &[false, false, false, true]);
        assert_eq!(
            pdb.get_transitions_for_label(0),
            &[AbstractTransition::new(0, 2), AbstractTransition::new(1, 3)]
        );
        assert_eq!(pdb.get_transitions_for_label(1), &[AbstractTransition::new(2, 3)]);

        let partial = Abstraction::new_pdb(&task, &mut labels, vec![1]);
        assert_eq!(partial.goal_states(), &[false, true]);
        assert!(!partial.all_goals_relevant());
    }
}
