use clap::ValueEnum;
use log::debug;
use log::info;

use ldsim_utilities::LdsimError;

use crate::Abstraction;
use crate::INFINITY;
use crate::Labels;
use crate::ShrinkOptions;
use crate::ShrinkStrategy;
use crate::apply;
use crate::must_shrink;

/// What to do when splitting a group would exceed the size limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum AtLimit {
    /// Stop refining as soon as a split does not fit.
    #[default]
    Return,
    /// Keep splitting until the limit is exactly reached.
    UseUp,
}

/// The options of the bisimulation shrink strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BisimulationOptions {
    /// Only consider transitions on optimal paths.
    pub greedy: bool,
    /// Only shrink abstractions larger than this, defaults to the size limit.
    pub threshold: Option<usize>,
    /// Refine all groups of the same goal distance together.
    pub group_by_h: bool,
    pub at_limit: AtLimit,
    /// Ignore the outgoing transitions of goal states in abstractions that
    /// contain all goal variables, these states can never be left.
    pub aggregate_goals: bool,
}

impl Default for BisimulationOptions {
    fn default() -> Self {
        Self {
            greedy: false,
            threshold: None,
            group_by_h: false,
            at_limit: AtLimit::Return,
            aggregate_goals: false,
        }
    }
}

/// Everything bisimulation needs to know about a state in one round.
///
/// The derived order sorts by goal distance first, keeping the states of a
/// group next to each other and equal successor signatures adjacent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Signature {
    /// -1 for goal states, the goal distance otherwise.
    h_and_goal: i32,
    group: usize,
    /// Sorted and deduplicated (label, successor group) pairs.
    succ_signature: Vec<(usize, usize)>,
    state: usize,
}

impl Signature {
    fn new(h: i32, is_goal: bool, group: usize, state: usize) -> Self {
        let h_and_goal = if is_goal {
            debug_assert_eq!(h, 0, "Goal states must have goal distance zero");
            -1
        } else {
            h
        };

        Self {
            h_and_goal,
            group,
            succ_signature: Vec::new(),
            state,
        }
    }

    fn sentinel(h_and_goal: i32) -> Self {
        Self {
            h_and_goal,
            group: usize::MAX,
            succ_signature: Vec::new(),
            state: usize::MAX,
        }
    }
}

/// Shrinks an abstraction by computing the coarsest goal respecting
/// bisimulation, possibly approximated to respect the size limit.
pub struct ShrinkBisimulation {
    options: ShrinkOptions,
    bisimulation: BisimulationOptions,
    threshold: usize,
}

impl ShrinkBisimulation {
    pub fn new(options: ShrinkOptions, bisimulation: BisimulationOptions) -> Result<Self, LdsimError> {
        let threshold = bisimulation.threshold.unwrap_or(options.max_states);
        if threshold < 1 {
            return Err(LdsimError::config("bisimulation threshold must be at least 1"));
        }

        if threshold > options.max_states {
            return Err(LdsimError::config(
                "bisimulation threshold must not be larger than size limit",
            ));
        }

        Ok(Self {
            options,
            bisimulation,
            threshold,
        })
    }

    /// Exact bisimulation when no limit is given, otherwise bisimulation
    /// grouped by goal distance that stops at the limit.
    pub fn create_default(aggregate_goals: bool, limit: Option<usize>) -> Self {
        let max_states = limit.unwrap_or(usize::MAX).max(1);
        Self {
            options: ShrinkOptions::new(max_states, max_states),
            bisimulation: BisimulationOptions {
                greedy: false,
                threshold: Some(limit.map_or(1, |limit| limit.max(1))),
                group_by_h: limit.is_some(),
                at_limit: AtLimit::Return,
                aggregate_goals,
            },
            threshold: limit.map_or(1, |limit| limit.max(1)),
        }
    }

    /// Puts all goal states in group zero and every other state in the group
    /// of its goal distance. When there are more distinct goal distances than
    /// the target allows, the highest ones share the last group.
    fn initialize_groups(&self, abs: &Abstraction, target: usize) -> (Vec<usize>, usize) {
        let mut distances: Vec<i32> = (0..abs.size())
            .filter(|&state| !abs.is_goal_state(state))
            .map(|state| abs.get_goal_distance(state))
            .collect();
        distances.sort_unstable();
        distances.dedup();

        let num_groups = (distances.len() + 1).min(target);
        let state_to_group = (0..abs.size())
            .map(|state| {
                let h = abs.get_goal_distance(state);
                debug_assert!(h >= 0 && h != INFINITY, "Irrelevant states must be pruned before shrinking");
                debug_assert!(
                    abs.get_init_distance(state) != INFINITY,
                    "Unreachable states must be pruned before shrinking"
                );

                if abs.is_goal_state(state) {
                    0
                } else {
                    (1 + distances.partition_point(|&other| other < h)).min(num_groups - 1)
                }
            })
            .collect();

        (state_to_group, num_groups)
    }

    /// Computes the sorted signatures of all states, surrounded by two sentinels.
    fn compute_signatures(&self, abs: &Abstraction, labels: &Labels, state_to_group: &[usize]) -> Vec<Signature> {
        let mut signatures = Vec::with_capacity(abs.size() + 2);
        signatures.push(Signature::sentinel(-2));
        for (state, &group) in state_to_group.iter().enumerate() {
            signatures.push(Signature::new(
                abs.get_goal_distance(state),
                abs.is_goal_state(state),
                group,
                state,
            ));
        }
        signatures.push(Signature::sentinel(INFINITY));

        let skip_goal_transitions = self.bisimulation.aggregate_goals && abs.all_goals_relevant();
        for label in 0..abs.num_labels() {
            let cost = labels.get_label_cost(label);
            for t in abs.get_transitions_for_label(label) {
                if self.bisimulation.greedy {
                    let src_h = abs.get_goal_distance(t.src);
                    let target_h = abs.get_goal_distance(t.target);
                    debug_assert!(target_h + cost >= src_h);
                    if target_h + cost != src_h {
                        continue;
                    }
                }

                if skip_goal_transitions && abs.is_goal_state(t.src) {
                    continue;
                }

                signatures[t.src + 1]
                    .succ_signature
                    .push((label, state_to_group[t.target]));
            }
        }

        for signature in &mut signatures {
            signature.succ_signature.sort_unstable();
            signature.succ_signature.dedup();
        }

        signatures.sort_unstable();
        signatures
    }

    fn compute_abstraction(&self, abs: &Abstraction, labels: &Labels, target: usize) -> Vec<Vec<usize>> {
        let num_states = abs.size();
        let (mut state_to_group, mut num_groups) = self.initialize_groups(abs, target);
        debug!("{}: number of initial groups {num_groups}", abs.description());

        let max_h = abs.get_max_h();
        debug_assert!(max_h >= 0 && max_h != INFINITY);

        let mut stable = false;
        let mut stop_requested = false;
        let mut iterations = 0;
        while !stable && !stop_requested && num_groups < target {
            stable = true;
            iterations += 1;

            let signatures = self.compute_signatures(abs, labels, &state_to_group);
            debug_assert_eq!(signatures.len(), num_states + 2);

            // Skip the first sentinel.
            let mut sig_start = 1;
            while sig_start < signatures.len() - 1 {
                let h_and_goal = signatures[sig_start].h_and_goal;
                let group = signatures[sig_start].group;

                // Count the groups of this block before and after splitting.
                let mut num_old_groups = 0;
                let mut num_new_groups = 0;
                let mut sig_end = sig_start;
                loop {
                    let current = &signatures[sig_end];
                    let in_block = if self.bisimulation.group_by_h {
                        current.h_and_goal == h_and_goal
                    } else {
                        current.group == group
                    };
                    if !in_block {
                        break;
                    }

                    // The last group can span several goal distances, so a block always starts a group.
                    let previous = &signatures[sig_end - 1];
                    if sig_end == sig_start || previous.group != current.group {
                        num_old_groups += 1;
                        num_new_groups += 1;
                    } else if previous.succ_signature != current.succ_signature {
                        num_new_groups += 1;
                    }
                    sig_end += 1;
                }
                debug_assert!(sig_end > sig_start);

                if self.bisimulation.at_limit == AtLimit::Return
                    && num_groups - num_old_groups + num_new_groups > target
                {
                    // Splitting this block would exceed the size limit.
                    stop_requested = true;
                    break;
                } else if num_new_groups != num_old_groups {
                    stable = false;

                    let mut new_group = usize::MAX;
                    for i in sig_start..sig_end {
                        let previous = &signatures[i - 1];
                        let current = &signatures[i];

                        if i == sig_start || previous.group != current.group {
                            // The first part of a group keeps its number.
                            new_group = current.group;
                        } else if previous.succ_signature != current.succ_signature {
                            new_group = num_groups;
                            num_groups += 1;
                            debug_assert!(num_groups <= target);
                        }

                        state_to_group[current.state] = new_group;
                        if num_groups == target {
                            break;
                        }
                    }

                    if num_groups == target {
                        break;
                    }
                }

                sig_start = sig_end;
            }
        }

        debug!(
            "{}: bisimulation finished after {iterations} iterations with {num_groups} groups",
            abs.description()
        );

        let mut groups = vec![Vec::new(); num_groups];
        for (state, &group) in state_to_group.iter().enumerate() {
            groups[group].push(state);
        }
        groups.retain(|group| !group.is_empty());
        groups
    }
}

impl ShrinkStrategy for ShrinkBisimulation {
    fn name(&self) -> &'static str {
        "bisimulation"
    }

    fn options(&self) -> &ShrinkOptions {
        &self.options
    }

    fn shrink(&mut self, abs: &mut Abstraction, labels: &mut Labels, target: usize, force: bool) -> Result<(), LdsimError> {
        abs.compute_distances(labels)?;
        if !abs.is_solvable() {
            return Err(LdsimError::Unsolvable);
        }

        // Shrink when above the threshold, or when the product would exceed the size limit.
        if must_shrink(abs, target.min(self.threshold), force) {
            let groups = self.compute_abstraction(abs, labels, target.max(1));
            apply(abs, &groups, target)?;
        }
        Ok(())
    }

    fn shrink_atomic(&mut self, abs: &mut Abstraction, labels: &mut Labels) -> Result<(), LdsimError> {
        let old_size = abs.size();
        let size = abs.size();
        ShrinkBisimulation::create_default(false, None).shrink(abs, labels, size, true)?;
        if abs.size() != old_size {
            info!("Atomic abstraction simplified from {} to {} states.", old_size, abs.size());
        }
        Ok(())
    }

    fn reduce_labels_before_shrinking(&self) -> bool {
        true
    }

    fn dump_options(&self) {
        info!("Shrink strategy: {}", self.name());
        info!("Abstraction size limit: {}", self.options.max_states);
        info!(
            "Bisimulation type: {}",
            if self.bisimulation.greedy { "greedy" } else { "exact" }
        );
        info!("Bisimulation threshold: {}", self.threshold);
        info!("Group by h: {}", if self.bisimulation.group_by_h { "yes" } else { "no" });
        info!("At limit: {:?}", self.bisimulation.at_limit);
        info!(
            "Aggregate goals: {}",
            if self.bisimulation.aggregate_goals { "yes" } else { "no" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::Effect;
    use ldsim_task::Fact;
    use ldsim_task::PlanningTaskBuilder;
    use ldsim_task::two_flip_task;
    use test_log::test;

    #[test]
    fn test_bisimulation_chain() {
        // A single variable with six values where 0 -> 1 -> 2 -> 3 and 3 is the goal.
        let mut builder = PlanningTaskBuilder::new();
        let x = builder.add_variable("x", 6);
        builder.set_initial_state(vec![0]);
        builder.add_goal(x, 3);
        builder.add_operator("a", 1, &[Fact::new(x, 0)], &[Effect::new(x, 1)]);
        builder.add_operator("b", 1, &[Fact::new(x, 1)], &[Effect::new(x, 2)]);
        builder.add_operator("c", 1, &[Fact::new(x, 2)], &[Effect::new(x, 3)]);
        let task = builder.build().unwrap();

        let mut labels = Labels::new(&task);
        let mut atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
        let abs = &mut atomics[0];
        abs.compute_distances(&mut labels).unwrap();

        // Values 4 and 5 are unreachable.
        assert_eq!(abs.size(), 4);

        let mut strategy = ShrinkBisimulation::create_default(false, None);
        strategy.shrink(abs, &mut labels, 4, true).unwrap();
        assert_eq!(abs.size(), 4, "A chain with distinct distances is its own bisimulation");
    }

    #[test]
    fn test_bisimulation_six_states() {
        // The product has six states 0 -> 1 -> 2 -> 3 where state 3 reaches
        // two goal states, neither of which has outgoing transitions.
        let mut builder = PlanningTaskBuilder::new();
        let x = builder.add_variable("x", 6);
        let g = builder.add_variable("g", 2);
        builder.set_initial_state(vec![0, 0]);
        builder.add_goal(g, 1);
        builder.add_operator("step-0", 1, &[Fact::new(x, 0)], &[Effect::new(x, 1)]);
        builder.add_operator("step-1", 1, &[Fact::new(x, 1)], &[Effect::new(x, 2)]);
        builder.add_operator("step-2", 1, &[Fact::new(x, 2)], &[Effect::new(x, 3)]);
        builder.add_operator("reach-4", 1, &[Fact::new(x, 3)], &[Effect::new(x, 4), Effect::new(g, 1)]);
        builder.add_operator("reach-5", 1, &[Fact::new(x, 3)], &[Effect::new(x, 5), Effect::new(g, 1)]);
        let task = builder.build().unwrap();

        let mut labels = Labels::new(&task);
        let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
        let mut product = Abstraction::new_composite(&task, &mut labels, &atomics[0], &atomics[1]);
        product.compute_distances(&mut labels).unwrap();
        assert_eq!(product.size(), 6);
        assert_eq!(product.goal_states().iter().filter(|&&goal| goal).count(), 2);

        let mut strategy = ShrinkBisimulation::create_default(false, None);
        strategy.shrink(&mut product, &mut labels, 6, true).unwrap();
        assert_eq!(product.size(), 5, "Exactly the two goal states are merged");
        assert_eq!(product.goal_states().iter().filter(|&&goal| goal).count(), 1);

        // The merged states agree on their distances, so these are kept.
        let mut goal_distances = product.get_goal_distances().to_vec();
        goal_distances.sort_unstable();
        assert_eq!(goal_distances, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_bisimulation_two_flip_limit() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
        let mut product = Abstraction::new_composite(&task, &mut labels, &atomics[0], &atomics[1]);
        product.compute_distances(&mut labels).unwrap();

        // The state A=0, B=1 is unreachable.
        assert_eq!(product.size(), 3);

        let mut strategy = ShrinkBisimulation::create_default(false, Some(4));
        strategy.shrink(&mut product, &mut labels, 4, false).unwrap();
        assert_eq!(product.size(), 3, "Within the limit nothing is shrunk");

        // Both non goal states end up in one group.
        let mut strategy = ShrinkBisimulation::create_default(false, Some(2));
        strategy.shrink(&mut product, &mut labels, 2, false).unwrap();
        assert_eq!(product.size(), 2);
        assert!(product.is_solvable());
        assert_eq!(product.goal_states().iter().filter(|&&goal| goal).count(), 1);
    }
}
