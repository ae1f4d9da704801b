use log::debug;
use log::trace;
use rustc_hash::FxHashMap;

use crate::AbstractTransition;
use crate::Abstraction;
use crate::LabelMap;

/// The index of a group of labels that induce the same transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelGroup(usize);

impl LabelGroup {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A transition of the labelled transition system, labelled by a label group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LtsTransition {
    pub src: usize,
    pub target: usize,
    pub group: LabelGroup,
}

impl LtsTransition {
    pub fn new(src: usize, target: usize, group: LabelGroup) -> Self {
        Self { src, target, group }
    }
}

/// A view on an [Abstraction] in which the labels are the dense indices of
/// a [LabelMap], and the labels that induce identical transitions are
/// grouped together.
///
/// The view copies the transitions, so pruning transitions of the view does
/// not affect the abstraction. It must be rebuilt whenever the transitions
/// of the abstraction change.
#[derive(Clone, Debug)]
pub struct LabelledTransitionSystem {
    num_states: usize,
    goal_states: Vec<bool>,

    /// The labels with at least one transition.
    relevant_labels: Vec<usize>,
    /// The labels that induce a self loop in every state.
    irrelevant_labels: Vec<usize>,

    label_groups: Vec<Vec<usize>>,
    /// None for irrelevant labels and for dead labels, which have no transitions.
    group_of_label: Vec<Option<LabelGroup>>,

    transitions: Vec<LtsTransition>,
    transitions_src: Vec<Vec<LtsTransition>>,
    transitions_label_group: Vec<Vec<AbstractTransition>>,
}

impl LabelledTransitionSystem {
    pub fn new(abs: &Abstraction, label_map: &LabelMap) -> Self {
        let start = std::time::Instant::now();
        let num_states = abs.size();
        let num_labels = label_map.num_labels();

        let mut relevant_labels = Vec::new();
        let mut irrelevant_labels = Vec::new();
        let mut label_groups: Vec<Vec<usize>> = Vec::new();
        let mut group_of_label = vec![None; num_labels];
        let mut transitions = Vec::new();
        let mut transitions_src = vec![Vec::new(); num_states];
        let mut transitions_label_group: Vec<Vec<AbstractTransition>> = Vec::new();

        let mut group_index: FxHashMap<Vec<AbstractTransition>, LabelGroup> = FxHashMap::default();
        for label in 0..num_labels {
            let old_label = label_map.get_old_id(label);
            if !abs.is_relevant_label(old_label) {
                irrelevant_labels.push(label);
                continue;
            }

            let abs_transitions = abs.get_transitions_for_label(old_label);
            if abs_transitions.is_empty() {
                // Dead label, it can never be applied.
                continue;
            }

            relevant_labels.push(label);
            let mut label_transitions = abs_transitions.to_vec();
            label_transitions.sort_unstable();

            let group = *group_index.entry(label_transitions).or_insert_with_key(|label_transitions| {
                let group = LabelGroup::new(transitions_label_group.len());
                for t in label_transitions {
                    let transition = LtsTransition::new(t.src, t.target, group);
                    transitions.push(transition);
                    transitions_src[t.src].push(transition);
                }

                transitions_label_group.push(label_transitions.clone());
                label_groups.push(Vec::new());
                group
            });

            label_groups[group.index()].push(label);
            group_of_label[label] = Some(group);
        }

        debug!(
            "{}: LTS with {} transitions and {} label groups, time {:.3}s",
            abs.description(),
            transitions.len(),
            label_groups.len(),
            start.elapsed().as_secs_f64()
        );

        Self {
            num_states,
            goal_states: abs.goal_states().to_vec(),
            relevant_labels,
            irrelevant_labels,
            label_groups,
            group_of_label,
            transitions,
            transitions_src,
            transitions_label_group,
        }
    }

    pub fn size(&self) -> usize {
        self.num_states
    }

    pub fn goal_states(&self) -> &[bool] {
        &self.goal_states
    }

    pub fn is_goal(&self, state: usize) -> bool {
        self.goal_states[state]
    }

    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    pub fn transitions(&self) -> &[LtsTransition] {
        &self.transitions
    }

    /// The outgoing transitions of the given state.
    pub fn transitions_from(&self, src: usize) -> &[LtsTransition] {
        &self.transitions_src[src]
    }

    /// The transitions of the given label, empty for irrelevant and dead labels.
    pub fn transitions_label(&self, label: usize) -> &[AbstractTransition] {
        match self.group_of_label[label] {
            Some(group) => &self.transitions_label_group[group.index()],
            None => &[],
        }
    }

    pub fn transitions_label_group(&self, group: LabelGroup) -> &[AbstractTransition] {
        &self.transitions_label_group[group.index()]
    }

    pub fn is_relevant_label(&self, label: usize) -> bool {
        self.group_of_label[label].is_some()
    }

    /// Returns true iff the label is irrelevant, or has exactly one self loop in every state.
    pub fn is_self_loop_everywhere_label(&self, label: usize) -> bool {
        if !self.is_relevant_label(label) {
            return self.irrelevant_labels.contains(&label);
        }

        let transitions = self.transitions_label(label);
        transitions.len() >= self.num_states && transitions.iter().filter(|t| t.is_self_loop()).count() == self.num_states
    }

    pub fn relevant_labels(&self) -> &[usize] {
        &self.relevant_labels
    }

    pub fn is_irrelevant_label(&self, label: usize) -> bool {
        self.irrelevant_labels.binary_search(&label).is_ok()
    }

    /// Returns true iff the label is relevant for the abstraction but has no transitions.
    pub fn is_dead_label(&self, label: usize) -> bool {
        self.group_of_label[label].is_none() && !self.is_irrelevant_label(label)
    }

    /// The labels that are relevant for the abstraction, including the dead labels.
    pub fn relevant_or_dead_labels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_labels()).filter(|&label| !self.is_irrelevant_label(label))
    }

    pub fn irrelevant_labels(&self) -> &[usize] {
        &self.irrelevant_labels
    }

    pub fn num_labels(&self) -> usize {
        self.group_of_label.len()
    }

    pub fn num_label_groups(&self) -> usize {
        self.label_groups.len()
    }

    pub fn labels_of_group(&self, group: LabelGroup) -> &[usize] {
        &self.label_groups[group.index()]
    }

    pub fn group_of_label(&self, label: usize) -> Option<LabelGroup> {
        self.group_of_label[label]
    }

    /// Applies the function to all outgoing transitions of the state until it returns true.
    pub fn apply_post_src<F>(&self, src: usize, mut f: F) -> bool
    where
        F: FnMut(&LtsTransition) -> bool,
    {
        self.transitions_src[src].iter().any(|t| f(t))
    }

    /// Removes one transition of a label. When other labels share the group
    /// of the label, the label is moved into a new group first.
    pub fn kill_transition(&mut self, src: usize, label: usize, target: usize) {
        let Some(group) = self.group_of_label[label] else {
            return;
        };

        if self.label_groups[group.index()].len() == 1 {
            let transition = LtsTransition::new(src, target, group);
            kill_from_vector(&transition, &mut self.transitions);
            kill_from_vector(&transition, &mut self.transitions_src[src]);
            kill_from_vector(
                &AbstractTransition::new(src, target),
                &mut self.transitions_label_group[group.index()],
            );
        } else {
            let new_group = LabelGroup::new(self.transitions_label_group.len());
            let mut group_transitions = self.transitions_label_group[group.index()].clone();
            kill_from_vector(&AbstractTransition::new(src, target), &mut group_transitions);
            for t in &group_transitions {
                let transition = LtsTransition::new(t.src, t.target, new_group);
                self.transitions.push(transition);
                self.transitions_src[t.src].push(transition);
            }
            self.transitions_label_group.push(group_transitions);

            self.label_groups[group.index()].retain(|&other| other != label);
            self.label_groups.push(vec![label]);
            self.group_of_label[label] = Some(new_group);
        }
    }

    /// Removes the label and, when it was the last label of its group, all transitions of the group.
    pub fn kill_label(&mut self, label: usize) {
        trace!("Kill label {label}");
        match self.group_of_label[label] {
            None => self.irrelevant_labels.retain(|&other| other != label),
            Some(group) => {
                self.group_of_label[label] = None;
                self.relevant_labels.retain(|&other| other != label);
                self.label_groups[group.index()].retain(|&other| other != label);

                if self.label_groups[group.index()].is_empty() {
                    self.transitions_label_group[group.index()].clear();
                    self.transitions.retain(|t| t.group != group);
                    for transitions in &mut self.transitions_src {
                        transitions.retain(|t| t.group != group);
                    }
                }
            }
        }
    }

    pub fn dump(&self) {
        for state in 0..self.num_states {
            for t in self.transitions_from(state) {
                trace!(
                    "{} -> {} ({}: {:?})",
                    t.src,
                    t.target,
                    t.group.index(),
                    self.labels_of_group(t.group)
                );
            }
        }
    }
}

/// Removes one occurrence of the element by swapping it with the last element.
fn kill_from_vector<T: PartialEq>(element: &T, vector: &mut Vec<T>) {
    if let Some(position) = vector.iter().position(|other| other == element) {
        vector.swap_remove(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use ldsim_task::random_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    use crate::Labels;

    #[test]
    fn test_random_label_groups() {
        random_test(50, |rng| {
            let task = random_task(rng, 3, 3, 8, 2);
            let mut labels = Labels::new(&task);
            let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
            let label_map = LabelMap::new(&labels);

            for abs in &atomics {
                let lts = LabelledTransitionSystem::new(abs, &label_map);
                for l1 in lts.relevant_labels() {
                    for l2 in lts.relevant_labels() {
                        let same_group = lts.group_of_label(*l1) == lts.group_of_label(*l2);
                        let mut t1 = lts.transitions_label(*l1).to_vec();
                        let mut t2 = lts.transitions_label(*l2).to_vec();
                        t1.sort_unstable();
                        t2.sort_unstable();
                        assert_eq!(same_group, t1 == t2);
                    }
                }

                let total: usize = (0..lts.num_label_groups())
                    .map(|group| lts.transitions_label_group(LabelGroup::new(group)).len())
                    .sum();
                assert_eq!(total, lts.num_transitions());

                for label in 0..lts.num_labels() {
                    assert!(!(lts.irrelevant_labels().contains(&label) && lts.is_relevant_label(label)));
                }
            }
        });
    }

    #[test]
    fn test_kill_transition_splits_group() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
        let label_map = LabelMap::new(&labels);

        // In the robot abstraction pick-0 and drop-0 both loop in room 0.
        let mut lts = LabelledTransitionSystem::new(&atomics[0], &label_map);
        let pick = (0..lts.num_labels())
            .find(|&label| {
                let transitions = lts.transitions_label(label);
                transitions.len() == 1 && transitions[0] == AbstractTransition::new(0, 0)
            })
            .unwrap();
        let group = lts.group_of_label(pick).unwrap();
        assert_eq!(lts.labels_of_group(group).len(), 2);
        let num_transitions = lts.num_transitions();

        lts.kill_transition(0, pick, 0);
        assert!(lts.transitions_label(pick).is_empty());
        assert_ne!(lts.group_of_label(pick), Some(group));
        assert_eq!(lts.labels_of_group(group).len(), 1);
        assert_eq!(lts.num_transitions(), num_transitions);

        lts.kill_label(pick);
        assert!(!lts.is_relevant_label(pick));
        assert!(!lts.relevant_labels().contains(&pick));
    }
}
