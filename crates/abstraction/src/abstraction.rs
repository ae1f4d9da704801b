use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::fmt;

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use log::debug;
use log::info;
use log::trace;

use ldsim_utilities::LdsimError;

use crate::AbstractionId;
use crate::EquivalenceRelation;
use crate::LabelId;
use crate::Labels;
use crate::ShrinkFh;
use crate::ShrinkStrategy;
use crate::StateMapping;
use crate::breadth_first_search;
use crate::dijkstra_search;

/// Distance value for states that cannot reach, or cannot be reached.
pub const INFINITY: i32 = i32::MAX;

/// The maximum distances are unknown until the distances are computed.
const DISTANCE_UNKNOWN: i32 = -2;

/// The set of original operators that induce one abstract transition.
pub type OperatorSet = BitVec<usize, Lsb0>;

/// A transition between two abstract states, the label is implicit from the list it is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbstractTransition {
    pub src: usize,
    pub target: usize,
}

impl AbstractTransition {
    pub fn new(src: usize, target: usize) -> Self {
        Self { src, target }
    }

    pub fn is_self_loop(&self) -> bool {
        self.src == self.target
    }
}

impl fmt::Display for AbstractTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.target)
    }
}

/// A transition system over the abstract states `0..size()`, obtained by
/// projecting the task onto a subset of its variables and shrinking the
/// result.
///
/// The transitions are stored per label. A label that is not relevant for
/// the abstraction induces an implicit self loop in every state and has no
/// stored transitions.
#[derive(Clone)]
pub struct Abstraction {
    pub(crate) id: AbstractionId,
    pub(crate) mapping: StateMapping,

    /// The sorted task variables this abstraction is built from.
    pub(crate) varset: Vec<usize>,

    /// The number of labels at the last normalization.
    pub(crate) num_labels: usize,
    pub(crate) transitions_by_label: Vec<Vec<AbstractTransition>>,

    /// For every transition the original operators inducing it, only present when provenance is tracked.
    pub(crate) transition_operators: Option<Vec<Vec<OperatorSet>>>,
    pub(crate) relevant_labels: Vec<bool>,

    pub(crate) num_states: usize,
    pub(crate) init_state: Option<usize>,
    pub(crate) goal_states: Vec<bool>,

    /// Both are empty when the distances have not been computed.
    pub(crate) init_distances: Vec<i32>,
    pub(crate) goal_distances: Vec<i32>,
    pub(crate) max_f: i32,
    pub(crate) max_g: i32,
    pub(crate) max_h: i32,

    pub(crate) transitions_sorted_unique: bool,

    /// True iff every goal variable of the task is part of this abstraction.
    pub(crate) all_goals_relevant: bool,
    pub(crate) num_operators: usize,

    track_state_mappings: bool,
    state_mappings: Vec<Vec<Option<usize>>>,
}

impl Abstraction {
    /// Creates an abstraction without transitions, used by the constructors.
    pub(crate) fn with_mapping(
        id: AbstractionId,
        mapping: StateMapping,
        varset: Vec<usize>,
        num_labels: usize,
        num_states: usize,
        all_goals_relevant: bool,
        num_operators: usize,
        store_original_operators: bool,
    ) -> Self {
        Self {
            id,
            mapping,
            varset,
            num_labels,
            transitions_by_label: vec![Vec::new(); num_labels],
            transition_operators: store_original_operators.then(|| vec![Vec::new(); num_labels]),
            relevant_labels: vec![false; num_labels],
            num_states,
            init_state: None,
            goal_states: vec![false; num_states],
            init_distances: Vec::new(),
            goal_distances: Vec::new(),
            max_f: DISTANCE_UNKNOWN,
            max_g: DISTANCE_UNKNOWN,
            max_h: DISTANCE_UNKNOWN,
            transitions_sorted_unique: true,
            all_goals_relevant,
            num_operators,
            track_state_mappings: false,
            state_mappings: Vec::new(),
        }
    }

    pub fn id(&self) -> AbstractionId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.num_states
    }

    pub fn mapping(&self) -> &StateMapping {
        &self.mapping
    }

    /// The sorted variables of the task this abstraction is built from.
    pub fn varset(&self) -> &[usize] {
        &self.varset
    }

    pub fn is_atomic(&self) -> bool {
        self.mapping.is_atomic()
    }

    /// The number of labels this abstraction knows about, which equals the number of labels after normalization.
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn init_state(&self) -> Option<usize> {
        self.init_state
    }

    pub fn is_solvable(&self) -> bool {
        self.init_state.is_some()
    }

    pub fn is_goal_state(&self, state: usize) -> bool {
        self.goal_states[state]
    }

    pub fn goal_states(&self) -> &[bool] {
        &self.goal_states
    }

    pub fn all_goals_relevant(&self) -> bool {
        self.all_goals_relevant
    }

    /// An abstraction with at most one state carries no information.
    pub fn is_useless(&self) -> bool {
        self.num_states <= 1
    }

    /// Returns true iff transitions are tracked together with the operators inducing them.
    pub fn stores_original_operators(&self) -> bool {
        self.transition_operators.is_some()
    }

    pub fn is_relevant_label(&self, label: LabelId) -> bool {
        self.relevant_labels.get(label).copied().unwrap_or(false)
    }

    pub fn relevant_labels(&self) -> &[bool] {
        &self.relevant_labels
    }

    /// A label is own when this abstraction is the only one it is relevant for.
    pub fn is_own_label(&self, labels: &Labels, label: LabelId) -> bool {
        let relevant_for = labels.get_relevant_for(label);
        relevant_for.len() == 1 && relevant_for.contains(&self.id)
    }

    pub fn get_transitions_for_label(&self, label: LabelId) -> &[AbstractTransition] {
        self.transitions_by_label.get(label).map_or(&[], |transitions| transitions.as_slice())
    }

    /// The operators inducing each transition of the label, empty when provenance is not tracked.
    pub fn get_transition_ops_for_label(&self, label: LabelId) -> &[OperatorSet] {
        self.transition_operators
            .as_ref()
            .and_then(|ops| ops.get(label))
            .map_or(&[], |ops| ops.as_slice())
    }

    pub fn total_transitions(&self) -> usize {
        self.transitions_by_label.iter().map(|t| t.len()).sum()
    }

    pub fn unique_unlabeled_transitions(&self) -> usize {
        let mut unique: Vec<AbstractTransition> = self.transitions_by_label.iter().flatten().copied().collect();
        unique.sort_unstable();
        unique.dedup();
        unique.len()
    }

    pub fn get_state_mapping(&self, state: &[usize]) -> Option<usize> {
        self.mapping.abstract_state(state)
    }

    /// Returns the goal distance of the abstract state of the given task state, None if it was pruned.
    pub fn get_cost(&self, state: &[usize]) -> Option<i32> {
        let abstract_state = self.mapping.abstract_state(state)?;
        debug_assert!(self.are_distances_computed(), "Distances must be computed for the heuristic value");
        self.goal_distances.get(abstract_state).copied()
    }

    pub fn description(&self) -> String {
        match &self.mapping {
            StateMapping::Atomic { variable, .. } => format!("atomic abstraction #{variable}"),
            StateMapping::Composite { .. } => format!("abstraction ({} vars)", self.varset.len()),
            StateMapping::Pdb { pattern, .. } => format!("PDB abstraction {pattern:?}"),
        }
    }

    fn tag(&self) -> String {
        format!("{}: ", self.description())
    }

    /// Records every shrink mapping applied to this abstraction until they are taken.
    pub fn set_track_state_mappings(&mut self, track: bool) {
        self.track_state_mappings = track;
        if !track {
            self.state_mappings.clear();
        }
    }

    /// Returns the shrink mappings that were applied since the last call.
    pub fn take_state_mappings(&mut self) -> Vec<Vec<Option<usize>>> {
        std::mem::take(&mut self.state_mappings)
    }

    /// Returns a copy of this abstraction with a fresh identifier.
    ///
    /// The labels are not informed about the copy, the caller is responsible
    /// for calling [Labels::reset_relevant_for] when the copy should be used
    /// for label reduction.
    pub fn clone_with_id(&self, labels: &mut Labels) -> Abstraction {
        let mut result = self.clone();
        result.id = labels.fresh_abstraction_id();
        result.track_state_mappings = false;
        result.state_mappings.clear();
        result
    }

    pub(crate) fn ensure_label_capacity(&mut self, num_labels: usize) {
        if self.transitions_by_label.len() < num_labels {
            self.transitions_by_label.resize(num_labels, Vec::new());
        }
        if self.relevant_labels.len() < num_labels {
            self.relevant_labels.resize(num_labels, false);
        }
        if let Some(ops) = &mut self.transition_operators {
            if ops.len() < num_labels {
                ops.resize(num_labels, Vec::new());
            }
        }
    }

    /// Distances
    pub fn are_distances_computed(&self) -> bool {
        if self.max_h == DISTANCE_UNKNOWN {
            debug_assert!(self.init_distances.is_empty() && self.goal_distances.is_empty());
            return false;
        }
        true
    }

    pub fn clear_distances(&mut self) {
        self.max_f = DISTANCE_UNKNOWN;
        self.max_g = DISTANCE_UNKNOWN;
        self.max_h = DISTANCE_UNKNOWN;
        self.init_distances.clear();
        self.goal_distances.clear();
    }

    pub fn get_max_f(&self) -> i32 {
        self.max_f
    }

    pub fn get_max_g(&self) -> i32 {
        self.max_g
    }

    pub fn get_max_h(&self) -> i32 {
        self.max_h
    }

    pub fn get_init_distance(&self, state: usize) -> i32 {
        self.init_distances[state]
    }

    pub fn get_goal_distance(&self, state: usize) -> i32 {
        self.goal_distances[state]
    }

    pub fn get_goal_distances(&self) -> &[i32] {
        &self.goal_distances
    }

    pub fn get_init_distances(&self) -> &[i32] {
        &self.init_distances
    }

    /// Computes the distances from the initial state and to the goal states,
    /// unreachable and irrelevant states are pruned afterwards.
    pub fn compute_distances(&mut self, labels: &mut Labels) -> Result<(), LdsimError> {
        if self.are_distances_computed() {
            return Ok(());
        }

        let Some(init_state) = self.init_state else {
            info!("{}init state was pruned, no distances to compute", self.tag());
            self.max_f = INFINITY;
            self.max_g = INFINITY;
            self.max_h = INFINITY;
            return Ok(());
        };

        let num_states = self.num_states;
        self.init_distances = vec![INFINITY; num_states];
        self.goal_distances = vec![INFINITY; num_states];
        self.init_distances[init_state] = 0;
        for state in (0..num_states).filter(|&state| self.goal_states[state]) {
            self.goal_distances[state] = 0;
        }

        let goals = || (0..num_states).filter(|&state| self.goal_states[state]);
        let num_labels = self.num_labels.min(self.transitions_by_label.len());
        if labels.is_unit_cost() {
            let mut forward_graph = vec![Vec::new(); num_states];
            let mut backward_graph = vec![Vec::new(); num_states];
            for transitions in &self.transitions_by_label[..num_labels] {
                for t in transitions {
                    forward_graph[t.src].push(t.target);
                    backward_graph[t.target].push(t.src);
                }
            }

            let goal_queue: VecDeque<usize> = goals().collect();
            breadth_first_search(&forward_graph, VecDeque::from([init_state]), &mut self.init_distances);
            breadth_first_search(&backward_graph, goal_queue, &mut self.goal_distances);
        } else {
            let mut forward_graph = vec![Vec::new(); num_states];
            let mut backward_graph = vec![Vec::new(); num_states];
            for (label, transitions) in self.transitions_by_label[..num_labels].iter().enumerate() {
                let cost = labels.get_label_cost(label);
                for t in transitions {
                    forward_graph[t.src].push((t.target, cost));
                    backward_graph[t.target].push((t.src, cost));
                }
            }

            let goal_queue: BinaryHeap<Reverse<(i32, usize)>> = goals().map(|state| Reverse((0, state))).collect();
            dijkstra_search(&forward_graph, BinaryHeap::from([Reverse((0, init_state))]), &mut self.init_distances);
            dijkstra_search(&backward_graph, goal_queue, &mut self.goal_distances);
        }

        self.max_f = 0;
        self.max_g = 0;
        self.max_h = 0;
        let mut unreachable = 0;
        let mut irrelevant = 0;
        for state in 0..num_states {
            let g = self.init_distances[state];
            let h = self.goal_distances[state];
            if g == INFINITY {
                unreachable += 1;
            } else if h == INFINITY {
                irrelevant += 1;
            } else {
                self.max_f = self.max_f.max(g + h);
                self.max_g = self.max_g.max(g);
                self.max_h = self.max_h.max(h);
            }
        }

        if unreachable > 0 || irrelevant > 0 {
            info!(
                "{}unreachable: {} states, irrelevant: {} states",
                self.tag(),
                unreachable,
                irrelevant
            );

            // The partition only has to discard the unreachable and irrelevant states.
            ShrinkFh::create_default(num_states).shrink(self, labels, num_states, true)?;
        }

        Ok(())
    }

    /// Normalization
    pub fn is_normalized(&self, labels: &Labels) -> bool {
        self.num_labels == labels.size() && self.transitions_sorted_unique
    }

    pub fn are_transitions_sorted_unique(&self) -> bool {
        self.transitions_by_label
            .iter()
            .all(|transitions| transitions.windows(2).all(|w| w[0] < w[1]))
    }

    /// Moves the transitions of reduced labels to the labels they were
    /// reduced into, and sorts and deduplicates all transition lists.
    ///
    /// A new label is only relevant when it has at least one relevant
    /// parent. When some parent is irrelevant the implicit self loops of that
    /// parent become explicit transitions of the new label, unless all
    /// transitions of the relevant parents are self loops as well.
    pub fn normalize(&mut self, labels: &mut Labels) {
        if self.is_normalized(labels) {
            return;
        }

        let total_labels = labels.size();
        self.ensure_label_capacity(total_labels);
        let num_states = self.num_states;

        // Transitions (src, label, operators) grouped by their target.
        type Entry = (usize, LabelId, Option<OperatorSet>);
        let mut target_buckets: Vec<Vec<Entry>> = vec![Vec::new(); num_states];

        for label in 0..self.num_labels {
            if labels.is_label_reduced(label) {
                continue;
            }

            let (transitions, operators) = self.take_transitions(label);
            let mut operators = operators.into_iter();
            for t in transitions {
                target_buckets[t.target].push((t.src, label, operators.next()));
            }
        }

        let mut made_irrelevant = vec![false; total_labels];
        for new_label in self.num_labels..total_labels {
            if labels.is_label_reduced(new_label) {
                // Its transitions are moved when its own root is processed.
                labels.set_irrelevant_for(new_label, self.id);
                continue;
            }

            let mut some_parent_irrelevant = false;
            let mut all_self_loops = true;
            for parent in self.known_ancestors(labels, new_label) {
                if self.relevant_labels[parent] {
                    let (transitions, operators) = self.take_transitions(parent);
                    let mut operators = operators.into_iter();
                    for t in transitions {
                        if !t.is_self_loop() {
                            all_self_loops = false;
                        }
                        target_buckets[t.target].push((t.src, new_label, operators.next()));
                    }

                    self.relevant_labels[parent] = false;
                    labels.set_irrelevant_for(parent, self.id);
                } else {
                    some_parent_irrelevant = true;
                }
            }

            if some_parent_irrelevant && all_self_loops {
                // Every transition of the new label is a self loop, so it is irrelevant.
                made_irrelevant[new_label] = true;
                self.relevant_labels[new_label] = false;
                labels.set_irrelevant_for(new_label, self.id);
                continue;
            }

            self.relevant_labels[new_label] = true;
            labels.set_relevant_for(new_label, self.id);
            if some_parent_irrelevant {
                let operators = self.transition_operators.is_some().then(|| {
                    let mut set: OperatorSet = BitVec::repeat(false, self.num_operators);
                    for op in labels.operators_of(new_label) {
                        set.set(op, true);
                    }
                    set
                });

                for (state, bucket) in target_buckets.iter_mut().enumerate() {
                    bucket.push((state, new_label, operators.clone()));
                }
            }
        }

        // Distribute over source buckets, which keeps the targets sorted within each source.
        let mut src_buckets: Vec<Vec<Entry>> = vec![Vec::new(); num_states];
        for (target, bucket) in target_buckets.into_iter().enumerate() {
            for (src, label, operators) in bucket {
                if !made_irrelevant[label] {
                    src_buckets[src].push((target, label, operators));
                }
            }
        }

        for (src, bucket) in src_buckets.into_iter().enumerate() {
            for (target, label, operators) in bucket {
                let transition = AbstractTransition::new(src, target);
                let transitions = &mut self.transitions_by_label[label];
                if transitions.last() != Some(&transition) {
                    transitions.push(transition);
                    if let (Some(all), Some(operators)) = (&mut self.transition_operators, operators) {
                        all[label].push(operators);
                    }
                } else if let (Some(all), Some(operators)) = (&mut self.transition_operators, operators) {
                    // Duplicate transitions of the same label are induced by the union of their operators.
                    if let Some(last) = all[label].last_mut() {
                        *last |= operators;
                    }
                }
            }
        }

        self.num_labels = total_labels;
        self.transitions_sorted_unique = true;
        debug_assert!(self.are_transitions_sorted_unique(), "Normalization must sort the transitions");
    }

    /// Returns the ancestors of a label that existed at the last normalization.
    fn known_ancestors(&self, labels: &mut Labels, label: LabelId) -> Vec<LabelId> {
        let mut result = Vec::new();
        let mut stack = labels.label(label).parents().to_vec();
        while let Some(parent) = stack.pop() {
            if parent < self.num_labels {
                result.push(parent);
            } else {
                // Reduced again before this abstraction was normalized.
                stack.extend_from_slice(labels.label(parent).parents());
                labels.set_irrelevant_for(parent, self.id);
            }
        }

        result.sort_unstable();
        result
    }

    /// Takes the transitions of a label together with their operators, which is empty when not tracked.
    fn take_transitions(&mut self, label: LabelId) -> (Vec<AbstractTransition>, Vec<OperatorSet>) {
        let transitions = std::mem::take(&mut self.transitions_by_label[label]);
        let operators = self
            .transition_operators
            .as_mut()
            .map(|ops| std::mem::take(&mut ops[label]))
            .unwrap_or_default();
        (transitions, operators)
    }

    /// Computes the equivalence relation of the labels that have exactly the
    /// same cost, relevance and transitions in this abstraction.
    pub fn compute_local_equivalence_relation(&self, labels: &Labels) -> EquivalenceRelation {
        debug_assert!(self.is_normalized(labels), "Local equivalences require a normalized abstraction");

        let annotated = labels
            .current_labels()
            .map(|label| {
                let key = (
                    labels.get_label_cost(label),
                    self.is_relevant_label(label),
                    self.get_transitions_for_label(label),
                );
                (key, label)
            })
            .collect();
        EquivalenceRelation::from_annotated_elements(labels.size(), annotated)
    }

    /// Shrinking
    ///
    /// Collapses every group of the partition into one state, states that are
    /// in no group are pruned. Returns [LdsimError::Unsolvable] when the
    /// initial state is pruned.
    ///
    /// Distances are kept when all merged states agree on them.
    pub fn apply_abstraction(&mut self, collapsed_groups: &[Vec<usize>]) -> Result<(), LdsimError> {
        if collapsed_groups.len() == self.num_states {
            trace!("{}not applying abstraction (same number of states)", self.tag());
            return Ok(());
        }

        debug!(
            "{}applying abstraction ({} to {} states)",
            self.tag(),
            self.num_states,
            collapsed_groups.len()
        );

        let mut abstraction_mapping: Vec<Option<usize>> = vec![None; self.num_states];
        for (group_no, group) in collapsed_groups.iter().enumerate() {
            for &state in group {
                debug_assert!(abstraction_mapping[state].is_none(), "State {state} occurs in two groups");
                abstraction_mapping[state] = Some(group_no);
            }
        }

        let new_num_states = collapsed_groups.len();
        let mut new_init_distances = Vec::new();
        let mut new_goal_distances = Vec::new();
        let mut must_clear_distances = !self.are_distances_computed() || self.init_distances.is_empty();
        if !must_clear_distances {
            new_init_distances.reserve(new_num_states);
            new_goal_distances.reserve(new_num_states);
        }
        let mut new_goal_states = vec![false; new_num_states];

        for (new_state, group) in collapsed_groups.iter().enumerate() {
            debug_assert!(!group.is_empty(), "Groups cannot be empty");

            if !must_clear_distances {
                let first = group[0];
                let (g, h) = (self.init_distances[first], self.goal_distances[first]);
                if group
                    .iter()
                    .any(|&state| self.init_distances[state] != g || self.goal_distances[state] != h)
                {
                    must_clear_distances = true;
                } else {
                    new_init_distances.push(g);
                    new_goal_distances.push(h);
                }
            }

            new_goal_states[new_state] = group.iter().any(|&state| self.goal_states[state]);
        }

        let num_labels = self.num_labels.min(self.transitions_by_label.len());
        for label in 0..num_labels {
            let (transitions, operators) = self.take_transitions(label);
            let mut operators = operators.into_iter();
            let mut new_transitions = Vec::with_capacity(transitions.len());
            let mut new_operators = Vec::new();
            for t in transitions {
                let ops = operators.next();
                if let (Some(src), Some(target)) = (abstraction_mapping[t.src], abstraction_mapping[t.target]) {
                    new_transitions.push(AbstractTransition::new(src, target));
                    new_operators.extend(ops);
                }
            }

            self.transitions_by_label[label] = new_transitions;
            if let Some(all) = &mut self.transition_operators {
                all[label] = new_operators;
            }
        }

        self.num_states = new_num_states;
        self.goal_states = new_goal_states;
        self.init_state = self.init_state.and_then(|state| abstraction_mapping[state]);
        self.mapping.apply_shrink(&abstraction_mapping);
        if self.track_state_mappings {
            self.state_mappings.push(abstraction_mapping);
        }

        if must_clear_distances {
            self.clear_distances();
        } else {
            self.init_distances = new_init_distances;
            self.goal_distances = new_goal_distances;
        }

        self.transitions_sorted_unique = self.are_transitions_sorted_unique();

        if self.init_state.is_none() {
            info!("{}initial state pruned, the task is unsolvable", self.tag());
            return Err(LdsimError::Unsolvable);
        }
        Ok(())
    }

    /// Counting
    ///
    /// For every label the number of transitions that are not self loops,
    /// optionally only those leading to a goal state.
    pub fn count_transitions_by_label(&self, only_goal: bool) -> Vec<usize> {
        self.transitions_by_label
            .iter()
            .map(|transitions| {
                transitions
                    .iter()
                    .filter(|t| !t.is_self_loop() && (!only_goal || self.goal_states[t.target]))
                    .count()
            })
            .collect()
    }

    /// Counts for every remaining candidate the transitions of the labels
    /// shared with the candidate. The candidates are atomic abstractions
    /// given by their identifier, indexed by variable.
    pub fn count_transitions(
        &self,
        labels: &Labels,
        candidate_ids: &[Option<AbstractionId>],
        remaining: &[usize],
        only_empty: bool,
        only_goal: bool,
    ) -> Vec<usize> {
        let mut result = vec![0; candidate_ids.len()];
        let counts = self.count_transitions_by_label(only_goal);
        for (label, &count) in counts.iter().enumerate().take(self.num_labels) {
            if count == 0 {
                continue;
            }

            let relevant_for = labels.get_relevant_for(label);
            if only_empty && relevant_for.len() != 2 {
                continue;
            }

            for &var in remaining {
                if candidate_ids[var].is_some_and(|id| relevant_for.contains(&id)) {
                    result[var] += count;
                }
            }
        }
        result
    }

    /// Estimates the number of transitions of the product with the other abstraction.
    pub fn estimate_transitions(&self, other: &Abstraction) -> usize {
        let num_labels = self.transitions_by_label.len().max(other.transitions_by_label.len());
        (0..num_labels)
            .filter(|&label| self.is_relevant_label(label) || other.is_relevant_label(label))
            .map(|label| {
                let mine = if self.is_relevant_label(label) {
                    self.transitions_by_label[label].len()
                } else {
                    self.num_states
                };
                let theirs = if other.is_relevant_label(label) {
                    other.transitions_by_label[label].len()
                } else {
                    other.num_states
                };
                mine * theirs
            })
            .sum()
    }

    /// For every label the lowest goal distance of a target of its
    /// transitions, None for irrelevant labels.
    pub fn compute_label_ranks(&mut self, labels: &mut Labels) -> Result<Vec<Option<i32>>, LdsimError> {
        self.normalize(labels);
        self.compute_distances(labels)?;

        Ok((0..labels.size())
            .map(|label| {
                self.is_relevant_label(label).then(|| {
                    self.transitions_by_label[label]
                        .iter()
                        .map(|t| self.goal_distances[t.target])
                        .min()
                        .unwrap_or(INFINITY)
                })
            })
            .collect())
    }

    /// Dead labels
    ///
    /// Marks the relevant current labels without transitions as dead and returns the newly found ones.
    pub fn get_dead_labels(&self, labels: &Labels, dead_labels: &mut [bool]) -> Vec<LabelId> {
        let mut result = Vec::new();
        for label in 0..labels.size() {
            if dead_labels[label] || labels.is_label_reduced(label) {
                continue;
            }

            if self.is_relevant_label(label) && self.get_transitions_for_label(label).is_empty() {
                dead_labels[label] = true;
                result.push(label);
            }
        }
        result
    }

    /// Marks the operators of dead labels as dead, returns true iff a new operator was found dead.
    pub fn check_dead_operators(&self, labels: &Labels, dead_labels: &mut [bool], dead_operators: &mut [bool]) -> bool {
        let mut result = false;
        for label in self.get_dead_labels(labels, dead_labels) {
            for op in labels.operators_of(label) {
                if !dead_operators[op] {
                    result = true;
                }
                dead_operators[op] = true;
            }
        }
        result
    }

    /// Pruning
    ///
    /// Removes all transitions of a label that is dominated in every factor.
    pub fn prune_transitions_dominated_label_all(&mut self, label: LabelId) -> usize {
        self.remove_transitions_where(label, |_| true)
    }

    /// Removes the transitions of `label` for which `label_by` has a
    /// transition from the same source to a state that simulates the target.
    /// The veto callback receives the label and transition and can keep it.
    pub fn prune_transitions_dominated_label<S, P>(
        &mut self,
        label: LabelId,
        label_by: LabelId,
        simulates: S,
        mut propagate: P,
    ) -> usize
    where
        S: Fn(usize, usize) -> bool,
        P: FnMut(LabelId, usize, usize) -> bool,
    {
        let dominating = self.get_transitions_for_label(label_by).to_vec();
        self.remove_transitions_where(label, |t| {
            dominating
                .iter()
                .any(|t2| t2.src == t.src && simulates(t2.target, t.target))
                && propagate(label, t.src, t.target)
        })
    }

    /// Like [Self::prune_transitions_dominated_label] for two labels that
    /// dominate each other. Of two transitions with equivalent targets only
    /// the one with the higher label, or the higher target for the same
    /// label, is removed.
    pub fn prune_transitions_dominated_label_equiv<S, P>(
        &mut self,
        label: LabelId,
        label2: LabelId,
        simulates: S,
        mut propagate: P,
    ) -> usize
    where
        S: Fn(usize, usize) -> bool,
        P: FnMut(LabelId, usize, usize) -> bool,
    {
        if label == label2 {
            let others = self.get_transitions_for_label(label).to_vec();
            return self.remove_transitions_where(label, |t| {
                others.iter().any(|t2| {
                    t2.src == t.src
                        && simulates(t2.target, t.target)
                        && (!simulates(t.target, t2.target) || t.target > t2.target)
                }) && propagate(label, t.src, t.target)
            });
        }

        let others = self.get_transitions_for_label(label2).to_vec();
        let mut removed = self.remove_transitions_where(label, |t| {
            others.iter().any(|t2| {
                t2.src == t.src && simulates(t2.target, t.target) && (!simulates(t.target, t2.target) || label > label2)
            }) && propagate(label, t.src, t.target)
        });

        let others = self.get_transitions_for_label(label).to_vec();
        removed += self.remove_transitions_where(label2, |t| {
            others.iter().any(|t2| {
                t2.src == t.src && simulates(t2.target, t.target) && (!simulates(t.target, t2.target) || label2 > label)
            }) && propagate(label2, t.src, t.target)
        });
        removed
    }

    /// Removes the transitions of a label whose source simulates their target.
    pub fn prune_transitions_dominated_label_noop<S, P>(&mut self, label: LabelId, simulates: S, mut propagate: P) -> usize
    where
        S: Fn(usize, usize) -> bool,
        P: FnMut(LabelId, usize, usize) -> bool,
    {
        self.remove_transitions_where(label, |t| simulates(t.src, t.target) && propagate(label, t.src, t.target))
    }

    /// Removes the transitions of the label for which the predicate holds,
    /// keeping the operator sets aligned. Returns the number of removed transitions.
    fn remove_transitions_where<F>(&mut self, label: LabelId, mut remove: F) -> usize
    where
        F: FnMut(&AbstractTransition) -> bool,
    {
        if label >= self.transitions_by_label.len() {
            return 0;
        }

        let (transitions, operators) = self.take_transitions(label);
        let before = transitions.len();
        let mut operators = operators.into_iter();
        let mut kept = Vec::with_capacity(before);
        let mut kept_operators = Vec::new();
        for t in transitions {
            let ops = operators.next();
            if !remove(&t) {
                kept.push(t);
                kept_operators.extend(ops);
            }
        }

        let removed = before - kept.len();
        self.transitions_by_label[label] = kept;
        if let Some(all) = &mut self.transition_operators {
            all[label] = kept_operators;
        }

        if removed > 0 {
            self.clear_distances();
        }
        removed
    }

    /// Statistics
    pub fn memory_estimate(&self) -> usize {
        let mut result = std::mem::size_of::<Abstraction>();
        result += std::mem::size_of::<bool>() * self.relevant_labels.capacity();
        result += std::mem::size_of::<Vec<AbstractTransition>>() * self.transitions_by_label.capacity();
        result += self
            .transitions_by_label
            .iter()
            .map(|t| std::mem::size_of::<AbstractTransition>() * t.capacity())
            .sum::<usize>();
        result += std::mem::size_of::<i32>() * (self.init_distances.capacity() + self.goal_distances.capacity());
        result += std::mem::size_of::<bool>() * self.goal_states.capacity();
        result + self.mapping.memory_estimate()
    }

    pub fn statistics(&self, include_expensive_statistics: bool) {
        if include_expensive_statistics {
            info!(
                "{}{} states, {}/{} arcs",
                self.tag(),
                self.size(),
                self.unique_unlabeled_transitions(),
                self.total_transitions()
            );

            if let Some(ops) = &self.transition_operators {
                let stored: usize = ops.iter().flatten().map(|set| set.count_ones()).sum();
                info!("{}{} stored operators in transitions", self.tag(), stored);
            }
        } else {
            info!("{}{} states, {} arcs", self.tag(), self.size(), self.total_transitions());
        }

        if !self.are_distances_computed() {
            debug!("{}distances not computed", self.tag());
        } else if let Some(init_state) = self.init_state {
            debug!(
                "{}init h={}, max f={}, max g={}, max h={}",
                self.tag(),
                self.goal_distances[init_state],
                self.max_f,
                self.max_g,
                self.max_h
            );
        } else {
            debug!("{}abstraction is unsolvable", self.tag());
        }
    }

    /// Drops the transitions, only the state mapping and distances remain usable.
    pub fn release_memory(&mut self) {
        self.relevant_labels = Vec::new();
        self.transitions_by_label = Vec::new();
        if self.transition_operators.is_some() {
            self.transition_operators = Some(Vec::new());
        }
    }
}

impl fmt::Debug for Abstraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{} states, init {:?}", self.tag(), self.num_states, self.init_state)?;
        writeln!(
            f,
            "goal states: {:?}",
            (0..self.num_states).filter(|&s| self.goal_states[s]).collect::<Vec<_>>()
        )?;
        for (label, transitions) in self.transitions_by_label.iter().enumerate() {
            if self.is_relevant_label(label) {
                write!(f, "label {label}:")?;
                for t in transitions {
                    write!(f, " {t}")?;
                }
                writeln!(f)?;
            }
        }
        if self.are_distances_computed() {
            writeln!(f, "init distances: {:?}", self.init_distances)?;
            writeln!(f, "goal distances: {:?}", self.goal_distances)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use ldsim_task::gripper_task;
    use ldsim_task::random_task;
    use ldsim_task::two_flip_task;
    use ldsim_utilities::random_test;
    use test_log::test;


    #[test]
    fn test_two_flip_distances() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomic = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        let a = &mut atomic[0];
        a.compute_distances(&mut labels).unwrap();
        assert_eq!(a.size(), 2);
        assert_eq!(a.get_goal_distances(), &[1, 0]);
        assert_eq!(a.get_init_distances(), &[0, 1]);

        let [a, b] = &mut atomic[..] else { panic!("Expected two atomic abstractions") };
        let mut product = Abstraction::new_composite(&task, &mut labels, a, b);
        assert_eq!(product.size(), 4);

        product.compute_distances(&mut labels).unwrap();
        // The state A=0, B=1 is unreachable and is pruned.
        assert_eq!(product.size(), 3);
        assert_eq!(product.get_max_h(), 2);
        assert_eq!(product.get_cost(task.initial_state()), Some(2));
        assert_eq!(product.get_cost(&[0, 1]), None);
    }

    #[test]
    fn test_apply_abstraction() {
        let task = gripper_task(3);
        let mut labels = Labels::new(&task);
        let mut atomic = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        let robot = &mut atomic[0];
        robot.compute_distances(&mut labels).unwrap();
        // The robot variable is not a goal variable, every state is a goal state.
        assert!(robot.goal_distances.iter().all(|&h| h == 0));

        robot.set_track_state_mappings(true);
        robot.apply_abstraction(&[vec![0, 2], vec![1]]).unwrap();
        assert!(!robot.are_distances_computed(), "States 0 and 2 have different init distances");
        assert_eq!(robot.size(), 2);
        assert_eq!(robot.take_state_mappings(), vec![vec![Some(0), Some(1), Some(0)]]);

        assert_eq!(
            robot.apply_abstraction(&[vec![1]]),
            Err(LdsimError::Unsolvable),
            "Pruning the initial state makes the task unsolvable"
        );
    }

    /// Returns the (src, operator, target) triples of all transitions, expanding composite labels.
    fn operator_transitions(abstraction: &Abstraction, labels: &Labels) -> BTreeSet<(usize, usize, usize)> {
        let mut result = BTreeSet::new();
        for label in labels.current_labels() {
            if abstraction.is_relevant_label(label) {
                for t in abstraction.get_transitions_for_label(label) {
                    for op in labels.operators_of(label) {
                        result.insert((t.src, op, t.target));
                    }
                }
            } else {
                for op in labels.operators_of(label) {
                    for state in 0..abstraction.size() {
                        result.insert((state, op, state));
                    }
                }
            }
        }
        result
    }

    #[test]
    fn test_normalize_after_label_reduction() {
        random_test(100, |rng| {
            let task = random_task(rng, 3, 3, 8, 2);
            let mut labels = Labels::new(&task);
            let mut abstractions = Abstraction::build_atomic_abstractions(&task, &mut labels, true);

            let before: Vec<_> = abstractions
                .iter()
                .map(|abs| operator_transitions(abs, &labels))
                .collect();

            // Reduce the labels that are equivalent in every abstraction.
            let mut relation = EquivalenceRelation::from_annotated_elements(
                labels.size(),
                labels.current_labels().map(|label| (0, label)).collect(),
            );
            for abstraction in &abstractions {
                relation.refine(&abstraction.compute_local_equivalence_relation(&labels));
            }
            labels.reduce_exactly(&relation);

            for (abstraction, before) in abstractions.iter_mut().zip(before) {
                abstraction.normalize(&mut labels);
                assert!(abstraction.are_transitions_sorted_unique());

                // Normalize is idempotent.
                let table = abstraction.transitions_by_label.clone();
                abstraction.normalize(&mut labels);
                assert_eq!(abstraction.transitions_by_label, table);

                assert_eq!(operator_transitions(abstraction, &labels), before);

                for label in labels.current_labels() {
                    let ops = abstraction.get_transition_ops_for_label(label);
                    assert_eq!(ops.len(), abstraction.get_transitions_for_label(label).len());
                    for set in ops {
                        assert!(set.iter_ones().all(|op| labels.operators_of(label).contains(&op)));
                    }
                }
            }
        });
    }

    #[test]
    fn test_prune_transitions_noop() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomic = Abstraction::build_atomic_abstractions(&task, &mut labels, false);

        let a = &mut atomic[0];
        // Pretend that every state simulates every other state.
        let removed = a.prune_transitions_dominated_label_noop(0, |_, _| true, |_, _, _| false);
        assert_eq!(removed, 0, "The veto keeps every transition");

        let removed = a.prune_transitions_dominated_label_noop(0, |_, _| true, |_, _, _| true);
        assert_eq!(removed, 1);
        assert!(a.get_transitions_for_label(0).is_empty());

        let mut dead_labels = vec![false; labels.size()];
        let mut dead_operators = vec![false; task.num_operators()];
        assert!(a.check_dead_operators(&labels, &mut dead_labels, &mut dead_operators));
        assert_eq!(dead_operators, vec![true, false]);
    }
}
