use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::info;
use log::trace;
use serde::Deserialize;
use serde::Serialize;

use ldsim_abstraction::Abstraction;
use ldsim_abstraction::AbstractionId;
use ldsim_abstraction::Labels;
use ldsim_abstraction::LabelledTransitionSystem;
use ldsim_abstraction::StateMapping;

use crate::Credit;
use crate::MINUS_INFINITY;
use crate::NumericLabelRelation;
use crate::TauDistances;
use super::tau_labels::dijkstra_search_epsilon;

/// A numeric simulation relation on the states of one abstraction.
///
/// `relation[t][s]` is a lower bound on `h*(s) - h*(t)`, the cost that is
/// saved by being in `t` instead of `s`. `MINUS_INFINITY` means that `t`
/// does not simulate `s`.
#[derive(Clone, Debug)]
pub struct NumericSimulationRelation<T> {
    abstraction: AbstractionId,
    mapping: StateMapping,
    /// Goal distances in which every zero cost label costs an epsilon.
    goal_distances: Vec<T>,
    truncate_value: i32,

    /// The identifier of the tau distances the relation was last updated with.
    tau_distances_id: usize,
    relation: Vec<Vec<T>>,
    max_relation_value: T,
    cancelled: bool,
}

impl<T: Credit> NumericSimulationRelation<T> {
    /// Creates the goal respecting relation of the abstraction. Entries that
    /// drop below `-truncate_value` during the fixpoint computation are set
    /// to their tau lower bound.
    pub fn new(abs: &Abstraction, labels: &Labels, truncate_value: i32) -> Self {
        debug_assert!(
            abs.are_distances_computed(),
            "Distances must have been computed before creating the simulation relation"
        );

        let mut result = Self {
            abstraction: abs.id(),
            mapping: abs.mapping().clone(),
            goal_distances: goal_distances_with_epsilon(abs, labels),
            truncate_value,
            tau_distances_id: 0,
            relation: Vec::new(),
            max_relation_value: T::ZERO,
            cancelled: false,
        };
        result.init_goal_respecting();
        result
    }

    /// Resets the relation to the difference of the goal distances.
    pub fn init_goal_respecting(&mut self) {
        let num_states = self.goal_distances.len();
        self.relation = (0..num_states)
            .map(|t| {
                (0..num_states)
                    .map(|s| {
                        if s == t {
                            T::ZERO
                        } else {
                            goal_respecting_value(self.goal_distances[t], self.goal_distances[s])
                        }
                    })
                    .collect()
            })
            .collect();
        self.tau_distances_id = 0;
        self.cancelled = false;
    }

    pub fn abstraction_id(&self) -> AbstractionId {
        self.abstraction
    }

    pub fn num_states(&self) -> usize {
        self.relation.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The credit of `t` over `s`.
    pub fn q_simulates(&self, t: usize, s: usize) -> T {
        debug_assert!(s != t || self.relation[t][s] == T::ZERO);
        self.relation[t][s]
    }

    /// Returns true iff `t` simulates `s` without losing any credit.
    pub fn simulates(&self, t: usize, s: usize) -> bool {
        self.relation[t][s] >= T::ZERO
    }

    /// Returns true iff `t` simulates `s` with some finite credit.
    pub fn may_simulate(&self, t: usize, s: usize) -> bool {
        self.relation[t][s] > T::MINUS_INFINITY
    }

    pub fn update_value(&mut self, t: usize, s: usize, value: T) {
        self.relation[t][s] = value;
    }

    /// The abstract state of a task state, None when it is pruned.
    pub fn get_abstract_state_id(&self, state: &[usize]) -> Option<usize> {
        self.mapping.abstract_state(state)
    }

    pub fn pruned(&self, state: &[usize]) -> bool {
        self.get_abstract_state_id(state).is_none()
    }

    /// The goal distance of the abstract state of a task state, None when it is pruned or a dead end.
    pub fn get_cost(&self, state: &[usize]) -> Option<T> {
        let index = self.get_abstract_state_id(state)?;
        Some(self.goal_distances[index]).filter(|h| *h != T::INFINITY)
    }

    /// The credit of task state `t` over task state `s`, `MINUS_INFINITY` when either is pruned.
    pub fn q_simulates_state(&self, t: &[usize], s: &[usize]) -> T {
        match (self.get_abstract_state_id(t), self.get_abstract_state_id(s)) {
            (Some(t), Some(s)) => self.q_simulates(t, s),
            _ => T::MINUS_INFINITY,
        }
    }

    /// The credit between two values of the variable of an atomic abstraction.
    pub fn atomic_q_simulates(&self, t: usize, s: usize) -> T {
        let StateMapping::Atomic { lookup, .. } = &self.mapping else {
            debug_assert!(false, "Only atomic abstractions can be queried by variable value");
            return T::MINUS_INFINITY;
        };

        match (lookup[t], lookup[s]) {
            (Some(t), Some(s)) => self.q_simulates(t, s),
            _ => T::MINUS_INFINITY,
        }
    }

    fn compare_transitions(
        &self,
        lts_id: usize,
        tr_s_target: usize,
        tr_s_label: usize,
        tr_t_target: usize,
        tr_t_label: usize,
        tau_distance: T,
        label_dominance: &NumericLabelRelation<T>,
    ) -> T {
        if !label_dominance.simulates_in_all_other(tr_t_label, tr_s_label, lts_id)
            || !self.may_simulate(tr_t_target, tr_s_target)
        {
            return T::MINUS_INFINITY;
        }

        tau_distance
            .plus(label_dominance.q_dominates_value(tr_t_label, tr_s_label, lts_id))
            .plus(label_dominance.get_label_cost(tr_s_label))
            .minus(label_dominance.get_label_cost(tr_t_label))
            .plus(self.q_simulates(tr_t_target, tr_s_target))
    }

    fn compare_noop(
        &self,
        lts_id: usize,
        tr_s_target: usize,
        tr_s_label: usize,
        t: usize,
        tau_distance: T,
        label_dominance: &NumericLabelRelation<T>,
    ) -> T {
        if !self.may_simulate(t, tr_s_target) || !label_dominance.simulated_by_noop_in_all_other(tr_s_label, lts_id) {
            return T::MINUS_INFINITY;
        }

        tau_distance
            .plus(self.q_simulates(t, tr_s_target))
            .plus(label_dominance.get_label_cost(tr_s_label))
            .plus(label_dominance.q_dominated_by_noop(tr_s_label, lts_id))
    }

    /// Recomputes the credit of `t` over `s`: every transition of `s` must
    /// be answered by `t`, possibly after some tau transitions, either with
    /// a dominating label or by staying put. Returns true iff it decreased.
    fn update_pair(
        &mut self,
        lts_id: usize,
        lts: &LabelledTransitionSystem,
        label_dominance: &NumericLabelRelation<T>,
        tau_distances: &TauDistances<T>,
        s: usize,
        t: usize,
    ) -> bool {
        let lower_bound = tau_distances.minus_shortest_path(t, s);
        let previous_value = self.q_simulates(t, s);
        if previous_value <= lower_bound {
            return false;
        }

        let truncate = T::from_cost(-self.truncate_value);
        let mut min_value = previous_value;
        lts.apply_post_src(s, |trs| {
            for &tr_s_label in lts.labels_of_group(trs.group) {
                let mut max_value = T::MINUS_INFINITY;
                for &t2 in tau_distances.states_reachable_from(t) {
                    let tau_distance = tau_distances.minus_shortest_path(t, t2);
                    max_value = max_value.max(self.compare_noop(
                        lts_id,
                        trs.target,
                        tr_s_label,
                        t2,
                        tau_distance,
                        label_dominance,
                    ));
                    if max_value >= min_value {
                        break;
                    }

                    lts.apply_post_src(t2, |trt| {
                        for &tr_t_label in lts.labels_of_group(trt.group) {
                            max_value = max_value.max(self.compare_transitions(
                                lts_id,
                                trs.target,
                                tr_s_label,
                                trt.target,
                                tr_t_label,
                                tau_distance,
                                label_dominance,
                            ));
                            if max_value >= min_value {
                                return true;
                            }
                        }
                        false
                    });

                    if max_value >= min_value {
                        break;
                    }
                }

                min_value = min_value.min(max_value);
                if min_value < truncate {
                    min_value = lower_bound;
                    return true;
                } else if min_value <= lower_bound {
                    return true;
                }
            }
            false
        });

        let min_value = min_value.max(lower_bound);
        if min_value < previous_value {
            trace!("Credit of {t} over {s} decreased to {min_value}");
            self.update_value(t, s, min_value);
            true
        } else {
            false
        }
    }

    /// Refines the relation to a fixpoint, returns the number of iterations.
    /// When `max_time` is exceeded the computation is cancelled.
    pub fn update(
        &mut self,
        lts_id: usize,
        lts: &LabelledTransitionSystem,
        label_dominance: &NumericLabelRelation<T>,
        tau_distances: &TauDistances<T>,
        max_time: Duration,
    ) -> usize {
        if self.cancelled {
            // The tau labels may have changed since.
            self.cancel_simulation_computation(lts, tau_distances);
            return 0;
        }

        let num_states = lts.size();
        if tau_distances.id() != self.tau_distances_id {
            self.tau_distances_id = tau_distances.id();
            for s in (0..num_states).filter(|&s| lts.is_goal(s)) {
                for t in (0..num_states).filter(|&t| !lts.is_goal(t)) {
                    let goal_distance = tau_distances.get_goal_distance(t);
                    let value = if goal_distance == T::INFINITY {
                        T::MINUS_INFINITY
                    } else {
                        self.relation[t][s].min(goal_distance.negate())
                    };
                    self.update_value(t, s, value);
                }
            }
        }

        let start = Instant::now();
        let mut num_iterations = 0;
        let mut changes = true;
        while changes {
            num_iterations += 1;
            changes = false;
            for s in 0..num_states {
                for t in 0..num_states {
                    if start.elapsed() > max_time {
                        info!(
                            "Computation of numeric simulation on system {lts_id} with {num_states} states cancelled after {:.3}s",
                            start.elapsed().as_secs_f64()
                        );
                        self.cancel_simulation_computation(lts, tau_distances);
                        return num_iterations;
                    }

                    if s != t && self.may_simulate(t, s) {
                        changes |= self.update_pair(lts_id, lts, label_dominance, tau_distances, s, t);
                    }
                }
            }
        }

        num_iterations
    }

    /// Gives up on the fixpoint, only the tau distances are known to be sound.
    pub fn cancel_simulation_computation(&mut self, lts: &LabelledTransitionSystem, tau_distances: &TauDistances<T>) {
        if self.cancelled && tau_distances.id() == self.tau_distances_id {
            return;
        }

        self.cancelled = true;
        self.tau_distances_id = tau_distances.id();
        for t in 0..lts.size() {
            for s in 0..lts.size() {
                self.update_value(t, s, tau_distances.minus_shortest_path(t, s));
            }
        }
    }

    pub fn compute_max_value(&mut self) -> T {
        self.max_relation_value = self.relation.iter().flatten().copied().max().unwrap_or(T::ZERO).max(T::ZERO);
        self.max_relation_value
    }

    pub fn get_max_value(&self) -> T {
        self.max_relation_value
    }

    /// The smallest finite credit between two different states, at most zero.
    pub fn get_min_finite_entry(&self) -> T {
        self.off_diagonal()
            .filter(|&value| value != T::MINUS_INFINITY)
            .fold(T::ZERO, T::min)
    }

    /// Returns true iff some state simulates another state.
    pub fn has_dominance(&self) -> bool {
        self.off_diagonal().any(|value| value > T::MINUS_INFINITY)
    }

    /// Returns true iff some state simulates another state without losing credit.
    pub fn has_positive_dominance(&self) -> bool {
        self.off_diagonal().any(|value| value >= T::ZERO)
    }

    fn off_diagonal(&self) -> impl Iterator<Item = T> + '_ {
        self.relation
            .iter()
            .enumerate()
            .flat_map(|(t, row)| row.iter().enumerate().filter(move |(s, _)| *s != t).map(|(_, value)| *value))
    }

    /// Logs how often every value occurs in the relation.
    pub fn statistics(&self) {
        let mut values: BTreeMap<T, usize> = BTreeMap::new();
        for value in self.off_diagonal() {
            *values.entry(value).or_default() += 1;
        }

        let summary: Vec<String> = values
            .iter()
            .map(|(value, count)| {
                if *value == T::MINUS_INFINITY {
                    format!("-inf: {count}")
                } else {
                    format!("{value}: {count}")
                }
            })
            .collect();
        info!("Numeric simulation values: {}", summary.join(", "));
    }

    pub fn dump(&self) {
        for (t, row) in self.relation.iter().enumerate() {
            for (s, value) in row.iter().enumerate() {
                if s != t && self.may_simulate(t, s) {
                    debug!("{t} simulates {s} with {value}");
                }
            }
        }
    }
}

impl NumericSimulationRelation<i32> {
    /// The parts of the relation that are needed to answer queries on task states.
    pub fn strip(&self) -> StrippedNumericSimulationRelation {
        StrippedNumericSimulationRelation {
            mapping: self.mapping.clone(),
            relation: self.relation.clone(),
        }
    }
}

/// The credit of `t` over `s` according to the goal distances only.
fn goal_respecting_value<T: Credit>(goal_distance_t: T, goal_distance_s: T) -> T {
    match (goal_distance_t == T::INFINITY, goal_distance_s == T::INFINITY) {
        (true, true) => T::ZERO,
        (true, false) => T::MINUS_INFINITY,
        // Every state simulates a dead end, but an infinite credit does not add up.
        (false, true) => T::ZERO,
        (false, false) => goal_distance_s.minus(goal_distance_t),
    }
}

/// Goal distances of the abstraction where labels cost [Credit::epsilon_if_zero].
pub(crate) fn goal_distances_with_epsilon<T: Credit>(abs: &Abstraction, labels: &Labels) -> Vec<T> {
    let num_states = abs.size();
    let mut backward_graph: Vec<Vec<(usize, T)>> = vec![Vec::new(); num_states];
    for label in (0..abs.num_labels()).filter(|&label| abs.is_relevant_label(label)) {
        let cost = T::epsilon_if_zero(labels.get_label_cost(label));
        for transition in abs.get_transitions_for_label(label) {
            if !transition.is_self_loop() {
                backward_graph[transition.target].push((transition.src, cost));
            }
        }
    }

    let goal_states: Vec<usize> = (0..num_states).filter(|&s| abs.is_goal_state(s)).collect();
    let (distances, _) = dijkstra_search_epsilon(&backward_graph, &goal_states);
    distances
}

/// A numeric simulation relation that can answer queries on task states, but can no longer be refined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrippedNumericSimulationRelation {
    mapping: StateMapping,
    relation: Vec<Vec<i32>>,
}

impl StrippedNumericSimulationRelation {
    /// The credit of task state `t` over task state `s`, `MINUS_INFINITY` when either is pruned.
    pub fn q_simulates(&self, t: &[usize], s: &[usize]) -> i32 {
        match (self.mapping.abstract_state(t), self.mapping.abstract_state(s)) {
            (Some(t), Some(s)) => self.relation[t][s],
            _ => MINUS_INFINITY,
        }
    }

    pub fn atomic_q_simulates(&self, t: usize, s: usize) -> i32 {
        match &self.mapping {
            StateMapping::Atomic { lookup, .. } => match (lookup[t], lookup[s]) {
                (Some(t), Some(s)) => self.relation[t][s],
                _ => MINUS_INFINITY,
            },
            _ => MINUS_INFINITY,
        }
    }

    pub fn get_min_finite_entry(&self) -> i32 {
        self.relation
            .iter()
            .enumerate()
            .flat_map(|(t, row)| row.iter().enumerate().filter(move |(s, _)| *s != t).map(|(_, value)| *value))
            .filter(|&value| value != MINUS_INFINITY)
            .fold(0, i32::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::LabelMap;
    use ldsim_task::PlanningTask;
    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;
    use test_log::test;

    use crate::IntEpsilon;
    use crate::TauLabelManager;
    use crate::TauLabelOptions;

    fn atomic_abstractions(task: &PlanningTask, labels: &mut Labels) -> Vec<Abstraction> {
        let mut result = Abstraction::build_atomic_abstractions(task, labels, false);
        for abs in &mut result {
            abs.normalize(labels);
            abs.compute_distances(labels).expect("The task is solvable");
        }
        result
    }

    #[test]
    fn test_goal_respecting_two_flip() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let atomics = atomic_abstractions(&task, &mut labels);

        let sim = NumericSimulationRelation::<i32>::new(&atomics[0], &labels, 10);
        // A=1 is one step closer to the goal than A=0.
        assert_eq!(sim.q_simulates(1, 0), 1);
        assert_eq!(sim.q_simulates(0, 1), -1);
        assert!(sim.simulates(1, 0));
        assert!(!sim.simulates(0, 1));
        assert!(sim.may_simulate(0, 1));

        assert_eq!(sim.q_simulates_state(&[1, 0], &[0, 0]), 1);
        assert_eq!(sim.get_cost(&[0, 1]), Some(1));
        assert_eq!(sim.atomic_q_simulates(1, 0), 1);
        assert_eq!(sim.get_min_finite_entry(), -1);
    }

    #[test]
    fn test_update_gripper() {
        let task = gripper_task(3);
        let mut labels = Labels::new(&task);
        let atomics = atomic_abstractions(&task, &mut labels);
        let label_map = LabelMap::new(&labels);
        let ltss: Vec<_> = atomics
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();

        let mut sims: Vec<_> = atomics
            .iter()
            .map(|abs| NumericSimulationRelation::<i32>::new(abs, &labels, 10))
            .collect();
        let mut tau_labels = TauLabelManager::new(TauLabelOptions::default());
        tau_labels.initialize(&ltss, &label_map);
        let mut label_dominance = NumericLabelRelation::new(0);
        label_dominance.init(&ltss, &sims, &label_map);

        let before: Vec<Vec<i32>> = sims[0].relation.clone();
        for (i, sim) in sims.iter_mut().enumerate() {
            sim.update(i, &ltss[i], &label_dominance, tau_labels.get_tau_distances(i), Duration::from_secs(60));
        }

        // The relation only decreases and never drops below the tau lower bound.
        let robot = tau_labels.get_tau_distances(0);
        for t in 0..ltss[0].size() {
            for s in 0..ltss[0].size() {
                assert!(sims[0].q_simulates(t, s) <= before[t][s]);
                assert!(sims[0].q_simulates(t, s) >= robot.minus_shortest_path(t, s));
            }
        }
        assert!(sims[0].has_dominance());
    }

    #[test]
    fn test_cancel_gives_tau_bounds() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let atomics = atomic_abstractions(&task, &mut labels);
        let label_map = LabelMap::new(&labels);
        let ltss: Vec<_> = atomics
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();

        let mut tau_labels = TauLabelManager::<IntEpsilon>::new(TauLabelOptions::default());
        tau_labels.initialize(&ltss, &label_map);

        let mut sim = NumericSimulationRelation::<IntEpsilon>::new(&atomics[0], &labels, 10);
        sim.cancel_simulation_computation(&ltss[0], tau_labels.get_tau_distances(0));
        assert!(sim.is_cancelled());

        // The robot moves freely, so the rooms simulate each other at the cost of one move.
        assert_eq!(sim.q_simulates(0, 1), IntEpsilon::from(-1));
        assert_eq!(sim.q_simulates(1, 0), IntEpsilon::from(-1));
        assert_eq!(sim.q_simulates(0, 0), IntEpsilon::ZERO);
    }

    #[test]
    fn test_strip_roundtrip_queries() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let atomics = atomic_abstractions(&task, &mut labels);

        let sim = NumericSimulationRelation::<i32>::new(&atomics[1], &labels, 10);
        let stripped = sim.strip();
        let json = serde_json::to_string(&stripped).expect("Serialization succeeds");
        let restored: StrippedNumericSimulationRelation = serde_json::from_str(&json).expect("Deserialization succeeds");

        assert_eq!(restored, stripped);
        assert_eq!(restored.q_simulates(&[0, 1], &[0, 0]), sim.q_simulates(1, 0));
        assert_eq!(restored.get_min_finite_entry(), sim.get_min_finite_entry());
    }
}
