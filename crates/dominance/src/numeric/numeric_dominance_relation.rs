use std::collections::BTreeSet;
use std::time::Duration;
use std::time::Instant;

use log::info;
use serde::Deserialize;
use serde::Serialize;

use ldsim_abstraction::Abstraction;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::Labels;
use ldsim_abstraction::LabelledTransitionSystem;
use ldsim_task::PlanningTask;
use ldsim_utilities::LdsimError;

use crate::Credit;
use crate::MINUS_INFINITY;
use crate::NumericLabelRelation;
use crate::NumericSimulationRelation;
use crate::StrippedNumericSimulationRelation;
use crate::TauLabelManager;
use crate::TauLabelOptions;

/// Options of the numeric dominance relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NumericDominanceOptions {
    /// Credits below minus this value are replaced by their tau lower bound.
    pub truncate_value: i32,
    /// Time limits in seconds for the fixpoint of one transition system.
    pub max_simulation_time: u64,
    pub min_simulation_time: u64,
    /// Time limit in seconds for all transition systems together.
    pub max_total_time: u64,
    /// Transition systems with more states are assigned the tau lower bounds.
    pub max_lts_size_to_compute_simulation: usize,
    /// The table of dominating labels per pair is used below this number of labels.
    pub num_labels_to_use_dominates_in: usize,
    pub tau_labels: TauLabelOptions,
}

impl Default for NumericDominanceOptions {
    fn default() -> Self {
        Self {
            truncate_value: 10,
            max_simulation_time: 1800,
            min_simulation_time: 1,
            max_total_time: 1800,
            max_lts_size_to_compute_simulation: 1_000_000,
            num_labels_to_use_dominates_in: 0,
            tau_labels: TauLabelOptions::default(),
        }
    }
}

impl NumericDominanceOptions {
    pub fn validate(&self) -> Result<(), LdsimError> {
        if self.truncate_value < 0 {
            return Err(LdsimError::config("the truncate value must not be negative"));
        }

        if self.min_simulation_time > self.max_simulation_time {
            return Err(LdsimError::config(format!(
                "the minimum simulation time {} exceeds the maximum simulation time {}",
                self.min_simulation_time, self.max_simulation_time
            )));
        }

        if self.max_total_time == 0 {
            return Err(LdsimError::config("the total simulation time must be positive"));
        }
        Ok(())
    }

    /// The time for one transition system when `remaining` systems still have to be computed.
    fn simulation_time(&self, remaining: usize) -> Duration {
        let share = 1 + self.max_total_time / remaining.max(1) as u64;
        Duration::from_secs(share.clamp(self.min_simulation_time, self.max_simulation_time))
    }
}

/// The numeric simulation relations of all factors of a factored transition
/// system, together with the label relation and tau labels they share.
///
/// The credit of a task state over another task state is the sum of the
/// credits in all factors.
#[derive(Clone, Debug)]
pub struct NumericDominanceRelation<T> {
    options: NumericDominanceOptions,
    label_dominance: NumericLabelRelation<T>,
    tau_labels: TauLabelManager<T>,

    simulations: Vec<NumericSimulationRelation<T>>,
    simulation_of_variable: Vec<usize>,
    total_max_value: T,

    initial_state: Vec<usize>,
    initial_state_ids: Vec<Option<usize>>,
}

impl<T: Credit> NumericDominanceRelation<T> {
    pub fn new(options: NumericDominanceOptions) -> Self {
        Self {
            options,
            label_dominance: NumericLabelRelation::new(options.num_labels_to_use_dominates_in),
            tau_labels: TauLabelManager::new(options.tau_labels),
            simulations: Vec::new(),
            simulation_of_variable: Vec::new(),
            total_max_value: T::ZERO,
            initial_state: Vec::new(),
            initial_state_ids: Vec::new(),
        }
    }

    /// Creates the goal respecting relations of the abstractions, which
    /// must have their distances computed.
    pub fn init(&mut self, task: &PlanningTask, abstractions: &[Abstraction], labels: &Labels) {
        self.simulation_of_variable = vec![0; task.num_variables()];
        self.simulations = abstractions
            .iter()
            .enumerate()
            .map(|(i, abs)| {
                for &var in abs.varset() {
                    self.simulation_of_variable[var] = i;
                }
                NumericSimulationRelation::new(abs, labels, self.options.truncate_value)
            })
            .collect();
        self.set_initial_state(task.initial_state().to_vec());
    }

    /// Computes the label relation and all simulation relations in
    /// alternation until neither changes.
    pub fn compute_ld_simulation(&mut self, ltss: &[LabelledTransitionSystem], label_map: &LabelMap, dump: bool) {
        debug_assert_eq!(ltss.len(), self.simulations.len());
        let start = Instant::now();

        self.tau_labels.initialize(ltss, label_map);
        self.label_dominance.init(ltss, &self.simulations, label_map);

        for (i, lts) in ltss.iter().enumerate() {
            if lts.size() > self.options.max_lts_size_to_compute_simulation {
                info!(
                    "Computation of numeric simulation on system {i} with {} states cancelled because it is too big",
                    lts.size()
                );
                self.simulations[i].cancel_simulation_computation(lts, self.tau_labels.get_tau_distances(i));
            }
        }

        let mut order_by_size: Vec<usize> = (0..ltss.len()).collect();
        order_by_size.sort_by_key(|&i| ltss[i].size());

        let mut num_iterations = 0;
        let mut num_inner_iterations = 0;
        loop {
            loop {
                num_iterations += 1;
                for (done, &i) in order_by_size.iter().enumerate() {
                    let max_time = self.options.simulation_time(order_by_size.len() - done);
                    num_inner_iterations += self.simulations[i].update(
                        i,
                        &ltss[i],
                        &self.label_dominance,
                        self.tau_labels.get_tau_distances(i),
                        max_time,
                    );
                }

                if !self.label_dominance.update(ltss, &self.simulations) {
                    break;
                }
            }

            if !self.tau_labels.add_noop_dominance_tau_labels(ltss, &self.label_dominance) {
                break;
            }

            info!("New tau labels were found, restarting the numeric simulation");
            for sim in &mut self.simulations {
                sim.init_goal_respecting();
            }
        }

        info!(
            "Numeric LDSimulation finished: {num_iterations} iterations, {num_inner_iterations} inner iterations, {:.3}s",
            start.elapsed().as_secs_f64()
        );

        for sim in &self.simulations {
            sim.statistics();
        }

        if dump {
            for (i, lts) in ltss.iter().enumerate() {
                self.simulations[i].dump();
                self.label_dominance.dump(lts, i);
            }
        }

        self.total_max_value = self
            .simulations
            .iter_mut()
            .fold(T::ZERO, |total, sim| total.plus(sim.compute_max_value()));
    }

    pub fn len(&self) -> usize {
        self.simulations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulations.is_empty()
    }

    pub fn simulations(&self) -> &[NumericSimulationRelation<T>] {
        &self.simulations
    }

    pub fn get_simulation_of_variable(&self, var: usize) -> &NumericSimulationRelation<T> {
        &self.simulations[self.simulation_of_variable[var]]
    }

    pub fn label_dominance(&self) -> &NumericLabelRelation<T> {
        &self.label_dominance
    }

    pub fn tau_labels(&self) -> &TauLabelManager<T> {
        &self.tau_labels
    }

    /// The sum of the largest credits of all factors.
    pub fn total_max_value(&self) -> T {
        self.total_max_value
    }

    pub fn set_initial_state(&mut self, state: Vec<usize>) {
        self.initial_state_ids = self
            .simulations
            .iter()
            .map(|sim| sim.get_abstract_state_id(&state))
            .collect();
        self.initial_state = state;
    }

    pub fn pruned_state(&self, state: &[usize]) -> bool {
        self.simulations.iter().any(|sim| sim.pruned(state))
    }

    /// The maximum goal distance over all factors, None when the state is pruned or a dead end.
    pub fn get_cost(&self, state: &[usize]) -> Option<i32> {
        self.simulations
            .iter()
            .try_fold(0, |cost, sim| Some(cost.max(sim.get_cost(state)?.value())))
    }

    /// The credit of `t` over `s`, `MINUS_INFINITY` when some factor does not simulate.
    pub fn q_dominates_value(&self, t: &[usize], s: &[usize]) -> T {
        let mut total_value = T::ZERO;
        for sim in &self.simulations {
            let value = sim.q_simulates_state(t, s);
            if value == T::MINUS_INFINITY {
                return T::MINUS_INFINITY;
            }
            total_value = total_value.plus(value);
        }
        total_value
    }

    /// Returns true iff `t` is at least as good as `s` when reaching `t` costs `g_diff` more.
    pub fn dominates(&self, t: &[usize], s: &[usize], g_diff: i32) -> bool {
        let value = self.q_dominates_value(t, s);
        value != T::MINUS_INFINITY && value.minus(T::from_cost(g_diff)) >= T::ZERO
    }

    pub fn strictly_dominates(&self, t: &[usize], s: &[usize]) -> bool {
        self.dominates(t, s, 0) && !self.dominates(s, t, 0)
    }

    pub fn strictly_dominates_initial_state(&self, t: &[usize]) -> bool {
        self.dominates_parent(t, &self.initial_state, 0) && !self.dominates_parent(&self.initial_state, t, 0)
    }

    /// Returns true iff `state` dominates its parent when reaching it costs `action_cost`.
    pub fn dominates_parent(&self, state: &[usize], parent: &[usize], action_cost: i32) -> bool {
        self.dominates(state, parent, action_cost)
    }

    /// The factors that may change when applying the operator.
    fn relevant_simulations(&self, task: &PlanningTask, op: usize) -> BTreeSet<usize> {
        task.operator(op)
            .pre_posts()
            .iter()
            .map(|pre_post| self.simulation_of_variable[pre_post.var])
            .collect()
    }

    /// Sums the credits of the relevant factors, None when one of them does not simulate.
    fn sum_relevant(&self, relevant: &BTreeSet<usize>, value: impl Fn(usize) -> Option<T>) -> Option<T> {
        relevant.iter().try_fold(T::ZERO, |total, &sim| {
            let value = value(sim)?;
            (value != T::MINUS_INFINITY).then(|| total.plus(value))
        })
    }

    /// Looks for an applicable operator whose successor dominates the state
    /// even after paying for the operator. When one exists it is the only
    /// operator that needs to be expanded, and the list is reduced to it.
    pub fn action_selection_pruning(&self, task: &PlanningTask, state: &[usize], applicable_operators: &mut Vec<usize>) -> bool {
        let parent_ids: Vec<Option<usize>> = self
            .simulations
            .iter()
            .map(|sim| sim.get_abstract_state_id(state))
            .collect();

        let dominating = applicable_operators.iter().copied().find(|&op| {
            let succ = task.operator(op).apply(state);
            let relevant = self.relevant_simulations(task, op);
            let total_value = self.sum_relevant(&relevant, |sim| {
                let succ_id = self.simulations[sim].get_abstract_state_id(&succ)?;
                Some(self.simulations[sim].q_simulates(succ_id, parent_ids[sim]?))
            });

            total_value.is_some_and(|value| value.minus(T::from_cost(task.adjusted_cost(op))) >= T::ZERO)
        });

        match dominating {
            Some(op) => {
                applicable_operators.clear();
                applicable_operators.push(op);
                true
            }
            None => false,
        }
    }

    /// Removes the operators whose successor is pruned, dominated by the
    /// state itself or dominated by the initial state.
    pub fn prune_dominated_by_parent_or_initial_state(
        &self,
        task: &PlanningTask,
        state: &[usize],
        applicable_operators: &mut Vec<usize>,
        compare_against_parent: bool,
        compare_against_initial_state: bool,
    ) {
        let parent_ids: Vec<Option<usize>> = self
            .simulations
            .iter()
            .map(|sim| sim.get_abstract_state_id(state))
            .collect();

        let mut initial_state_against_parent = T::ZERO;
        let mut values_initial_state_against_parent = vec![T::MINUS_INFINITY; self.simulations.len()];
        let mut not_simulating_parent = BTreeSet::new();
        if compare_against_initial_state {
            for (i, sim) in self.simulations.iter().enumerate() {
                let value = match (self.initial_state_ids[i], parent_ids[i]) {
                    (Some(init), Some(parent)) => sim.q_simulates(init, parent),
                    _ => T::MINUS_INFINITY,
                };
                values_initial_state_against_parent[i] = value;
                if value == T::MINUS_INFINITY {
                    not_simulating_parent.insert(i);
                } else {
                    initial_state_against_parent = initial_state_against_parent.plus(value);
                }
            }
        }

        applicable_operators.retain(|&op| {
            let succ = task.operator(op).apply(state);
            let relevant = self.relevant_simulations(task, op);
            let cost = T::from_cost(task.adjusted_cost(op));

            let mut succ_ids = vec![None; self.simulations.len()];
            for &sim in &relevant {
                succ_ids[sim] = self.simulations[sim].get_abstract_state_id(&succ);
                if succ_ids[sim].is_none() {
                    return false;
                }
            }

            let prunable = |total_value: T| total_value >= T::ZERO || total_value.plus(cost) > T::ZERO;

            if compare_against_parent {
                let total_value = self.sum_relevant(&relevant, |sim| {
                    Some(self.simulations[sim].q_simulates(parent_ids[sim]?, succ_ids[sim]?))
                });
                if total_value.is_some_and(prunable) {
                    return false;
                }
            }

            // The factors in which the initial state does not simulate the parent must all change.
            if compare_against_initial_state && not_simulating_parent.is_subset(&relevant) {
                let total_value = self.sum_relevant(&relevant, |sim| {
                    let value = self.simulations[sim].q_simulates(self.initial_state_ids[sim]?, succ_ids[sim]?);
                    let parent_value = values_initial_state_against_parent[sim];
                    Some(if parent_value == T::MINUS_INFINITY {
                        value
                    } else {
                        value.minus(parent_value)
                    })
                });
                if total_value
                    .map(|value| value.plus(initial_state_against_parent))
                    .is_some_and(prunable)
                {
                    return false;
                }
            }

            true
        });
    }

    /// The smallest finite credit over all factors.
    pub fn get_minimal_finite_dominance_value(&self) -> T {
        self.simulations
            .iter()
            .fold(T::ZERO, |total, sim| total.plus(sim.get_min_finite_entry()))
    }
}

impl NumericDominanceRelation<i32> {
    /// The parts of the relation that are needed to answer queries on task states.
    pub fn strip(&self, computation_time: f64) -> StrippedNumericDominanceRelation {
        StrippedNumericDominanceRelation {
            simulations: self.simulations.iter().map(NumericSimulationRelation::strip).collect(),
            simulation_of_variable: self.simulation_of_variable.clone(),
            computation_time,
        }
    }
}

/// A numeric dominance relation that can only answer queries, it can be stored with `serde`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrippedNumericDominanceRelation {
    simulations: Vec<StrippedNumericSimulationRelation>,
    simulation_of_variable: Vec<usize>,
    pub computation_time: f64,
}

impl StrippedNumericDominanceRelation {
    pub fn q_dominates_value(&self, t: &[usize], s: &[usize]) -> i32 {
        let mut total_value = 0;
        for sim in &self.simulations {
            let value = sim.q_simulates(t, s);
            if value == MINUS_INFINITY {
                return MINUS_INFINITY;
            }
            total_value = total_value.plus(value);
        }
        total_value
    }

    pub fn get_simulation_of_variable(&self, var: usize) -> &StrippedNumericSimulationRelation {
        &self.simulations[self.simulation_of_variable[var]]
    }

    pub fn get_minimal_finite_dominance_value(&self) -> i32 {
        self.simulations.iter().map(|sim| sim.get_min_finite_entry()).sum()
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

    use crate::IntEpsilon;

    fn compute<T: Credit>(task: &PlanningTask, options: NumericDominanceOptions) -> Option<NumericDominanceRelation<T>> {
        let mut labels = Labels::new(task);
        let mut atomics = Abstraction::build_atomic_abstractions(task, &mut labels, false);
        for abs in &mut atomics {
            abs.normalize(&mut labels);
            abs.compute_distances(&mut labels).ok()?;
        }

        let label_map = LabelMap::new(&labels);
        let ltss: Vec<_> = atomics
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();

        let mut relation = NumericDominanceRelation::new(options);
        relation.init(task, &atomics, &labels);
        relation.compute_ld_simulation(&ltss, &label_map, false);
        Some(relation)
    }

    #[test]
    fn test_two_flip_credits() {
        let task = two_flip_task();
        let relation = compute::<i32>(&task, NumericDominanceOptions::default()).expect("Solvable");

        // The goal state saves both flips.
        assert_eq!(relation.q_dominates_value(&[1, 1], &[0, 0]), 2);
        assert!(relation.dominates(&[1, 1], &[0, 0], 2));
        assert!(!relation.dominates(&[1, 1], &[0, 0], 3));
        assert!(relation.strictly_dominates(&[1, 0], &[0, 0]));
        assert!(relation.strictly_dominates_initial_state(&[1, 0]));
        assert_eq!(relation.get_cost(&[0, 0]), Some(1));
        assert!(!relation.pruned_state(&[0, 1]));
    }

    #[test]
    fn test_action_selection_two_flip() {
        let task = two_flip_task();
        let relation = compute::<i32>(&task, NumericDominanceOptions::default()).expect("Solvable");

        // Flipping A from the initial state gains its cost back.
        let mut operators = vec![0];
        assert!(relation.action_selection_pruning(&task, &[0, 0], &mut operators));
        assert_eq!(operators, vec![0]);
    }

    #[test]
    fn test_prune_dominated_by_parent_keeps_progress() {
        let task = gripper_task(2);
        let relation = compute::<i32>(&task, NumericDominanceOptions::default()).expect("Solvable");

        // Picking up the ball in the first room is the only way forward.
        let pick = (0..task.num_operators())
            .find(|&op| task.operator(op).name() == "pick-0")
            .expect("pick-0 exists");
        let mut operators = vec![pick];
        relation.prune_dominated_by_parent_or_initial_state(&task, &[0, 0], &mut operators, true, false);
        assert_eq!(operators, vec![pick]);
    }

    /// The credit of `t` over `s` never exceeds `h*(s) - h*(t)`.
    fn check_soundness<T: Credit>(task: &PlanningTask, relation: &NumericDominanceRelation<T>) {
        let Some(space) = StateSpace::new(task, 2000) else {
            return;
        };
        let goal_distances = space.goal_distances();

        for t_rank in 0..space.num_states() {
            let t = space.state(t_rank);
            for s_rank in 0..space.num_states() {
                let s = space.state(s_rank);
                let value = relation.q_dominates_value(&t, &s);
                if value == T::MINUS_INFINITY {
                    continue;
                }

                match (goal_distances[t_rank], goal_distances[s_rank]) {
                    (Some(h_t), Some(h_s)) => assert!(
                        value.value() <= h_s - h_t,
                        "Credit {value} of {t:?} over {s:?} exceeds {}",
                        h_s - h_t
                    ),
                    (None, Some(_)) => panic!("Dead end {t:?} dominates {s:?} with {value}"),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_random_soundness() {
        random_test(40, |rng| {
            let task = random_task(rng, 3, 3, 6, 2);
            if let Some(relation) = compute::<i32>(&task, NumericDominanceOptions::default()) {
                check_soundness(&task, &relation);
            }
        });
    }

    #[test]
    fn test_random_soundness_epsilon_noop_tau() {
        random_test(40, |rng| {
            let task = random_task(rng, 3, 3, 6, 2);
            let mut options = NumericDominanceOptions::default();
            options.tau_labels.noop_dominance = true;
            if let Some(relation) = compute::<IntEpsilon>(&task, options) {
                check_soundness(&task, &relation);
            }
        });
    }

    #[test]
    fn test_options_validation() {
        assert!(NumericDominanceOptions::default().validate().is_ok());

        let mut options = NumericDominanceOptions::default();
        options.min_simulation_time = 2000;
        assert!(options.validate().is_err());

        let mut options = NumericDominanceOptions::default();
        options.truncate_value = -1;
        assert!(options.validate().is_err());

        assert_eq!(
            NumericDominanceOptions::default().simulation_time(3),
            Duration::from_secs(601)
        );
    }

    #[test]
    fn test_strip_serializes() {
        let task = two_flip_task();
        let relation = compute::<i32>(&task, NumericDominanceOptions::default()).expect("Solvable");
        let stripped = relation.strip(0.5);

        let json = serde_json::to_string(&stripped).expect("Serialization succeeds");
        let restored: StrippedNumericDominanceRelation = serde_json::from_str(&json).expect("Deserialization succeeds");
        assert_eq!(restored, stripped);
        assert_eq!(
            restored.q_dominates_value(&[1, 1], &[0, 0]),
            relation.q_dominates_value(&[1, 1], &[0, 0])
        );
        assert!(restored.get_minimal_finite_dominance_value() <= 0);
    }
}
