use std::collections::BTreeSet;

use clap::ValueEnum;
use log::debug;
use log::info;

use ldsim_abstraction::Abstraction;
use ldsim_abstraction::AbstractionId;
use ldsim_abstraction::EquivalenceRelation;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::DominatesIn;
use crate::LabelDominance;
use crate::LabelDominanceType;
use crate::SimulationRelation;
use crate::create_label_dominance;

/// Whether simulation relations are computed at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SimulationType {
    None,
    #[default]
    Simple,
}

/// The simulation relations of a set of abstractions together with the
/// label relation that they are computed with.
///
/// The i-th simulation belongs to the i-th abstraction and the i-th
/// transition system that are passed to the methods, callers have to keep
/// them in the same order.
pub struct DominanceRelation {
    simulations: Vec<SimulationRelation>,
    label_dominance: Box<dyn LabelDominance>,
}

impl DominanceRelation {
    pub fn new(label_dominance_type: LabelDominanceType) -> Self {
        Self {
            simulations: Vec::new(),
            label_dominance: create_label_dominance(label_dominance_type),
        }
    }

    /// Starts a goal respecting simulation for every abstraction.
    pub fn init(&mut self, abstractions: &mut [Abstraction]) {
        self.simulations = abstractions
            .iter_mut()
            .map(SimulationRelation::new_goal_respecting)
            .collect();
    }

    /// Starts the identity relation for every abstraction, it is never refined.
    pub fn init_identity(&mut self, abstractions: &mut [Abstraction]) {
        self.simulations = abstractions.iter_mut().map(SimulationRelation::new_identity).collect();
    }

    /// Replaces the simulations of the two components of a product by the
    /// incremental simulation of the product, which is appended at the end.
    pub fn init_incremental(&mut self, product: &mut Abstraction, first: AbstractionId, second: AbstractionId) {
        let position = |id| self.simulations.iter().position(|sim| sim.abstraction_id() == id);
        let sim = match (position(first), position(second)) {
            (Some(i), Some(j)) => SimulationRelation::new_incremental(product, &self.simulations[i], &self.simulations[j]),
            _ => SimulationRelation::new_goal_respecting(product),
        };

        self.simulations
            .retain(|sim| sim.abstraction_id() != first && sim.abstraction_id() != second);
        self.simulations.push(sim);
    }

    /// Removes the simulations of abstractions that are no longer present or useless.
    pub fn remove_useless<'a>(&mut self, abstractions: impl IntoIterator<Item = &'a Abstraction>) {
        let useful: BTreeSet<AbstractionId> = abstractions
            .into_iter()
            .filter(|abs| !abs.is_useless())
            .map(|abs| abs.id())
            .collect();
        self.simulations.retain(|sim| useful.contains(&sim.abstraction_id()));
    }

    /// Informs every simulation about the shrink steps applied to its abstraction.
    pub fn apply_shrinking<'a>(&mut self, abstractions: impl IntoIterator<Item = &'a mut Abstraction>) {
        for abs in abstractions {
            if let Some(sim) = self.simulations.iter_mut().find(|sim| sim.abstraction_id() == abs.id()) {
                sim.apply_shrinking(abs);
            }
        }
    }

    pub fn clear(&mut self) {
        self.simulations.clear();
    }

    pub fn len(&self) -> usize {
        self.simulations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulations.is_empty()
    }

    pub fn simulations(&self) -> &[SimulationRelation] {
        &self.simulations
    }

    pub fn simulations_mut(&mut self) -> &mut [SimulationRelation] {
        &mut self.simulations
    }

    pub fn label_dominance(&self) -> &dyn LabelDominance {
        self.label_dominance.as_ref()
    }

    /// Computes the label relation and the simulations to a common fixpoint.
    /// With `incremental_step` only the last simulation is refined.
    pub fn compute_ld_simulation(
        &mut self,
        ltss: &[LabelledTransitionSystem],
        label_map: &LabelMap,
        incremental_step: bool,
    ) {
        debug_assert_eq!(ltss.len(), self.simulations.len());
        let start = std::time::Instant::now();

        let total_size: usize = ltss.iter().map(|lts| lts.size()).sum();
        let total_trsize: usize = ltss.iter().map(|lts| lts.num_transitions()).sum();
        let max_size = ltss.iter().map(|lts| lts.size()).max().unwrap_or(0);
        let max_trsize = ltss.iter().map(|lts| lts.num_transitions()).max().unwrap_or(0);
        info!(
            "Compute LDSim on {} LTSs. Total size: {total_size} Total trsize: {total_trsize} Max size: {max_size} Max trsize: {max_trsize}",
            ltss.len()
        );

        self.label_dominance.init(ltss, &self.simulations, label_map);
        debug!("Init LDSim in {:.3}s", start.elapsed().as_secs_f64());

        loop {
            if incremental_step {
                if let (Some(sim), Some(lts)) = (self.simulations.last_mut(), ltss.last()) {
                    sim.update(ltss.len() - 1, lts, self.label_dominance.as_ref());
                }
            } else {
                for (i, (sim, lts)) in self.simulations.iter_mut().zip(ltss).enumerate() {
                    sim.update(i, lts, self.label_dominance.as_ref());
                }
            }
            debug!("LDSim iteration {:.3}s", start.elapsed().as_secs_f64());

            if !self.label_dominance.update(ltss, &self.simulations) {
                break;
            }
        }

        info!("LDSim computed {:.3}s", start.elapsed().as_secs_f64());
        for sim in &self.simulations {
            sim.dump();
        }
        self.label_dominance.dump();
    }

    /// Removes transitions of the abstractions that are dominated, either
    /// by a label that dominates in all transition systems, by noop, or by
    /// another transition. Only `lts_id` is pruned when given. Returns the
    /// number of removed transitions.
    pub fn prune_subsumed_transitions(
        &mut self,
        abstractions: &mut [Abstraction],
        label_map: &LabelMap,
        ltss: &mut [LabelledTransitionSystem],
        lts_id: Option<usize>,
        preserve_all_optimal_plans: bool,
    ) -> usize {
        let mut num_pruned_transitions = 0;

        if !preserve_all_optimal_plans {
            let labels_id = self.label_dominance.get_labels_dominated_in_all();
            for &label in &labels_id {
                for abs in abstractions.iter_mut() {
                    num_pruned_transitions += abs.prune_transitions_dominated_label_all(label_map.get_old_id(label));
                }
                self.label_dominance.kill_label(label);
            }
        }

        let label_dominance = self.label_dominance.as_ref();
        for label in 0..label_dominance.num_labels() {
            let DominatesIn::AllBut(lts) = label_dominance.get_dominated_by_noop_in(label) else {
                continue;
            };
            if lts_id.is_some_and(|id| id != lts) {
                continue;
            }

            let sim = &self.simulations[lts];
            let lts_view = &mut ltss[lts];
            num_pruned_transitions += abstractions[lts].prune_transitions_dominated_label_noop(
                label_map.get_old_id(label),
                |t, s| sim.simulates(t, s),
                |old_label, src, target| match label_map.get_id(old_label) {
                    Some(label) => label_dominance.propagate_transition_pruning(lts, lts_view, sim, src, label, target),
                    None => false,
                },
            );
        }

        if !preserve_all_optimal_plans {
            for lts in 0..abstractions.len() {
                if lts_id.is_some_and(|id| id != lts) {
                    continue;
                }

                let sim = &self.simulations[lts];
                let lts_view = &mut ltss[lts];
                let abs = &mut abstractions[lts];
                let relevant: Vec<(usize, usize)> = abs
                    .relevant_labels()
                    .iter()
                    .enumerate()
                    .filter(|&(_, &relevant)| relevant)
                    .filter_map(|(old, _)| Some((old, label_map.get_id(old)?)))
                    .collect();

                for (i, &(l, label_l)) in relevant.iter().enumerate() {
                    for &(l2, label_l2) in &relevant[i..] {
                        let l2_dominates = label_dominance.dominates(label_l2, label_l, lts);
                        let l_dominates = label_dominance.dominates(label_l, label_l2, lts);
                        let mut propagate = |old_label, src, target| match label_map.get_id(old_label) {
                            Some(label) => {
                                label_dominance.propagate_transition_pruning(lts, lts_view, sim, src, label, target)
                            }
                            None => false,
                        };
                        let simulates = |t, s| sim.simulates(t, s);

                        num_pruned_transitions += if l2_dominates && l_dominates {
                            abs.prune_transitions_dominated_label_equiv(l, l2, simulates, &mut propagate)
                        } else if l2_dominates {
                            abs.prune_transitions_dominated_label(l, l2, simulates, &mut propagate)
                        } else if l_dominates {
                            abs.prune_transitions_dominated_label(l2, l, simulates, &mut propagate)
                        } else {
                            0
                        };
                    }
                }
            }
        }

        num_pruned_transitions
    }

    pub fn get_equivalent_labels_relation(
        &self,
        label_map: &LabelMap,
        dangerous_ltss: &mut BTreeSet<usize>,
    ) -> EquivalenceRelation {
        self.label_dominance.get_equivalent_labels_relation(label_map, dangerous_ltss)
    }

    /// The maximum goal distance over all factors, None when a factor prunes the state.
    pub fn get_cost(&self, state: &[usize]) -> Option<i32> {
        self.simulations
            .iter()
            .try_fold(0, |cost, sim| Some(cost.max(sim.get_cost(state)?)))
    }

    pub fn pruned_state(&self, state: &[usize]) -> bool {
        self.simulations.iter().any(|sim| sim.pruned(state))
    }

    /// Returns true iff `t` dominates `s` in every factor.
    pub fn dominates(&self, t: &[usize], s: &[usize]) -> bool {
        self.simulations.iter().all(|sim| sim.simulates_state(t, s))
    }

    pub fn num_equivalences(&self) -> usize {
        self.simulations.iter().map(|sim| sim.num_equivalences()).sum()
    }

    pub fn num_simulations(&self) -> usize {
        self.simulations.iter().map(|sim| sim.num_simulations(true)).sum()
    }

    /// The number of state pairs in the product of all relations.
    pub fn num_st_pairs(&self) -> f64 {
        self.simulations
            .iter()
            .map(|sim| sim.num_simulations(false) as f64)
            .product()
    }

    pub fn num_states_problem(&self) -> f64 {
        self.simulations.iter().map(|sim| sim.num_states() as f64).product()
    }

    pub fn dump_statistics(&self, expensive: bool) {
        let num_equi = self.num_equivalences();
        let num_sims = self.num_simulations();
        let num_vars_with_simulations = self
            .simulations
            .iter()
            .filter(|sim| sim.num_simulations(true) > 0)
            .count();

        info!("Total Simulations: {}", num_sims + num_equi * 2);
        info!("Similarity equivalences: {num_equi}");
        info!("Only Simulations: {num_sims}");
        info!(
            "Simulations Found in {} out of {} variables",
            num_vars_with_simulations,
            self.simulations.len()
        );

        if expensive {
            let num_pairs = self.num_st_pairs();
            let problem_size = self.num_states_problem();
            info!("Total st pairs: {num_pairs}");
            info!("Percentage st pairs: {}", num_pairs / (problem_size * problem_size));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::Labels;
    use ldsim_task::PlanningTask;
    use ldsim_task::StateSpace;
    use ldsim_task::random_task;
    use ldsim_task::two_flip_task;
    use ldsim_utilities::random_test;
    use test_case::test_case;
    use test_log::test;

    fn compute(task: &PlanningTask, kind: LabelDominanceType) -> Option<(Vec<Abstraction>, DominanceRelation)> {
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

        let mut relation = DominanceRelation::new(kind);
        relation.init(&mut atomics);
        relation.compute_ld_simulation(&ltss, &label_map, false);
        Some((atomics, relation))
    }

    #[test]
    fn test_two_flip_dominance() {
        let task = two_flip_task();
        let (_, relation) = compute(&task, LabelDominanceType::Normal).unwrap();

        assert!(relation.dominates(&[0, 0], &[0, 0]));
        assert!(relation.dominates(&[1, 1], &[0, 0]));
        assert!(!relation.dominates(&[0, 0], &[1, 1]));
        assert_eq!(relation.get_cost(&[0, 0]), Some(1));
        assert_eq!(relation.get_cost(&[1, 1]), Some(0));
    }

    #[test_case(LabelDominanceType::Identity ; "identity")]
    #[test_case(LabelDominanceType::Noop ; "noop")]
    #[test_case(LabelDominanceType::Normal ; "normal")]
    #[test_case(LabelDominanceType::Alternative ; "alternative")]
    fn test_dominance_is_sound(kind: LabelDominanceType) {
        random_test(20, |rng| {
            let task = random_task(rng, 3, 3, 6, 2);
            let Some(space) = StateSpace::new(&task, 100) else {
                return;
            };
            let Some((_, relation)) = compute(&task, kind) else {
                return;
            };

            let distances = space.goal_distances();
            for t in 0..space.num_states() {
                for s in 0..space.num_states() {
                    let (state_t, state_s) = (space.state(t), space.state(s));
                    if !relation.dominates(&state_t, &state_s) {
                        continue;
                    }

                    if let Some(h_s) = distances[s] {
                        let h_t = distances[t].expect("A state dominating a solvable state is solvable");
                        assert!(h_t <= h_s, "{state_t:?} dominates {state_s:?} but {h_t} > {h_s}");
                    }
                }
            }
        });
    }

    #[test]
    fn test_pruning_keeps_solvability() {
        random_test(20, |rng| {
            let task = random_task(rng, 3, 3, 6, 2);
            let mut labels = Labels::new(&task);
            let mut atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
            for abs in &mut atomics {
                abs.normalize(&mut labels);
                if abs.compute_distances(&mut labels).is_err() {
                    return;
                }
            }

            let label_map = LabelMap::new(&labels);
            let mut ltss: Vec<_> = atomics
                .iter()
                .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
                .collect();
            let mut relation = DominanceRelation::new(LabelDominanceType::Normal);
            relation.init(&mut atomics);
            relation.compute_ld_simulation(&ltss, &label_map, false);

            relation.prune_subsumed_transitions(&mut atomics, &label_map, &mut ltss, None, false);

            for abs in &mut atomics {
                abs.normalize(&mut labels);
                abs.compute_distances(&mut labels)
                    .expect("Pruning dominated transitions keeps the task solvable");
                assert!(abs.is_solvable());
            }
        });
    }
}
