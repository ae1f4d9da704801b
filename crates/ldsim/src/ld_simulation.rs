use std::collections::BTreeSet;
use std::time::Instant;

use bitvec::vec::BitVec;
use log::debug;
use log::info;
use log::warn;
use rand::SeedableRng;
use rand::rngs::StdRng;

use ldsim_abstraction::Abstraction;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelReducer;
use ldsim_abstraction::LabelledTransitionSystem;
use ldsim_abstraction::Labels;
use ldsim_abstraction::MergeLimits;
use ldsim_abstraction::MergeStrategy;
use ldsim_abstraction::OperatorSet;
use ldsim_abstraction::ShrinkStrategy;
use ldsim_dominance::Credit;
use ldsim_dominance::DominanceRelation;
use ldsim_dominance::NumericDominanceOptions;
use ldsim_dominance::NumericDominanceRelation;
use ldsim_dominance::SimulationType;
use ldsim_task::PlanningTask;
use ldsim_utilities::Budget;
use ldsim_utilities::LdsimError;

use crate::LDSimulationOptions;
use crate::SimulationOptions;

/// The parameters of [LDSimulation::build_abstraction].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub limits: MergeLimits,
    /// Ask the merge strategy for its preferred pair and stop merging when
    /// that pair exceeds the limits, instead of asking for a pair within the limits.
    pub original_merge: bool,
    /// Never reduce labels.
    pub forbid_lr: bool,
    pub simulation: SimulationOptions,
    pub expensive_statistics: bool,
}

/// The parameters of [LDSimulation::complete_heuristic].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompleteOptions {
    pub shrink_after_merge: bool,
    pub prune_dead_operators: bool,
    pub expensive_statistics: bool,
}

/// Label-dominance simulation on a set of factored abstractions of a task.
///
/// The driver owns the labels and the abstractions. Abstractions are built
/// once, merged and shrunk within a budget, after which the dominance
/// relation is computed on the remaining factors.
pub struct LDSimulation<'a> {
    task: &'a PlanningTask,
    labels: Labels,
    label_reducer: LabelReducer,

    abstractions: Vec<Abstraction>,
    dominance_relation: Option<DominanceRelation>,

    /// Variables whose abstraction turned out to have a single state.
    useless_vars: Vec<usize>,
    dead_labels: Vec<bool>,
    dead_operators: Vec<bool>,

    store_original_operators: bool,
    rng: StdRng,
}

impl<'a> LDSimulation<'a> {
    pub fn new(task: &'a PlanningTask, options: &LDSimulationOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let label_reducer = LabelReducer::new(options.label_reduction, task.num_variables(), &mut rng);

        Self {
            task,
            labels: Labels::new(task),
            label_reducer,
            abstractions: Vec::new(),
            dominance_relation: None,
            useless_vars: Vec::new(),
            dead_labels: Vec::new(),
            dead_operators: (0..task.num_operators()).map(|op| task.is_dead(op)).collect(),
            store_original_operators: false,
            rng,
        }
    }

    pub fn task(&self) -> &'a PlanningTask {
        self.task
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn abstractions(&self) -> &[Abstraction] {
        &self.abstractions
    }

    pub fn dominance_relation(&self) -> Option<&DominanceRelation> {
        self.dominance_relation.as_ref()
    }

    pub fn useless_vars(&self) -> &[usize] {
        &self.useless_vars
    }

    /// The operators that are known to never occur in a plan.
    pub fn dead_operators(&self) -> &[bool] {
        &self.dead_operators
    }

    /// Marks additional operators as dead, for example the ones found by another driver.
    pub fn mark_dead_operators(&mut self, dead_operators: &[bool]) {
        for (dead, &other) in self.dead_operators.iter_mut().zip(dead_operators) {
            *dead |= other;
        }
    }

    /// Abstractions built from now on keep the original operators of every transition.
    pub fn set_store_original_operators(&mut self, store: bool) {
        self.store_original_operators = store;
    }

    /// Builds the atomic abstraction of every variable that is not useless.
    pub fn init_atomic_abstractions(&mut self) -> Result<(), LdsimError> {
        info!("Init atomic abstractions");
        let atomic = Abstraction::build_atomic_abstractions(self.task, &mut self.labels, self.store_original_operators);

        let useless_vars = &self.useless_vars;
        self.abstractions = atomic
            .into_iter()
            .filter(|abs| !matches!(abs.varset(), [var] if useless_vars.contains(var)))
            .collect();

        for abs in &mut self.abstractions {
            // Without normalizing first the distances could prune too many transitions.
            abs.normalize(&mut self.labels);
            abs.compute_distances(&mut self.labels)?;
        }
        self.remove_dead_labels()
    }

    /// Builds one pattern database abstraction for every part of the partition.
    pub fn init_factored_systems(&mut self, partition: &[Vec<usize>]) -> Result<(), LdsimError> {
        for pattern in partition {
            let mut abs = Abstraction::new_pdb(self.task, &mut self.labels, pattern.clone());
            abs.normalize(&mut self.labels);
            abs.compute_distances(&mut self.labels)?;
            self.abstractions.push(abs);
        }
        Ok(())
    }

    /// Merges the current abstractions (or fresh atomic abstractions when
    /// there are none) until the merge strategy is done, the limits are
    /// reached or the budget is exhausted.
    ///
    /// With intermediate simulations the dominance relation is recomputed
    /// after every merge and used to simplify the abstractions.
    pub fn build_abstraction(
        &mut self,
        mut merge_strategy: Option<&mut (dyn MergeStrategy + '_)>,
        mut shrink_strategy: Option<&mut (dyn ShrinkStrategy + '_)>,
        options: &BuildOptions,
        budget: &Budget,
    ) -> Result<(), LdsimError> {
        options.simulation.validate()?;
        let simulation = &options.simulation;
        let start = Instant::now();

        let mut all = if self.abstractions.is_empty() {
            let atomic =
                Abstraction::build_atomic_abstractions(self.task, &mut self.labels, self.store_original_operators);
            let mut all: Vec<Option<Abstraction>> = atomic.into_iter().map(Some).collect();
            self.remove_useless_atomic_abstractions(&mut all);
            all
        } else {
            let all = by_variable(self.task.num_variables(), std::mem::take(&mut self.abstractions));
            self.labels
                .reset_relevant_for(all.iter().flatten().map(|abs| (abs.id(), abs.relevant_labels())));
            all
        };
        let mut remaining = all.iter().flatten().count();

        let merged_vars: Vec<usize> = (0..self.task.num_variables())
            .filter(|&var| all.get(var).is_none_or(|abs| abs.is_none()))
            .collect();
        if let Some(merge) = merge_strategy.as_deref_mut() {
            merge.init(self.task, &all, &mut self.rng);
            merge.remove_useless_vars(&merged_vars);
        }

        if simulation.intermediate_simulations {
            if !options.forbid_lr {
                self.reduce_labels((0, 1), &mut all);
                for abs in all.iter_mut().flatten() {
                    abs.normalize(&mut self.labels);
                }
            }

            self.compute_ld_simulation_on(&mut all, simulation, false)?;
        } else if let Some(shrink) = shrink_strategy.as_deref_mut() {
            if !options.forbid_lr {
                debug!("Reduce labels: {} t: {:.3}s", self.labels.size(), start.elapsed().as_secs_f64());
                self.reduce_labels((0, 1), &mut all);
                for abs in all.iter_mut().flatten() {
                    abs.normalize(&mut self.labels);
                }
            }

            for abs in all.iter_mut().flatten() {
                abs.compute_distances(&mut self.labels)?;
                if !abs.is_solvable() {
                    return Err(LdsimError::Unsolvable);
                }
                shrink.shrink_atomic(abs, &mut self.labels)?;
            }
        }

        remaining -= self.remove_useless_abstractions_in(&mut all)?;
        if let Some(merge) = merge_strategy.as_deref_mut() {
            merge.remove_useless_vars(&self.useless_vars);
        }

        debug!("Merging abstractions...");
        while remaining > 1 && !budget.exhausted() {
            let Some(merge) = merge_strategy.as_deref_mut() else {
                break;
            };
            if merge.done() {
                break;
            }

            info!(
                "Remaining: {remaining} time: {:.2}s memory: {:?} KB",
                budget.elapsed_seconds(),
                ldsim_utilities::peak_memory_kb()
            );

            let limits = if options.original_merge {
                MergeLimits::unlimited()
            } else {
                options.limits
            };
            let Some((system_one, system_two)) = merge.get_next(self.task, &mut self.labels, &mut all, &limits)? else {
                info!("No pair of abstractions can be merged within the limits");
                break;
            };

            let Some((abs1, abs2)) = pair_mut(&mut all, system_one, system_two) else {
                warn!("The merge strategy selected a removed abstraction");
                break;
            };
            if options.original_merge && !options.limits.allows(abs1, abs2) {
                info!("The next merge exceeds the limits");
                break;
            }

            for abs in [&mut *abs1, &mut *abs2] {
                abs.normalize(&mut self.labels);
                abs.compute_distances(&mut self.labels)?;
                if !abs.is_solvable() {
                    return Err(LdsimError::Unsolvable);
                }
            }
            if let Some(dominance) = &mut self.dominance_relation {
                dominance.apply_shrinking([&mut *abs1, &mut *abs2]);
            }

            abs1.statistics(options.expensive_statistics);
            abs2.statistics(options.expensive_statistics);
            let (id_one, id_two) = (abs1.id(), abs2.id());

            let product = Abstraction::new_composite(self.task, &mut self.labels, abs1, abs2);
            remaining -= 1;
            info!("Merged: {}", product.description());
            product.statistics(options.expensive_statistics);

            all[system_one] = None;
            all[system_two] = None;
            let product_index = all.len();
            all.push(Some(product));

            // Labels are never reduced twice for the same product.
            let mut reduced_labels = false;
            if shrink_strategy
                .as_deref()
                .is_some_and(|shrink| shrink.reduce_labels_before_shrinking())
            {
                self.remove_dead_labels_in(all.iter_mut().flatten())?;
                if !options.forbid_lr {
                    self.reduce_labels_for_merge(remaining, &mut all);
                    reduced_labels = true;
                }
                normalize_at(&mut all, product_index, &mut self.labels);
            }

            if let Some(product) = all[product_index].as_mut() {
                product.compute_distances(&mut self.labels)?;
                if !product.is_solvable() {
                    return Err(LdsimError::Unsolvable);
                }
            }

            if (shrink_strategy.is_some()
                || simulation.intermediate_simulations
                || simulation.apply_subsumed_transitions_pruning)
                && !reduced_labels
            {
                self.remove_dead_labels_in(all.iter_mut().flatten())?;
                if !options.forbid_lr {
                    self.reduce_labels_for_merge(remaining, &mut all);
                }
                for abs in all.iter_mut().flatten() {
                    abs.normalize(&mut self.labels);
                }
            } else {
                normalize_at(&mut all, product_index, &mut self.labels);
            }

            if let Some(product) = all[product_index].as_mut() {
                if let Some(shrink) = shrink_strategy.as_deref_mut() {
                    debug!("Shrink: {:.3}s", start.elapsed().as_secs_f64());
                    let size = product.size();
                    shrink.shrink(product, &mut self.labels, size, true)?;
                    product.normalize(&mut self.labels);
                }
                product.compute_distances(&mut self.labels)?;
                debug!("Product: {} states", product.size());
            }

            if simulation.intermediate_simulations {
                if simulation.incremental_simulations {
                    if let (Some(dominance), Some(product)) =
                        (&mut self.dominance_relation, all[product_index].as_mut())
                    {
                        dominance.init_incremental(product, id_one, id_two);
                    }
                }
                self.compute_ld_simulation_on(&mut all, simulation, simulation.incremental_simulations)?;
            }

            remaining -= self.remove_useless_abstractions_in(&mut all)?;
        }

        for mut abs in all.into_iter().flatten() {
            abs.compute_distances(&mut self.labels)?;
            debug!("{}", abs.description());
            self.abstractions.push(abs);
        }
        if let Some(dominance) = &mut self.dominance_relation {
            dominance.apply_shrinking(self.abstractions.iter_mut());
        }

        debug!("Time build abstraction: {:.3}s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Merges copies of the current abstractions into complete
    /// merge-and-shrink heuristics, which are appended to `result`. The
    /// abstractions of the driver are left untouched.
    pub fn complete_heuristic(
        &mut self,
        mut merge_strategy: Option<&mut (dyn MergeStrategy + '_)>,
        mut shrink_strategy: Option<&mut (dyn ShrinkStrategy + '_)>,
        options: &CompleteOptions,
        budget: &Budget,
        result: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        let start = Instant::now();
        info!(
            "Complete heuristic initialized with {} abstractions",
            self.abstractions.len()
        );

        let copies: Vec<Abstraction> = self
            .abstractions
            .iter()
            .map(|abs| abs.clone_with_id(&mut self.labels))
            .collect();
        let mut all = by_variable(self.task.num_variables(), copies);
        let mut remaining = all.iter().flatten().count();
        self.labels
            .reset_relevant_for(all.iter().flatten().map(|abs| (abs.id(), abs.relevant_labels())));

        let merged_vars: Vec<usize> = (0..self.task.num_variables())
            .filter(|&var| all.get(var).is_none_or(|abs| abs.is_none()))
            .collect();
        if let Some(merge) = merge_strategy.as_deref_mut() {
            merge.init(self.task, &all, &mut self.rng);
            merge.remove_useless_vars(&merged_vars);
        }

        if self.abstractions.len() > 1 {
            self.reduce_labels((0, 1), &mut all);
        }

        while remaining > 1 && !budget.exhausted() {
            let Some(merge) = merge_strategy.as_deref_mut() else {
                break;
            };
            if merge.done() {
                break;
            }

            info!(
                "Remaining: {remaining} time: {:.2}s memory: {:?} KB",
                budget.elapsed_seconds(),
                ldsim_utilities::peak_memory_kb()
            );
            let Some((system_one, system_two)) =
                merge.get_next(self.task, &mut self.labels, &mut all, &MergeLimits::unlimited())?
            else {
                break;
            };
            remaining -= 1;

            match shrink_strategy.as_deref_mut() {
                Some(shrink) if !options.shrink_after_merge => {
                    let mut reduced_labels = false;
                    if shrink.reduce_labels_before_shrinking() {
                        self.reduce_labels((system_one, system_two), &mut all);
                        reduced_labels = true;
                        for index in [system_one, system_two] {
                            if let Some(abs) = all[index].as_mut() {
                                abs.normalize(&mut self.labels);
                                abs.statistics(options.expensive_statistics);
                            }
                        }
                    }

                    let Some((abs1, abs2)) = pair_mut(&mut all, system_one, system_two) else {
                        warn!("The merge strategy selected a removed abstraction");
                        break;
                    };
                    // The distances are needed for shrinking.
                    for abs in [&mut *abs1, &mut *abs2] {
                        abs.compute_distances(&mut self.labels)?;
                        if !abs.is_solvable() {
                            return Err(LdsimError::Unsolvable);
                        }
                    }
                    shrink.shrink_before_merge(abs1, abs2, &mut self.labels)?;
                    abs1.statistics(options.expensive_statistics);
                    abs2.statistics(options.expensive_statistics);

                    if !reduced_labels {
                        self.reduce_labels((system_one, system_two), &mut all);
                    }
                }
                _ => {}
            }

            let Some((abs1, abs2)) = pair_mut(&mut all, system_one, system_two) else {
                warn!("The merge strategy selected a removed abstraction");
                break;
            };
            for abs in [&mut *abs1, &mut *abs2] {
                abs.normalize(&mut self.labels);
                abs.compute_distances(&mut self.labels)?;
                if !abs.is_solvable() {
                    return Err(LdsimError::Unsolvable);
                }
            }

            let mut product = Abstraction::new_composite(self.task, &mut self.labels, abs1, abs2);
            info!("Merged: {}", product.description());
            product.statistics(options.expensive_statistics);
            all[system_one] = None;
            all[system_two] = None;

            // Pruning the unreachable and irrelevant states early keeps label reduction cheap.
            product.compute_distances(&mut self.labels)?;
            if !product.is_solvable() {
                return Err(LdsimError::Unsolvable);
            }
            let product_index = all.len();
            all.push(Some(product));

            if let Some(shrink) = shrink_strategy.as_deref_mut() {
                if options.shrink_after_merge {
                    self.reduce_labels((product_index, product_index), &mut all);
                    if let Some(product) = all[product_index].as_mut() {
                        product.normalize(&mut self.labels);
                        shrink.shrink(product, &mut self.labels, usize::MAX, true)?;
                        debug_assert!(product.is_solvable(), "Shrinking must preserve solvability");
                    }
                }
            }
        }

        let mut finished = Vec::new();
        for mut abs in all.into_iter().flatten() {
            abs.compute_distances(&mut self.labels)?;
            info!("Final: {}", abs.description());
            abs.statistics(options.expensive_statistics);
            if !abs.is_solvable() {
                return Err(LdsimError::Unsolvable);
            }
            finished.push(abs);
        }

        if options.prune_dead_operators {
            self.prune_dead_ops_in(&finished);
        }
        for abs in &mut finished {
            abs.release_memory();
        }
        result.extend(finished);

        self.labels.reset_relevant_for(
            self.abstractions
                .iter()
                .map(|abs| (abs.id(), abs.relevant_labels())),
        );
        debug!("Time complete heuristic: {:.3}s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Computes the label-dominance simulation of the current abstractions
    /// and simplifies the abstractions with it, as configured.
    ///
    /// With `incremental_step` only the simulation of the last abstraction
    /// is refined, which must have been initialised incrementally.
    pub fn compute_ld_simulation(
        &mut self,
        options: &SimulationOptions,
        incremental_step: bool,
        dump: bool,
    ) -> Result<(), LdsimError> {
        options.validate()?;
        let start = Instant::now();
        let label_dominance_type = options.effective_label_dominance(self.labels.size());
        if self.dominance_relation.is_none() {
            self.dominance_relation = Some(DominanceRelation::new(label_dominance_type));
        }

        for abs in &mut self.abstractions {
            abs.normalize(&mut self.labels);
            abs.compute_distances(&mut self.labels)?;
            if !abs.is_solvable() {
                return Err(LdsimError::Unsolvable);
            }
        }

        let label_map = LabelMap::new(&self.labels);
        let mut ltss: Vec<LabelledTransitionSystem> = self
            .abstractions
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();
        debug!(
            "Building LTSs and simulation relations: {}",
            ltss.iter()
                .map(|lts| format!("{} ({})", lts.size(), lts.num_transitions()))
                .collect::<Vec<_>>()
                .join(" ")
        );

        let Some(dominance) = self.dominance_relation.as_mut() else {
            return Ok(());
        };
        dominance.apply_shrinking(self.abstractions.iter_mut());

        match options.simulation_type {
            SimulationType::None => dominance.init_identity(&mut self.abstractions),
            SimulationType::Simple => {
                if !incremental_step {
                    dominance.init(&mut self.abstractions);
                }
                dominance.compute_ld_simulation(&ltss, &label_map, incremental_step);
            }
        }

        if options.apply_subsumed_transitions_pruning {
            let lts_id = incremental_step.then(|| dominance.len().saturating_sub(1));
            let num_pruned = dominance.prune_subsumed_transitions(
                &mut self.abstractions,
                &label_map,
                &mut ltss,
                lts_id,
                options.preserve_all_optimal_plans,
            );
            if num_pruned > 0 {
                info!("{num_pruned} transitions pruned from LTS {lts_id:?}");
            }
            self.remove_dead_labels()?;
        }

        if options.apply_label_dominance_reduction {
            if let Some(dominance) = self.dominance_relation.as_mut() {
                let mut dangerous_ltss = BTreeSet::new();
                let relation = dominance.get_equivalent_labels_relation(&label_map, &mut dangerous_ltss);
                self.labels.reduce_exactly(&relation);
                debug!("Labels reduced. Dangerous for: {}", dangerous_ltss.len());

                for abs in &mut self.abstractions {
                    abs.normalize(&mut self.labels);
                }

                if options.apply_simulation_shrinking {
                    // An incremental step only changed the simulation of the last abstraction.
                    let first = if incremental_step {
                        dominance.len().saturating_sub(1)
                    } else {
                        0
                    };
                    for (i, (sim, abs)) in dominance
                        .simulations_mut()
                        .iter_mut()
                        .zip(self.abstractions.iter_mut())
                        .enumerate()
                        .skip(first)
                    {
                        if !dangerous_ltss.contains(&i) {
                            sim.shrink(abs, &mut self.labels)?;
                        }
                    }
                }
            }
        }

        self.remove_dead_labels()?;
        for abs in &mut self.abstractions {
            abs.normalize(&mut self.labels);
            abs.compute_distances(&mut self.labels)?;
            if !abs.is_solvable() {
                return Err(LdsimError::Unsolvable);
            }
        }
        if let Some(dominance) = self.dominance_relation.as_mut() {
            dominance.apply_shrinking(self.abstractions.iter_mut());
            if dump {
                dominance.dump_statistics(true);
            }
        }

        info!(
            "{} / {} labels still alive",
            self.labels.num_current_labels(),
            self.labels.size()
        );
        debug!(
            "Final LTSs: {}",
            self.abstractions
                .iter()
                .map(|abs| format!("{} ({})", abs.size(), abs.total_transitions()))
                .collect::<Vec<_>>()
                .join(" ")
        );
        debug!("Time LD simulation: {:.3}s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Computes the simulation on the final abstractions, the intermediate
    /// simulations are discarded first.
    pub fn compute_final_simulation(&mut self, options: &SimulationOptions, dump: bool) -> Result<(), LdsimError> {
        info!("Computing simulation...");
        if options.intermediate_simulations {
            if let Some(dominance) = self.dominance_relation.as_mut() {
                dominance.clear();
            }
        }
        self.compute_ld_simulation(options, false, dump)?;

        info!("Final abstractions: {}", self.abstractions.len());
        for abs in &mut self.abstractions {
            abs.normalize(&mut self.labels);
            info!(
                "   {} variables {} states {} transitions",
                abs.varset().len(),
                abs.size(),
                abs.total_transitions()
            );
            debug!("used variables: {:?}", abs.varset());
        }

        if let Some(dominance) = &self.dominance_relation {
            dominance.dump_statistics(false);
        }
        if !self.useless_vars.is_empty() {
            info!("Useless vars: {}", self.useless_vars.len());
        }
        Ok(())
    }

    /// Computes the numeric dominance relation on the current abstractions.
    pub fn compute_numeric_dominance_relation<T: Credit>(
        &mut self,
        options: NumericDominanceOptions,
        dump: bool,
    ) -> Result<NumericDominanceRelation<T>, LdsimError> {
        options.validate()?;

        for abs in &mut self.abstractions {
            abs.normalize(&mut self.labels);
            abs.compute_distances(&mut self.labels)?;
            if !abs.is_solvable() {
                return Err(LdsimError::Unsolvable);
            }
        }
        if let Some(dominance) = self.dominance_relation.as_mut() {
            dominance.apply_shrinking(self.abstractions.iter_mut());
        }

        let label_map = LabelMap::new(&self.labels);
        let ltss: Vec<LabelledTransitionSystem> = self
            .abstractions
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();

        let mut result = NumericDominanceRelation::new(options);
        result.init(self.task, &self.abstractions, &self.labels);
        result.compute_ld_simulation(&ltss, &label_map, dump);
        Ok(result)
    }

    /// Removes the transitions of labels that can never be applied: labels of
    /// dead operators and labels without transitions in some abstraction.
    pub fn remove_dead_labels(&mut self) -> Result<(), LdsimError> {
        let mut abstractions = std::mem::take(&mut self.abstractions);
        let result = self.remove_dead_labels_in(abstractions.iter_mut());
        self.abstractions = abstractions;
        result
    }

    /// Removes the abstractions with a single state, their variables are
    /// recorded as useless. Returns the number of removed abstractions.
    pub fn remove_useless_abstractions(&mut self) -> Result<usize, LdsimError> {
        let mut all: Vec<Option<Abstraction>> = std::mem::take(&mut self.abstractions).into_iter().map(Some).collect();
        let result = self.remove_useless_abstractions_in(&mut all);
        self.abstractions = all.into_iter().flatten().collect();
        result
    }

    /// Marks the operators that are dead in some abstraction as dead.
    pub fn prune_dead_ops(&mut self) {
        let abstractions = std::mem::take(&mut self.abstractions);
        self.prune_dead_ops_in(&abstractions);
        self.abstractions = abstractions;
    }

    /// The heuristic value of a state, None when the state is pruned.
    pub fn get_cost(&self, state: &[usize]) -> Option<i32> {
        match &self.dominance_relation {
            Some(dominance) => dominance.get_cost(state),
            None => self
                .abstractions
                .iter()
                .try_fold(0, |cost, abs| Some(cost.max(abs.get_cost(state)?))),
        }
    }

    /// Returns true iff `t` dominates `s`, every state only dominates itself
    /// before a relation has been computed.
    pub fn dominates(&self, t: &[usize], s: &[usize]) -> bool {
        self.dominance_relation
            .as_ref()
            .map_or(t == s, |dominance| dominance.dominates(t, s))
    }

    pub fn release_memory(&mut self) {
        for abs in &mut self.abstractions {
            abs.release_memory();
        }
    }

    /// Temporarily moves the present abstractions into the driver to compute
    /// the simulation on them.
    fn compute_ld_simulation_on(
        &mut self,
        all: &mut [Option<Abstraction>],
        options: &SimulationOptions,
        incremental_step: bool,
    ) -> Result<(), LdsimError> {
        let indices: Vec<usize> = (0..all.len()).filter(|&index| all[index].is_some()).collect();
        self.abstractions = indices.iter().filter_map(|&index| all[index].take()).collect();

        let result = self.compute_ld_simulation(options, incremental_step, false);

        for (index, abs) in indices.into_iter().zip(std::mem::take(&mut self.abstractions)) {
            all[index] = Some(abs);
        }
        result
    }

    fn remove_dead_labels_in<'b>(
        &mut self,
        abstractions: impl IntoIterator<Item = &'b mut Abstraction>,
    ) -> Result<(), LdsimError> {
        let mut abstractions: Vec<&mut Abstraction> = abstractions.into_iter().collect();
        if self.dead_labels.len() < self.labels.size() {
            self.dead_labels.resize(self.labels.size(), false);
        }

        let mut new_dead_labels = Vec::new();
        for op in 0..self.task.num_operators() {
            if !self.dead_labels[op] && self.dead_operators[op] {
                self.dead_labels[op] = true;
                new_dead_labels.push(op);
            }
        }
        for abs in &abstractions {
            new_dead_labels.extend(abs.get_dead_labels(&self.labels, &mut self.dead_labels));
        }

        if new_dead_labels.is_empty() {
            return Ok(());
        }

        info!("Removing dead labels: {}", new_dead_labels.len());
        for abs in abstractions.iter_mut() {
            let num_pruned: usize = new_dead_labels
                .iter()
                .map(|&label| abs.prune_transitions_dominated_label_all(label))
                .sum();

            if num_pruned > 0 {
                abs.compute_distances(&mut self.labels)?;
                if let Some(dominance) = self.dominance_relation.as_mut() {
                    dominance.apply_shrinking([&mut **abs]);
                }
            }
        }
        Ok(())
    }

    fn remove_useless_abstractions_in(&mut self, all: &mut [Option<Abstraction>]) -> Result<usize, LdsimError> {
        self.remove_dead_labels_in(all.iter_mut().flatten())?;
        if let Some(dominance) = self.dominance_relation.as_mut() {
            dominance.remove_useless(all.iter().flatten());
        }

        let mut removed = 0;
        for slot in all.iter_mut() {
            if slot.as_ref().is_some_and(|abs| abs.is_useless()) {
                if let Some(abs) = slot.take() {
                    debug!("Removing useless abstraction {}", abs.description());
                    self.useless_vars.extend_from_slice(abs.varset());
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn remove_useless_atomic_abstractions(&self, all: &mut [Option<Abstraction>]) {
        for slot in all.iter_mut() {
            if slot
                .as_ref()
                .is_some_and(|abs| matches!(abs.varset(), [var] if self.useless_vars.contains(var)))
            {
                *slot = None;
            }
        }
    }

    fn prune_dead_ops_in(&mut self, abstractions: &[Abstraction]) {
        let num_operators = self.task.num_operators();
        let mut dead_labels = vec![false; self.labels.size()];
        let mut dead_operators = vec![false; num_operators];
        for abs in abstractions {
            abs.check_dead_operators(&self.labels, &mut dead_labels, &mut dead_operators);
        }

        let were_dead = self.dead_operators.iter().filter(|&&dead| dead).count();
        let num_dead = (0..num_operators)
            .filter(|&op| !self.dead_operators[op] && dead_operators[op])
            .count();
        info!(
            "Dead operators due to dead labels: {} (new {}) / {}",
            were_dead + num_dead,
            num_dead,
            num_operators
        );

        if !self.store_original_operators {
            for (dead, new_dead) in self.dead_operators.iter_mut().zip(dead_operators) {
                *dead |= new_dead;
            }
            return;
        }

        // An operator is required when it induces a transition of a live
        // label in every abstraction that the label is relevant for.
        let mut required_operators: OperatorSet = BitVec::repeat(false, num_operators);
        for label in 0..self.labels.size() {
            if self.dead_labels.get(label).copied().unwrap_or(false)
                || self.labels.is_label_reduced(label)
                || (label < num_operators && self.dead_operators[label])
            {
                continue;
            }

            let mut required_for_label: Option<OperatorSet> = None;
            for abs in abstractions.iter().filter(|abs| abs.is_relevant_label(label)) {
                let mut required_for_abstraction: OperatorSet = BitVec::repeat(false, num_operators);
                for ops in abs.get_transition_ops_for_label(label) {
                    required_for_abstraction |= ops.as_bitslice();
                }

                match required_for_label.as_mut() {
                    Some(required) => *required &= required_for_abstraction.as_bitslice(),
                    None => required_for_label = Some(required_for_abstraction),
                }
            }

            if let Some(required) = required_for_label {
                required_operators |= required.as_bitslice();
            }
        }

        let num_not_required = required_operators.count_zeros();
        info!(
            "Dead operators detected by storing original operators: {num_not_required} / {num_operators} ({:.2}%)",
            num_not_required as f64 / num_operators.max(1) as f64 * 100.0
        );
        for (op, dead) in self.dead_operators.iter_mut().enumerate() {
            if !required_operators[op] {
                *dead = true;
            }
        }
    }

    /// Reduces the labels for the given merge, when both indices exist.
    fn reduce_labels(&mut self, next_merge: (usize, usize), all: &mut [Option<Abstraction>]) {
        if next_merge.0.max(next_merge.1) < all.len() {
            self.label_reducer
                .reduce_labels(self.task, next_merge, all, &mut self.labels);
        }
    }

    /// When a single abstraction remains only the label costs matter.
    fn reduce_labels_for_merge(&mut self, remaining: usize, all: &mut [Option<Abstraction>]) {
        if remaining == 1 {
            self.label_reducer.reduce_labels_to_cost(&mut self.labels);
        } else {
            self.reduce_labels((0, 1), all);
        }
    }
}

/// Puts the atomic abstraction of variable `v` at index `v`, followed by
/// all other abstractions. This is the layout the merge strategies expect.
fn by_variable(num_variables: usize, abstractions: Vec<Abstraction>) -> Vec<Option<Abstraction>> {
    let mut result: Vec<Option<Abstraction>> = (0..num_variables).map(|_| None).collect();
    for abs in abstractions {
        match abs.varset() {
            &[var] if result[var].is_none() => result[var] = Some(abs),
            _ => result.push(Some(abs)),
        }
    }
    result
}

fn normalize_at(all: &mut [Option<Abstraction>], index: usize, labels: &mut Labels) {
    if let Some(abs) = all[index].as_mut() {
        abs.normalize(labels);
    }
}

/// Mutable references to two distinct present abstractions.
fn pair_mut(
    all: &mut [Option<Abstraction>],
    one: usize,
    two: usize,
) -> Option<(&mut Abstraction, &mut Abstraction)> {
    if one == two || one.max(two) >= all.len() {
        return None;
    }

    let (first, second) = if one < two {
        let (left, right) = all.split_at_mut(two);
        (&mut left[one], &mut right[0])
    } else {
        let (left, right) = all.split_at_mut(one);
        (&mut right[0], &mut left[two])
    };
    Some((first.as_mut()?, second.as_mut()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::MergeLinear;
    use ldsim_abstraction::ShrinkBisimulation;
    use ldsim_abstraction::VariableOrderType;
    use ldsim_task::Effect;
    use ldsim_task::Fact;
    use ldsim_task::StateSpace;
    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;

    use test_log::test;

    #[test]
    fn test_by_variable_layout() {
        let task = gripper_task(2);
        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        ld_sim.init_atomic_abstractions().unwrap();
        let mut abstractions = ld_sim.abstractions().to_vec();
        abstractions.reverse();

        let all = by_variable(task.num_variables(), abstractions);
        assert_eq!(all.len(), task.num_variables());
        for (var, abs) in all.iter().enumerate() {
            assert_eq!(abs.as_ref().unwrap().varset(), &[var]);
        }

        let mut all = all;
        assert!(pair_mut(&mut all, 1, 0).is_some());
        assert!(pair_mut(&mut all, 1, 1).is_none());
        all[0] = None;
        assert!(pair_mut(&mut all, 0, 1).is_none());
    }

    #[test]
    fn test_atomic_abstractions_two_flip() {
        let task = two_flip_task();
        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        ld_sim.init_atomic_abstractions().unwrap();

        assert_eq!(ld_sim.abstractions().len(), 2);
        for abs in ld_sim.abstractions() {
            assert_eq!(abs.size(), 2);
            assert_eq!(abs.get_goal_distances(), &[1, 0]);
        }
    }

    #[test]
    fn test_build_with_intermediate_simulations() {
        let task = gripper_task(2);
        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        let mut merge = MergeLinear::new(VariableOrderType::CgGoalLevel);
        let mut shrink = ShrinkBisimulation::create_default(true, None);

        let options = BuildOptions {
            limits: MergeLimits {
                limit_states: Some(1000),
                min_limit_states: None,
                limit_transitions: None,
            },
            simulation: SimulationOptions {
                intermediate_simulations: true,
                incremental_simulations: true,
                apply_subsumed_transitions_pruning: true,
                ..Default::default()
            },
            ..Default::default()
        };
        ld_sim
            .build_abstraction(Some(&mut merge), Some(&mut shrink), &options, &Budget::unlimited())
            .unwrap();
        ld_sim.compute_final_simulation(&options.simulation, false).unwrap();

        let init = task.initial_state().to_vec();
        assert!(ld_sim.dominates(&init, &init));

        // Every state with a finite heuristic value has a goal distance at least as large.
        let space = StateSpace::new(&task, 1000).unwrap();
        let distances = space.goal_distances();
        for (rank, distance) in distances.iter().enumerate() {
            let state = space.state(rank);
            if let (Some(distance), Some(h)) = (distance, ld_sim.get_cost(&state)) {
                assert!(h <= *distance, "h({state:?}) = {h} exceeds {distance}");
            }
        }
    }

    #[test]
    fn test_prune_dead_ops_marks_unreachable_operators() {
        // The second operator requires a value of `b` that can never be reached.
        let mut builder = ldsim_task::PlanningTaskBuilder::new();
        let a = builder.add_variable("a", 2);
        let b = builder.add_variable("b", 2);
        builder.set_initial_state(vec![0, 0]);
        builder.add_goal(a, 1);
        builder.add_operator("set-a", 1, &[Fact::new(a, 0)], &[Effect::new(a, 1)]);
        builder.add_operator("needs-b", 1, &[Fact::new(a, 0), Fact::new(b, 1)], &[Effect::new(a, 1)]);
        let task = builder.build().unwrap();

        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        ld_sim.init_atomic_abstractions().unwrap();
        ld_sim.prune_dead_ops();
        assert_eq!(ld_sim.dead_operators(), &[false, true]);
    }
}
