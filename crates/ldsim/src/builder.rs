use log::info;
use log::warn;

use ldsim_abstraction::Abstraction;
use ldsim_abstraction::LabelReducerOptions;
use ldsim_abstraction::MergeLimits;
use ldsim_abstraction::MergeStrategy;
use ldsim_abstraction::ShrinkBisimulation;
use ldsim_abstraction::ShrinkComposite;
use ldsim_abstraction::ShrinkOwnLabels;
use ldsim_abstraction::ShrinkStrategy;
use ldsim_abstraction::VariablePartitionGreedy;
use ldsim_dominance::LabelDominanceType;
use ldsim_dominance::SimulationType;
use ldsim_task::PlanningTask;
use ldsim_utilities::Budget;
use ldsim_utilities::LdsimError;

use crate::BuildOptions;
use crate::CompleteOptions;
use crate::DEFAULT_SEED;
use crate::LDSimulation;
use crate::LDSimulationOptions;
use crate::MergeStrategyOptions;
use crate::ShrinkStrategyOptions;
use crate::SimulationOptions;

/// Options shared by all abstraction builders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuilderOptions {
    pub expensive_statistics: bool,
    /// Dump the final simulation relations.
    pub dump: bool,
    pub limit_seconds_total: u64,
    pub limit_memory_kb: usize,
    pub label_reduction: LabelReducerOptions,
    pub seed: u64,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            expensive_statistics: false,
            dump: false,
            limit_seconds_total: 1400,
            limit_memory_kb: 4_000_000,
            label_reduction: LabelReducerOptions::default(),
            seed: DEFAULT_SEED,
        }
    }
}

impl BuilderOptions {
    /// The budget for all builders together, it starts when this is called.
    pub fn budget(&self) -> Budget {
        Budget::new(Some(self.limit_seconds_total as f64), Some(self.limit_memory_kb))
    }

    fn ld_simulation_options(&self) -> LDSimulationOptions {
        LDSimulationOptions {
            label_reduction: self.label_reduction,
            seed: self.seed,
        }
    }

    fn new_ld_simulation<'a>(&self, task: &'a PlanningTask) -> LDSimulation<'a> {
        LDSimulation::new(task, &self.ld_simulation_options())
    }
}

/// A recipe that creates or refines the abstractions of a task.
///
/// The driver is shared between consecutive builders. Builders that produce
/// complete merge-and-shrink heuristics append them to `abstractions`.
pub trait AbstractionBuilder {
    fn name(&self) -> &'static str;

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError>;

    fn dump_options(&self) {
        info!("Abstraction builder: {}", self.name());
    }
}

fn create_merge(options: Option<&MergeStrategyOptions>) -> Option<Box<dyn MergeStrategy>> {
    options.map(MergeStrategyOptions::create)
}

fn create_shrink(
    options: Option<&ShrinkStrategyOptions>,
    seed: u64,
) -> Result<Option<Box<dyn ShrinkStrategy>>, LdsimError> {
    options.map(|options| options.create(seed)).transpose()
}

/// The budget of one iteration, None when no time remains.
fn iteration_budget(budget: &Budget, limit_seconds: u64) -> Option<Budget> {
    let iteration = budget.sub_budget(limit_seconds as f64);
    if iteration.remaining_seconds().is_some_and(|seconds| seconds <= 0.0) {
        None
    } else {
        Some(iteration)
    }
}

/// Initialises the driver with one pattern database per part of a greedy variable partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsBuilderPdb {
    pub options: BuilderOptions,
    /// The maximum number of states of a pattern database.
    pub limit_absstates_merge: usize,
}

impl Default for AbsBuilderPdb {
    fn default() -> Self {
        Self {
            options: BuilderOptions::default(),
            limit_absstates_merge: 10000,
        }
    }
}

impl AbstractionBuilder for AbsBuilderPdb {
    fn name(&self) -> &'static str {
        "builder_pdb"
    }

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        _budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        _abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        if ld_sim.is_some() {
            return Err(LdsimError::config(
                "the pdb builder can only be used to initialize the abstractions",
            ));
        }

        let partition = VariablePartitionGreedy::new(self.limit_absstates_merge).find(task);
        ld_sim
            .insert(self.options.new_ld_simulation(task))
            .init_factored_systems(&partition)
    }
}

/// Initialises the driver with the atomic abstractions, unless it already exists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AbsBuilderAtomic {
    pub options: BuilderOptions,
}

impl AbstractionBuilder for AbsBuilderAtomic {
    fn name(&self) -> &'static str {
        "builder_atomic"
    }

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        _budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        _abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        if ld_sim.is_none() {
            ld_sim
                .insert(self.options.new_ld_simulation(task))
                .init_atomic_abstractions()?;
        }
        Ok(())
    }
}

/// Merges the abstractions of the driver while computing simulations,
/// and optionally computes the final simulation on the result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsBuilderMasSimulation {
    pub options: BuilderOptions,
    pub merge_strategy: Option<MergeStrategyOptions>,
    pub shrink_strategy: Option<ShrinkStrategyOptions>,

    pub limit_merge: usize,
    pub min_limit_merge: usize,
    pub limit_transitions_merge: usize,
    pub original_merge: bool,
    pub forbid_lr: bool,
    pub limit_seconds: u64,

    pub simulation_type: SimulationType,
    pub label_dominance_type: LabelDominanceType,
    pub switch_off_label_dominance: usize,
    pub intermediate_simulations: bool,
    pub incremental_simulations: bool,
    pub compute_final_simulation: bool,

    pub apply_simulation_shrinking: bool,
    pub apply_subsumed_transitions_pruning: bool,
    pub apply_label_dominance_reduction: bool,
    pub prune_dead_operators: bool,
    pub store_original_operators: bool,

    /// Enables subsumed transition pruning, dead operator pruning, storing
    /// original operators and incremental intermediate simulations.
    pub incremental_pruning: bool,
}

impl Default for AbsBuilderMasSimulation {
    fn default() -> Self {
        Self {
            options: BuilderOptions::default(),
            merge_strategy: None,
            shrink_strategy: None,
            limit_merge: 50000,
            min_limit_merge: 0,
            limit_transitions_merge: 50000,
            original_merge: false,
            forbid_lr: false,
            limit_seconds: 300,
            simulation_type: SimulationType::Simple,
            label_dominance_type: LabelDominanceType::Normal,
            switch_off_label_dominance: 200,
            intermediate_simulations: false,
            incremental_simulations: false,
            compute_final_simulation: true,
            apply_simulation_shrinking: false,
            apply_subsumed_transitions_pruning: false,
            apply_label_dominance_reduction: false,
            prune_dead_operators: true,
            store_original_operators: false,
            incremental_pruning: false,
        }
    }
}

impl AbsBuilderMasSimulation {
    /// Returns the options after expanding `incremental_pruning`, or an error
    /// when they contradict each other.
    pub fn effective(&self) -> Result<Self, LdsimError> {
        let mut result = self.clone();
        if result.incremental_pruning {
            result.apply_subsumed_transitions_pruning = true;
            result.prune_dead_operators = true;
            result.store_original_operators = true;
            result.intermediate_simulations = true;
            result.incremental_simulations = true;
        }

        if result.incremental_simulations && !result.intermediate_simulations {
            return Err(LdsimError::config(
                "incremental simulations require intermediate simulations",
            ));
        }

        if result.store_original_operators && !result.prune_dead_operators {
            return Err(LdsimError::config(
                "storing the original operators is only useful when dead operators are pruned",
            ));
        }
        Ok(result)
    }

    fn simulation_options(&self) -> SimulationOptions {
        SimulationOptions {
            simulation_type: self.simulation_type,
            label_dominance_type: self.label_dominance_type,
            switch_off_label_dominance: self.switch_off_label_dominance,
            intermediate_simulations: self.intermediate_simulations,
            incremental_simulations: self.incremental_simulations,
            apply_subsumed_transitions_pruning: self.apply_subsumed_transitions_pruning,
            apply_label_dominance_reduction: self.apply_label_dominance_reduction,
            apply_simulation_shrinking: self.apply_simulation_shrinking,
            preserve_all_optimal_plans: false,
        }
    }
}

impl AbstractionBuilder for AbsBuilderMasSimulation {
    fn name(&self) -> &'static str {
        "builder_massim"
    }

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        _abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        let this = self.effective()?;
        let simulation = this.simulation_options();
        let mut merge = create_merge(this.merge_strategy.as_ref());
        let mut shrink = create_shrink(this.shrink_strategy.as_ref(), this.options.seed)?;

        let ld_sim = ld_sim.get_or_insert_with(|| this.options.new_ld_simulation(task));
        ld_sim.set_store_original_operators(this.store_original_operators);

        let build_options = BuildOptions {
            limits: MergeLimits {
                limit_states: Some(this.limit_merge),
                min_limit_states: Some(this.min_limit_merge),
                limit_transitions: Some(this.limit_transitions_merge),
            },
            original_merge: this.original_merge,
            forbid_lr: this.forbid_lr,
            simulation,
            expensive_statistics: this.options.expensive_statistics,
        };
        let iteration = budget.sub_budget(this.limit_seconds as f64);
        ld_sim.build_abstraction(merge.as_deref_mut(), shrink.as_deref_mut(), &build_options, &iteration)?;

        if this.compute_final_simulation {
            ld_sim.compute_final_simulation(&simulation, this.options.dump)?;
        }

        if this.prune_dead_operators {
            ld_sim.prune_dead_ops();
        }
        Ok(())
    }

    fn dump_options(&self) {
        info!("Abstraction builder: {}", self.name());
        match &self.merge_strategy {
            Some(merge) => info!("Merge strategy: {:?}", merge.kind),
            None => info!("No merging"),
        }
        match &self.shrink_strategy {
            Some(shrink) => info!("Shrink strategy: {:?}", shrink.kind),
            None => info!("No shrinking"),
        }

        if self.options.expensive_statistics {
            warn!("Expensive statistics are enabled, these require a lot of time and memory");
        } else {
            info!("Expensive statistics: disabled");
        }
    }
}

/// Computes complete merge-and-shrink heuristics from the abstractions of the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsBuilderMas {
    pub options: BuilderOptions,
    pub merge_strategy: Option<MergeStrategyOptions>,
    pub shrink_strategy: Option<ShrinkStrategyOptions>,
    pub shrink_after_merge: bool,
    pub limit_seconds: u64,
    pub prune_dead_operators: bool,
    pub store_original_operators: bool,
    /// Start every heuristic from fresh atomic abstractions instead of the abstractions of the driver.
    pub restart: bool,
    pub num_abstractions: usize,
}

impl Default for AbsBuilderMas {
    fn default() -> Self {
        Self {
            options: BuilderOptions::default(),
            merge_strategy: None,
            shrink_strategy: None,
            shrink_after_merge: false,
            limit_seconds: 300,
            prune_dead_operators: true,
            store_original_operators: false,
            restart: false,
            num_abstractions: 1,
        }
    }
}

impl AbstractionBuilder for AbsBuilderMas {
    fn name(&self) -> &'static str {
        "builder_mas"
    }

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        let complete_options = CompleteOptions {
            shrink_after_merge: self.shrink_after_merge,
            prune_dead_operators: self.prune_dead_operators,
            expensive_statistics: self.options.expensive_statistics,
        };

        for _ in 0..self.num_abstractions {
            let Some(iteration) = iteration_budget(budget, self.limit_seconds) else {
                break;
            };
            let mut merge = create_merge(self.merge_strategy.as_ref());
            let mut shrink = create_shrink(self.shrink_strategy.as_ref(), self.options.seed)?;

            if self.restart {
                let mut fresh = self.options.new_ld_simulation(task);
                fresh.set_store_original_operators(self.store_original_operators);
                if let Some(existing) = ld_sim.as_mut() {
                    existing.release_memory();
                    fresh.mark_dead_operators(existing.dead_operators());
                }

                fresh.init_atomic_abstractions()?;
                fresh.complete_heuristic(
                    merge.as_deref_mut(),
                    shrink.as_deref_mut(),
                    &complete_options,
                    &iteration,
                    abstractions,
                )?;

                if let Some(existing) = ld_sim.as_mut() {
                    existing.mark_dead_operators(fresh.dead_operators());
                }
            } else {
                if ld_sim.is_none() {
                    let fresh = ld_sim.insert(self.options.new_ld_simulation(task));
                    fresh.set_store_original_operators(self.store_original_operators);
                    fresh.init_atomic_abstractions()?;
                }
                let Some(ld_sim) = ld_sim.as_mut() else {
                    break;
                };

                ld_sim.set_store_original_operators(self.store_original_operators);
                ld_sim.complete_heuristic(
                    merge.as_deref_mut(),
                    shrink.as_deref_mut(),
                    &complete_options,
                    &iteration,
                    abstractions,
                )?;
            }
        }
        Ok(())
    }
}

/// The default recipe in three phases: incremental simulations without
/// shrinking, incremental simulations with bisimulation shrinking and
/// finally complete merge-and-shrink heuristics.
///
/// When the driver already exists it is left alone and a temporary driver
/// is used, whose optimal plans must then all be preserved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsBuilderDefault {
    pub options: BuilderOptions,
    pub merge_strategy: MergeStrategyOptions,
    pub original_merge: bool,
    pub limit_merge: usize,
    pub min_limit_merge: usize,
    pub limit_transitions_merge: usize,
    /// The size limit of bisimulation in the last phase, zero for exact bisimulation.
    pub limit_shrink: usize,
    pub limit_seconds: u64,
    pub num_abstractions: usize,
    pub switch_off_label_dominance: usize,
}

impl Default for AbsBuilderDefault {
    fn default() -> Self {
        Self {
            options: BuilderOptions::default(),
            merge_strategy: MergeStrategyOptions::default(),
            original_merge: false,
            limit_merge: 100000,
            min_limit_merge: 0,
            limit_transitions_merge: 100000,
            limit_shrink: 100000,
            limit_seconds: 300,
            num_abstractions: 1,
            switch_off_label_dominance: 200,
        }
    }
}

impl AbsBuilderDefault {
    fn simulation_options(&self, preserve_all_optimal_plans: bool) -> SimulationOptions {
        SimulationOptions {
            simulation_type: SimulationType::Simple,
            label_dominance_type: LabelDominanceType::Normal,
            switch_off_label_dominance: self.switch_off_label_dominance,
            intermediate_simulations: true,
            incremental_simulations: true,
            apply_subsumed_transitions_pruning: true,
            apply_label_dominance_reduction: false,
            apply_simulation_shrinking: false,
            preserve_all_optimal_plans,
        }
    }

    fn limits(&self) -> MergeLimits {
        MergeLimits {
            limit_states: Some(self.limit_merge),
            min_limit_states: Some(self.min_limit_merge),
            limit_transitions: Some(self.limit_transitions_merge),
        }
    }
}

impl AbstractionBuilder for AbsBuilderDefault {
    fn name(&self) -> &'static str {
        "builder"
    }

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        let preserve_all_optimal_plans = ld_sim.is_some();
        let mut temporary = None;
        let ld_sim = match ld_sim.as_mut() {
            Some(existing) => {
                existing.release_memory();
                let mut fresh = self.options.new_ld_simulation(task);
                fresh.mark_dead_operators(existing.dead_operators());
                temporary.insert(fresh)
            }
            None => ld_sim.insert(self.options.new_ld_simulation(task)),
        };
        ld_sim.set_store_original_operators(true);

        let simulation = self.simulation_options(preserve_all_optimal_plans);
        let mut merge = self.merge_strategy.create();

        info!(
            "1) Incremental simulations without shrinking or label reduction. Max states: {} transitions: {} Min states: {}",
            self.limit_merge, self.limit_transitions_merge, self.min_limit_merge
        );
        let options = BuildOptions {
            limits: self.limits(),
            original_merge: true,
            forbid_lr: true,
            simulation,
            expensive_statistics: self.options.expensive_statistics,
        };
        let iteration = budget.sub_budget(self.limit_seconds as f64);
        ld_sim.build_abstraction(Some(merge.as_mut()), None, &options, &iteration)?;
        ld_sim.compute_final_simulation(&simulation, false)?;
        ld_sim.prune_dead_ops();

        info!("2) Incremental simulations with shrinking and label reduction");
        let mut bisimulation = ShrinkBisimulation::create_default(true, None);
        let options = BuildOptions {
            original_merge: self.original_merge,
            forbid_lr: false,
            ..options
        };
        let iteration = budget.sub_budget(self.limit_seconds as f64);
        ld_sim.build_abstraction(Some(merge.as_mut()), Some(&mut bisimulation), &options, &iteration)?;
        ld_sim.compute_final_simulation(&simulation, self.options.dump)?;
        ld_sim.prune_dead_ops();

        info!("3) Complete abstractions");
        let limit_shrink = (self.limit_shrink != 0).then_some(self.limit_shrink);
        let mut combined = ShrinkComposite::create_default(vec![
            Box::new(ShrinkOwnLabels::create_default()),
            Box::new(ShrinkBisimulation::create_default(true, limit_shrink)),
        ])?;
        ld_sim.set_store_original_operators(false);

        let complete_options = CompleteOptions {
            shrink_after_merge: false,
            prune_dead_operators: true,
            expensive_statistics: self.options.expensive_statistics,
        };
        for _ in 0..self.num_abstractions {
            let Some(iteration) = iteration_budget(budget, self.limit_seconds) else {
                break;
            };
            ld_sim.complete_heuristic(
                Some(merge.as_mut()),
                Some(&mut combined),
                &complete_options,
                &iteration,
                abstractions,
            )?;
        }
        Ok(())
    }
}

/// Runs several builders one after the other on the same driver.
pub struct AbsBuilderComposite {
    strategies: Vec<Box<dyn AbstractionBuilder>>,
}

impl AbsBuilderComposite {
    pub fn new(strategies: Vec<Box<dyn AbstractionBuilder>>) -> Result<Self, LdsimError> {
        if strategies.is_empty() {
            return Err(LdsimError::config("the composite builder needs at least one strategy"));
        }
        Ok(Self { strategies })
    }
}

impl AbstractionBuilder for AbsBuilderComposite {
    fn name(&self) -> &'static str {
        "builder_composite"
    }

    fn build_abstraction<'a>(
        &self,
        task: &'a PlanningTask,
        budget: &Budget,
        ld_sim: &mut Option<LDSimulation<'a>>,
        abstractions: &mut Vec<Abstraction>,
    ) -> Result<(), LdsimError> {
        for strategy in &self.strategies {
            strategy.build_abstraction(task, budget, ld_sim, abstractions)?;
        }
        Ok(())
    }

    fn dump_options(&self) {
        info!("Abstraction builder: {}", self.name());
        for strategy in &self.strategies {
            strategy.dump_options();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::StateSpace;
    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;

    use crate::MergeStrategyKind;
    use crate::ShrinkStrategyKind;

    use test_log::test;

    /// Checks that the heuristic of the given abstractions never exceeds the optimal cost.
    fn assert_admissible(task: &PlanningTask, abstractions: &[Abstraction]) {
        let space = StateSpace::new(task, 10_000).unwrap();
        for (rank, distance) in space.goal_distances().into_iter().enumerate() {
            let state = space.state(rank);
            for abs in abstractions {
                if let (Some(distance), Some(h)) = (distance, abs.get_cost(&state)) {
                    assert!(h <= distance, "h({state:?}) = {h} exceeds {distance}");
                }
            }
        }
    }

    #[test]
    fn test_atomic_builder_initializes_once() {
        let task = gripper_task(2);
        let mut ld_sim = None;
        let mut abstractions = Vec::new();

        let builder = AbsBuilderAtomic::default();
        builder
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();
        let num_abstractions = ld_sim.as_ref().unwrap().abstractions().len();
        assert_eq!(num_abstractions, task.num_variables());

        builder
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();
        assert_eq!(ld_sim.as_ref().unwrap().abstractions().len(), num_abstractions);
        assert!(abstractions.is_empty());
    }

    #[test]
    fn test_pdb_builder() {
        let task = gripper_task(3);
        let mut ld_sim = None;
        let mut abstractions = Vec::new();

        let builder = AbsBuilderPdb::default();
        builder
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();

        let mut vars: Vec<usize> = ld_sim
            .as_ref()
            .unwrap()
            .abstractions()
            .iter()
            .flat_map(|abs| abs.varset().to_vec())
            .collect();
        vars.sort_unstable();
        assert_eq!(vars, (0..task.num_variables()).collect::<Vec<_>>());

        // The driver exists now.
        assert!(
            builder
                .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
                .is_err()
        );
    }

    #[test]
    fn test_mas_simulation_validation() {
        let builder = AbsBuilderMasSimulation {
            incremental_simulations: true,
            ..Default::default()
        };
        assert!(builder.effective().is_err());

        let builder = AbsBuilderMasSimulation {
            store_original_operators: true,
            prune_dead_operators: false,
            ..Default::default()
        };
        assert!(builder.effective().is_err());

        let builder = AbsBuilderMasSimulation {
            prune_dead_operators: false,
            incremental_pruning: true,
            ..Default::default()
        };
        let effective = builder.effective().unwrap();
        assert!(effective.prune_dead_operators && effective.store_original_operators);
        assert!(effective.intermediate_simulations && effective.incremental_simulations);
    }

    #[test]
    fn test_mas_simulation_builder() {
        let task = gripper_task(2);
        let mut ld_sim = None;
        let mut abstractions = Vec::new();

        let builder = AbsBuilderMasSimulation {
            merge_strategy: Some(MergeStrategyOptions::default()),
            shrink_strategy: Some(ShrinkStrategyOptions {
                kind: ShrinkStrategyKind::Bisimulation,
                max_states: Some(1000),
                ..Default::default()
            }),
            incremental_pruning: true,
            ..Default::default()
        };
        builder
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();

        let ld_sim = ld_sim.unwrap();
        assert!(ld_sim.dominance_relation().is_some());
        let init = task.initial_state();
        assert!(ld_sim.dominates(init, init));
    }

    #[test]
    fn test_mas_builder() {
        let task = two_flip_task();
        let mut ld_sim = None;
        let mut abstractions = Vec::new();

        let builder = AbsBuilderMas {
            merge_strategy: Some(MergeStrategyOptions {
                kind: MergeStrategyKind::Dfp,
                ..Default::default()
            }),
            shrink_strategy: Some(ShrinkStrategyOptions::default()),
            num_abstractions: 2,
            restart: true,
            ..Default::default()
        };
        builder
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();

        assert_eq!(abstractions.len(), 2);
        assert_eq!(abstractions[0].get_cost(task.initial_state()), Some(2));
        assert_admissible(&task, &abstractions);
    }

    #[test]
    fn test_default_builder() {
        let task = gripper_task(2);
        let mut ld_sim = None;
        let mut abstractions = Vec::new();

        AbsBuilderDefault::default()
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();

        assert!(!abstractions.is_empty());
        assert_admissible(&task, &abstractions);

        let ld_sim = ld_sim.unwrap();
        let init = task.initial_state();
        assert!(ld_sim.dominates(init, init));
    }

    #[test]
    fn test_composite_builder() {
        assert!(AbsBuilderComposite::new(Vec::new()).is_err());

        let task = two_flip_task();
        let mut ld_sim = None;
        let mut abstractions = Vec::new();
        let builder = AbsBuilderComposite::new(vec![
            Box::new(AbsBuilderAtomic::default()),
            Box::new(AbsBuilderMas {
                merge_strategy: Some(MergeStrategyOptions::default()),
                ..Default::default()
            }),
        ])
        .unwrap();
        builder.dump_options();
        builder
            .build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions)
            .unwrap();

        assert_eq!(abstractions.len(), 1);
        assert_admissible(&task, &abstractions);
    }
}
