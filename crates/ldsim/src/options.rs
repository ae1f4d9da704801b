use clap::ValueEnum;
use rand::SeedableRng;
use rand::rngs::StdRng;

use ldsim_abstraction::BisimulationOptions;
use ldsim_abstraction::HighLow;
use ldsim_abstraction::LabelReducerOptions;
use ldsim_abstraction::MergeCriterionType;
use ldsim_abstraction::MergeDfp;
use ldsim_abstraction::MergeLinear;
use ldsim_abstraction::MergeLinearCriteria;
use ldsim_abstraction::MergeOrder;
use ldsim_abstraction::MergeStrategy;
use ldsim_abstraction::ShrinkBisimulation;
use ldsim_abstraction::ShrinkComposite;
use ldsim_abstraction::ShrinkFh;
use ldsim_abstraction::ShrinkOptions;
use ldsim_abstraction::ShrinkOwnLabels;
use ldsim_abstraction::ShrinkStrategy;
use ldsim_abstraction::VariableOrderType;
use ldsim_abstraction::create_criterion;
use ldsim_dominance::LabelDominanceType;
use ldsim_dominance::SimulationType;
use ldsim_utilities::LdsimError;

/// The seed of the random generator owned by the driver.
pub const DEFAULT_SEED: u64 = 2022;

/// Options that are fixed for the lifetime of an [crate::LDSimulation].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LDSimulationOptions {
    pub label_reduction: LabelReducerOptions,
    pub seed: u64,
}

impl Default for LDSimulationOptions {
    fn default() -> Self {
        Self {
            label_reduction: LabelReducerOptions::default(),
            seed: DEFAULT_SEED,
        }
    }
}

/// Which label-dominance simulation is computed and how it is used to
/// simplify the abstractions afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulationOptions {
    pub simulation_type: SimulationType,
    pub label_dominance_type: LabelDominanceType,

    /// Normal label dominance falls back to noop dominance above this number of labels.
    pub switch_off_label_dominance: usize,

    /// Compute simulations after every merge, not only at the end.
    pub intermediate_simulations: bool,
    /// Initialise the simulation of a product from the simulations of its components.
    pub incremental_simulations: bool,

    pub apply_subsumed_transitions_pruning: bool,
    pub apply_label_dominance_reduction: bool,
    pub apply_simulation_shrinking: bool,
    pub preserve_all_optimal_plans: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            simulation_type: SimulationType::Simple,
            label_dominance_type: LabelDominanceType::Normal,
            switch_off_label_dominance: 200,
            intermediate_simulations: false,
            incremental_simulations: false,
            apply_subsumed_transitions_pruning: false,
            apply_label_dominance_reduction: false,
            apply_simulation_shrinking: false,
            preserve_all_optimal_plans: false,
        }
    }
}

impl SimulationOptions {
    pub fn validate(&self) -> Result<(), LdsimError> {
        if self.incremental_simulations && !self.intermediate_simulations {
            return Err(LdsimError::config(
                "incremental simulations require intermediate simulations",
            ));
        }
        Ok(())
    }

    /// The label dominance that is used for a task with the given number of labels.
    pub fn effective_label_dominance(&self, num_labels: usize) -> LabelDominanceType {
        match self.simulation_type {
            SimulationType::None => LabelDominanceType::Identity,
            SimulationType::Simple => {
                if self.label_dominance_type == LabelDominanceType::Normal && num_labels > self.switch_off_label_dominance
                {
                    LabelDominanceType::Noop
                } else {
                    self.label_dominance_type
                }
            }
        }
    }
}

/// The merge strategies that can be selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum MergeStrategyKind {
    #[default]
    Linear,
    LinearCriteria,
    Dfp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeStrategyOptions {
    pub kind: MergeStrategyKind,
    pub variable_order: VariableOrderType,
    pub criteria: Vec<MergeCriterionType>,
    pub order: MergeOrder,
}

impl Default for MergeStrategyOptions {
    fn default() -> Self {
        Self {
            kind: MergeStrategyKind::Linear,
            variable_order: VariableOrderType::CgGoalLevel,
            criteria: vec![MergeCriterionType::Cg, MergeCriterionType::Goal],
            order: MergeOrder::Level,
        }
    }
}

impl MergeStrategyOptions {
    pub fn create(&self) -> Box<dyn MergeStrategy> {
        match self.kind {
            MergeStrategyKind::Linear => Box::new(MergeLinear::new(self.variable_order)),
            MergeStrategyKind::LinearCriteria => Box::new(MergeLinearCriteria::new(
                self.criteria.iter().copied().map(create_criterion).collect(),
                self.order,
            )),
            MergeStrategyKind::Dfp => Box::new(MergeDfp::new()),
        }
    }
}

/// The shrink strategies that can be selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ShrinkStrategyKind {
    #[default]
    Bisimulation,
    Fh,
    OwnLabels,
    /// Own label shrinking followed by bisimulation.
    OwnLabelsBisimulation,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShrinkStrategyOptions {
    pub kind: ShrinkStrategyKind,
    pub max_states: Option<usize>,
    pub max_states_before_merge: Option<usize>,
    pub bisimulation: BisimulationOptions,
    pub shrink_f: HighLow,
    pub shrink_h: HighLow,
}

impl ShrinkStrategyOptions {
    pub fn create(&self, seed: u64) -> Result<Box<dyn ShrinkStrategy>, LdsimError> {
        let options = ShrinkOptions::from_options(self.max_states, self.max_states_before_merge)?;
        Ok(match self.kind {
            ShrinkStrategyKind::Bisimulation => Box::new(ShrinkBisimulation::new(options, self.bisimulation)?),
            ShrinkStrategyKind::Fh => Box::new(ShrinkFh::new(
                options,
                self.shrink_f,
                self.shrink_h,
                StdRng::seed_from_u64(seed),
            )),
            ShrinkStrategyKind::OwnLabels => Box::new(ShrinkOwnLabels::new(options, true, true)),
            ShrinkStrategyKind::OwnLabelsBisimulation => Box::new(ShrinkComposite::create_default(vec![
                Box::new(ShrinkOwnLabels::create_default()),
                Box::new(ShrinkBisimulation::new(options, self.bisimulation)?),
            ])?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_case::test_case;
    use test_log::test;

    #[test]
    fn test_incremental_requires_intermediate() {
        let options = SimulationOptions {
            incremental_simulations: true,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = SimulationOptions {
            incremental_simulations: true,
            intermediate_simulations: true,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test_case(SimulationType::Simple, LabelDominanceType::Normal, 10 => LabelDominanceType::Normal ; "few labels")]
    #[test_case(SimulationType::Simple, LabelDominanceType::Normal, 201 => LabelDominanceType::Noop ; "switch off")]
    #[test_case(SimulationType::Simple, LabelDominanceType::Alternative, 500 => LabelDominanceType::Alternative ; "alternative kept")]
    #[test_case(SimulationType::None, LabelDominanceType::Normal, 10 => LabelDominanceType::Identity ; "no simulation")]
    fn test_effective_label_dominance(
        simulation_type: SimulationType,
        label_dominance_type: LabelDominanceType,
        num_labels: usize,
    ) -> LabelDominanceType {
        SimulationOptions {
            simulation_type,
            label_dominance_type,
            ..Default::default()
        }
        .effective_label_dominance(num_labels)
    }

    #[test]
    fn test_create_strategies() {
        for kind in MergeStrategyKind::value_variants() {
            let options = MergeStrategyOptions {
                kind: *kind,
                ..Default::default()
            };
            assert!(!options.create().name().is_empty());
        }

        for kind in ShrinkStrategyKind::value_variants() {
            let options = ShrinkStrategyOptions {
                kind: *kind,
                max_states: Some(100),
                ..Default::default()
            };
            assert!(options.create(DEFAULT_SEED).is_ok());
        }

        let invalid = ShrinkStrategyOptions {
            max_states: Some(0),
            ..Default::default()
        };
        assert!(invalid.create(DEFAULT_SEED).is_err());
    }
}
