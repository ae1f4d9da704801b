use ldsim_abstraction::MergeLimits;
use ldsim_core::BuildOptions;
use ldsim_core::CompleteOptions;
use ldsim_core::DEFAULT_SEED;
use ldsim_core::LDSimulation;
use ldsim_core::LDSimulationOptions;
use ldsim_core::MergeStrategyOptions;
use ldsim_core::ShrinkStrategyOptions;
use ldsim_core::SimulationOptions;
use ldsim_dominance::NumericDominanceOptions;
use ldsim_task::Effect;
use ldsim_task::Fact;
use ldsim_task::PlanningTask;
use ldsim_task::PlanningTaskBuilder;
use ldsim_task::two_flip_task;
use ldsim_utilities::Budget;
use ldsim_utilities::LdsimError;

use test_log::test;

/// A single variable whose goal value can never be reached.
fn unsolvable_task() -> PlanningTask {
    let mut builder = PlanningTaskBuilder::new();
    let a = builder.add_variable("a", 3);
    builder.set_initial_state(vec![0]);
    builder.add_goal(a, 2);
    builder.add_operator("step", 1, &[Fact::new(a, 0)], &[Effect::new(a, 1)]);
    builder.build().unwrap()
}

#[test]
fn test_two_flip_merge_and_simulation() {
    let task = two_flip_task();
    let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());

    ld_sim.init_atomic_abstractions().unwrap();
    assert_eq!(ld_sim.abstractions().len(), 2);
    for abs in ld_sim.abstractions() {
        assert_eq!(abs.size(), 2);
        assert_eq!(abs.get_goal_distances(), &[1, 0]);
    }

    let mut merge = MergeStrategyOptions::default().create();
    let mut shrink = ShrinkStrategyOptions {
        max_states: Some(4),
        ..Default::default()
    }
    .create(DEFAULT_SEED)
    .unwrap();

    let options = BuildOptions {
        limits: MergeLimits {
            limit_states: Some(4),
            ..Default::default()
        },
        ..Default::default()
    };
    ld_sim
        .build_abstraction(Some(merge.as_mut()), Some(shrink.as_mut()), &options, &Budget::unlimited())
        .unwrap();

    assert_eq!(ld_sim.abstractions().len(), 1);
    assert!(ld_sim.abstractions()[0].size() <= 4);
    assert_eq!(ld_sim.get_cost(&[0, 0]), Some(2));

    ld_sim
        .compute_final_simulation(&SimulationOptions::default(), false)
        .unwrap();
    assert!(ld_sim.dominates(&[0, 0], &[0, 0]));
    assert!(ld_sim.dominates(&[1, 1], &[0, 0]));
    assert!(!ld_sim.dominates(&[0, 0], &[1, 1]));
}

#[test]
fn test_two_flip_complete_heuristic_respects_limit() {
    let task = two_flip_task();
    let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
    ld_sim.init_atomic_abstractions().unwrap();

    let mut merge = MergeStrategyOptions::default().create();
    let mut shrink = ShrinkStrategyOptions {
        max_states: Some(2),
        ..Default::default()
    }
    .create(DEFAULT_SEED)
    .unwrap();

    let mut result = Vec::new();
    ld_sim
        .complete_heuristic(
            Some(merge.as_mut()),
            Some(shrink.as_mut()),
            &CompleteOptions::default(),
            &Budget::unlimited(),
            &mut result,
        )
        .unwrap();

    assert_eq!(result.len(), 1);
    assert!(result[0].size() <= 2);
    assert!(result[0].get_cost(&[0, 0]).is_some_and(|h| h <= 2));

    // The abstractions of the driver are left untouched.
    assert_eq!(ld_sim.abstractions().len(), 2);
}

#[test]
fn test_two_flip_numeric() {
    let task = two_flip_task();
    let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
    ld_sim.init_atomic_abstractions().unwrap();

    let relation = ld_sim
        .compute_numeric_dominance_relation::<i32>(NumericDominanceOptions::default(), false)
        .unwrap();
    assert_eq!(relation.q_dominates_value(&[1, 1], &[0, 0]), 2);
    assert!(relation.dominates(&[1, 1], &[0, 0], 2));
}

#[test]
fn test_unsolvable_task() {
    let task = unsolvable_task();

    let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
    ld_sim.init_atomic_abstractions().unwrap();
    let mut merge = MergeStrategyOptions::default().create();
    let mut shrink = ShrinkStrategyOptions::default().create(DEFAULT_SEED).unwrap();
    let result = ld_sim.build_abstraction(
        Some(merge.as_mut()),
        Some(shrink.as_mut()),
        &BuildOptions::default(),
        &Budget::unlimited(),
    );
    assert_eq!(result, Err(LdsimError::Unsolvable));

    let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
    ld_sim.init_atomic_abstractions().unwrap();
    let result = ld_sim.compute_ld_simulation(&SimulationOptions::default(), false, false);
    assert!(result.is_err_and(|error| error.is_unsolvable()));
}

#[test]
fn test_invalid_simulation_options() {
    let task = two_flip_task();
    let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
    ld_sim.init_atomic_abstractions().unwrap();

    let options = SimulationOptions {
        incremental_simulations: true,
        ..Default::default()
    };
    assert!(matches!(
        ld_sim.compute_final_simulation(&options, false),
        Err(LdsimError::Config(_))
    ));
}
