use ldsim_abstraction::Abstraction;
use ldsim_abstraction::MergeLimits;
use ldsim_core::AbsBuilderDefault;
use ldsim_core::AbsBuilderMas;
use ldsim_core::AbstractionBuilder;
use ldsim_core::BuildOptions;
use ldsim_core::DEFAULT_SEED;
use ldsim_core::LDSimulation;
use ldsim_core::LDSimulationOptions;
use ldsim_core::MergeStrategyKind;
use ldsim_core::MergeStrategyOptions;
use ldsim_core::ShrinkStrategyOptions;
use ldsim_core::SimulationOptions;
use ldsim_dominance::Credit;
use ldsim_dominance::NumericDominanceOptions;
use ldsim_task::PlanningTask;
use ldsim_task::StateSpace;
use ldsim_task::random_task;
use ldsim_utilities::Budget;
use ldsim_utilities::LdsimError;
use ldsim_utilities::random_test;

use test_log::test;

/// Returns true when the task has no plan according to its explicit state space.
fn is_unsolvable(space: &StateSpace, task: &PlanningTask) -> bool {
    space.goal_distances()[space.rank(task.initial_state())].is_none()
}

/// Checks that `t` dominating `s` implies `h*(t) <= h*(s)`.
fn check_dominance(space: &StateSpace, ld_sim: &LDSimulation) {
    let distances = space.goal_distances();
    for t in 0..space.num_states() {
        for s in 0..space.num_states() {
            let (state_t, state_s) = (space.state(t), space.state(s));
            if t == s || !ld_sim.dominates(&state_t, &state_s) {
                continue;
            }

            if let Some(h_s) = distances[s] {
                let h_t = distances[t].expect("A state dominating a solvable state is solvable");
                assert!(h_t <= h_s, "{state_t:?} dominates {state_s:?} but {h_t} > {h_s}");
            }
        }
    }
}

fn check_admissible(space: &StateSpace, abstractions: &[Abstraction]) {
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
fn test_random_simulation_soundness() {
    random_test(30, |rng| {
        let task = random_task(rng, 3, 3, 6, 2);
        let Some(space) = StateSpace::new(&task, 100) else {
            return;
        };

        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        let result = ld_sim
            .init_atomic_abstractions()
            .and_then(|()| ld_sim.compute_final_simulation(&SimulationOptions::default(), false));
        match result {
            Ok(()) => check_dominance(&space, &ld_sim),
            Err(LdsimError::Unsolvable) => assert!(is_unsolvable(&space, &task)),
            Err(error) => panic!("Unexpected error {error}"),
        }
    });
}

#[test]
fn test_random_intermediate_simulation_soundness() {
    random_test(30, |rng| {
        let task = random_task(rng, 3, 3, 6, 2);
        let Some(space) = StateSpace::new(&task, 100) else {
            return;
        };

        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        let mut merge = MergeStrategyOptions::default().create();
        let options = BuildOptions {
            limits: MergeLimits {
                limit_states: Some(20),
                ..Default::default()
            },
            simulation: SimulationOptions {
                intermediate_simulations: true,
                incremental_simulations: true,
                preserve_all_optimal_plans: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let result = ld_sim
            .build_abstraction(Some(merge.as_mut()), None, &options, &Budget::unlimited())
            .and_then(|()| ld_sim.compute_final_simulation(&options.simulation, false));
        match result {
            Ok(()) => check_dominance(&space, &ld_sim),
            Err(LdsimError::Unsolvable) => assert!(is_unsolvable(&space, &task)),
            Err(error) => panic!("Unexpected error {error}"),
        }
    });
}

#[test]
fn test_random_numeric_soundness() {
    random_test(30, |rng| {
        let task = random_task(rng, 3, 3, 6, 2);
        let Some(space) = StateSpace::new(&task, 100) else {
            return;
        };

        let mut ld_sim = LDSimulation::new(&task, &LDSimulationOptions::default());
        let result = ld_sim
            .init_atomic_abstractions()
            .and_then(|()| ld_sim.compute_numeric_dominance_relation::<i32>(NumericDominanceOptions::default(), false));
        let relation = match result {
            Ok(relation) => relation,
            Err(LdsimError::Unsolvable) => {
                assert!(is_unsolvable(&space, &task));
                return;
            }
            Err(error) => panic!("Unexpected error {error}"),
        };

        let distances = space.goal_distances();
        for t in 0..space.num_states() {
            for s in 0..space.num_states() {
                let (state_t, state_s) = (space.state(t), space.state(s));
                let value = relation.q_dominates_value(&state_t, &state_s);
                if value == i32::MINUS_INFINITY {
                    continue;
                }

                if let (Some(h_t), Some(h_s)) = (distances[t], distances[s]) {
                    assert!(value <= h_s - h_t, "Credit {value} of {state_t:?} over {state_s:?}");
                }
            }
        }
    });
}

#[test]
fn test_random_builders_admissible() {
    random_test(20, |rng| {
        let task = random_task(rng, 3, 3, 6, 2);
        let Some(space) = StateSpace::new(&task, 100) else {
            return;
        };

        let builders: Vec<Box<dyn AbstractionBuilder>> = vec![
            Box::new(AbsBuilderMas {
                merge_strategy: Some(MergeStrategyOptions {
                    kind: MergeStrategyKind::Dfp,
                    ..Default::default()
                }),
                shrink_strategy: Some(ShrinkStrategyOptions {
                    max_states: Some(10),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Box::new(AbsBuilderDefault::default()),
        ];

        for builder in builders {
            let mut ld_sim = None;
            let mut abstractions = Vec::new();
            match builder.build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions) {
                Ok(()) => check_admissible(&space, &abstractions),
                Err(LdsimError::Unsolvable) => assert!(is_unsolvable(&space, &task)),
                Err(error) => panic!("Unexpected error {error}"),
            }
        }
    });
}

#[test]
fn test_shrink_strategies_admissible() {
    random_test(20, |rng| {
        let task = random_task(rng, 3, 3, 6, 2);
        let Some(space) = StateSpace::new(&task, 100) else {
            return;
        };

        for kind in [
            ldsim_core::ShrinkStrategyKind::Bisimulation,
            ldsim_core::ShrinkStrategyKind::Fh,
            ldsim_core::ShrinkStrategyKind::OwnLabelsBisimulation,
        ] {
            let builder = AbsBuilderMas {
                merge_strategy: Some(MergeStrategyOptions::default()),
                shrink_strategy: Some(ShrinkStrategyOptions {
                    kind,
                    max_states: Some(4),
                    ..Default::default()
                }),
                options: ldsim_core::BuilderOptions {
                    seed: DEFAULT_SEED,
                    ..Default::default()
                },
                ..Default::default()
            };

            let mut ld_sim = None;
            let mut abstractions = Vec::new();
            match builder.build_abstraction(&task, &Budget::unlimited(), &mut ld_sim, &mut abstractions) {
                Ok(()) => check_admissible(&space, &abstractions),
                Err(LdsimError::Unsolvable) => assert!(is_unsolvable(&space, &task)),
                Err(error) => panic!("Unexpected error {error}"),
            }
        }
    });
}
