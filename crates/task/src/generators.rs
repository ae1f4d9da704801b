//! Small planning tasks used by the tests and the command line tool.

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::Effect;
use crate::Fact;
use crate::PlanningTask;
use crate::PlanningTaskBuilder;

/// Two binary variables A and B, both initially zero. One operator flips A,
/// a second operator flips B once A holds. The goal is A=1 and B=1.
pub fn two_flip_task() -> PlanningTask {
    let mut builder = PlanningTaskBuilder::new();
    let a = builder.add_variable("A", 2);
    let b = builder.add_variable("B", 2);
    builder.set_initial_state(vec![0, 0]);
    builder.add_goal(a, 1).add_goal(b, 1);

    builder.add_operator("flip-a", 1, &[Fact::new(a, 0)], &[Effect::new(a, 1)]);
    builder.add_operator("flip-b", 1, &[Fact::new(a, 1), Fact::new(b, 0)], &[Effect::new(b, 1)]);

    builder
        .build()
        .expect("The two flip task is well formed")
}

/// A robot moving between `rooms` rooms in a line, carrying a single ball
/// from the first to the last room. The ball variable has one value per
/// room and one extra value for being held.
pub fn gripper_task(rooms: usize) -> PlanningTask {
    let mut builder = PlanningTaskBuilder::new();
    let robot = builder.add_variable("robot", rooms);
    let ball = builder.add_variable("ball", rooms + 1);
    let held = rooms;
    builder.set_initial_state(vec![0, 0]);
    builder.add_goal(ball, rooms - 1);

    for room in 0..rooms {
        if room + 1 < rooms {
            builder.add_operator(
                &format!("move-{}-{}", room, room + 1),
                1,
                &[Fact::new(robot, room)],
                &[Effect::new(robot, room + 1)],
            );
            builder.add_operator(
                &format!("move-{}-{}", room + 1, room),
                1,
                &[Fact::new(robot, room + 1)],
                &[Effect::new(robot, room)],
            );
        }

        builder.add_operator(
            &format!("pick-{room}"),
            1,
            &[Fact::new(robot, room), Fact::new(ball, room)],
            &[Effect::new(ball, held)],
        );
        builder.add_operator(
            &format!("drop-{room}"),
            1,
            &[Fact::new(robot, room), Fact::new(ball, held)],
            &[Effect::new(ball, room)],
        );
    }

    builder.build().expect("The gripper task is well formed")
}

/// Generates a random task without conditional effects. Operator costs are
/// drawn from `0..=max_cost` so zero cost operators occur as well.
pub fn random_task(
    rng: &mut impl Rng,
    num_variables: usize,
    max_domain_size: usize,
    num_operators: usize,
    max_cost: i32,
) -> PlanningTask {
    let mut builder = PlanningTaskBuilder::new();
    let task_domains: Vec<usize> = (0..num_variables)
        .map(|_| rng.random_range(2..=max_domain_size.max(2)))
        .collect();
    for (var, &domain) in task_domains.iter().enumerate() {
        builder.add_variable(&format!("v{var}"), domain);
    }
    builder.set_initial_state(task_domains.iter().map(|&d| rng.random_range(0..d)).collect());

    let variables: Vec<usize> = (0..num_variables).collect();
    let num_goals = rng.random_range(1..=num_variables);
    let goal_vars: Vec<usize> = variables.choose_multiple(rng, num_goals).copied().collect();
    for var in &goal_vars {
        builder.add_goal(*var, rng.random_range(0..task_domains[*var]));
    }

    for op in 0..num_operators {
        let num_effects = rng.random_range(1..=num_variables.min(2));
        let effect_vars: Vec<usize> = variables.choose_multiple(rng, num_effects).copied().collect();
        let effects: Vec<Effect> = effect_vars
            .iter()
            .map(|&var| Effect::new(var, rng.random_range(0..task_domains[var])))
            .collect();

        let mut preconditions = Vec::new();
        for &var in &variables {
            if rng.random_bool(0.4) {
                preconditions.push(Fact::new(var, rng.random_range(0..task_domains[var])));
            }
        }

        builder.add_operator(&format!("op{op}"), rng.random_range(0..=max_cost), &preconditions, &effects);
    }

    builder.build().expect("Random tasks only use values inside the domains")
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_utilities::random_test;
    use test_log::test;

    use crate::StateSpace;

    #[test]
    fn test_gripper_task() {
        let task = gripper_task(2);
        assert_eq!(task.num_variables(), 2);
        assert_eq!(task.num_operators(), 6);

        let space = StateSpace::new(&task, 100).unwrap();
        let distances = space.goal_distances();
        // pick, move, drop
        assert_eq!(distances[space.rank(task.initial_state())], Some(3));
    }

    #[test]
    fn test_random_task_is_valid() {
        random_test(100, |rng| {
            let task = random_task(rng, 3, 3, 5, 2);
            assert_eq!(task.num_variables(), 3);
            assert_eq!(task.num_operators(), 5);
            assert!(!task.goal().is_empty());
            for var in 0..task.num_variables() {
                assert!(task.initial_state()[var] < task.domain_size(var));
            }
        });
    }
}
