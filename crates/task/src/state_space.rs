use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::PlanningTask;

/// The explicit state space of a small task, every assignment of the
/// variables is a state regardless of reachability.
///
/// This is only feasible for toy tasks and serves as ground truth for the
/// abstraction and dominance computations.
pub struct StateSpace<'a> {
    task: &'a PlanningTask,
    num_states: usize,
}

impl<'a> StateSpace<'a> {
    /// Returns `None` when the task has more than `limit` states.
    pub fn new(task: &'a PlanningTask, limit: usize) -> Option<Self> {
        let mut num_states: usize = 1;
        for var in 0..task.num_variables() {
            num_states = num_states.checked_mul(task.domain_size(var))?;
            if num_states > limit {
                return None;
            }
        }

        Some(Self { task, num_states })
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Mixed radix ranking where the last variable is the least significant digit.
    pub fn rank(&self, state: &[usize]) -> usize {
        state
            .iter()
            .enumerate()
            .fold(0, |rank, (var, value)| rank * self.task.domain_size(var) + value)
    }

    pub fn state(&self, mut rank: usize) -> Vec<usize> {
        let mut state = vec![0; self.task.num_variables()];
        for var in (0..self.task.num_variables()).rev() {
            let domain = self.task.domain_size(var);
            state[var] = rank % domain;
            rank /= domain;
        }
        state
    }

    /// Returns the optimal cost to reach a goal from every state, `None` when no goal is reachable.
    pub fn goal_distances(&self) -> Vec<Option<i32>> {
        let mut predecessors: Vec<Vec<(usize, i32)>> = vec![Vec::new(); self.num_states];
        for rank in 0..self.num_states {
            let state = self.state(rank);
            for (op_id, op) in self.task.operators().iter().enumerate() {
                if op.is_applicable(&state) {
                    let target = self.rank(&op.apply(&state));
                    predecessors[target].push((rank, self.task.adjusted_cost(op_id)));
                }
            }
        }

        let mut distances: Vec<Option<i32>> = vec![None; self.num_states];
        let mut queue = BinaryHeap::new();
        for rank in 0..self.num_states {
            if self.task.is_goal(&self.state(rank)) {
                distances[rank] = Some(0);
                queue.push(Reverse((0, rank)));
            }
        }

        while let Some(Reverse((distance, rank))) = queue.pop() {
            if distances[rank].is_some_and(|d| d < distance) {
                continue;
            }

            for &(pred, cost) in &predecessors[rank] {
                let new_distance = distance + cost;
                if distances[pred].is_none_or(|d| new_distance < d) {
                    distances[pred] = Some(new_distance);
                    queue.push(Reverse((new_distance, pred)));
                }
            }
        }

        distances
    }

    /// Returns the states reachable from the initial state.
    pub fn reachable(&self) -> Vec<bool> {
        let mut reached = vec![false; self.num_states];
        let init = self.rank(self.task.initial_state());
        reached[init] = true;
        let mut stack = vec![init];

        while let Some(rank) = stack.pop() {
            let state = self.state(rank);
            for op in self.task.operators() {
                if op.is_applicable(&state) {
                    let target = self.rank(&op.apply(&state));
                    if !reached[target] {
                        reached[target] = true;
                        stack.push(target);
                    }
                }
            }
        }

        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::two_flip_task;

    #[test]
    fn test_two_flip_distances() {
        let task = two_flip_task();
        let space = StateSpace::new(&task, 100).unwrap();
        assert_eq!(space.num_states(), 4);

        let distances = space.goal_distances();
        assert_eq!(distances[space.rank(&[0, 0])], Some(2));
        assert_eq!(distances[space.rank(&[1, 0])], Some(1));
        assert_eq!(distances[space.rank(&[1, 1])], Some(0));
        // B can only be flipped after A, and A never flips back.
        assert_eq!(distances[space.rank(&[0, 1])], Some(1));

        for rank in 0..space.num_states() {
            assert_eq!(space.rank(&space.state(rank)), rank);
        }
    }
}
