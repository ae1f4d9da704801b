use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

/// Breadth first search from the states in the queue, whose distances must already be set.
pub(crate) fn breadth_first_search(graph: &[Vec<usize>], mut queue: VecDeque<usize>, distances: &mut [i32]) {
    while let Some(state) = queue.pop_front() {
        for &successor in &graph[state] {
            if distances[successor] > distances[state] + 1 {
                distances[successor] = distances[state] + 1;
                queue.push_back(successor);
            }
        }
    }
}

/// Dijkstra's algorithm from the states in the queue, whose distances must already be set.
pub(crate) fn dijkstra_search(
    graph: &[Vec<(usize, i32)>],
    mut queue: BinaryHeap<Reverse<(i32, usize)>>,
    distances: &mut [i32],
) {
    while let Some(Reverse((distance, state))) = queue.pop() {
        let state_distance = distances[state];
        debug_assert!(state_distance <= distance);
        if state_distance < distance {
            continue;
        }

        for &(successor, cost) in &graph[state] {
            let successor_cost = state_distance + cost;
            if distances[successor] > successor_cost {
                distances[successor] = successor_cost;
                queue.push(Reverse((successor_cost, successor)));
            }
        }
    }
}
