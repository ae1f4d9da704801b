use log::debug;
use log::trace;

/// The strongly connected components of a directed graph given by adjacency lists.
///
/// Components are numbered in the order in which Tarjan's algorithm
/// completes them, so every successor of a component has a lower number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SccDecomposition {
    components: Vec<Vec<usize>>,
    component_of: Vec<usize>,
}

impl SccDecomposition {
    pub fn new(graph: &[Vec<usize>]) -> Self {
        let start = std::time::Instant::now();
        let num_nodes = graph.len();

        let mut index = vec![None; num_nodes];
        let mut lowlink = vec![0; num_nodes];
        let mut on_stack = vec![false; num_nodes];
        let mut stack = Vec::new();
        let mut next_index = 0;

        let mut components = Vec::new();
        let mut component_of = vec![0; num_nodes];

        // The explicit call stack holds the node and the position in its adjacency list.
        let mut depth_stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..num_nodes {
            if index[root].is_some() {
                continue;
            }

            depth_stack.push((root, 0));
            while let Some((node, position)) = depth_stack.pop() {
                if position == 0 {
                    index[node] = Some(next_index);
                    lowlink[node] = next_index;
                    next_index += 1;
                    stack.push(node);
                    on_stack[node] = true;
                }

                if let Some(&successor) = graph[node].get(position) {
                    depth_stack.push((node, position + 1));
                    match index[successor] {
                        None => depth_stack.push((successor, 0)),
                        Some(successor_index) => {
                            if on_stack[successor] {
                                lowlink[node] = lowlink[node].min(successor_index);
                            }
                        }
                    }
                    continue;
                }

                // All successors have been visited.
                if Some(lowlink[node]) == index[node] {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack[member] = false;
                        component_of[member] = components.len();
                        component.push(member);
                        if member == node {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }

                if let Some(&(parent, _)) = depth_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[node]);
                }
            }
        }

        trace!("Strongly connected components: {components:?}");
        debug!("Time scc_decomposition: {:.3}s", start.elapsed().as_secs_f64());

        Self {
            components,
            component_of,
        }
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Vec<usize>] {
        &self.components
    }

    pub fn component_of(&self, node: usize) -> usize {
        self.component_of[node]
    }

    /// Returns for every component whether it is reachable from the given
    /// component, the component itself is excluded.
    pub fn descendants(&self, graph: &[Vec<usize>], component: usize) -> Vec<bool> {
        let mut result = vec![false; self.components.len()];
        let mut stack = vec![component];
        while let Some(current) = stack.pop() {
            for &node in &self.components[current] {
                for &successor in &graph[node] {
                    let successor_component = self.component_of[successor];
                    if successor_component != component && !result[successor_component] {
                        result[successor_component] = true;
                        stack.push(successor_component);
                    }
                }
            }
        }
        result
    }

    /// Marks every node that can reach a goal node as goal, and returns the components.
    pub fn propagate_goals(self, graph: &[Vec<usize>], is_goal: &mut [bool]) -> Vec<Vec<usize>> {
        // Successor components are completed first.
        let mut goal_component = vec![false; self.components.len()];
        for (component, members) in self.components.iter().enumerate() {
            let reaches_goal = members.iter().any(|&node| {
                is_goal[node]
                    || graph[node]
                        .iter()
                        .any(|&successor| goal_component[self.component_of[successor]])
            });

            if reaches_goal {
                goal_component[component] = true;
                for &node in members {
                    is_goal[node] = true;
                }
            }
        }

        self.components
    }
}
