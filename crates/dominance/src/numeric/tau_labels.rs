use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::collections::BinaryHeap;

use log::debug;
use log::info;
use rustc_hash::FxHashMap;

use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::Credit;
use crate::DominatesIn;
use crate::NumericLabelRelation;

/// The transition systems for which a label is a tau label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TauScope {
    /// The label does not change any transition system, it is tau everywhere.
    Everywhere,
    /// The label only changes the given transition system.
    Only(usize),
    Nowhere,
}

/// The labels that can be applied in one transition system without
/// affecting any other transition system, or whose effects on the other
/// systems can be undone at a known cost.
#[derive(Clone, Debug)]
pub struct TauLabels<T> {
    tau_labels: Vec<Vec<usize>>,
    /// Cost that has to be paid on top of the label cost, per transition system.
    extra_cost: Vec<FxHashMap<usize, T>>,
    original_cost: Vec<T>,
    scope: Vec<TauScope>,

    num_tau_labels_for_some: usize,
    num_tau_labels_for_all: usize,
}

impl<T: Credit> TauLabels<T> {
    /// A label is tau for a transition system when it is a self loop in
    /// every state of all other systems, or when it is irrelevant for them
    /// if `self_loops` is false.
    pub fn new(ltss: &[LabelledTransitionSystem], label_map: &LabelMap, self_loops: bool) -> Self {
        let num_labels = label_map.num_labels();
        let mut result = Self {
            tau_labels: vec![Vec::new(); ltss.len()],
            extra_cost: vec![FxHashMap::default(); ltss.len()],
            original_cost: (0..num_labels)
                .map(|label| T::epsilon_if_zero(label_map.get_cost(label)))
                .collect(),
            scope: Vec::with_capacity(num_labels),
            num_tau_labels_for_some: 0,
            num_tau_labels_for_all: 0,
        };

        for label in 0..num_labels {
            let mut scope = TauScope::Everywhere;
            for (lts_id, lts) in ltss.iter().enumerate() {
                let changes_lts = if self_loops {
                    !lts.is_self_loop_everywhere_label(label)
                } else {
                    lts.is_relevant_label(label)
                };

                if changes_lts {
                    if scope == TauScope::Everywhere {
                        scope = TauScope::Only(lts_id);
                    } else {
                        scope = TauScope::Nowhere;
                        break;
                    }
                }
            }

            if let TauScope::Only(lts_id) = scope {
                result.num_tau_labels_for_some += 1;
                result.tau_labels[lts_id].push(label);
            }
            result.scope.push(scope);
        }

        info!(
            "Tau labels: {} / {} labels are tau for some system",
            result.num_tau_labels_for_some, num_labels
        );
        result
    }

    /// Number of tau labels of the given transition system.
    pub fn size(&self, lts_id: usize) -> usize {
        self.tau_labels[lts_id].len()
    }

    pub fn get_tau_labels(&self, lts_id: usize) -> &[usize] {
        &self.tau_labels[lts_id]
    }

    /// The cost of applying the tau label in the given transition system.
    pub fn get_cost(&self, lts_id: usize, label: usize) -> T {
        match self.extra_cost[lts_id].get(&label) {
            Some(&extra) => self.original_cost[label].plus(extra),
            None => self.original_cost[label],
        }
    }

    pub fn num_tau_labels_for_all(&self) -> usize {
        self.num_tau_labels_for_all
    }

    pub fn num_tau_labels_for_some(&self) -> usize {
        self.num_tau_labels_for_some
    }

    fn add_tau_label(&mut self, lts_id: usize, label: usize, extra: T, changed: &mut BTreeSet<usize>) {
        debug_assert!(!self.tau_labels[lts_id].contains(&label), "Label {label} is already tau for {lts_id}");
        self.tau_labels[lts_id].push(label);
        if extra != T::ZERO {
            self.extra_cost[lts_id].insert(label, extra);
        }
        changed.insert(lts_id);
    }

    /// Adds the labels whose effects on other systems can be undone because
    /// those systems are fully invertible with tau labels. Returns the
    /// transition systems that obtained new tau labels.
    pub fn add_recursive_tau_labels(
        &mut self,
        ltss: &[LabelledTransitionSystem],
        tau_distances: &[TauDistances<T>],
    ) -> BTreeSet<usize> {
        debug_assert_eq!(ltss.len(), tau_distances.len());
        let mut changed = BTreeSet::new();

        for label in 0..self.original_cost.len() {
            let mut total_tau_cost = T::ZERO;
            let mut scope = TauScope::Everywhere;
            for (lts_id, lts) in ltss.iter().enumerate() {
                if !lts.is_relevant_label(label) {
                    continue;
                }

                if tau_distances[lts_id].is_fully_invertible() {
                    total_tau_cost = total_tau_cost.plus(tau_distances[lts_id].get_cost_fully_invertible());
                } else if scope == TauScope::Everywhere {
                    scope = TauScope::Only(lts_id);
                } else {
                    scope = TauScope::Nowhere;
                    break;
                }
            }

            let previous = self.scope[label];
            match scope {
                TauScope::Everywhere if previous != TauScope::Everywhere => {
                    for (lts_id, lts) in ltss.iter().enumerate() {
                        if lts.is_relevant_label(label) && previous != TauScope::Only(lts_id) {
                            let extra = total_tau_cost.minus(tau_distances[lts_id].get_cost_fully_invertible());
                            self.add_tau_label(lts_id, label, extra, &mut changed);
                        }
                    }

                    if previous == TauScope::Nowhere {
                        self.num_tau_labels_for_some += 1;
                    }
                    self.num_tau_labels_for_all += 1;
                    self.scope[label] = TauScope::Everywhere;
                }
                TauScope::Only(lts_id) if previous == TauScope::Nowhere => {
                    self.add_tau_label(lts_id, label, total_tau_cost, &mut changed);
                    self.num_tau_labels_for_some += 1;
                    self.scope[label] = scope;
                }
                _ => {}
            }
        }

        debug!(
            "Recursive tau labels: {} for all, {} for some",
            self.num_tau_labels_for_all, self.num_tau_labels_for_some
        );
        changed
    }

    /// Adds the labels that dominate noop in all other transition systems,
    /// paying the credit they may lose in those systems. Returns the
    /// transition systems that obtained new tau labels.
    pub fn add_noop_dominance_tau_labels(&mut self, label_dominance: &NumericLabelRelation<T>) -> BTreeSet<usize> {
        let mut changed = BTreeSet::new();
        let num_ltss = self.tau_labels.len();

        for label in 0..self.original_cost.len() {
            let previous = self.scope[label];
            if previous == TauScope::Everywhere {
                continue;
            }

            let extra_cost = |lts_id: usize| {
                let value = label_dominance.q_dominates_noop(label, lts_id);
                if value < T::ZERO { value.negate() } else { T::ZERO }
            };

            match label_dominance.get_dominates_noop_in(label) {
                DominatesIn::All => {
                    for lts_id in 0..num_ltss {
                        if previous != TauScope::Only(lts_id) {
                            let extra = extra_cost(lts_id);
                            self.add_tau_label(lts_id, label, extra, &mut changed);
                        }
                    }

                    if previous == TauScope::Nowhere {
                        self.num_tau_labels_for_some += 1;
                    }
                    self.num_tau_labels_for_all += 1;
                    self.scope[label] = TauScope::Everywhere;
                }
                DominatesIn::AllBut(lts_id) if previous == TauScope::Nowhere => {
                    let extra = extra_cost(lts_id);
                    self.add_tau_label(lts_id, label, extra, &mut changed);
                    self.num_tau_labels_for_some += 1;
                    self.scope[label] = TauScope::Only(lts_id);
                }
                _ => {}
            }
        }

        debug!(
            "Noop dominance tau labels: {} for all, {} for some",
            self.num_tau_labels_for_all, self.num_tau_labels_for_some
        );
        changed
    }
}

/// Shortest paths using only the tau labels of one transition system.
#[derive(Clone, Debug)]
pub struct TauDistances<T> {
    /// Changes whenever the distances change.
    id: usize,
    num_tau_labels: usize,

    distances_with_tau: Vec<Vec<T>>,
    /// The states reachable with tau labels, including the state itself.
    reachable_with_tau: Vec<Vec<usize>>,
    goal_distances_with_tau: Vec<T>,
    cost_fully_invertible: T,
}

impl<T: Credit> Default for TauDistances<T> {
    fn default() -> Self {
        Self {
            id: 0,
            num_tau_labels: 0,
            distances_with_tau: Vec::new(),
            reachable_with_tau: Vec::new(),
            goal_distances_with_tau: Vec::new(),
            cost_fully_invertible: T::INFINITY,
        }
    }
}

impl<T: Credit> TauDistances<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Recomputes the distances when the number of tau labels changed,
    /// returns true iff the distances changed. With `only_reachability`
    /// every tau transition costs one.
    pub fn precompute(
        &mut self,
        tau_labels: &TauLabels<T>,
        lts: &LabelledTransitionSystem,
        lts_id: usize,
        only_reachability: bool,
    ) -> bool {
        if !self.distances_with_tau.is_empty() && self.num_tau_labels == tau_labels.size(lts_id) {
            return false;
        }

        self.num_tau_labels = tau_labels.size(lts_id);
        let num_states = lts.size();

        let mut tau_graph: Vec<Vec<(usize, T)>> = vec![Vec::new(); num_states];
        for &label in tau_labels.get_tau_labels(lts_id) {
            let cost = if only_reachability {
                T::from_cost(1)
            } else {
                tau_labels.get_cost(lts_id, label)
            };

            for transition in lts.transitions_label(label) {
                if !transition.is_self_loop() {
                    tau_graph[transition.src].push((transition.target, cost));
                }
            }
        }

        let mut distances_with_tau = Vec::with_capacity(num_states);
        let mut reachable_with_tau = Vec::with_capacity(num_states);
        for s in 0..num_states {
            let (distances, reachable) = dijkstra_search_epsilon(&tau_graph, &[s]);
            distances_with_tau.push(distances);
            reachable_with_tau.push(reachable);
        }

        self.goal_distances_with_tau = (0..num_states)
            .map(|s| {
                (0..num_states)
                    .filter(|&t| lts.is_goal(t))
                    .map(|t| distances_with_tau[s][t])
                    .min()
                    .unwrap_or(T::INFINITY)
            })
            .collect();

        self.cost_fully_invertible = T::ZERO;
        for s in 0..num_states {
            if reachable_with_tau[s].len() < num_states {
                self.cost_fully_invertible = T::INFINITY;
                break;
            }

            for sp in 0..num_states {
                let round_trip = distances_with_tau[s][sp].plus(distances_with_tau[sp][s]);
                self.cost_fully_invertible = self.cost_fully_invertible.max(round_trip);
            }
        }

        if self.cost_fully_invertible != T::INFINITY {
            debug!("System {lts_id} is fully invertible with cost {}", self.cost_fully_invertible);
        }

        self.reachable_with_tau = reachable_with_tau;
        if self.distances_with_tau != distances_with_tau {
            self.distances_with_tau = distances_with_tau;
            self.id += 1;
            true
        } else {
            false
        }
    }

    pub fn shortest_path(&self, from: usize, to: usize) -> T {
        self.distances_with_tau[from][to]
    }

    /// The negated tau distance, which is the credit that `from` surely has over `to`.
    pub fn minus_shortest_path(&self, from: usize, to: usize) -> T {
        self.distances_with_tau[from][to].negate()
    }

    pub fn states_reachable_from(&self, state: usize) -> &[usize] {
        &self.reachable_with_tau[state]
    }

    pub fn get_goal_distance(&self, state: usize) -> T {
        self.goal_distances_with_tau[state]
    }

    /// Returns true iff every state can reach every other state with tau labels.
    pub fn is_fully_invertible(&self) -> bool {
        self.cost_fully_invertible != T::INFINITY
    }

    /// An upper bound on the cost of reaching any state from any other state with tau labels.
    pub fn get_cost_fully_invertible(&self) -> T {
        self.cost_fully_invertible.round_up()
    }
}

/// Dijkstra's algorithm from the given states, returns the distances and the reached states in order.
pub(crate) fn dijkstra_search_epsilon<T: Credit>(
    graph: &[Vec<(usize, T)>],
    initial_states: &[usize],
) -> (Vec<T>, Vec<usize>) {
    let mut distances = vec![T::INFINITY; graph.len()];
    let mut reachable = Vec::new();
    let mut closed = vec![false; graph.len()];

    let mut queue = BinaryHeap::new();
    for &state in initial_states {
        distances[state] = T::ZERO;
        queue.push(Reverse((T::ZERO, state)));
    }

    while let Some(Reverse((distance, state))) = queue.pop() {
        if closed[state] || distances[state] < distance {
            continue;
        }
        closed[state] = true;
        reachable.push(state);

        for &(successor, cost) in &graph[state] {
            let successor_cost = distance.plus(cost);
            if distances[successor] > successor_cost {
                distances[successor] = successor_cost;
                queue.push(Reverse((successor_cost, successor)));
            }
        }
    }

    (distances, reachable)
}

/// Options for the tau labels of the numeric dominance relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TauLabelOptions {
    /// Labels that are a self loop in every state are tau labels, not only irrelevant labels.
    pub self_loops: bool,
    /// Labels whose effects can be undone in fully invertible systems are tau labels.
    pub recursive: bool,
    /// Labels that dominate noop are tau labels.
    pub noop_dominance: bool,
    /// Every tau transition costs one instead of the label cost.
    pub only_reachability: bool,
}

impl Default for TauLabelOptions {
    fn default() -> Self {
        Self {
            self_loops: true,
            recursive: true,
            noop_dominance: false,
            only_reachability: false,
        }
    }
}

/// Computes the tau labels and tau distances of all transition systems.
#[derive(Clone, Debug)]
pub struct TauLabelManager<T> {
    options: TauLabelOptions,
    tau_labels: Option<TauLabels<T>>,
    tau_distances: Vec<TauDistances<T>>,
}

impl<T: Credit> TauLabelManager<T> {
    pub fn new(options: TauLabelOptions) -> Self {
        Self {
            options,
            tau_labels: None,
            tau_distances: Vec::new(),
        }
    }

    pub fn options(&self) -> &TauLabelOptions {
        &self.options
    }

    pub fn initialize(&mut self, ltss: &[LabelledTransitionSystem], label_map: &LabelMap) {
        let mut tau_labels = TauLabels::new(ltss, label_map, self.options.self_loops);
        self.tau_distances = ltss
            .iter()
            .enumerate()
            .map(|(lts_id, lts)| {
                let mut distances = TauDistances::default();
                distances.precompute(&tau_labels, lts, lts_id, self.options.only_reachability);
                distances
            })
            .collect();

        if self.options.recursive {
            self.add_recursive_tau_labels(ltss, &mut tau_labels);
        }
        self.tau_labels = Some(tau_labels);
    }

    /// Adds recursive tau labels until no more are found, returns true iff any distance changed.
    fn add_recursive_tau_labels(&mut self, ltss: &[LabelledTransitionSystem], tau_labels: &mut TauLabels<T>) -> bool {
        let mut some_changes = false;
        let mut changes = true;
        while changes {
            changes = false;
            for lts_id in tau_labels.add_recursive_tau_labels(ltss, &self.tau_distances) {
                changes |= self.tau_distances[lts_id].precompute(tau_labels, &ltss[lts_id], lts_id, false);
            }
            some_changes |= changes;
        }
        some_changes
    }

    /// Adds the labels that dominate noop as tau labels, returns true iff
    /// any tau distance changed and the simulations must be recomputed.
    pub fn add_noop_dominance_tau_labels(
        &mut self,
        ltss: &[LabelledTransitionSystem],
        label_dominance: &NumericLabelRelation<T>,
    ) -> bool {
        if !self.options.noop_dominance {
            return false;
        }

        let Some(mut tau_labels) = self.tau_labels.take() else {
            return false;
        };

        let only_reachability = self.options.only_reachability && !self.options.recursive;
        let mut some_changes = false;
        for lts_id in tau_labels.add_noop_dominance_tau_labels(label_dominance) {
            some_changes |= self.tau_distances[lts_id].precompute(&tau_labels, &ltss[lts_id], lts_id, only_reachability);
        }

        if self.options.recursive {
            some_changes |= self.add_recursive_tau_labels(ltss, &mut tau_labels);
        }

        self.tau_labels = Some(tau_labels);
        some_changes
    }

    pub fn get_tau_distances(&self, lts_id: usize) -> &TauDistances<T> {
        &self.tau_distances[lts_id]
    }

    pub fn tau_labels(&self) -> Option<&TauLabels<T>> {
        self.tau_labels.as_ref()
    }

    pub fn dump_options(&self) {
        info!(
            "Tau labels self loops: {} recursive: {} noop: {}",
            self.options.self_loops, self.options.recursive, self.options.noop_dominance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::Abstraction;
    use ldsim_abstraction::Labels;
    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;
    use test_log::test;

    fn ltss_of(task: &ldsim_task::PlanningTask) -> (Vec<LabelledTransitionSystem>, LabelMap) {
        let mut labels = Labels::new(task);
        let mut atomics = Abstraction::build_atomic_abstractions(task, &mut labels, false);
        for abs in &mut atomics {
            abs.normalize(&mut labels);
        }

        let label_map = LabelMap::new(&labels);
        let ltss = atomics
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();
        (ltss, label_map)
    }

    #[test]
    fn test_tau_labels_two_flip() {
        let (ltss, label_map) = ltss_of(&two_flip_task());
        let tau_labels = TauLabels::<i32>::new(&ltss, &label_map, true);

        // flip-a only changes A, flip-b reads A and changes B.
        assert_eq!(tau_labels.get_tau_labels(0), &[0]);
        assert!(tau_labels.get_tau_labels(1).is_empty());
        assert_eq!(tau_labels.num_tau_labels_for_some(), 1);
        assert_eq!(tau_labels.get_cost(0, 0), label_map.get_cost(0));
    }

    #[test]
    fn test_tau_distances_gripper() {
        let (ltss, label_map) = ltss_of(&gripper_task(3));
        let mut manager = TauLabelManager::<i32>::new(TauLabelOptions::default());
        manager.initialize(&ltss, &label_map);

        // Moving the robot does not affect the ball, so the robot can reach every room.
        let robot = manager.get_tau_distances(0);
        assert!(robot.is_fully_invertible());
        assert_eq!(robot.states_reachable_from(0).len(), ltss[0].size());
        assert_eq!(robot.shortest_path(0, 0), 0);
        assert!(robot.shortest_path(0, 2) > robot.shortest_path(0, 1));
        assert_eq!(robot.minus_shortest_path(0, 1), -robot.shortest_path(0, 1));

        // Picking and dropping need the robot, which can always be moved back.
        let ball = manager.get_tau_distances(1);
        assert!(ball.is_fully_invertible());
        let held = 3;
        assert!(ball.shortest_path(0, held) > robot.get_cost_fully_invertible());
        for s in 0..ltss[1].size() {
            assert_eq!(ball.states_reachable_from(s)[0], s);
        }
    }

    #[test]
    fn test_dijkstra_epsilon() {
        let eps = crate::IntEpsilon::EPSILON;
        let one = crate::IntEpsilon::from(1);
        let graph = vec![vec![(1, eps), (2, one)], vec![(2, eps)], vec![]];
        let (distances, reachable) = dijkstra_search_epsilon(&graph, &[0]);

        assert_eq!(reachable, vec![0, 1, 2]);
        assert_eq!(distances[2], eps + eps);
        assert!(distances[2] < one);
    }
}
