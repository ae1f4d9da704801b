use bitvec::vec::BitVec;
use log::debug;
use log::info;
use log::trace;

use ldsim_abstraction::Abstraction;
use ldsim_abstraction::AbstractionId;
use ldsim_abstraction::INFINITY;
use ldsim_abstraction::Labels;
use ldsim_abstraction::LabelledTransitionSystem;
use ldsim_abstraction::StateMapping;
use ldsim_utilities::LdsimError;

use crate::LabelDominance;

/// A simulation relation on the states of one abstraction, `relation[t][s]`
/// holds iff `t` simulates `s`.
///
/// The relation does not own its abstraction. It keeps the state mapping
/// and the goal distances to answer queries on task states, and it has to
/// be informed through [SimulationRelation::apply_shrinking] whenever the
/// abstraction is shrunk.
#[derive(Clone, Debug)]
pub struct SimulationRelation {
    abstraction: AbstractionId,
    mapping: StateMapping,
    goal_distances: Vec<i32>,

    relation: Vec<BitVec>,
    /// Pairs that are known to be in the relation and are never checked again.
    fixed_relation: Vec<BitVec>,

    dominated_states: Vec<Vec<usize>>,
    dominating_states: Vec<Vec<usize>>,
}

impl SimulationRelation {
    fn with_relation(abs: &mut Abstraction, relation: Vec<BitVec>) -> Self {
        let num_states = relation.len();
        abs.set_track_state_mappings(true);
        abs.take_state_mappings();

        Self {
            abstraction: abs.id(),
            mapping: abs.mapping().clone(),
            goal_distances: abs.get_goal_distances().to_vec(),
            relation,
            fixed_relation: vec![BitVec::repeat(false, num_states); num_states],
            dominated_states: Vec::new(),
            dominating_states: Vec::new(),
        }
    }

    /// The largest relation that respects goal distances: a non goal state
    /// never simulates a goal state or a state closer to the goal.
    pub fn new_goal_respecting(abs: &mut Abstraction) -> Self {
        debug_assert!(
            abs.are_distances_computed(),
            "Distances must have been computed before creating the simulation relation"
        );

        let relation = goal_respecting_relation(abs.goal_states(), abs.get_goal_distances());
        Self::with_relation(abs, relation)
    }

    /// The relation in which every state only simulates itself.
    pub fn new_identity(abs: &mut Abstraction) -> Self {
        let num_states = abs.size();
        let relation = (0..num_states)
            .map(|t| {
                let mut row = BitVec::repeat(false, num_states);
                row.set(t, true);
                row
            })
            .collect();
        Self::with_relation(abs, relation)
    }

    /// Initialises the relation of a product from the relations of its two
    /// components. Pairs that follow from both components are fixed, all
    /// other pairs start goal respecting.
    pub fn new_incremental(abs: &mut Abstraction, sim_one: &SimulationRelation, sim_two: &SimulationRelation) -> Self {
        let mut result = Self::new_goal_respecting(abs);

        let StateMapping::Composite { lookup, .. } = abs.mapping() else {
            debug_assert!(false, "Incremental initialisation requires a product abstraction");
            return result;
        };

        for i in 0..sim_one.num_states() {
            for j in 0..sim_one.num_states() {
                if !sim_one.simulates(i, j) {
                    continue;
                }

                for x in 0..sim_two.num_states() {
                    let Some(ip) = lookup[i][x] else {
                        continue;
                    };

                    for y in 0..sim_two.num_states() {
                        if !sim_two.simulates(x, y) {
                            continue;
                        }

                        match lookup[j][y] {
                            Some(jp) if jp != ip => {
                                debug_assert!(!abs.is_goal_state(jp) || abs.is_goal_state(ip));
                                result.relation[ip].set(jp, true);
                                result.fixed_relation[ip].set(jp, true);
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        result
    }

    pub fn abstraction_id(&self) -> AbstractionId {
        self.abstraction
    }

    pub fn num_states(&self) -> usize {
        self.relation.len()
    }

    /// Returns true iff `t` simulates `s`.
    pub fn simulates(&self, t: usize, s: usize) -> bool {
        self.relation[t][s]
    }

    pub fn fixed_simulates(&self, t: usize, s: usize) -> bool {
        self.fixed_relation[t][s]
    }

    /// Returns true iff both states simulate each other.
    pub fn similar(&self, s: usize, t: usize) -> bool {
        self.relation[s][t] && self.relation[t][s]
    }

    pub fn remove(&mut self, t: usize, s: usize) {
        trace!("Remove {t} simulates {s}");
        self.relation[t].set(s, false);
    }

    /// The abstract state of a task state, None when it is pruned.
    pub fn get_index(&self, state: &[usize]) -> Option<usize> {
        self.mapping.abstract_state(state)
    }

    pub fn pruned(&self, state: &[usize]) -> bool {
        self.get_index(state).is_none()
    }

    /// The goal distance of the abstract state of a task state, None when it is pruned.
    pub fn get_cost(&self, state: &[usize]) -> Option<i32> {
        let index = self.get_index(state)?;
        self.goal_distances.get(index).copied().filter(|&h| h != INFINITY)
    }

    /// Returns true iff the abstract state of `t` simulates the one of `s`,
    /// false when either is pruned.
    pub fn simulates_state(&self, t: &[usize], s: &[usize]) -> bool {
        match (self.get_index(t), self.get_index(s)) {
            (Some(t), Some(s)) => self.simulates(t, s),
            _ => false,
        }
    }

    /// Refines the relation to a fixpoint with respect to the current label
    /// dominance: `t` keeps simulating `s` when every transition `s -l-> s'`
    /// is answered by a transition `t -l'-> t'` with `t'` simulating `s'` and
    /// `l'` dominating `l`, or when `t` simulates `s'` and `l` is dominated by noop.
    pub fn update(&mut self, lts_id: usize, lts: &LabelledTransitionSystem, label_dominance: &dyn LabelDominance) {
        let num_states = lts.size();
        let mut changes = true;
        while changes {
            changes = false;
            for s in 0..num_states {
                for t in 0..num_states {
                    if s == t || !self.simulates(t, s) || self.fixed_simulates(t, s) {
                        continue;
                    }

                    let not_simulated = lts.apply_post_src(s, |trs| {
                        lts.labels_of_group(trs.group).iter().any(|&label| {
                            if self.simulates(t, trs.target) && label_dominance.dominated_by_noop(label, lts_id) {
                                return false;
                            }

                            !lts.apply_post_src(t, |trt| {
                                self.simulates(trt.target, trs.target)
                                    && lts
                                        .labels_of_group(trt.group)
                                        .iter()
                                        .any(|&label_trt| label_dominance.dominates(label_trt, label, lts_id))
                            })
                        })
                    });

                    if not_simulated {
                        self.remove(t, s);
                        changes = true;
                    }
                }
            }
        }
    }

    /// Remaps the relation through one shrink mapping of its abstraction.
    ///
    /// A new state simulates another one when every pair of merged states
    /// did, the fixed pairs are forgotten.
    pub fn apply_shrinking_to_table(&mut self, abstraction_mapping: &[Option<usize>]) {
        let new_states = abstraction_mapping.iter().flatten().map(|&state| state + 1).max().unwrap_or(0);
        debug!("Reducing simulation size from {} to {}", self.relation.len(), new_states);

        let mut new_relation = vec![BitVec::repeat(true, new_states); new_states];
        let mut new_goal_distances = vec![INFINITY; new_states];
        for (i, new_i) in abstraction_mapping.iter().enumerate() {
            let Some(new_i) = *new_i else {
                continue;
            };

            if let Some(&h) = self.goal_distances.get(i) {
                new_goal_distances[new_i] = new_goal_distances[new_i].min(h);
            }

            for (j, new_j) in abstraction_mapping.iter().enumerate() {
                if let Some(new_j) = *new_j {
                    if new_i != new_j && !self.relation[i][j] {
                        new_relation[new_i].set(new_j, false);
                    }
                }
            }
        }

        if !self.goal_distances.is_empty() {
            self.goal_distances = new_goal_distances;
        }
        self.relation = new_relation;
        self.fixed_relation = vec![BitVec::repeat(false, new_states); new_states];
        self.dominated_states.clear();
        self.dominating_states.clear();
    }

    /// Applies the shrink steps that were recorded by the abstraction since
    /// the last call, and takes over its state mapping.
    pub fn apply_shrinking(&mut self, abs: &mut Abstraction) {
        debug_assert_eq!(abs.id(), self.abstraction, "The relation belongs to another abstraction");
        for abstraction_mapping in abs.take_state_mappings() {
            self.apply_shrinking_to_table(&abstraction_mapping);
        }

        self.mapping = abs.mapping().clone();
        if abs.are_distances_computed() {
            self.goal_distances = abs.get_goal_distances().to_vec();
        }
        debug_assert_eq!(self.relation.len(), abs.size(), "The relation is out of sync with its abstraction");
    }

    /// Collapses the states that simulate each other in the abstraction.
    pub fn shrink(&mut self, abs: &mut Abstraction, labels: &mut Labels) -> Result<(), LdsimError> {
        let num_states = self.num_states();
        let mut already_in = vec![false; num_states];
        let mut groups = Vec::new();
        for i in 0..num_states {
            if already_in[i] {
                continue;
            }
            already_in[i] = true;

            let mut group = vec![i];
            for j in (i + 1)..num_states {
                if !already_in[j] && self.similar(i, j) {
                    already_in[j] = true;
                    group.push(j);
                }
            }
            groups.push(group);
        }

        if groups.len() == abs.size() {
            info!("Simulation shrinking did not shrink anything");
            return Ok(());
        }

        info!("Size for applying simulation shrinking: {}; was: {}", groups.len(), abs.size());
        let result = abs.apply_abstraction(&groups);
        abs.normalize(labels);
        self.apply_shrinking(abs);
        result
    }

    /// Keeps the current pairs as fixed and makes every other goal
    /// respecting pair possible again.
    pub fn reset(&mut self, goal_states: &[bool]) {
        let num_states = self.num_states();
        for i in 0..num_states {
            for j in 0..num_states {
                if self.relation[i][j] {
                    self.fixed_relation[i].set(j, true);
                } else if goal_states[i] || !goal_states[j] {
                    self.relation[i].set(j, true);
                }
            }
        }
    }

    /// Gives up on the relation, only the identity is known to be sound.
    pub fn cancel_simulation_computation(&mut self) {
        let num_states = self.num_states();
        for (t, row) in self.relation.iter_mut().enumerate() {
            row.fill(false);
            row.set(t, true);
        }
        self.fixed_relation = vec![BitVec::repeat(false, num_states); num_states];
        self.dominated_states.clear();
        self.dominating_states.clear();
    }

    pub fn compute_list_dominated_states(&mut self) {
        let num_states = self.num_states();
        self.dominated_states = vec![Vec::new(); num_states];
        self.dominating_states = vec![Vec::new(); num_states];
        for s in 0..num_states {
            for t in 0..num_states {
                if self.simulates(t, s) {
                    self.dominated_states[t].push(s);
                    self.dominating_states[s].push(t);
                }
            }
        }
    }

    /// The abstract states simulated by the abstract state of the given state.
    pub fn get_dominated_states(&mut self, state: &[usize]) -> &[usize] {
        if self.dominated_states.is_empty() {
            self.compute_list_dominated_states();
        }
        match self.get_index(state) {
            Some(index) => &self.dominated_states[index],
            None => &[],
        }
    }

    /// The abstract states that simulate the abstract state of the given state.
    pub fn get_dominating_states(&mut self, state: &[usize]) -> &[usize] {
        if self.dominating_states.is_empty() {
            self.compute_list_dominated_states();
        }
        match self.get_index(state) {
            Some(index) => &self.dominating_states[index],
            None => &[],
        }
    }

    /// The labels of every group with a source state from which no
    /// transition of the group leads to a state simulating the source.
    pub fn get_dangerous_labels(&self, lts: &LabelledTransitionSystem) -> Vec<usize> {
        let mut dangerous_labels = Vec::new();
        let num_states = lts.size();
        let mut is_ok = vec![false; num_states];
        let mut is_state_to_check = vec![false; num_states];

        for group in (0..lts.num_label_groups()).map(ldsim_abstraction::LabelGroup::new) {
            is_ok.fill(false);
            is_state_to_check.fill(false);
            let mut states_to_check = Vec::new();

            for t in lts.transitions_label_group(group) {
                if is_ok[t.src] {
                    continue;
                } else if self.simulates(t.target, t.src) {
                    is_ok[t.src] = true;
                } else if !is_state_to_check[t.src] {
                    is_state_to_check[t.src] = true;
                    states_to_check.push(t.src);
                }
            }

            if states_to_check.iter().any(|&s| !is_ok[s]) {
                dangerous_labels.extend_from_slice(lts.labels_of_group(group));
            }
        }

        dangerous_labels
    }

    /// Statistics
    ///
    /// The number of states that are similar to a state with a lower index.
    pub fn num_equivalences(&self) -> usize {
        self.equivalent_to_earlier().iter().filter(|&&counted| counted).count()
    }

    /// The number of pairs in the relation, or when equivalences are ignored
    /// the number of strict simulations between equivalence classes.
    pub fn num_simulations(&self, ignore_equivalences: bool) -> usize {
        let num_states = self.num_states();
        if !ignore_equivalences {
            return self.relation.iter().map(|row| row.count_ones()).sum();
        }

        let counted = self.equivalent_to_earlier();
        let mut result = 0;
        for i in (0..num_states).filter(|&i| !counted[i]) {
            for j in ((i + 1)..num_states).filter(|&j| !counted[j]) {
                if !self.similar(i, j) && (self.simulates(i, j) || self.simulates(j, i)) {
                    result += 1;
                }
            }
        }
        result
    }

    /// The number of equivalence classes of similar states.
    pub fn num_different_states(&self) -> usize {
        self.num_states() - self.num_equivalences()
    }

    /// The probability that two random states are similar.
    pub fn get_percentage_equivalences(&self) -> f64 {
        let num_states = self.num_states();
        if num_states == 0 {
            return 0.0;
        }

        let num_eq = (0..num_states)
            .flat_map(|i| (0..num_states).map(move |j| (i, j)))
            .filter(|&(i, j)| self.similar(i, j))
            .count();
        num_eq as f64 / (num_states * num_states) as f64
    }

    pub fn is_identity(&self) -> bool {
        let num_states = self.num_states();
        (0..num_states).all(|i| ((i + 1)..num_states).all(|j| !self.simulates(i, j) && !self.simulates(j, i)))
    }

    /// Returns true iff some state simulates another state.
    pub fn has_positive_dominance(&self) -> bool {
        self.relation
            .iter()
            .enumerate()
            .any(|(t, row)| row.iter_ones().any(|s| s != t))
    }

    pub fn dump(&self) {
        let num_states = self.num_states();
        for j in 0..num_states {
            for i in 0..num_states {
                if i != j && self.simulates(j, i) {
                    if self.simulates(i, j) {
                        if j < i {
                            trace!("{i} <=> {j}");
                        }
                    } else {
                        trace!("{i} <= {j}");
                    }
                }
            }
        }
    }

    fn equivalent_to_earlier(&self) -> Vec<bool> {
        let num_states = self.num_states();
        let mut counted = vec![false; num_states];
        for i in 0..num_states {
            if !counted[i] {
                for j in (i + 1)..num_states {
                    if self.similar(i, j) {
                        counted[j] = true;
                    }
                }
            }
        }
        counted
    }
}

/// `relation[t][s]` is false when `t` is not a goal state and `s` is a goal
/// state or closer to the goal.
pub(crate) fn goal_respecting_relation(goal_states: &[bool], goal_distances: &[i32]) -> Vec<BitVec> {
    let num_states = goal_states.len();
    (0..num_states)
        .map(|t| {
            let mut row = BitVec::repeat(true, num_states);
            if !goal_states[t] {
                for s in 0..num_states {
                    if goal_states[s] || goal_distances[t] > goal_distances[s] {
                        row.set(s, false);
                    }
                }
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::LabelMap;
    use ldsim_task::random_task;
    use ldsim_task::two_flip_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    use crate::LabelRelationIdentity;

    fn atomic_abstractions(task: &ldsim_task::PlanningTask, labels: &mut Labels) -> Option<Vec<Abstraction>> {
        let mut result = Abstraction::build_atomic_abstractions(task, labels, false);
        for abs in &mut result {
            abs.normalize(labels);
            abs.compute_distances(labels).ok()?;
        }
        Some(result)
    }

    #[test]
    fn test_goal_respecting() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomics = atomic_abstractions(&task, &mut labels).unwrap();

        // State 1 of variable A is the goal, state 0 is not.
        let sim = SimulationRelation::new_goal_respecting(&mut atomics[0]);
        assert!(sim.simulates(1, 0));
        assert!(!sim.simulates(0, 1));
        assert!(sim.simulates(0, 0) && sim.simulates(1, 1));
        assert!(sim.has_positive_dominance());
        assert!(!sim.is_identity());
    }

    #[test]
    fn test_identity_relation() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomics = atomic_abstractions(&task, &mut labels).unwrap();

        let sim = SimulationRelation::new_identity(&mut atomics[1]);
        assert!(sim.is_identity());
        assert_eq!(sim.num_simulations(false), sim.num_states());
        assert_eq!(sim.num_equivalences(), 0);
    }

    #[test]
    fn test_update_is_reflexive_and_monotone() {
        random_test(50, |rng| {
            let task = random_task(rng, 3, 3, 6, 2);
            let mut labels = Labels::new(&task);
            let Some(mut atomics) = atomic_abstractions(&task, &mut labels) else {
                return;
            };
            let label_map = LabelMap::new(&labels);
            let label_dominance = LabelRelationIdentity::new();

            for (lts_id, abs) in atomics.iter_mut().enumerate() {
                let lts = LabelledTransitionSystem::new(abs, &label_map);
                let mut sim = SimulationRelation::new_goal_respecting(abs);
                let before = sim.clone();
                sim.update(lts_id, &lts, &label_dominance);

                for t in 0..sim.num_states() {
                    assert!(sim.simulates(t, t));
                    for s in 0..sim.num_states() {
                        assert!(!sim.simulates(t, s) || before.simulates(t, s));
                    }
                }
            }
        });
    }

    #[test]
    fn test_cancel_gives_identity() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomics = atomic_abstractions(&task, &mut labels).unwrap();

        let mut sim = SimulationRelation::new_goal_respecting(&mut atomics[0]);
        sim.cancel_simulation_computation();
        assert!(sim.is_identity());
    }

    #[test]
    fn test_shrinking_table() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomics = atomic_abstractions(&task, &mut labels).unwrap();

        let mut sim = SimulationRelation::new_goal_respecting(&mut atomics[0]);
        sim.apply_shrinking_to_table(&[Some(0), Some(0)]);
        assert_eq!(sim.num_states(), 1);
        assert!(sim.simulates(0, 0));
    }

    #[test]
    fn test_task_state_queries() {
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut atomics = atomic_abstractions(&task, &mut labels).unwrap();

        let sim = SimulationRelation::new_goal_respecting(&mut atomics[0]);
        assert_eq!(sim.get_cost(&[0, 0]), Some(1));
        assert_eq!(sim.get_cost(&[1, 0]), Some(0));
        assert!(sim.simulates_state(&[1, 0], &[0, 0]));
        assert!(!sim.simulates_state(&[0, 1], &[1, 1]));
    }
}
