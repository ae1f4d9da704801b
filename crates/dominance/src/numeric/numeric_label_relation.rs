use log::debug;
use log::info;

use ldsim_abstraction::LabelGroup;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::Credit;
use crate::DominatesIn;
use crate::NumericSimulationRelation;

/// Where a label occurs in one transition system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LabelPosition {
    Group(LabelGroup),
    Irrelevant,
    /// Relevant, but without transitions. Such a label can never be applied.
    Dead,
}

/// The numeric label relation: `lqrel[lts][g1][g2]` is the credit that is
/// kept when replacing a label of group `g2` by a label of group `g1` in
/// the transition system `lts`, `MINUS_INFINITY` when this is impossible.
///
/// The irrelevant labels of a transition system behave like noop, which is
/// why the relation to noop is stored separately per label group.
#[derive(Clone, Debug)]
pub struct NumericLabelRelation<T> {
    num_labels: usize,
    num_ltss: usize,
    /// The pairwise table `dominates_in` is only kept for fewer labels than this.
    num_labels_to_use_dominates_in: usize,

    dominates_in: Vec<Vec<DominatesIn>>,
    dominates_noop_in: Vec<DominatesIn>,
    dominated_by_noop_in: Vec<DominatesIn>,

    cost_of_label: Vec<T>,
    position_of_label: Vec<Vec<LabelPosition>>,
    irrelevant_labels_lts: Vec<Vec<usize>>,

    lqrel: Vec<Vec<Vec<T>>>,
    simulated_by_irrelevant: Vec<Vec<T>>,
    simulates_irrelevant: Vec<Vec<T>>,
}

impl<T: Credit> NumericLabelRelation<T> {
    pub fn new(num_labels_to_use_dominates_in: usize) -> Self {
        Self {
            num_labels: 0,
            num_ltss: 0,
            num_labels_to_use_dominates_in,
            dominates_in: Vec::new(),
            dominates_noop_in: Vec::new(),
            dominated_by_noop_in: Vec::new(),
            cost_of_label: Vec::new(),
            position_of_label: Vec::new(),
            irrelevant_labels_lts: Vec::new(),
            lqrel: Vec::new(),
            simulated_by_irrelevant: Vec::new(),
            simulates_irrelevant: Vec::new(),
        }
    }

    /// Starts from the relation in which every label simulates every other
    /// label with infinite credit, and refines it once.
    pub fn init(&mut self, ltss: &[LabelledTransitionSystem], sims: &[NumericSimulationRelation<T>], label_map: &LabelMap) {
        self.num_labels = label_map.num_labels();
        self.num_ltss = ltss.len();
        info!("Init numeric label dominance: {} labels {} systems", self.num_labels, self.num_ltss);

        self.cost_of_label = (0..self.num_labels)
            .map(|label| T::epsilon_if_zero(label_map.get_cost(label)))
            .collect();
        self.position_of_label = ltss
            .iter()
            .map(|lts| {
                (0..self.num_labels)
                    .map(|label| match lts.group_of_label(label) {
                        Some(group) => LabelPosition::Group(group),
                        None if lts.is_irrelevant_label(label) => LabelPosition::Irrelevant,
                        None => LabelPosition::Dead,
                    })
                    .collect()
            })
            .collect();
        self.irrelevant_labels_lts = ltss.iter().map(|lts| lts.irrelevant_labels().to_vec()).collect();

        self.simulates_irrelevant = ltss.iter().map(|lts| vec![T::INFINITY; lts.num_label_groups()]).collect();
        self.simulated_by_irrelevant = self.simulates_irrelevant.clone();
        self.lqrel = ltss
            .iter()
            .map(|lts| {
                let num_groups = lts.num_label_groups();
                (0..num_groups)
                    .map(|g1| {
                        let mut row = vec![T::INFINITY; num_groups];
                        row[g1] = T::ZERO;
                        row
                    })
                    .collect()
            })
            .collect();

        self.dominated_by_noop_in = vec![DominatesIn::All; self.num_labels];
        self.dominates_noop_in = vec![DominatesIn::All; self.num_labels];
        self.dominates_in = if self.num_labels < self.num_labels_to_use_dominates_in {
            vec![vec![DominatesIn::All; self.num_labels]; self.num_labels]
        } else {
            Vec::new()
        };

        // A dead label can not replace any other label, nor noop.
        for lts_id in 0..self.num_ltss {
            for label in 0..self.num_labels {
                if self.position_of_label[lts_id][label] != LabelPosition::Dead {
                    continue;
                }

                self.dominates_noop_in[label].exclude(lts_id);
                if !self.dominates_in.is_empty() {
                    for l2 in 0..self.num_labels {
                        if self.position_of_label[lts_id][l2] != LabelPosition::Dead {
                            self.dominates_in[label][l2].exclude(lts_id);
                        }
                    }
                }
            }
        }

        for (i, (lts, sim)) in ltss.iter().zip(sims).enumerate() {
            self.update_lts(i, lts, sim);
        }
    }

    /// Refines the relation with respect to the simulations, returns true iff it changed.
    pub fn update(&mut self, ltss: &[LabelledTransitionSystem], sims: &[NumericSimulationRelation<T>]) -> bool {
        let mut changes = false;
        for (i, (lts, sim)) in ltss.iter().zip(sims).enumerate() {
            changes |= self.update_lts(i, lts, sim);
        }
        changes
    }

    fn update_lts(&mut self, lts_id: usize, lts: &LabelledTransitionSystem, sim: &NumericSimulationRelation<T>) -> bool {
        let mut changes = false;
        let num_groups = lts.num_label_groups();

        for g2 in (0..num_groups).map(LabelGroup::new) {
            let transitions_g2 = lts.transitions_label_group(g2);

            for g1 in (0..num_groups).map(LabelGroup::new) {
                if g1 == g2 || !self.may_simulate(g1, g2, lts_id) {
                    continue;
                }

                let transitions_g1 = lts.transitions_label_group(g1);
                let mut min_value = T::INFINITY;
                for tr in transitions_g2 {
                    let mut max_value = T::MINUS_INFINITY;
                    for tr2 in transitions_g1 {
                        if tr2.src == tr.src && sim.may_simulate(tr2.target, tr.target) {
                            max_value = max_value.max(sim.q_simulates(tr2.target, tr.target));
                            if max_value >= min_value {
                                break;
                            }
                        }
                    }

                    min_value = min_value.min(max_value);
                    if min_value == T::MINUS_INFINITY {
                        break;
                    }
                }

                changes |= self.set_lqrel(g1, g2, lts_id, lts, min_value);
            }

            if self.simulated_by_irrelevant[lts_id][g2.index()] != T::MINUS_INFINITY {
                let min_value = transitions_g2
                    .iter()
                    .map(|tr| sim.q_simulates(tr.src, tr.target))
                    .min()
                    .unwrap_or(T::INFINITY);
                changes |= self.set_simulated_by_irrelevant(g2, lts_id, lts, min_value);
            }

            if self.simulates_irrelevant[lts_id][g2.index()] != T::MINUS_INFINITY {
                // Every state needs a transition of the group that keeps the credit.
                let min_value = (0..lts.size())
                    .map(|s| {
                        transitions_g2
                            .iter()
                            .filter(|tr| tr.src == s)
                            .map(|tr| sim.q_simulates(tr.target, tr.src))
                            .max()
                            .unwrap_or(T::MINUS_INFINITY)
                    })
                    .min()
                    .unwrap_or(T::INFINITY);
                changes |= self.set_simulates_irrelevant(g2, lts_id, lts, min_value);
            }
        }

        changes
    }

    fn get_lqrel_position(&self, pos1: LabelPosition, pos2: LabelPosition, lts: usize) -> T {
        match (pos1, pos2) {
            (LabelPosition::Dead, LabelPosition::Dead) => T::ZERO,
            (LabelPosition::Dead, _) => T::MINUS_INFINITY,
            (_, LabelPosition::Dead) => T::ZERO,
            (LabelPosition::Group(g1), LabelPosition::Group(g2)) => self.lqrel[lts][g1.index()][g2.index()],
            (LabelPosition::Group(g1), LabelPosition::Irrelevant) => self.simulates_irrelevant[lts][g1.index()],
            (LabelPosition::Irrelevant, LabelPosition::Group(g2)) => self.simulated_by_irrelevant[lts][g2.index()],
            (LabelPosition::Irrelevant, LabelPosition::Irrelevant) => T::ZERO,
        }
    }

    /// The credit kept in `lts` when replacing `l2` by `l1`.
    pub fn get_lqrel(&self, l1: usize, l2: usize, lts: usize) -> T {
        if l1 == l2 {
            return T::ZERO;
        }
        self.get_lqrel_position(self.position_of_label[lts][l1], self.position_of_label[lts][l2], lts)
    }

    fn may_simulate(&self, g1: LabelGroup, g2: LabelGroup, lts: usize) -> bool {
        self.lqrel[lts][g1.index()][g2.index()] != T::MINUS_INFINITY
    }

    fn set_lqrel(&mut self, g1: LabelGroup, g2: LabelGroup, lts_id: usize, lts: &LabelledTransitionSystem, value: T) -> bool {
        let entry = &mut self.lqrel[lts_id][g1.index()][g2.index()];
        if value >= *entry {
            return false;
        }

        *entry = value;
        if value == T::MINUS_INFINITY && !self.dominates_in.is_empty() {
            for &l1 in lts.labels_of_group(g1) {
                for &l2 in lts.labels_of_group(g2) {
                    self.dominates_in[l1][l2].exclude(lts_id);
                }
            }
        }
        true
    }

    fn set_simulated_by_irrelevant(
        &mut self,
        group: LabelGroup,
        lts_id: usize,
        lts: &LabelledTransitionSystem,
        value: T,
    ) -> bool {
        let entry = &mut self.simulated_by_irrelevant[lts_id][group.index()];
        if value >= *entry {
            return false;
        }

        *entry = value;
        if value == T::MINUS_INFINITY {
            for &label in lts.labels_of_group(group) {
                self.dominated_by_noop_in[label].exclude(lts_id);
                if !self.dominates_in.is_empty() {
                    for &l1 in &self.irrelevant_labels_lts[lts_id] {
                        self.dominates_in[l1][label].exclude(lts_id);
                    }
                }
            }
        }
        true
    }

    fn set_simulates_irrelevant(
        &mut self,
        group: LabelGroup,
        lts_id: usize,
        lts: &LabelledTransitionSystem,
        value: T,
    ) -> bool {
        let entry = &mut self.simulates_irrelevant[lts_id][group.index()];
        if value >= *entry {
            return false;
        }

        *entry = value;
        if value == T::MINUS_INFINITY {
            for &label in lts.labels_of_group(group) {
                self.dominates_noop_in[label].exclude(lts_id);
                if !self.dominates_in.is_empty() {
                    for &l2 in &self.irrelevant_labels_lts[lts_id] {
                        self.dominates_in[label][l2].exclude(lts_id);
                    }
                }
            }
        }
        true
    }

    fn get_simulated_by_irrelevant(&self, label: usize, lts: usize) -> T {
        match self.position_of_label[lts][label] {
            LabelPosition::Group(group) => self.simulated_by_irrelevant[lts][group.index()],
            _ => T::ZERO,
        }
    }

    fn get_simulates_irrelevant(&self, label: usize, lts: usize) -> T {
        match self.position_of_label[lts][label] {
            LabelPosition::Group(group) => self.simulates_irrelevant[lts][group.index()],
            LabelPosition::Irrelevant => T::ZERO,
            LabelPosition::Dead => T::MINUS_INFINITY,
        }
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Returns true iff noop simulates the label in every transition system except `lts`.
    pub fn simulated_by_noop_in_all_other(&self, label: usize, lts: usize) -> bool {
        self.dominated_by_noop_in[label].in_all_other(lts)
    }

    /// Returns true iff the label simulates noop in every transition system except `lts`.
    pub fn simulates_noop_in_all_other(&self, label: usize, lts: usize) -> bool {
        self.dominates_noop_in[label].in_all_other(lts)
    }

    pub fn dominates_noop_in_all(&self, label: usize) -> bool {
        self.dominates_noop_in[label] == DominatesIn::All
    }

    pub fn get_dominates_noop_in(&self, label: usize) -> DominatesIn {
        self.dominates_noop_in[label]
    }

    pub fn get_dominated_by_noop_in(&self, label: usize) -> DominatesIn {
        self.dominated_by_noop_in[label]
    }

    /// Returns true iff `l1` simulates `l2` in every transition system except `lts`.
    pub fn simulates_in_all_other(&self, l1: usize, l2: usize, lts: usize) -> bool {
        if self.dominates_in.is_empty() {
            return (0..self.num_ltss)
                .filter(|&lts_id| lts_id != lts)
                .all(|lts_id| self.get_lqrel(l1, l2, lts_id) != T::MINUS_INFINITY);
        }

        let result = self.dominates_in[l1][l2].in_all_other(lts);
        debug_assert!(
            !result
                || (0..self.num_ltss)
                    .filter(|&lts_id| lts_id != lts)
                    .all(|lts_id| self.get_lqrel(l1, l2, lts_id) != T::MINUS_INFINITY),
            "The dominates in table is inconsistent for labels {l1} and {l2}"
        );
        result
    }

    fn sum_over_others(&self, lts: usize, value: impl Fn(usize) -> T) -> T {
        (0..self.num_ltss)
            .filter(|&lts_id| lts_id != lts)
            .fold(T::ZERO, |total, lts_id| total.plus(value(lts_id)))
    }

    /// The credit kept when replacing `l2` by `l1` in all transition systems except `lts`.
    pub fn q_dominates_value(&self, l1: usize, l2: usize, lts: usize) -> T {
        if !self.simulates_in_all_other(l1, l2, lts) {
            return T::MINUS_INFINITY;
        }
        self.sum_over_others(lts, |lts_id| self.get_lqrel(l1, l2, lts_id))
    }

    /// The credit kept when applying the label instead of noop, in all transition systems except `lts`.
    pub fn q_dominates_noop(&self, label: usize, lts: usize) -> T {
        if !self.simulates_noop_in_all_other(label, lts) {
            return T::MINUS_INFINITY;
        }
        self.sum_over_others(lts, |lts_id| self.get_simulates_irrelevant(label, lts_id))
    }

    /// The credit kept when not applying the label, in all transition systems except `lts`.
    pub fn q_dominated_by_noop(&self, label: usize, lts: usize) -> T {
        if !self.simulated_by_noop_in_all_other(label, lts) {
            return T::MINUS_INFINITY;
        }
        self.sum_over_others(lts, |lts_id| self.get_simulated_by_irrelevant(label, lts_id))
    }

    pub fn get_label_cost(&self, label: usize) -> T {
        self.cost_of_label[label]
    }

    /// Logs the dominance between the relevant labels of the transition system.
    pub fn dump(&self, lts: &LabelledTransitionSystem, lts_id: usize) {
        let mut count = 0;
        for &l2 in lts.relevant_labels() {
            for &l1 in lts.relevant_labels() {
                if l1 != l2 && self.simulates_in_all_other(l2, l1, lts_id) {
                    debug!("{l2} dominates {l1} with {}", self.q_dominates_value(l2, l1, lts_id));
                    count += 1;
                }
            }

            if self.simulated_by_noop_in_all_other(l2, lts_id) {
                debug!("{l2} is dominated by noop with {}", self.q_dominated_by_noop(l2, lts_id));
                count += 1;
            }
            if self.simulates_noop_in_all_other(l2, lts_id) {
                debug!("{l2} dominates noop with {}", self.q_dominates_noop(l2, lts_id));
                count += 1;
            }
        }
        info!("Label dominance of system {lts_id}: {count} dominating pairs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::Abstraction;
    use ldsim_abstraction::Labels;
    use ldsim_task::PlanningTask;
    use ldsim_task::gripper_task;
    use ldsim_task::random_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    fn init_relation(
        task: &PlanningTask,
        num_labels_to_use_dominates_in: usize,
    ) -> Option<(NumericLabelRelation<i32>, Vec<LabelledTransitionSystem>)> {
        let mut labels = Labels::new(task);
        let mut atomics = Abstraction::build_atomic_abstractions(task, &mut labels, false);
        for abs in &mut atomics {
            abs.normalize(&mut labels);
            abs.compute_distances(&mut labels).ok()?;
        }

        let label_map = LabelMap::new(&labels);
        let ltss: Vec<_> = atomics
            .iter()
            .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
            .collect();
        let sims: Vec<_> = atomics
            .iter()
            .map(|abs| NumericSimulationRelation::new(abs, &labels, 10))
            .collect();

        let mut relation = NumericLabelRelation::new(num_labels_to_use_dominates_in);
        relation.init(&ltss, &sims, &label_map);
        Some((relation, ltss))
    }

    #[test]
    fn test_gripper_noop_dominance() {
        let (relation, _) = init_relation(&gripper_task(2), 0).expect("Gripper is solvable");

        // move-0-1 is a self loop for the ball, noop simulates it there.
        assert!(relation.simulated_by_noop_in_all_other(0, 0));
        assert_eq!(relation.q_dominated_by_noop(0, 0), 0);

        // Every label replaces itself without losing anything.
        for lts in 0..2 {
            for label in 0..relation.num_labels() {
                assert_eq!(relation.get_lqrel(label, label, lts), 0);
                assert!(relation.simulates_in_all_other(label, label, lts));
            }
        }
    }

    #[test]
    fn test_dominates_in_table_agrees() {
        random_test(30, |rng| {
            let task = random_task(rng, 3, 3, 6, 2);
            let Some((with_table, _)) = init_relation(&task, usize::MAX) else {
                return;
            };
            let Some((without_table, ltss)) = init_relation(&task, 0) else {
                return;
            };

            for lts in 0..ltss.len() {
                for l1 in 0..with_table.num_labels() {
                    for l2 in 0..with_table.num_labels() {
                        assert_eq!(
                            with_table.simulates_in_all_other(l1, l2, lts),
                            without_table.simulates_in_all_other(l1, l2, lts)
                        );
                        assert_eq!(
                            with_table.q_dominates_value(l1, l2, lts),
                            without_table.q_dominates_value(l1, l2, lts)
                        );
                    }
                }
            }
        });
    }
}
