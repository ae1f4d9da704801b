use std::collections::BTreeSet;

use log::debug;
use log::trace;

use ldsim_abstraction::EquivalenceRelation;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::DominatesIn;
use crate::LabelDominance;
use crate::SimulationRelation;

/// The label dominance relation with a [DominatesIn] entry for every pair
/// of labels.
///
/// Besides the pairwise relation it records for every label and transition
/// system whether the label is simulated by the irrelevant labels (the
/// label never leads to a state that is worse than its source) and whether
/// it simulates them (every state has a transition to a state that is not
/// worse).
#[derive(Debug, Default)]
pub struct LabelRelation {
    num_labels: usize,

    /// `dominates_in[l1][l2]`: the transition systems in which `l1` dominates `l2`.
    dominates_in: Vec<Vec<DominatesIn>>,
    simulates_irrelevant: Vec<Vec<bool>>,
    simulated_by_irrelevant: Vec<Vec<bool>>,
    dominated_by_noop_in: Vec<DominatesIn>,
}

impl LabelRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff `l1` simulates `l2` in the transition system `lts` itself.
    fn simulates(&self, l1: usize, l2: usize, lts: usize) -> bool {
        self.dominates_in[l1][l2].holds_in(lts)
    }

    fn set_not_simulates(&mut self, l1: usize, l2: usize, lts: usize) {
        trace!("Not simulates: {l1} to {l2} in {lts}");
        let changed = self.dominates_in[l1][l2].exclude(lts);
        debug_assert!(changed, "Recomputing a label dominance that was already removed");
    }

    /// Returns true iff the dominance by noop changed.
    fn set_not_simulated_by_irrelevant(&mut self, label: usize, lts: usize) -> bool {
        self.simulated_by_irrelevant[label][lts] = false;
        self.dominated_by_noop_in[label].exclude(lts)
    }

    fn update_lts(&mut self, i: usize, lts: &LabelledTransitionSystem, sim: &SimulationRelation) -> bool {
        let mut changes = false;
        let labels: Vec<usize> = lts.relevant_or_dead_labels().collect();

        for &l2 in &labels {
            for &l1 in &labels {
                if l1 == l2 || !self.simulates(l1, l2, i) {
                    continue;
                }

                // For every transition s -l2-> t there has to be a transition s -l1-> t' with t' simulating t.
                let transitions_l1 = lts.transitions_label(l1);
                let simulated = lts.transitions_label(l2).iter().all(|tr| {
                    transitions_l1
                        .iter()
                        .any(|tr2| tr2.src == tr.src && sim.simulates(tr2.target, tr.target))
                });

                if !simulated {
                    self.set_not_simulates(l1, l2, i);
                    changes = true;
                }
            }

            // Is l2 simulated by the irrelevant labels?
            if self.simulated_by_irrelevant[l2][i]
                && lts
                    .transitions_label(l2)
                    .iter()
                    .any(|tr| !sim.simulates(tr.src, tr.target))
            {
                changes |= self.set_not_simulated_by_irrelevant(l2, i);
                for &l in lts.irrelevant_labels() {
                    if self.simulates(l, l2, i) {
                        self.set_not_simulates(l, l2, i);
                        changes = true;
                    }
                }
            }

            // Does l2 simulate the irrelevant labels?
            if self.simulates_irrelevant[l2][i] {
                let transitions = lts.transitions_label(l2);
                let all_states = (0..lts.size()).all(|s| {
                    transitions
                        .iter()
                        .any(|tr| tr.src == s && sim.simulates(tr.target, tr.src))
                });

                if !all_states {
                    self.simulates_irrelevant[l2][i] = false;
                    for &l in lts.irrelevant_labels() {
                        if self.simulates(l2, l, i) {
                            self.set_not_simulates(l2, l, i);
                            changes = true;
                        }
                    }
                }
            }
        }

        changes
    }

    pub fn get_dominates_in(&self, l1: usize, l2: usize) -> DominatesIn {
        self.dominates_in[l1][l2]
    }

    pub fn get_simulates_irrelevant(&self, label: usize, lts: usize) -> bool {
        self.simulates_irrelevant[label][lts]
    }

    pub fn get_simulated_by_irrelevant(&self, label: usize, lts: usize) -> bool {
        self.simulated_by_irrelevant[label][lts]
    }
}

impl LabelDominance for LabelRelation {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn init(&mut self, ltss: &[LabelledTransitionSystem], sims: &[SimulationRelation], label_map: &LabelMap) {
        self.num_labels = label_map.num_labels();
        let num_ltss = ltss.len();

        self.simulates_irrelevant = vec![vec![true; num_ltss]; self.num_labels];
        self.simulated_by_irrelevant = vec![vec![true; num_ltss]; self.num_labels];
        self.dominated_by_noop_in = vec![DominatesIn::All; self.num_labels];
        self.dominates_in = (0..self.num_labels)
            .map(|l1| {
                (0..self.num_labels)
                    .map(|l2| {
                        if label_map.get_cost(l1) > label_map.get_cost(l2) {
                            DominatesIn::Nowhere
                        } else {
                            DominatesIn::All
                        }
                    })
                    .collect()
            })
            .collect();

        debug!("Update label dominance: {} labels {} systems", self.num_labels, num_ltss);
        for (i, (lts, sim)) in ltss.iter().zip(sims).enumerate() {
            self.update_lts(i, lts, sim);
        }
    }

    fn update(&mut self, ltss: &[LabelledTransitionSystem], sims: &[SimulationRelation]) -> bool {
        let mut changes = false;
        for (i, (lts, sim)) in ltss.iter().zip(sims).enumerate() {
            changes |= self.update_lts(i, lts, sim);
        }
        changes
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn dominates(&self, l1: usize, l2: usize, lts: usize) -> bool {
        self.dominates_in[l1][l2].in_all_other(lts)
    }

    fn dominated_by_noop(&self, label: usize, lts: usize) -> bool {
        self.dominated_by_noop_in[label].in_all_other(lts)
    }

    fn get_dominated_by_noop_in(&self, label: usize) -> DominatesIn {
        self.dominated_by_noop_in[label]
    }

    fn get_labels_dominated_in_all(&self) -> Vec<usize> {
        (0..self.num_labels)
            .filter(|&l| {
                self.dominated_by_noop_in[l] == DominatesIn::All
                    || (0..self.num_labels).any(|l2| {
                        l2 != l
                            && self.dominates_in[l2][l] == DominatesIn::All
                            // Of two equivalent labels only the lower one is dominated.
                            && (l2 > l || self.dominates_in[l][l2] != DominatesIn::All)
                    })
            })
            .collect()
    }

    fn kill_label(&mut self, label: usize) {
        self.dominated_by_noop_in[label] = DominatesIn::Nowhere;
        self.simulates_irrelevant[label].fill(false);
        self.simulated_by_irrelevant[label].fill(false);
        for other in 0..self.num_labels {
            self.dominates_in[other][label] = DominatesIn::Nowhere;
            self.dominates_in[label][other] = DominatesIn::Nowhere;
        }
    }

    fn get_equivalent_labels_relation(
        &self,
        label_map: &LabelMap,
        dangerous_ltss: &mut BTreeSet<usize>,
    ) -> EquivalenceRelation {
        let mut blocks = Vec::new();
        let mut captured_labels: Vec<Option<usize>> = vec![None; self.num_labels];
        // The only transition system in which a label may still be aggregated.
        let mut theta = vec![DominatesIn::All; self.num_labels];

        for l1 in 0..self.num_labels {
            let mut block = Vec::new();
            if captured_labels[l1].is_none() {
                captured_labels[l1] = Some(l1);
                block.push(label_map.get_old_id(l1));
            }

            for l2 in (l1 + 1)..self.num_labels {
                let (d12, d21) = (self.dominates_in[l1][l2], self.dominates_in[l2][l1]);
                if d12 == DominatesIn::Nowhere
                    || d21 == DominatesIn::Nowhere
                    || !(d12 == DominatesIn::All || d21 == DominatesIn::All || d12 == d21)
                {
                    continue;
                }

                let new_theta = if d12 == DominatesIn::All { d21 } else { d12 };
                let compatible = |theta: DominatesIn| theta == DominatesIn::All || theta == new_theta;
                if new_theta == DominatesIn::All || (compatible(theta[l2]) && compatible(theta[l1])) {
                    if new_theta != DominatesIn::All {
                        theta[l1] = new_theta;
                        theta[l2] = new_theta;
                    }

                    if captured_labels[l2].is_none() {
                        trace!("{} equivalent to {}", label_map.get_old_id(l2), label_map.get_old_id(l1));
                        block.push(label_map.get_old_id(l2));
                        captured_labels[l2] = Some(l1);
                    } else {
                        debug_assert_eq!(
                            captured_labels[l2], captured_labels[l1],
                            "Two labels are aggregated but they were already aggregated before"
                        );
                    }
                } else if let DominatesIn::AllBut(lts) = new_theta {
                    trace!("Equivalence of {l1} and {l2} skipped because it is dangerous in {lts}");
                    dangerous_ltss.insert(lts);
                }
            }

            if !block.is_empty() {
                blocks.push(block);
            }
        }

        EquivalenceRelation::new(label_map.num_old_labels(), blocks)
    }

    fn propagate_transition_pruning(
        &self,
        lts_id: usize,
        lts: &mut LabelledTransitionSystem,
        sim: &SimulationRelation,
        src: usize,
        label: usize,
        target: usize,
    ) -> bool {
        let num_states = lts.size();
        let mut tl_bool = vec![false; num_states];
        let mut tlp_bool = vec![false; num_states];
        let mut tl = Vec::new();
        let mut tlp = Vec::new();

        let mut still_simulates_irrelevant = !self.simulates_irrelevant[label][lts_id];

        for tr in lts.transitions_from(src) {
            for &trlabel in lts.labels_of_group(tr.group) {
                if trlabel == label {
                    if tr.target == target {
                        continue;
                    }

                    // Another transition with the same label that simulates noop.
                    if !still_simulates_irrelevant && sim.simulates(tr.target, tr.src) {
                        still_simulates_irrelevant = true;
                    }

                    if !tl_bool[tr.target] {
                        tl.push(tr.target);
                        tl_bool[tr.target] = true;
                    }
                } else if self.simulates(label, trlabel, lts_id) && sim.simulates(target, tr.target) && !tlp_bool[tr.target]
                {
                    tlp.push(tr.target);
                    tlp_bool[tr.target] = true;
                }
            }
        }

        if !still_simulates_irrelevant {
            return false;
        }

        if tlp
            .iter()
            .any(|&t| !tl_bool[t] && !tl.iter().any(|&t2| sim.simulates(t2, t)))
        {
            return false;
        }

        lts.kill_transition(src, label, target);
        true
    }

    fn dump(&self) {
        for l1 in 0..self.num_labels {
            for l2 in 0..self.num_labels {
                let dominates = self.dominates_in[l1][l2];
                if dominates != DominatesIn::Nowhere && self.dominates_in[l2][l1] != dominates {
                    trace!("{l1} dominates {l2} in {dominates:?}");
                }
            }
            trace!("{l1} dominated by noop in {:?}", self.dominated_by_noop_in[l1]);
        }
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

    /// Computes the label relation and the simulations of the atomic
    /// abstractions to a common fixpoint.
    fn fixpoint(task: &PlanningTask) -> Option<(LabelRelation, Vec<SimulationRelation>, Vec<LabelledTransitionSystem>)> {
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
        let mut sims: Vec<_> = atomics.iter_mut().map(SimulationRelation::new_goal_respecting).collect();

        let mut relation = LabelRelation::new();
        relation.init(&ltss, &sims, &label_map);
        loop {
            for (i, sim) in sims.iter_mut().enumerate() {
                sim.update(i, &ltss[i], &relation);
            }
            if !relation.update(&ltss, &sims) {
                break;
            }
        }

        Some((relation, sims, ltss))
    }

    #[test]
    fn test_label_relation_is_reflexive_and_transitive() {
        random_test(30, |rng| {
            let task = random_task(rng, 3, 3, 5, 2);
            let Some((relation, _, ltss)) = fixpoint(&task) else {
                return;
            };

            let num_labels = relation.num_labels();
            for lts in 0..ltss.len() {
                for l1 in 0..num_labels {
                    assert!(relation.dominates(l1, l1, lts));
                    for l2 in 0..num_labels {
                        for l3 in 0..num_labels {
                            if relation.dominates(l1, l2, lts) && relation.dominates(l2, l3, lts) {
                                assert!(
                                    relation.dominates(l1, l3, lts),
                                    "{l1} >= {l2} >= {l3} in all but {lts}, but not {l1} >= {l3}"
                                );
                            }
                        }
                    }
                }
            }
        });
    }

    #[test]
    fn test_dominated_labels_have_higher_cost() {
        random_test(30, |rng| {
            let task = random_task(rng, 3, 3, 5, 3);
            let labels = Labels::new(&task);
            let label_map = LabelMap::new(&labels);
            let Some((relation, _, _)) = fixpoint(&task) else {
                return;
            };

            for l1 in 0..relation.num_labels() {
                for l2 in 0..relation.num_labels() {
                    if relation.get_dominates_in(l1, l2) != DominatesIn::Nowhere {
                        assert!(label_map.get_cost(l1) <= label_map.get_cost(l2));
                    }
                }
            }
        });
    }

    #[test]
    fn test_gripper_label_dominance() {
        let task = gripper_task(2);
        let (relation, _, _) = fixpoint(&task).unwrap();

        // The moves only differ in the robot abstraction, where they lead to different rooms.
        assert_eq!(relation.get_dominates_in(0, 1), DominatesIn::AllBut(0));
        assert_eq!(relation.get_dominates_in(1, 0), DominatesIn::AllBut(0));

        // Dropping the ball in the first room is never useful.
        assert_eq!(relation.get_dominated_by_noop_in(3), DominatesIn::All);
        assert!(relation.get_labels_dominated_in_all().contains(&3));
        assert!(!relation.get_labels_dominated_in_all().contains(&2));
    }

    #[test]
    fn test_kill_label() {
        let task = gripper_task(2);
        let (mut relation, _, _) = fixpoint(&task).unwrap();

        relation.kill_label(0);
        for other in 0..relation.num_labels() {
            assert_eq!(relation.get_dominates_in(0, other), DominatesIn::Nowhere);
            assert_eq!(relation.get_dominates_in(other, 0), DominatesIn::Nowhere);
        }
        assert_eq!(relation.get_dominated_by_noop_in(0), DominatesIn::Nowhere);
    }

    #[test]
    fn test_equivalent_labels_are_blocks() {
        random_test(30, |rng| {
            let task = random_task(rng, 3, 3, 6, 1);
            let labels = Labels::new(&task);
            let label_map = LabelMap::new(&labels);
            let Some((relation, _, _)) = fixpoint(&task) else {
                return;
            };

            let mut dangerous = BTreeSet::new();
            let equivalence = relation.get_equivalent_labels_relation(&label_map, &mut dangerous);
            let mut seen = vec![false; label_map.num_old_labels()];
            for block in equivalence.blocks() {
                for &label in block {
                    assert!(!seen[label], "Label {label} occurs in two blocks");
                    seen[label] = true;
                }
            }
        });
    }
}
