use std::collections::BTreeSet;

use log::debug;
use log::warn;

use ldsim_abstraction::EquivalenceRelation;
use ldsim_abstraction::LabelGroup;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::DominatesIn;
use crate::LabelDominance;
use crate::SimulationRelation;
use crate::singleton_label_relation;

/// Where a label occurs in one transition system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LabelPosition {
    Group(LabelGroup),
    /// A self loop in every state.
    Irrelevant,
    /// Relevant, but without transitions.
    Dead,
}

/// A label relation that stores, per transition system, the simulation
/// between label groups instead of one global table over label pairs.
///
/// Dominance of two labels is derived on demand by checking all other
/// transition systems, which makes it cheap to store but expensive to query.
#[derive(Debug, Default)]
pub struct AlternativeLabelRelation {
    num_labels: usize,
    cost_of_label: Vec<i32>,

    position_of_label: Vec<Vec<LabelPosition>>,
    /// `lrel[lts][g1][g2]`: group `g1` simulates group `g2` in `lts`.
    lrel: Vec<Vec<Vec<bool>>>,
    simulates_irrelevant: Vec<Vec<bool>>,
    simulated_by_irrelevant: Vec<Vec<bool>>,
    labels_of_group: Vec<Vec<Vec<usize>>>,

    dominated_by_noop_in: Vec<DominatesIn>,
}

impl AlternativeLabelRelation {
    pub fn new() -> Self {
        Self::default()
    }

    fn simulates_position(&self, pos1: LabelPosition, pos2: LabelPosition, lts: usize) -> bool {
        match (pos1, pos2) {
            (_, LabelPosition::Dead) => true,
            (LabelPosition::Dead, _) => false,
            (LabelPosition::Group(g1), LabelPosition::Group(g2)) => self.lrel[lts][g1.index()][g2.index()],
            (LabelPosition::Group(g1), LabelPosition::Irrelevant) => self.simulates_irrelevant[lts][g1.index()],
            (LabelPosition::Irrelevant, LabelPosition::Group(g2)) => self.simulated_by_irrelevant[lts][g2.index()],
            (LabelPosition::Irrelevant, LabelPosition::Irrelevant) => true,
        }
    }

    /// Returns true iff `l1` simulates `l2` in the transition system `lts` itself.
    pub fn get_simulates(&self, l1: usize, l2: usize, lts: usize) -> bool {
        l1 == l2
            || self.simulates_position(self.position_of_label[lts][l1], self.position_of_label[lts][l2], lts)
    }

    fn set_not_simulated_by_irrelevant(&mut self, group: LabelGroup, lts: usize) -> bool {
        let mut changes = false;
        if self.simulated_by_irrelevant[lts][group.index()] {
            self.simulated_by_irrelevant[lts][group.index()] = false;
            changes = true;
        }

        for &label in &self.labels_of_group[lts][group.index()] {
            changes |= self.dominated_by_noop_in[label].exclude(lts);
        }
        changes
    }

    fn update_lts(&mut self, i: usize, lts: &LabelledTransitionSystem, sim: &SimulationRelation) -> bool {
        let mut changes = false;
        let num_groups = self.lrel[i].len();

        for g2 in (0..num_groups).map(LabelGroup::new) {
            for g1 in (0..num_groups).map(LabelGroup::new) {
                if g1 == g2 || !self.lrel[i][g1.index()][g2.index()] {
                    continue;
                }

                let transitions_g1 = lts.transitions_label_group(g1);
                let simulated = lts.transitions_label_group(g2).iter().all(|tr| {
                    transitions_g1
                        .iter()
                        .any(|tr2| tr2.src == tr.src && sim.simulates(tr2.target, tr.target))
                });

                if !simulated {
                    self.lrel[i][g1.index()][g2.index()] = false;
                    changes = true;
                }
            }

            let transitions = lts.transitions_label_group(g2);
            if self.simulated_by_irrelevant[i][g2.index()] && transitions.iter().any(|tr| !sim.simulates(tr.src, tr.target))
            {
                changes |= self.set_not_simulated_by_irrelevant(g2, i);
            }

            if self.simulates_irrelevant[i][g2.index()]
                && !(0..lts.size()).all(|s| {
                    transitions
                        .iter()
                        .any(|tr| tr.src == s && sim.simulates(tr.target, tr.src))
                })
            {
                self.simulates_irrelevant[i][g2.index()] = false;
                changes = true;
            }
        }

        changes
    }
}

impl LabelDominance for AlternativeLabelRelation {
    fn name(&self) -> &'static str {
        "alternative"
    }

    fn init(&mut self, ltss: &[LabelledTransitionSystem], sims: &[SimulationRelation], label_map: &LabelMap) {
        self.num_labels = label_map.num_labels();
        self.cost_of_label = (0..self.num_labels).map(|label| label_map.get_cost(label)).collect();

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
        self.labels_of_group = ltss
            .iter()
            .map(|lts| {
                (0..lts.num_label_groups())
                    .map(|group| lts.labels_of_group(LabelGroup::new(group)).to_vec())
                    .collect()
            })
            .collect();
        self.lrel = ltss
            .iter()
            .map(|lts| vec![vec![true; lts.num_label_groups()]; lts.num_label_groups()])
            .collect();
        self.simulates_irrelevant = ltss.iter().map(|lts| vec![true; lts.num_label_groups()]).collect();
        self.simulated_by_irrelevant = self.simulates_irrelevant.clone();
        self.dominated_by_noop_in = vec![DominatesIn::All; self.num_labels];

        debug!("Update label dominance: {} labels {} systems", self.num_labels, ltss.len());
        self.update(ltss, sims);
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
        if self.cost_of_label[l2] < self.cost_of_label[l1] {
            return false;
        }

        (0..self.position_of_label.len())
            .filter(|&other| other != lts)
            .all(|other| self.get_simulates(l1, l2, other))
    }

    fn dominated_by_noop(&self, label: usize, lts: usize) -> bool {
        self.dominated_by_noop_in[label].in_all_other(lts)
    }

    fn get_dominated_by_noop_in(&self, label: usize) -> DominatesIn {
        self.dominated_by_noop_in[label]
    }

    fn get_labels_dominated_in_all(&self) -> Vec<usize> {
        warn!("The alternative label relation does not prune labels dominated in all systems");
        Vec::new()
    }

    fn kill_label(&mut self, label: usize) {
        self.dominated_by_noop_in[label] = DominatesIn::Nowhere;
    }

    fn get_equivalent_labels_relation(
        &self,
        label_map: &LabelMap,
        _dangerous_ltss: &mut BTreeSet<usize>,
    ) -> EquivalenceRelation {
        singleton_label_relation(label_map)
    }

    fn propagate_transition_pruning(
        &self,
        _lts_id: usize,
        _lts: &mut LabelledTransitionSystem,
        _sim: &SimulationRelation,
        _src: usize,
        _label: usize,
        _target: usize,
    ) -> bool {
        // Pruning is not supported, every removal is vetoed.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_abstraction::Abstraction;
    use ldsim_abstraction::Labels;
    use ldsim_task::random_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    use crate::LabelRelation;

    #[test]
    fn test_agrees_with_label_relation_after_init() {
        random_test(30, |rng| {
            let task = random_task(rng, 3, 3, 5, 2);
            let mut labels = Labels::new(&task);
            let mut atomics = Abstraction::build_atomic_abstractions(&task, &mut labels, false);
            for abs in &mut atomics {
                abs.normalize(&mut labels);
                if abs.compute_distances(&mut labels).is_err() {
                    return;
                }
            }

            let label_map = LabelMap::new(&labels);
            let ltss: Vec<_> = atomics
                .iter()
                .map(|abs| LabelledTransitionSystem::new(abs, &label_map))
                .collect();
            let sims: Vec<_> = atomics.iter_mut().map(SimulationRelation::new_goal_respecting).collect();

            let mut alternative = AlternativeLabelRelation::new();
            alternative.init(&ltss, &sims, &label_map);
            let mut normal = LabelRelation::new();
            normal.init(&ltss, &sims, &label_map);

            // Both relations are computed from the same simulations.
            for lts in 0..ltss.len() {
                for l1 in 0..label_map.num_labels() {
                    assert_eq!(alternative.dominated_by_noop(l1, lts), normal.dominated_by_noop(l1, lts));
                    for l2 in 0..label_map.num_labels() {
                        if alternative.dominates(l1, l2, lts) {
                            assert!(label_map.get_cost(l1) <= label_map.get_cost(l2));
                        }
                    }
                }
            }
        });
    }
}
