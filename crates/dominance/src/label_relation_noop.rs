use std::collections::BTreeSet;

use log::debug;

use ldsim_abstraction::EquivalenceRelation;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::DominatesIn;
use crate::LabelDominance;
use crate::SimulationRelation;
use crate::singleton_label_relation;

/// A label relation in which a label only dominates itself, but that does
/// compute which labels are dominated by noop.
#[derive(Debug, Default)]
pub struct LabelRelationNoop {
    num_labels: usize,
    simulates_irrelevant: Vec<Vec<bool>>,
    simulated_by_irrelevant: Vec<Vec<bool>>,
    dominated_by_noop_in: Vec<DominatesIn>,
}

impl LabelRelationNoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_lts(&mut self, i: usize, lts: &LabelledTransitionSystem, sim: &SimulationRelation) -> bool {
        let mut changes = false;
        for l2 in lts.relevant_or_dead_labels() {
            let transitions = lts.transitions_label(l2);
            if self.simulated_by_irrelevant[l2][i] && transitions.iter().any(|tr| !sim.simulates(tr.src, tr.target)) {
                self.simulated_by_irrelevant[l2][i] = false;
                changes |= self.dominated_by_noop_in[l2].exclude(i);
            }

            if self.simulates_irrelevant[l2][i]
                && !(0..lts.size()).all(|s| {
                    transitions
                        .iter()
                        .any(|tr| tr.src == s && sim.simulates(tr.target, tr.src))
                })
            {
                self.simulates_irrelevant[l2][i] = false;
            }
        }
        changes
    }
}

impl LabelDominance for LabelRelationNoop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn init(&mut self, ltss: &[LabelledTransitionSystem], sims: &[SimulationRelation], label_map: &LabelMap) {
        self.num_labels = label_map.num_labels();
        self.simulates_irrelevant = vec![vec![true; ltss.len()]; self.num_labels];
        self.simulated_by_irrelevant = vec![vec![true; ltss.len()]; self.num_labels];
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

    fn dominates(&self, l1: usize, l2: usize, _lts: usize) -> bool {
        l1 == l2
    }

    fn dominated_by_noop(&self, label: usize, lts: usize) -> bool {
        self.dominated_by_noop_in[label].in_all_other(lts)
    }

    fn get_dominated_by_noop_in(&self, label: usize) -> DominatesIn {
        self.dominated_by_noop_in[label]
    }

    fn get_labels_dominated_in_all(&self) -> Vec<usize> {
        (0..self.num_labels)
            .filter(|&label| self.dominated_by_noop_in[label] == DominatesIn::All)
            .collect()
    }

    fn kill_label(&mut self, label: usize) {
        self.dominated_by_noop_in[label] = DominatesIn::Nowhere;
        self.simulates_irrelevant[label].fill(false);
        self.simulated_by_irrelevant[label].fill(false);
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
        lts_id: usize,
        lts: &mut LabelledTransitionSystem,
        sim: &SimulationRelation,
        src: usize,
        label: usize,
        target: usize,
    ) -> bool {
        if self.simulates_irrelevant[label][lts_id] {
            // Another transition of the label has to keep simulating noop.
            let found = lts.apply_post_src(src, |tr| {
                tr.target != target
                    && lts.labels_of_group(tr.group).contains(&label)
                    && sim.simulates(tr.target, tr.src)
            });

            if !found {
                return false;
            }
        }

        lts.kill_transition(src, label, target);
        true
    }
}
