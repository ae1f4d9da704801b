use std::collections::BTreeSet;

use ldsim_abstraction::EquivalenceRelation;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::DominatesIn;
use crate::LabelDominance;
use crate::SimulationRelation;
use crate::singleton_label_relation;

/// The label relation in which every label only dominates itself. With it
/// the simulations are plain (goal respecting) simulations.
#[derive(Debug, Default)]
pub struct LabelRelationIdentity {
    num_labels: usize,
}

impl LabelRelationIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelDominance for LabelRelationIdentity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn init(&mut self, _ltss: &[LabelledTransitionSystem], _sims: &[SimulationRelation], label_map: &LabelMap) {
        self.num_labels = label_map.num_labels();
    }

    fn update(&mut self, _ltss: &[LabelledTransitionSystem], _sims: &[SimulationRelation]) -> bool {
        false
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn dominates(&self, l1: usize, l2: usize, _lts: usize) -> bool {
        l1 == l2
    }

    fn dominated_by_noop(&self, _label: usize, _lts: usize) -> bool {
        false
    }

    fn get_dominated_by_noop_in(&self, _label: usize) -> DominatesIn {
        DominatesIn::Nowhere
    }

    fn get_labels_dominated_in_all(&self) -> Vec<usize> {
        Vec::new()
    }

    fn kill_label(&mut self, _label: usize) {}

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
        lts: &mut LabelledTransitionSystem,
        _sim: &SimulationRelation,
        src: usize,
        label: usize,
        target: usize,
    ) -> bool {
        lts.kill_transition(src, label, target);
        true
    }
}
