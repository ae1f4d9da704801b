use std::collections::BTreeSet;

use clap::ValueEnum;

use ldsim_abstraction::EquivalenceRelation;
use ldsim_abstraction::LabelMap;
use ldsim_abstraction::LabelledTransitionSystem;

use crate::AlternativeLabelRelation;
use crate::LabelRelation;
use crate::LabelRelationIdentity;
use crate::LabelRelationNoop;
use crate::SimulationRelation;

/// In which transition systems a label dominates another label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DominatesIn {
    All,
    /// In all transition systems except the given one.
    AllBut(usize),
    Nowhere,
}

impl DominatesIn {
    /// Returns true iff the dominance holds in every transition system other than `lts`.
    pub fn in_all_other(self, lts: usize) -> bool {
        match self {
            DominatesIn::All => true,
            DominatesIn::AllBut(other) => other == lts,
            DominatesIn::Nowhere => false,
        }
    }

    /// Returns true iff the dominance holds in the transition system `lts` itself.
    pub fn holds_in(self, lts: usize) -> bool {
        match self {
            DominatesIn::All => true,
            DominatesIn::AllBut(other) => other != lts,
            DominatesIn::Nowhere => false,
        }
    }

    /// Records that the dominance does not hold in `lts`, returns true iff this changed anything.
    pub fn exclude(&mut self, lts: usize) -> bool {
        match *self {
            DominatesIn::All => {
                *self = DominatesIn::AllBut(lts);
                true
            }
            DominatesIn::AllBut(other) if other != lts => {
                *self = DominatesIn::Nowhere;
                true
            }
            _ => false,
        }
    }
}

/// The label relations that can be combined with boolean simulation relations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LabelDominanceType {
    /// Every label only dominates itself.
    Identity,
    /// Only dominance by noop is computed.
    Noop,
    #[default]
    Normal,
    /// Label groups with a table per transition system.
    Alternative,
}

/// A relation on labels that is refined in alternation with the simulation
/// relations of all transition systems.
///
/// Labels are the dense indices of a [LabelMap]; `l1` dominates `l2` in a
/// transition system when it dominates it in all other transition systems.
pub trait LabelDominance {
    fn name(&self) -> &'static str;

    /// Starts from the largest relation that is consistent with the label
    /// costs and refines it once with the given simulations.
    fn init(&mut self, ltss: &[LabelledTransitionSystem], sims: &[SimulationRelation], label_map: &LabelMap);

    /// Refines the relation with respect to the simulations, returns true iff it changed.
    fn update(&mut self, ltss: &[LabelledTransitionSystem], sims: &[SimulationRelation]) -> bool;

    fn num_labels(&self) -> usize;

    /// Returns true iff `l1` dominates `l2` in every transition system except `lts`.
    fn dominates(&self, l1: usize, l2: usize, lts: usize) -> bool;

    /// Returns true iff not applying any label dominates `label` in every transition system except `lts`.
    fn dominated_by_noop(&self, label: usize, lts: usize) -> bool;

    fn get_dominated_by_noop_in(&self, label: usize) -> DominatesIn;

    /// The labels that are dominated by another label, or by noop, in all transition systems.
    fn get_labels_dominated_in_all(&self) -> Vec<usize>;

    /// Removes the label from the relation, it neither dominates nor is dominated afterwards.
    fn kill_label(&mut self, label: usize);

    /// Groups the labels that dominate each other, over the identifiers of
    /// [ldsim_abstraction::Labels]. Transition systems in which an
    /// equivalence could not be used are added to `dangerous_ltss`.
    fn get_equivalent_labels_relation(
        &self,
        label_map: &LabelMap,
        dangerous_ltss: &mut BTreeSet<usize>,
    ) -> EquivalenceRelation;

    /// Checks that removing the transition `src -label-> target` from
    /// transition system `lts_id` keeps the relation valid, and removes it
    /// from the transition system when it does.
    fn propagate_transition_pruning(
        &self,
        lts_id: usize,
        lts: &mut LabelledTransitionSystem,
        sim: &SimulationRelation,
        src: usize,
        label: usize,
        target: usize,
    ) -> bool;

    fn dump(&self) {}
}

pub fn create_label_dominance(kind: LabelDominanceType) -> Box<dyn LabelDominance> {
    match kind {
        LabelDominanceType::Identity => Box::new(LabelRelationIdentity::new()),
        LabelDominanceType::Noop => Box::new(LabelRelationNoop::new()),
        LabelDominanceType::Normal => Box::new(LabelRelation::new()),
        LabelDominanceType::Alternative => Box::new(AlternativeLabelRelation::new()),
    }
}

/// One block per label over the identifiers of the labels themselves.
pub(crate) fn singleton_label_relation(label_map: &LabelMap) -> EquivalenceRelation {
    EquivalenceRelation::new(
        label_map.num_old_labels(),
        (0..label_map.num_labels())
            .map(|label| vec![label_map.get_old_id(label)])
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_dominates_in_is_monotone() {
        let mut dom = DominatesIn::All;
        assert!(dom.in_all_other(3) && dom.holds_in(3));

        assert!(dom.exclude(2));
        assert_eq!(dom, DominatesIn::AllBut(2));
        assert!(dom.in_all_other(2));
        assert!(!dom.in_all_other(1));
        assert!(!dom.holds_in(2));
        assert!(dom.holds_in(1));

        assert!(!dom.exclude(2));
        assert!(dom.exclude(0));
        assert_eq!(dom, DominatesIn::Nowhere);
        assert!(!dom.exclude(1));
        assert!(!dom.holds_in(0) && !dom.in_all_other(0));
    }
}
