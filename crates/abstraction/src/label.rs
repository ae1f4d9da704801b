use std::collections::BTreeSet;
use std::fmt;

use log::debug;
use log::trace;

use ldsim_task::PlanningTask;

use crate::EquivalenceRelation;

/// The index of a label in [Labels].
pub type LabelId = usize;

/// A unique identifier for an abstraction, handed out by [Labels::fresh_abstraction_id].
pub type AbstractionId = usize;

/// A label is either a leaf, corresponding to exactly one operator of the
/// task, or a composite label obtained by reducing several labels of equal
/// cost into one.
#[derive(Clone, Debug)]
pub struct Label {
    id: LabelId,
    cost: i32,

    /// The canonical operator whose prevail conditions and effects describe this label.
    operator: usize,

    /// The labels that were reduced into this label, empty for leaves.
    parents: Vec<LabelId>,

    /// The composite label this label was (transitively) reduced into, or itself.
    root: LabelId,

    /// The abstractions in which this label is relevant.
    relevant_for: BTreeSet<AbstractionId>,
}

impl Label {
    pub fn id(&self) -> LabelId {
        self.id
    }

    pub fn cost(&self) -> i32 {
        self.cost
    }

    /// The index of the canonical operator of this label.
    pub fn operator(&self) -> usize {
        self.operator
    }

    pub fn parents(&self) -> &[LabelId] {
        &self.parents
    }

    pub fn is_composite(&self) -> bool {
        !self.parents.is_empty()
    }

    /// Returns true iff this label has been reduced into another label.
    pub fn is_reduced(&self) -> bool {
        self.root != self.id
    }

    pub fn relevant_for(&self) -> &BTreeSet<AbstractionId> {
        &self.relevant_for
    }

    pub fn is_relevant_for(&self, abstraction: AbstractionId) -> bool {
        self.relevant_for.contains(&abstraction)
    }

    /// A label that is relevant for no abstraction at all.
    pub fn is_irrelevant(&self) -> bool {
        self.relevant_for.is_empty()
    }
}

/// The pool of all labels. Labels are never removed, once reduced they are
/// kept for their cost and to traverse the reduction forest.
#[derive(Clone)]
pub struct Labels {
    labels: Vec<Label>,
    unit_cost: bool,
    num_operators: usize,
    next_abstraction_id: AbstractionId,
}

impl Labels {
    /// Creates one leaf label for every operator of the task, with its cost
    /// adjusted by the cost type of the task.
    pub fn new(task: &PlanningTask) -> Self {
        let labels = (0..task.num_operators())
            .map(|op| Label {
                id: op,
                cost: task.adjusted_cost(op),
                operator: op,
                parents: Vec::new(),
                root: op,
                relevant_for: BTreeSet::new(),
            })
            .collect();

        Self {
            labels,
            unit_cost: task.is_unit_cost(),
            num_operators: task.num_operators(),
            next_abstraction_id: 0,
        }
    }

    /// Returns the total number of labels, including reduced ones.
    pub fn size(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn is_unit_cost(&self) -> bool {
        self.unit_cost
    }

    /// The number of operators of the task, which is the number of leaf labels.
    pub fn num_operators(&self) -> usize {
        self.num_operators
    }

    pub fn label(&self, label: LabelId) -> &Label {
        &self.labels[label]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn is_label_reduced(&self, label: LabelId) -> bool {
        self.labels[label].is_reduced()
    }

    pub fn get_label_cost(&self, label: LabelId) -> i32 {
        self.labels[label].cost
    }

    /// Returns the labels that have not been reduced.
    pub fn current_labels(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.labels.iter().filter(|label| !label.is_reduced()).map(|label| label.id)
    }

    pub fn num_current_labels(&self) -> usize {
        self.current_labels().count()
    }

    /// Returns the sorted operators reachable from the leaves of the given label.
    pub fn operators_of(&self, label: LabelId) -> Vec<usize> {
        let mut result = Vec::new();
        let mut stack = vec![label];
        while let Some(current) = stack.pop() {
            let label = &self.labels[current];
            if label.is_composite() {
                stack.extend_from_slice(&label.parents);
            } else {
                result.push(label.operator);
            }
        }

        result.sort_unstable();
        result.dedup();
        result
    }

    /// Hands out an identifier that no other abstraction uses.
    pub fn fresh_abstraction_id(&mut self) -> AbstractionId {
        let id = self.next_abstraction_id;
        self.next_abstraction_id += 1;
        id
    }

    pub fn set_relevant_for(&mut self, label: LabelId, abstraction: AbstractionId) {
        self.labels[label].relevant_for.insert(abstraction);
    }

    pub fn set_irrelevant_for(&mut self, label: LabelId, abstraction: AbstractionId) {
        self.labels[label].relevant_for.remove(&abstraction);
    }

    /// Removes the abstraction from the relevance set of every label.
    pub fn set_irrelevant_for_all_labels(&mut self, abstraction: AbstractionId) {
        for label in &mut self.labels {
            label.relevant_for.remove(&abstraction);
        }
    }

    pub fn get_relevant_for(&self, label: LabelId) -> &BTreeSet<AbstractionId> {
        &self.labels[label].relevant_for
    }

    /// Recomputes all relevance sets from the given abstractions, where each
    /// abstraction is given by its identifier and its relevant labels.
    pub fn reset_relevant_for<'a, I>(&mut self, abstractions: I)
    where
        I: IntoIterator<Item = (AbstractionId, &'a [bool])>,
    {
        for label in &mut self.labels {
            label.relevant_for.clear();
        }

        for (id, relevant_labels) in abstractions {
            for (label, _) in relevant_labels.iter().enumerate().filter(|(_, relevant)| **relevant) {
                if label < self.labels.len() {
                    self.labels[label].relevant_for.insert(id);
                }
            }
        }
    }

    /// Adds a composite label for the given parents and returns its index.
    ///
    /// The parents must be current labels of equal cost.
    pub fn add_composite(&mut self, parents: Vec<LabelId>) -> LabelId {
        debug_assert!(!parents.is_empty(), "A composite label needs at least one parent");
        debug_assert!(
            parents.iter().all(|&p| !self.labels[p].is_reduced()),
            "Cannot reduce a label that was already reduced"
        );

        let id = self.labels.len();
        let first = &self.labels[parents[0]];
        let cost = first.cost;
        let operator = first.operator;
        debug_assert!(
            parents.iter().all(|&p| self.labels[p].cost == cost),
            "Reduced labels must have equal cost"
        );

        let mut relevant_for = BTreeSet::new();
        for &parent in &parents {
            relevant_for.extend(self.labels[parent].relevant_for.iter().copied());
        }

        // Every label below the new label now has it as root.
        let mut stack = parents.clone();
        while let Some(current) = stack.pop() {
            self.labels[current].root = id;
            stack.extend_from_slice(&self.labels[current].parents);
        }

        self.labels.push(Label {
            id,
            cost,
            operator,
            parents,
            root: id,
            relevant_for,
        });
        id
    }

    /// Creates a composite label for every block of the relation that contains
    /// more than one current label. Returns true iff any label was reduced.
    pub fn reduce_exactly(&mut self, relation: &EquivalenceRelation) -> bool {
        let num_labels_before = self.num_current_labels();
        let mut reduced = false;

        for block in relation.blocks() {
            let parents: Vec<LabelId> = block
                .iter()
                .copied()
                .filter(|&label| label < self.labels.len() && !self.labels[label].is_reduced())
                .collect();

            if parents.len() > 1 {
                self.add_composite(parents);
                reduced = true;
            }
        }

        debug!(
            "Label reduction: {} labels, {} after reduction",
            num_labels_before,
            self.num_current_labels()
        );
        reduced
    }

    /// Reduces all current labels with the same cost into one label.
    pub fn reduce_to_cost(&mut self) -> bool {
        let mut costs: Vec<i32> = self.current_labels().map(|l| self.labels[l].cost).collect();
        costs.sort_unstable();
        costs.dedup();

        let annotated: Vec<(usize, LabelId)> = self
            .current_labels()
            .map(|label| {
                let cost_id = costs.binary_search(&self.labels[label].cost).unwrap_or_default();
                (cost_id, label)
            })
            .collect();

        let relation = EquivalenceRelation::from_annotated_elements(self.labels.len(), annotated);
        self.reduce_exactly(&relation)
    }

    pub fn dump(&self) {
        trace!("{self:?}");
    }
}

impl fmt::Debug for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Labels ({} current of {}):", self.num_current_labels(), self.size())?;
        for label in &self.labels {
            write!(f, "  {}: cost {}, operator {}", label.id, label.cost, label.operator)?;
            if label.is_composite() {
                write!(f, ", parents {:?}", label.parents)?;
            }
            if label.is_reduced() {
                write!(f, ", reduced into {}", label.root)?;
            }
            writeln!(f, ", relevant for {:?}", label.relevant_for)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use test_log::test;

    #[test]
    fn test_composite_labels() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        assert_eq!(labels.size(), task.num_operators());
        assert!(labels.is_unit_cost());

        labels.set_relevant_for(0, 7);
        labels.set_relevant_for(1, 8);

        let first = labels.add_composite(vec![0, 1]);
        assert!(labels.is_label_reduced(0));
        assert!(labels.is_label_reduced(1));
        assert!(!labels.is_label_reduced(first));
        assert_eq!(labels.get_relevant_for(first).iter().copied().collect::<Vec<_>>(), vec![7, 8]);

        let second = labels.add_composite(vec![first, 2]);
        assert_eq!(labels.operators_of(second), vec![0, 1, 2]);
        assert!(labels.is_label_reduced(first));
        assert_eq!(labels.num_current_labels(), task.num_operators() - 2);
    }

    #[test]
    fn test_reduce_to_cost() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);

        assert!(labels.reduce_to_cost());
        assert_eq!(labels.num_current_labels(), 1);
        assert_eq!(labels.operators_of(labels.size() - 1), (0..task.num_operators()).collect::<Vec<_>>());
        assert!(!labels.reduce_to_cost());
    }
}
