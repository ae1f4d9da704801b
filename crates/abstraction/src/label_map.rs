use crate::LabelId;
use crate::Labels;

/// A frozen, dense renumbering of the current labels. The relation engines
/// work on these dense indices, which stay valid while the labels are not
/// reduced any further.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMap {
    /// For every label of [Labels] its dense index, or None when it was reduced.
    label_id: Vec<Option<usize>>,
    /// For every dense index the label it represents.
    old_label_id: Vec<LabelId>,
    costs: Vec<i32>,
}

impl LabelMap {
    pub fn new(labels: &Labels) -> Self {
        let mut label_id = Vec::with_capacity(labels.size());
        let mut old_label_id = Vec::new();
        let mut costs = Vec::new();

        for label in labels.iter() {
            if label.is_reduced() {
                label_id.push(None);
            } else {
                label_id.push(Some(old_label_id.len()));
                old_label_id.push(label.id());
                costs.push(label.cost());
            }
        }

        Self {
            label_id,
            old_label_id,
            costs,
        }
    }

    /// Returns the dense index of the given label, None when it was reduced.
    pub fn get_id(&self, label: LabelId) -> Option<usize> {
        self.label_id.get(label).copied().flatten()
    }

    /// Returns the label for the given dense index.
    pub fn get_old_id(&self, id: usize) -> LabelId {
        self.old_label_id[id]
    }

    pub fn num_labels(&self) -> usize {
        self.old_label_id.len()
    }

    /// The number of labels of [Labels] when the map was created, including reduced ones.
    pub fn num_old_labels(&self) -> usize {
        self.label_id.len()
    }

    /// The cost of the label with the given dense index.
    pub fn get_cost(&self, id: usize) -> i32 {
        self.costs[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use test_log::test;

    #[test]
    fn test_label_map_skips_reduced_labels() {
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let composite = labels.add_composite(vec![1, 3]);

        let map = LabelMap::new(&labels);
        assert_eq!(map.num_labels(), task.num_operators() - 1);
        assert_eq!(map.get_id(1), None);
        assert_eq!(map.get_id(0), Some(0));
        assert_eq!(map.get_id(2), Some(1));

        let last = map.num_labels() - 1;
        assert_eq!(map.get_old_id(last), composite);
        assert_eq!(map.get_cost(last), 1);
    }
}
