use std::collections::BTreeSet;

use log::debug;
use log::info;
use rustc_hash::FxHashMap;

use ldsim_task::PlanningTask;

/// Greedily partitions the task variables into patterns whose product of
/// domain sizes stays below a limit.
///
/// Starting from singleton patterns, the pair of patterns that share the
/// most operators in the causal graph is merged until no pair fits the limit.
pub struct VariablePartitionGreedy {
    limit: usize,

    partitions: Vec<Vec<usize>>,

    /// The product of domain sizes, zero for merged partitions.
    part_size: Vec<usize>,

    /// The operators connecting two partitions.
    weights: FxHashMap<(usize, usize), BTreeSet<usize>>,
}

impl VariablePartitionGreedy {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            partitions: Vec::new(),
            part_size: Vec::new(),
            weights: FxHashMap::default(),
        }
    }

    /// Computes the partition of the variables of the task.
    pub fn find(mut self, task: &PlanningTask) -> Vec<Vec<usize>> {
        self.init(task);

        while let Some((p1, p2)) = self.pick_parts() {
            debug!("Merging partitions {p1} and {p2}");
            self.merge(p1, p2);
        }

        let result: Vec<Vec<usize>> = self
            .partitions
            .into_iter()
            .zip(self.part_size)
            .filter(|(_, size)| *size != 0)
            .map(|(mut partition, _)| {
                partition.sort_unstable();
                partition
            })
            .collect();

        dump(task, &result);
        result
    }

    fn init(&mut self, task: &PlanningTask) {
        let num_variables = task.num_variables();
        self.partitions = (0..num_variables).map(|var| vec![var]).collect();
        self.part_size = (0..num_variables).map(|var| task.domain_size(var)).collect();

        for op in 0..task.num_operators() {
            let eff_vars = task.eff_vars(op);
            for &v in eff_vars {
                for &v2 in task.pre_vars(op).iter().chain(eff_vars) {
                    self.weights.entry((v, v2)).or_default().insert(op);
                    self.weights.entry((v2, v)).or_default().insert(op);
                }
            }
        }
    }

    /// Returns the pair with the maximum weight whose merged size is below the limit.
    fn pick_parts(&self) -> Option<(usize, usize)> {
        let mut best = None;
        let mut best_weight = None;
        for i in 0..self.partitions.len() {
            if self.part_size[i] == 0 {
                continue;
            }

            for j in (i + 1)..self.partitions.len() {
                if self.part_size[j] == 0 {
                    continue;
                }

                let weight = self.weights.get(&(i, j)).map_or(0, |ops| ops.len());
                if self.part_size[i].saturating_mul(self.part_size[j]) < self.limit
                    && best_weight.is_none_or(|best_weight| weight > best_weight)
                {
                    best_weight = Some(weight);
                    best = Some((i, j));
                }
            }
        }
        best
    }

    fn merge(&mut self, p1: usize, p2: usize) {
        let new_part = self.partitions.len();
        self.part_size.push(self.part_size[p1] * self.part_size[p2]);
        self.part_size[p1] = 0;
        self.part_size[p2] = 0;

        let mut merged = self.partitions[p1].clone();
        merged.extend_from_slice(&self.partitions[p2]);
        self.partitions.push(merged);

        for i in 0..new_part {
            let mut outgoing: BTreeSet<usize> = BTreeSet::new();
            let mut incoming: BTreeSet<usize> = BTreeSet::new();
            for p in [p1, p2] {
                if let Some(ops) = self.weights.get(&(p, i)) {
                    outgoing.extend(ops);
                }
                if let Some(ops) = self.weights.get(&(i, p)) {
                    incoming.extend(ops);
                }
            }

            if !outgoing.is_empty() {
                self.weights.insert((new_part, i), outgoing);
            }
            if !incoming.is_empty() {
                self.weights.insert((i, new_part), incoming);
            }
        }
    }
}

fn dump(task: &PlanningTask, partitions: &[Vec<usize>]) {
    info!("Partition:");
    for partition in partitions {
        let size: usize = partition.iter().map(|&var| task.domain_size(var)).product();
        let names: Vec<&str> = partition.iter().map(|&var| task.variable(var).name.as_str()).collect();
        info!(" {:?} ({size})", names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use ldsim_task::random_task;
    use ldsim_utilities::random_test;
    use test_log::test;

    #[test]
    fn test_partition_respects_limit() {
        random_test(100, |rng| {
            let task = random_task(rng, 6, 3, 8, 2);
            let limit = 10;
            let partitions = VariablePartitionGreedy::new(limit).find(&task);

            let mut vars: Vec<usize> = partitions.iter().flatten().copied().collect();
            vars.sort_unstable();
            assert_eq!(vars, (0..task.num_variables()).collect::<Vec<_>>());

            for partition in &partitions {
                let size: usize = partition.iter().map(|&var| task.domain_size(var)).product();
                assert!(partition.len() == 1 || size < limit);
            }
        });
    }

    #[test]
    fn test_partition_merges_connected_variables() {
        // Robot (2 values) and ball (3 values) fit within the limit.
        let task = gripper_task(2);
        assert_eq!(VariablePartitionGreedy::new(7).find(&task), vec![vec![0, 1]]);
        assert_eq!(VariablePartitionGreedy::new(6).find(&task), vec![vec![0], vec![1]]);
    }
}
