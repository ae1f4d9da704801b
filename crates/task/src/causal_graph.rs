use std::collections::BTreeSet;

use crate::Operator;

/// The causal graph of a task: there is an arc from a precondition variable
/// to every effect variable of the same operator, and between every two
/// effect variables of the same operator. Self loops are omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CausalGraph {
    pre_to_eff: Vec<Vec<usize>>,
    eff_to_pre: Vec<Vec<usize>>,
    eff_to_eff: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl CausalGraph {
    pub fn new(num_variables: usize, operators: &[Operator]) -> Self {
        let mut pre_to_eff = vec![BTreeSet::new(); num_variables];
        let mut eff_to_pre = vec![BTreeSet::new(); num_variables];
        let mut eff_to_eff = vec![BTreeSet::new(); num_variables];

        for op in operators {
            let mut pre_vars = BTreeSet::new();
            for prevail in op.prevails() {
                pre_vars.insert(prevail.var);
            }
            for pre_post in op.pre_posts() {
                if pre_post.pre.is_some() {
                    pre_vars.insert(pre_post.var);
                }
                for condition in &pre_post.conditions {
                    pre_vars.insert(condition.var);
                }
            }

            for effect in op.pre_posts() {
                let eff = effect.var;
                for &pre in &pre_vars {
                    if pre != eff {
                        pre_to_eff[pre].insert(eff);
                        eff_to_pre[eff].insert(pre);
                    }
                }
                for other in op.pre_posts() {
                    if other.var != eff {
                        eff_to_eff[eff].insert(other.var);
                    }
                }
            }
        }

        let union = |a: &BTreeSet<usize>, b: &BTreeSet<usize>| -> Vec<usize> { a.union(b).copied().collect() };
        let successors = (0..num_variables)
            .map(|var| union(&pre_to_eff[var], &eff_to_eff[var]))
            .collect();
        let predecessors = (0..num_variables)
            .map(|var| union(&eff_to_pre[var], &eff_to_eff[var]))
            .collect();

        let to_vec = |sets: Vec<BTreeSet<usize>>| -> Vec<Vec<usize>> {
            sets.into_iter().map(|set| set.into_iter().collect()).collect()
        };

        Self {
            pre_to_eff: to_vec(pre_to_eff),
            eff_to_pre: to_vec(eff_to_pre),
            eff_to_eff: to_vec(eff_to_eff),
            successors,
            predecessors,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.pre_to_eff.len()
    }

    /// Variables whose value depends on the given variable through a precondition.
    pub fn pre_to_eff(&self, var: usize) -> &[usize] {
        &self.pre_to_eff[var]
    }

    /// Variables that occur in a precondition of an operator affecting the given variable.
    pub fn eff_to_pre(&self, var: usize) -> &[usize] {
        &self.eff_to_pre[var]
    }

    pub fn eff_to_eff(&self, var: usize) -> &[usize] {
        &self.eff_to_eff[var]
    }

    pub fn successors(&self, var: usize) -> &[usize] {
        &self.successors[var]
    }

    pub fn predecessors(&self, var: usize) -> &[usize] {
        &self.predecessors[var]
    }
}

#[cfg(test)]
mod tests {
    use crate::Effect;
    use crate::Fact;
    use crate::PlanningTaskBuilder;

    use test_log::test;

    #[test]
    fn test_causal_graph_arcs() {
        let mut builder = PlanningTaskBuilder::new();
        let a = builder.add_variable("a", 2);
        let b = builder.add_variable("b", 2);
        let c = builder.add_variable("c", 2);
        builder.set_initial_state(vec![0, 0, 0]);
        builder.add_operator("ab", 1, &[Fact::new(a, 1)], &[Effect::new(b, 1)]);
        builder.add_operator("bc", 1, &[], &[Effect::new(b, 0), Effect::new(c, 1)]);

        let task = builder.build().unwrap();
        let cg = task.causal_graph();
        assert_eq!(cg.pre_to_eff(a), &[b]);
        assert_eq!(cg.eff_to_pre(b), &[a]);
        assert_eq!(cg.eff_to_eff(b), &[c]);
        assert_eq!(cg.successors(a), &[b]);
        assert_eq!(cg.predecessors(b), &[a, c]);
        assert!(cg.eff_to_pre(a).is_empty());
    }
}
