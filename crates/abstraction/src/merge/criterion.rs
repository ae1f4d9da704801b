use std::collections::BTreeMap;

use clap::ValueEnum;
use log::debug;

use ldsim_task::PlanningTask;

use crate::Abstraction;
use crate::AbstractionId;
use crate::Labels;
use crate::SccDecomposition;

/// A criterion used by [crate::MergeLinearCriteria] to narrow down the
/// candidate variables for the next merge.
///
/// Every criterion keeps only the candidates it prefers, and leaves the
/// candidates unchanged when it prefers none of them.
pub trait MergeCriterion {
    fn name(&self) -> String;

    fn init(&mut self, task: &PlanningTask);

    /// Recompute the criterion from the current abstraction instead of
    /// updating it for every selected variable.
    fn disable_incremental(&mut self) {}

    /// Informs the criterion that the variable has been selected.
    fn select_next(&mut self, task: &PlanningTask, var: usize);

    /// Filters the candidate variables. The current abstraction is None
    /// when the first variable is selected.
    fn filter(
        &mut self,
        task: &PlanningTask,
        labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        vars: &mut Vec<usize>,
        current: Option<usize>,
    );

    fn reduce_labels_before_merge(&self) -> bool {
        false
    }
}

/// The merge criteria that can be selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MergeCriterionType {
    /// Prefer variables with causal influence on the merged variables.
    Cg,
    /// Prefer goal variables.
    Goal,
    /// Prefer goal variables and variables with causal influence on the merged variables.
    Relevant,
    /// As [MergeCriterionType::Cg], but only keep variables in the causal graph SCCs closest to the root.
    Scc,
    /// Prefer variables that share the most transitions with the current abstraction.
    Trs,
}

/// Creates the criterion with its default parameters.
pub fn create_criterion(criterion_type: MergeCriterionType) -> Box<dyn MergeCriterion> {
    match criterion_type {
        MergeCriterionType::Cg => Box::new(MergeCriterionCg::new(false)),
        MergeCriterionType::Goal => Box::new(MergeCriterionGoal::default()),
        MergeCriterionType::Relevant => Box::new(MergeCriterionCg::new(true)),
        MergeCriterionType::Scc => Box::new(MergeCriterionMinScc::new(false, false, false)),
        MergeCriterionType::Trs => Box::new(MergeCriterionTrs::new(false, false, 1.0, 0)),
    }
}

/// Keeps the variables that fit the criterion, returns false and keeps all
/// variables when none does.
fn filter_by(vars: &mut Vec<usize>, criterion: &[bool]) -> bool {
    let selected: Vec<usize> = vars.iter().copied().filter(|&var| criterion[var]).collect();
    if selected.is_empty() {
        return false;
    }

    *vars = selected;
    true
}

/// Keeps the variables with the maximum score, allowing a suboptimality of
/// the given factor or difference.
fn filter_best(vars: &mut Vec<usize>, scores: &[usize], opt_factor: f64, opt_diff: usize) {
    let Some(best) = vars.iter().map(|&var| scores[var]).max() else {
        return;
    };

    let threshold = if opt_diff == 0 && opt_factor == 1.0 {
        best
    } else {
        ((best as f64 * opt_factor) as usize).min(best.saturating_sub(opt_diff))
    };

    debug!("Best score {best}, threshold {threshold}");
    vars.retain(|&var| scores[var] >= threshold);
}

/// Marks the variables in preconditions of operators affecting the given variables.
fn mark_causal_predecessors(task: &PlanningTask, vars: &[usize], is_causal_predecessor: &mut [bool]) {
    for &var in vars {
        for &predecessor in task.causal_graph().eff_to_pre(var) {
            is_causal_predecessor[predecessor] = true;
        }
    }
}

/// Prefers variables that have a causal influence on the selected variables.
/// The relevant variant also prefers goal variables.
pub struct MergeCriterionCg {
    relevant: bool,
    allow_incremental: bool,
    is_causal_predecessor: Vec<bool>,
}

impl MergeCriterionCg {
    pub fn new(relevant: bool) -> Self {
        Self {
            relevant,
            allow_incremental: true,
            is_causal_predecessor: Vec::new(),
        }
    }
}

impl MergeCriterion for MergeCriterionCg {
    fn name(&self) -> String {
        if self.relevant { "RELEVANT" } else { "CG" }.to_string()
    }

    fn init(&mut self, task: &PlanningTask) {
        self.is_causal_predecessor = vec![false; task.num_variables()];
        if self.relevant {
            for fact in task.goal() {
                self.is_causal_predecessor[fact.var] = true;
            }
        }
    }

    fn disable_incremental(&mut self) {
        self.allow_incremental = false;
    }

    fn select_next(&mut self, task: &PlanningTask, var: usize) {
        if self.allow_incremental {
            mark_causal_predecessors(task, &[var], &mut self.is_causal_predecessor);
        }
    }

    fn filter(
        &mut self,
        task: &PlanningTask,
        _labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        vars: &mut Vec<usize>,
        current: Option<usize>,
    ) {
        let Some(abs) = current.and_then(|index| abstractions[index].as_ref()) else {
            return;
        };

        if !self.allow_incremental {
            mark_causal_predecessors(task, abs.varset(), &mut self.is_causal_predecessor);
        }
        filter_by(vars, &self.is_causal_predecessor);
    }
}

/// Prefers goal variables.
#[derive(Default)]
pub struct MergeCriterionGoal {
    is_goal_variable: Vec<bool>,
}

impl MergeCriterion for MergeCriterionGoal {
    fn name(&self) -> String {
        "GOAL".to_string()
    }

    fn init(&mut self, task: &PlanningTask) {
        self.is_goal_variable = (0..task.num_variables()).map(|var| task.is_goal_var(var)).collect();
    }

    fn select_next(&mut self, _task: &PlanningTask, _var: usize) {}

    fn filter(
        &mut self,
        _task: &PlanningTask,
        _labels: &mut Labels,
        _abstractions: &mut [Option<Abstraction>],
        vars: &mut Vec<usize>,
        _current: Option<usize>,
    ) {
        filter_by(vars, &self.is_goal_variable);
    }
}

/// Like [MergeCriterionCg], and among the causally relevant variables only
/// keeps those whose SCC in the causal graph is not reachable from the SCC
/// of another candidate.
pub struct MergeCriterionMinScc {
    /// Use the reversed causal graph and prefer variables with a higher index.
    reverse: bool,
    /// Keep only one variable per SCC, the one with the lowest index.
    tie_by_level: bool,
    /// Use the complete causal graph instead of the precondition to effect arcs.
    complete_cg: bool,

    allow_incremental: bool,
    is_causal_predecessor: Vec<bool>,
    graph: Vec<Vec<usize>>,
    scc: Option<SccDecomposition>,
}

impl MergeCriterionMinScc {
    pub fn new(reverse: bool, tie_by_level: bool, complete_cg: bool) -> Self {
        Self {
            reverse,
            tie_by_level,
            complete_cg,
            allow_incremental: true,
            is_causal_predecessor: Vec::new(),
            graph: Vec::new(),
            scc: None,
        }
    }
}

impl MergeCriterion for MergeCriterionMinScc {
    fn name(&self) -> String {
        "SCC".to_string()
    }

    fn init(&mut self, task: &PlanningTask) {
        self.is_causal_predecessor = vec![false; task.num_variables()];

        let causal_graph = task.causal_graph();
        self.graph = (0..task.num_variables())
            .map(|var| {
                match (self.complete_cg, self.reverse) {
                    (true, true) => causal_graph.predecessors(var),
                    (true, false) => causal_graph.successors(var),
                    (false, true) => causal_graph.eff_to_pre(var),
                    (false, false) => causal_graph.pre_to_eff(var),
                }
                .to_vec()
            })
            .collect();
        self.scc = Some(SccDecomposition::new(&self.graph));
    }

    fn disable_incremental(&mut self) {
        self.allow_incremental = false;
    }

    fn select_next(&mut self, task: &PlanningTask, var: usize) {
        if self.allow_incremental {
            mark_causal_predecessors(task, &[var], &mut self.is_causal_predecessor);
        }
    }

    fn filter(
        &mut self,
        task: &PlanningTask,
        _labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        vars: &mut Vec<usize>,
        current: Option<usize>,
    ) {
        let Some(abs) = current.and_then(|index| abstractions[index].as_ref()) else {
            return;
        };

        if !self.allow_incremental {
            mark_causal_predecessors(task, abs.varset(), &mut self.is_causal_predecessor);
        }

        if !filter_by(vars, &self.is_causal_predecessor) {
            return;
        }

        let Some(scc) = &self.scc else {
            return;
        };

        // Forbid every SCC reachable from the SCC of a candidate.
        let mut forbidden = vec![false; scc.num_components()];
        let mut var_by_scc: BTreeMap<usize, usize> = BTreeMap::new();
        for &var in vars.iter() {
            let component = scc.component_of(var);
            if forbidden[component] {
                continue;
            }

            for (other, reachable) in scc.descendants(&self.graph, component).into_iter().enumerate() {
                if reachable {
                    forbidden[other] = true;
                }
            }

            var_by_scc
                .entry(component)
                .and_modify(|selected| {
                    if (!self.reverse && *selected > var) || (self.reverse && *selected < var) {
                        *selected = var;
                    }
                })
                .or_insert(var);
        }

        if self.tie_by_level {
            *vars = var_by_scc
                .into_iter()
                .filter(|(component, _)| !forbidden[*component])
                .map(|(_, var)| var)
                .collect();
        } else {
            vars.retain(|&var| !forbidden[scc.component_of(var)]);
        }
    }
}

/// Prefers the variables that share the most transitions with the current abstraction.
pub struct MergeCriterionTrs {
    /// Only count transitions leading to a goal state.
    only_goals: bool,
    /// Only count transitions of labels that become own labels of the product.
    only_empty: bool,

    /// The variables within this factor of the best score are kept.
    opt_factor: f64,
    /// The variables within this difference of the best score are kept.
    opt_diff: usize,
}

impl MergeCriterionTrs {
    pub fn new(only_goals: bool, only_empty: bool, opt_factor: f64, opt_diff: usize) -> Self {
        Self {
            only_goals,
            only_empty,
            opt_factor,
            opt_diff,
        }
    }
}

impl MergeCriterion for MergeCriterionTrs {
    fn name(&self) -> String {
        let mut name = "TRs(".to_string();
        if self.only_goals {
            name.push_str("goals ");
        }
        if self.only_empty {
            name.push_str("empty");
        }
        name.push(')');
        name
    }

    fn init(&mut self, _task: &PlanningTask) {}

    fn select_next(&mut self, _task: &PlanningTask, _var: usize) {}

    fn filter(
        &mut self,
        task: &PlanningTask,
        labels: &mut Labels,
        abstractions: &mut [Option<Abstraction>],
        vars: &mut Vec<usize>,
        current: Option<usize>,
    ) {
        let Some(current) = current else {
            return;
        };

        if let Some(abs) = abstractions[current].as_mut() {
            abs.normalize(labels);
        }

        let candidate_ids: Vec<Option<AbstractionId>> = (0..task.num_variables())
            .map(|var| abstractions[var].as_ref().map(|abs| abs.id()))
            .collect();

        if let Some(abs) = &abstractions[current] {
            let scores = abs.count_transitions(labels, &candidate_ids, vars, self.only_empty, self.only_goals);
            let before = vars.len();
            filter_best(vars, &scores, self.opt_factor, self.opt_diff);
            debug!("TRs criterion: {} => {}", before, vars.len());
        }
    }

    fn reduce_labels_before_merge(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_task::gripper_task;
    use ldsim_task::two_flip_task;
    use test_log::test;

    #[test]
    fn test_filter_keeps_all_without_match() {
        let mut vars = vec![0, 1, 2];
        assert!(!filter_by(&mut vars, &[false, false, false]));
        assert_eq!(vars, vec![0, 1, 2]);

        assert!(filter_by(&mut vars, &[false, true, true]));
        assert_eq!(vars, vec![1, 2]);
    }

    #[test]
    fn test_filter_best_margin() {
        let scores = [10, 9, 5];
        let mut vars = vec![0, 1, 2];
        filter_best(&mut vars, &scores, 1.0, 0);
        assert_eq!(vars, vec![0]);

        let mut vars = vec![0, 1, 2];
        filter_best(&mut vars, &scores, 1.0, 1);
        assert_eq!(vars, vec![0, 1]);
    }

    #[test]
    fn test_goal_and_cg_criteria() {
        // Only the ball is a goal variable.
        let task = gripper_task(2);
        let mut labels = Labels::new(&task);
        let mut abstractions: Vec<Option<Abstraction>> = Abstraction::build_atomic_abstractions(&task, &mut labels, false)
            .into_iter()
            .map(Some)
            .collect();

        let mut goal = create_criterion(MergeCriterionType::Goal);
        goal.init(&task);
        let mut vars = vec![0, 1];
        goal.filter(&task, &mut labels, &mut abstractions, &mut vars, None);
        assert_eq!(vars, vec![1]);

        // Without a current abstraction the causal graph criterion keeps everything.
        let mut cg = create_criterion(MergeCriterionType::Cg);
        cg.init(&task);
        let mut vars = vec![0, 1];
        cg.filter(&task, &mut labels, &mut abstractions, &mut vars, None);
        assert_eq!(vars, vec![0, 1]);
    }

    #[test]
    fn test_cg_criterion_prefers_predecessors() {
        // Flipping B requires A.
        let task = two_flip_task();
        let mut labels = Labels::new(&task);
        let mut abstractions: Vec<Option<Abstraction>> = Abstraction::build_atomic_abstractions(&task, &mut labels, false)
            .into_iter()
            .map(Some)
            .collect();

        let mut cg = create_criterion(MergeCriterionType::Cg);
        cg.init(&task);
        cg.select_next(&task, 1);
        let mut vars = vec![0, 1];
        cg.filter(&task, &mut labels, &mut abstractions, &mut vars, Some(1));
        assert_eq!(vars, vec![0]);

        let mut relevant = create_criterion(MergeCriterionType::Relevant);
        relevant.init(&task);
        let mut vars = vec![0, 1];
        relevant.filter(&task, &mut labels, &mut abstractions, &mut vars, Some(1));
        assert_eq!(vars, vec![0, 1]);
    }
}
