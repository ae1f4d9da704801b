use std::fmt;

use crate::CausalGraph;
use crate::CostType;

/// An assignment of a value to a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fact {
    pub var: usize,
    pub value: usize,
}

impl Fact {
    pub fn new(var: usize, value: usize) -> Self {
        Self { var, value }
    }

    pub fn holds(&self, state: &[usize]) -> bool {
        state[self.var] == self.value
    }
}

/// An effect on one variable. The precondition on that variable is optional and
/// the effect only fires when all its conditions hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrePost {
    pub var: usize,
    pub pre: Option<usize>,
    pub post: usize,
    pub conditions: Vec<Fact>,
}

impl PrePost {
    /// Returns true iff the precondition on the affected variable holds.
    pub fn is_applicable(&self, state: &[usize]) -> bool {
        self.pre.is_none_or(|pre| state[self.var] == pre)
    }

    /// Returns true iff all effect conditions hold.
    pub fn fires(&self, state: &[usize]) -> bool {
        self.conditions.iter().all(|c| c.holds(state))
    }
}

/// An operator described by prevail conditions, which are preconditions on
/// variables that are not changed, and pre-post effects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub(crate) name: String,
    pub(crate) cost: i32,
    pub(crate) prevails: Vec<Fact>,
    pub(crate) pre_posts: Vec<PrePost>,
}

impl Operator {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unadjusted cost of this operator.
    pub fn cost(&self) -> i32 {
        self.cost
    }

    pub fn prevails(&self) -> &[Fact] {
        &self.prevails
    }

    pub fn pre_posts(&self) -> &[PrePost] {
        &self.pre_posts
    }

    pub fn is_applicable(&self, state: &[usize]) -> bool {
        self.prevails.iter().all(|p| p.holds(state)) && self.pre_posts.iter().all(|pp| pp.is_applicable(state))
    }

    /// Applies the operator, all effect conditions are evaluated in the given state.
    pub fn apply(&self, state: &[usize]) -> Vec<usize> {
        debug_assert!(self.is_applicable(state), "Operator {} is not applicable", self.name);
        let mut result = state.to_vec();
        for pre_post in &self.pre_posts {
            if pre_post.fires(state) {
                result[pre_post.var] = pre_post.post;
            }
        }
        result
    }
}

/// A variable with a finite domain `0..domain_size`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub domain_size: usize,
}

/// The immutable planning task shared by every component of the pipeline.
pub struct PlanningTask {
    pub(crate) variables: Vec<Variable>,
    pub(crate) operators: Vec<Operator>,
    pub(crate) initial_state: Vec<usize>,
    pub(crate) goal: Vec<Fact>,
    pub(crate) cost_type: CostType,
    pub(crate) unit_cost: bool,
    pub(crate) dead_operators: Vec<bool>,
    pub(crate) causal_graph: CausalGraph,

    /// For every operator the sorted variables it has a precondition on.
    pub(crate) pre_vars: Vec<Vec<usize>>,
    /// For every operator the sorted variables it has an effect on.
    pub(crate) eff_vars: Vec<Vec<usize>>,
    /// For every variable its goal value, if any.
    pub(crate) goal_values: Vec<Option<usize>>,
}

impl PlanningTask {
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variable(&self, var: usize) -> &Variable {
        &self.variables[var]
    }

    pub fn domain_size(&self, var: usize) -> usize {
        self.variables[var].domain_size
    }

    pub fn num_operators(&self) -> usize {
        self.operators.len()
    }

    pub fn operator(&self, op: usize) -> &Operator {
        &self.operators[op]
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn initial_state(&self) -> &[usize] {
        &self.initial_state
    }

    pub fn goal(&self) -> &[Fact] {
        &self.goal
    }

    pub fn cost_type(&self) -> CostType {
        self.cost_type
    }

    /// Returns the cost of the operator adjusted by the cost type of this task.
    pub fn adjusted_cost(&self, op: usize) -> i32 {
        self.cost_type.adjust(self.operators[op].cost, self.unit_cost)
    }

    /// Returns true iff every adjusted operator cost equals one.
    pub fn is_unit_cost(&self) -> bool {
        (0..self.num_operators()).all(|op| self.adjusted_cost(op) == 1)
    }

    pub fn has_conditional_effects(&self) -> bool {
        self.operators
            .iter()
            .any(|op| op.pre_posts.iter().any(|pp| !pp.conditions.is_empty()))
    }

    pub fn is_goal(&self, state: &[usize]) -> bool {
        self.goal.iter().all(|g| g.holds(state))
    }

    pub fn is_goal_var(&self, var: usize) -> bool {
        self.goal_values[var].is_some()
    }

    pub fn goal_value(&self, var: usize) -> Option<usize> {
        self.goal_values[var]
    }

    /// Returns true iff the operator was declared dead when the task was built.
    pub fn is_dead(&self, op: usize) -> bool {
        self.dead_operators[op]
    }

    pub fn causal_graph(&self) -> &CausalGraph {
        &self.causal_graph
    }

    /// The variables on which the operator has a precondition.
    pub fn pre_vars(&self, op: usize) -> &[usize] {
        &self.pre_vars[op]
    }

    /// The variables on which the operator has an effect.
    pub fn eff_vars(&self, op: usize) -> &[usize] {
        &self.eff_vars[op]
    }

    /// Returns true iff the operator mentions the variable in a precondition or effect.
    pub fn is_relevant(&self, op: usize, var: usize) -> bool {
        self.pre_vars[op].binary_search(&var).is_ok() || self.eff_vars[op].binary_search(&var).is_ok()
    }
}

impl fmt::Debug for PlanningTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Variables:")?;
        for (i, var) in self.variables.iter().enumerate() {
            writeln!(f, "  {i}: {} |{}|", var.name, var.domain_size)?;
        }
        writeln!(f, "Initial state: {:?}", self.initial_state)?;
        writeln!(f, "Goal: {:?}", self.goal)?;
        writeln!(f, "Operators:")?;
        for (i, op) in self.operators.iter().enumerate() {
            write!(f, "  {i}: {} ({})", op.name, op.cost)?;
            for prevail in &op.prevails {
                write!(f, " {}={}", prevail.var, prevail.value)?;
            }
            for pre_post in &op.pre_posts {
                match pre_post.pre {
                    Some(pre) => write!(f, " {}:{}->{}", pre_post.var, pre, pre_post.post)?,
                    None => write!(f, " {}:*->{}", pre_post.var, pre_post.post)?,
                }
                if !pre_post.conditions.is_empty() {
                    write!(f, " if {:?}", pre_post.conditions)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
