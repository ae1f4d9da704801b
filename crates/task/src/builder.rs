use std::collections::BTreeSet;

use thiserror::Error;

use crate::CausalGraph;
use crate::CostType;
use crate::Fact;
use crate::Operator;
use crate::PlanningTask;
use crate::PrePost;
use crate::Variable;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("variable {0} does not exist")]
    UnknownVariable(usize),

    #[error("value {value} is outside of the domain of variable {var}")]
    ValueOutOfDomain { var: usize, value: usize },

    #[error("operator {0} has conflicting preconditions")]
    ConflictingPreconditions(String),

    #[error("the initial state assigns {actual} variables, but there are {expected}")]
    InvalidInitialState { expected: usize, actual: usize },

    #[error("operator {0} does not exist")]
    UnknownOperator(usize),
}

/// An effect given as a fact that is set when all conditions hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Effect {
    pub fact: Fact,
    pub conditions: Vec<Fact>,
}

impl Effect {
    pub fn new(var: usize, value: usize) -> Self {
        Self {
            fact: Fact::new(var, value),
            conditions: Vec::new(),
        }
    }

    pub fn conditional(var: usize, value: usize, conditions: Vec<Fact>) -> Self {
        Self {
            fact: Fact::new(var, value),
            conditions,
        }
    }
}

struct OperatorDescription {
    name: String,
    cost: i32,
    preconditions: Vec<Fact>,
    effects: Vec<Effect>,
}

/// Collects variables, operators and goals given as plain preconditions and
/// effects, and translates them into prevail conditions and pre-post effects.
#[derive(Default)]
pub struct PlanningTaskBuilder {
    variables: Vec<Variable>,
    operators: Vec<OperatorDescription>,
    initial_state: Vec<usize>,
    goal: Vec<Fact>,
    cost_type: CostType,
    dead_operators: Vec<usize>,
}

impl PlanningTaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable and returns its index.
    pub fn add_variable(&mut self, name: &str, domain_size: usize) -> usize {
        self.variables.push(Variable {
            name: name.to_string(),
            domain_size,
        });
        self.variables.len() - 1
    }

    /// Adds an operator and returns its index, which is also the number of its leaf label.
    pub fn add_operator(&mut self, name: &str, cost: i32, preconditions: &[Fact], effects: &[Effect]) -> usize {
        self.operators.push(OperatorDescription {
            name: name.to_string(),
            cost,
            preconditions: preconditions.to_vec(),
            effects: effects.to_vec(),
        });
        self.operators.len() - 1
    }

    pub fn set_initial_state(&mut self, values: Vec<usize>) -> &mut Self {
        self.initial_state = values;
        self
    }

    pub fn add_goal(&mut self, var: usize, value: usize) -> &mut Self {
        self.goal.push(Fact::new(var, value));
        self
    }

    pub fn set_cost_type(&mut self, cost_type: CostType) -> &mut Self {
        self.cost_type = cost_type;
        self
    }

    /// Marks an operator as dead, for example because an earlier analysis showed it can never be useful.
    pub fn mark_dead(&mut self, op: usize) -> &mut Self {
        self.dead_operators.push(op);
        self
    }

    pub fn build(self) -> Result<PlanningTask, TaskError> {
        let num_variables = self.variables.len();
        if self.initial_state.len() != num_variables {
            return Err(TaskError::InvalidInitialState {
                expected: num_variables,
                actual: self.initial_state.len(),
            });
        }

        let check = |fact: &Fact| -> Result<(), TaskError> {
            let variable = self.variables.get(fact.var).ok_or(TaskError::UnknownVariable(fact.var))?;
            if fact.value >= variable.domain_size {
                return Err(TaskError::ValueOutOfDomain {
                    var: fact.var,
                    value: fact.value,
                });
            }
            Ok(())
        };

        for (var, value) in self.initial_state.iter().enumerate() {
            check(&Fact::new(var, *value))?;
        }

        let mut goal_values = vec![None; num_variables];
        for fact in &self.goal {
            check(fact)?;
            goal_values[fact.var] = Some(fact.value);
        }

        let mut operators = Vec::with_capacity(self.operators.len());
        for description in &self.operators {
            for fact in description
                .preconditions
                .iter()
                .chain(description.effects.iter().flat_map(|e| std::iter::once(&e.fact).chain(e.conditions.iter())))
            {
                check(fact)?;
            }
            operators.push(translate_operator(description, num_variables)?);
        }

        let mut dead_operators = vec![false; operators.len()];
        for &op in &self.dead_operators {
            *dead_operators.get_mut(op).ok_or(TaskError::UnknownOperator(op))? = true;
        }

        let mut pre_vars = Vec::with_capacity(operators.len());
        let mut eff_vars = Vec::with_capacity(operators.len());
        for op in &operators {
            let mut pre = BTreeSet::new();
            let mut eff = BTreeSet::new();
            for prevail in &op.prevails {
                pre.insert(prevail.var);
            }
            for pre_post in &op.pre_posts {
                eff.insert(pre_post.var);
                if pre_post.pre.is_some() {
                    pre.insert(pre_post.var);
                }
            }
            pre_vars.push(pre.into_iter().collect());
            eff_vars.push(eff.into_iter().collect());
        }

        let unit_cost = operators.iter().all(|op| op.cost == 1);
        let causal_graph = CausalGraph::new(num_variables, &operators);

        Ok(PlanningTask {
            variables: self.variables,
            operators,
            initial_state: self.initial_state,
            goal: self.goal,
            cost_type: self.cost_type,
            unit_cost,
            dead_operators,
            causal_graph,
            pre_vars,
            eff_vars,
            goal_values,
        })
    }
}

/// An effect that sets a variable to its precondition value without effect
/// conditions is a prevail condition, every other effect becomes a pre-post.
fn translate_operator(description: &OperatorDescription, num_variables: usize) -> Result<Operator, TaskError> {
    let mut precondition_on_var: Vec<Option<usize>> = vec![None; num_variables];
    let mut has_effect = vec![false; num_variables];

    for pre in &description.preconditions {
        if precondition_on_var[pre.var].is_some_and(|value| value != pre.value) {
            return Err(TaskError::ConflictingPreconditions(description.name.clone()));
        }
        precondition_on_var[pre.var] = Some(pre.value);
    }

    let mut prevails = Vec::new();
    let mut pre_posts = Vec::new();
    for effect in &description.effects {
        let var = effect.fact.var;
        has_effect[var] = true;

        let pre = precondition_on_var[var];
        if effect.conditions.is_empty() && pre == Some(effect.fact.value) {
            prevails.push(Fact::new(var, effect.fact.value));
        } else {
            pre_posts.push(PrePost {
                var,
                pre,
                post: effect.fact.value,
                conditions: effect.conditions.clone(),
            });
        }
    }

    for (var, pre) in precondition_on_var.iter().enumerate() {
        if let Some(value) = pre {
            if !has_effect[var] {
                prevails.push(Fact::new(var, *value));
            }
        }
    }

    Ok(Operator {
        name: description.name.clone(),
        cost: description.cost,
        prevails,
        pre_posts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_translate_prevails_and_pre_posts() {
        let mut builder = PlanningTaskBuilder::new();
        let a = builder.add_variable("a", 2);
        let b = builder.add_variable("b", 3);
        let c = builder.add_variable("c", 2);
        builder.set_initial_state(vec![0, 0, 0]);
        builder.add_goal(b, 2);
        builder.add_operator(
            "op",
            2,
            &[Fact::new(a, 1), Fact::new(b, 0), Fact::new(c, 1)],
            &[Effect::new(b, 2), Effect::new(c, 1), Effect::conditional(a, 0, vec![Fact::new(c, 1)])],
        );

        let task = builder.build().unwrap();
        let op = task.operator(0);

        // The effect on c does not change its value, so it is a prevail condition.
        assert_eq!(op.prevails(), &[Fact::new(c, 1)]);
        assert_eq!(op.pre_posts().len(), 2);
        assert_eq!(op.pre_posts()[0].pre, Some(0));
        assert_eq!(op.pre_posts()[1].conditions, vec![Fact::new(c, 1)]);
        assert_eq!(task.pre_vars(0), &[a, b, c]);
        assert_eq!(task.eff_vars(0), &[a, b]);
        assert!(task.is_goal_var(b));
        assert!(!task.is_goal_var(a));
        assert!(task.has_conditional_effects());
    }

    #[test]
    fn test_invalid_tasks() {
        let mut builder = PlanningTaskBuilder::new();
        builder.add_variable("a", 2);
        builder.set_initial_state(vec![2]);
        assert_eq!(
            builder.build().err(),
            Some(TaskError::ValueOutOfDomain { var: 0, value: 2 })
        );

        let mut builder = PlanningTaskBuilder::new();
        builder.add_variable("a", 2);
        builder.set_initial_state(vec![0]);
        builder.add_operator("op", 1, &[Fact::new(0, 0), Fact::new(0, 1)], &[]);
        assert_eq!(
            builder.build().err(),
            Some(TaskError::ConflictingPreconditions("op".to_string()))
        );
    }
}
