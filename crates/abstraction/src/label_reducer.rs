use std::time::Duration;
use std::time::Instant;

use clap::ValueEnum;
use log::debug;
use log::info;
use rand::Rng;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;

use ldsim_task::PlanningTask;

use crate::Abstraction;
use crate::EquivalenceRelation;
use crate::Labels;

/// How labels are reduced before two abstractions are merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LabelReductionMethod {
    /// No label reduction.
    None,
    /// Labels with the same preconditions and effects outside of the
    /// abstraction that is merged next are combined.
    Old,
    /// Exact label reduction for the two abstractions that are merged next.
    TwoAbstractions,
    /// Exact label reduction once for every abstraction.
    AllAbstractions,
    /// Exact label reduction for every abstraction until no more labels are reduced.
    #[default]
    AllAbstractionsWithFixpoint,
}

/// The order in which the abstractions are considered for exact label reduction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LabelReductionSystemOrder {
    Regular,
    Reverse,
    #[default]
    Random,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelReducerOptions {
    pub method: LabelReductionMethod,
    pub system_order: LabelReductionSystemOrder,
    /// The time limit for one round of label reduction, in seconds.
    pub max_time: u64,
}

impl Default for LabelReducerOptions {
    fn default() -> Self {
        Self {
            method: LabelReductionMethod::AllAbstractionsWithFixpoint,
            system_order: LabelReductionSystemOrder::Random,
            max_time: 60,
        }
    }
}

/// Combines labels that are interchangeable in all abstractions into
/// composite labels.
///
/// Two labels can be combined when they induce the same transitions in all
/// abstractions but one. After reduction every abstraction must be
/// normalized before it is used again.
#[derive(Clone, Debug)]
pub struct LabelReducer {
    options: LabelReducerOptions,

    /// The order in which abstraction indices are visited, there are at most
    /// twice as many abstractions as variables.
    system_order: Vec<usize>,
}

impl LabelReducer {
    pub fn new<R: Rng>(options: LabelReducerOptions, num_variables: usize, rng: &mut R) -> Self {
        let max_num_systems = (num_variables * 2).saturating_sub(1).max(1);
        let mut system_order: Vec<usize> = (0..max_num_systems).collect();
        match options.system_order {
            LabelReductionSystemOrder::Regular => {}
            LabelReductionSystemOrder::Reverse => system_order.reverse(),
            LabelReductionSystemOrder::Random => system_order.shuffle(rng),
        }

        Self { options, system_order }
    }

    pub fn options(&self) -> &LabelReducerOptions {
        &self.options
    }

    /// Returns true iff the reduction is repeated until no labels can be combined.
    pub fn applies_perfect_label_reduction(&self) -> bool {
        self.options.method == LabelReductionMethod::AllAbstractionsWithFixpoint
    }

    /// Reduces the labels before merging the abstractions at the given
    /// indices. Removed abstractions are None.
    pub fn reduce_labels(
        &self,
        task: &PlanningTask,
        next_merge: (usize, usize),
        abstractions: &mut [Option<Abstraction>],
        labels: &mut Labels,
    ) {
        match self.options.method {
            LabelReductionMethod::None => {}
            LabelReductionMethod::Old => {
                // Normalization cannot deal with several label reductions at once.
                for abs in abstractions.iter_mut().flatten() {
                    abs.normalize(labels);
                }

                if let Some(abs) = &abstractions[next_merge.0] {
                    let varset = abs.varset().to_vec();
                    reduce_old(task, &varset, labels);
                }
            }
            LabelReductionMethod::TwoAbstractions => {
                let mut local_relations = vec![None; abstractions.len()];
                for index in [next_merge.0, next_merge.1] {
                    if abstractions[index].is_some() {
                        let relation = compute_outside_equivalence(index, abstractions, labels, &mut local_relations);
                        labels.reduce_exactly(&relation);
                    }
                }
            }
            LabelReductionMethod::AllAbstractions | LabelReductionMethod::AllAbstractionsWithFixpoint => {
                self.reduce_all(abstractions, labels);
            }
        }
    }

    fn reduce_all(&self, abstractions: &mut [Option<Abstraction>], labels: &mut Labels) {
        let max_iterations = if self.options.method == LabelReductionMethod::AllAbstractions {
            abstractions.len()
        } else {
            usize::MAX
        };

        let order: Vec<usize> = self
            .system_order
            .iter()
            .copied()
            .filter(|&index| index < abstractions.len())
            .collect();
        if order.is_empty() {
            return;
        }

        let start = Instant::now();
        let max_time = Duration::from_secs(self.options.max_time);
        let mut local_relations = vec![None; abstractions.len()];
        let mut num_unsuccessful_iterations = 0;
        let mut position = 0;
        let mut iteration = 0;
        while iteration < max_iterations && start.elapsed() < max_time {
            let index = order[position];
            let mut have_reduced = false;
            if abstractions[index].is_some() {
                let relation = compute_outside_equivalence(index, abstractions, labels, &mut local_relations);
                have_reduced = labels.reduce_exactly(&relation);
            }

            if have_reduced {
                num_unsuccessful_iterations = 0;
            } else {
                num_unsuccessful_iterations += 1;
            }

            if num_unsuccessful_iterations + 1 >= abstractions.len() {
                break;
            }

            position = (position + 1) % order.len();
            iteration += 1;
        }

        debug!(
            "Label reduction finished after {} iterations, time {:.3}s",
            iteration,
            start.elapsed().as_secs_f64()
        );
    }

    /// Reduces all labels of equal cost, which is exact when a single abstraction is left.
    pub fn reduce_labels_to_cost(&self, labels: &mut Labels) -> bool {
        if self.options.method == LabelReductionMethod::None {
            return false;
        }
        labels.reduce_to_cost()
    }

    pub fn dump_options(&self) {
        let method = match self.options.method {
            LabelReductionMethod::None => "disabled",
            LabelReductionMethod::Old => "old",
            LabelReductionMethod::TwoAbstractions => "two abstractions (which will be merged next)",
            LabelReductionMethod::AllAbstractions => "all abstractions",
            LabelReductionMethod::AllAbstractionsWithFixpoint => "all abstractions with fixpoint computation",
        };
        info!("Label reduction: {method}");

        if matches!(
            self.options.method,
            LabelReductionMethod::AllAbstractions | LabelReductionMethod::AllAbstractionsWithFixpoint
        ) {
            info!("System order: {:?}", self.options.system_order);
        }
        info!("Max time for label reduction: {}s", self.options.max_time);
    }
}

/// Returns the relation in which two labels are equivalent iff they are
/// locally equivalent in all abstractions except the given one.
///
/// Local relations are cached per abstraction, and discarded when the
/// abstraction has to be normalized again.
fn compute_outside_equivalence(
    index: usize,
    abstractions: &mut [Option<Abstraction>],
    labels: &mut Labels,
    local_relations: &mut [Option<EquivalenceRelation>],
) -> EquivalenceRelation {
    if let Some(abs) = &mut abstractions[index] {
        abs.normalize(labels);
    }
    local_relations[index] = None;

    let annotated: Vec<(usize, usize)> = labels.current_labels().map(|label| (0, label)).collect();
    let mut relation = EquivalenceRelation::from_annotated_elements(labels.size(), annotated);

    for (i, abs) in abstractions.iter_mut().enumerate() {
        let Some(abs) = abs else {
            continue;
        };
        if i == index {
            continue;
        }

        if !abs.is_normalized(labels) {
            abs.normalize(labels);
            local_relations[i] = None;
        }

        let local = local_relations[i].get_or_insert_with(|| abs.compute_local_equivalence_relation(labels));
        relation.refine(local);
    }

    relation
}

/// The preconditions and effects of a label on the variables outside of an abstraction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LabelSignature {
    preconditions: Vec<(usize, usize)>,
    effects: Vec<(usize, usize)>,
    cost: i32,
}

/// Combines the labels that have equal preconditions and effects on the
/// variables outside of the abstraction. Returns true iff any label was combined.
fn reduce_old(task: &PlanningTask, abs_vars: &[usize], labels: &mut Labels) -> bool {
    let mut var_is_used = vec![true; task.num_variables()];
    for &var in abs_vars {
        var_is_used[var] = false;
    }

    let mut signature_index: FxHashMap<LabelSignature, usize> = FxHashMap::default();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut num_labels = 0;
    for label in labels.current_labels().collect::<Vec<_>>() {
        if !labels.label(label).is_composite() && task.is_dead(label) {
            continue;
        }
        num_labels += 1;

        let operator = task.operator(labels.label(label).operator());
        let mut preconditions: Vec<(usize, usize)> = operator
            .prevails()
            .iter()
            .filter(|fact| var_is_used[fact.var])
            .map(|fact| (fact.var, fact.value))
            .collect();
        let mut effects = Vec::new();
        for pre_post in operator.pre_posts().iter().filter(|pp| var_is_used[pp.var]) {
            if let Some(pre) = pre_post.pre {
                preconditions.push((pre_post.var, pre));
            }
            effects.push((pre_post.var, pre_post.post));
        }
        preconditions.sort_unstable();
        effects.sort_unstable();

        let signature = LabelSignature {
            preconditions,
            effects,
            cost: labels.get_label_cost(label),
        };
        let group = *signature_index.entry(signature).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(label);
    }

    info!(
        "Old, local label reduction: {} labels, {} after reduction",
        num_labels,
        groups.len()
    );

    let relation = EquivalenceRelation::new(labels.size(), groups);
    labels.reduce_exactly(&relation)
}
