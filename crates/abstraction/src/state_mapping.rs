use serde::Deserialize;
use serde::Serialize;

/// Maps concrete task states to the states of an abstraction.
///
/// This is the only part of an abstraction that is needed to evaluate it
/// after construction, and it is serializable so that a computed abstraction
/// can be stored without its transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMapping {
    /// Projection onto a single variable, indexed by its value.
    Atomic {
        variable: usize,
        lookup: Vec<Option<usize>>,
    },
    /// The synchronized product of two abstractions, indexed by the abstract
    /// states of both components.
    Composite {
        components: Box<[StateMapping; 2]>,
        lookup: Vec<Vec<Option<usize>>>,
    },
    /// Projection onto a pattern, indexed by the mixed radix rank of the
    /// pattern values where the last pattern variable is least significant.
    Pdb {
        pattern: Vec<usize>,
        domains: Vec<usize>,
        lookup: Vec<Option<usize>>,
    },
}

impl StateMapping {
    /// Returns the abstract state of the given task state, None when it was pruned.
    pub fn abstract_state(&self, state: &[usize]) -> Option<usize> {
        match self {
            StateMapping::Atomic { variable, lookup } => lookup[state[*variable]],
            StateMapping::Composite { components, lookup } => {
                let first = components[0].abstract_state(state)?;
                let second = components[1].abstract_state(state)?;
                lookup[first][second]
            }
            StateMapping::Pdb { pattern, domains, lookup } => lookup[pdb_rank(pattern, domains, state)],
        }
    }

    /// Maps every entry through the given shrink mapping, pruned entries stay pruned.
    pub(crate) fn apply_shrink(&mut self, mapping: &[Option<usize>]) {
        let remap = |entry: &mut Option<usize>| {
            if let Some(state) = *entry {
                *entry = mapping[state];
            }
        };

        match self {
            StateMapping::Atomic { lookup, .. } | StateMapping::Pdb { lookup, .. } => lookup.iter_mut().for_each(remap),
            StateMapping::Composite { lookup, .. } => lookup.iter_mut().flatten().for_each(remap),
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, StateMapping::Atomic { .. })
    }

    /// Returns the variable of an atomic mapping.
    pub fn atomic_variable(&self) -> Option<usize> {
        match self {
            StateMapping::Atomic { variable, .. } => Some(*variable),
            _ => None,
        }
    }

    /// Returns an estimate in bytes of the memory used by the lookup tables.
    pub fn memory_estimate(&self) -> usize {
        let entry = std::mem::size_of::<Option<usize>>();
        match self {
            StateMapping::Atomic { lookup, .. } | StateMapping::Pdb { lookup, .. } => lookup.capacity() * entry,
            StateMapping::Composite { components, lookup } => {
                lookup.iter().map(|row| row.capacity() * entry).sum::<usize>()
                    + lookup.capacity() * std::mem::size_of::<Vec<Option<usize>>>()
                    + components[0].memory_estimate()
                    + components[1].memory_estimate()
            }
        }
    }
}

/// The rank of the pattern values of a task state.
pub(crate) fn pdb_rank(pattern: &[usize], domains: &[usize], state: &[usize]) -> usize {
    pattern
        .iter()
        .zip(domains)
        .fold(0, |rank, (&var, &domain)| rank * domain + state[var])
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_composite_mapping() {
        let mut mapping = StateMapping::Composite {
            components: Box::new([
                StateMapping::Atomic {
                    variable: 0,
                    lookup: vec![Some(0), Some(1)],
                },
                StateMapping::Atomic {
                    variable: 1,
                    lookup: vec![Some(0), None],
                },
            ]),
            lookup: vec![vec![Some(0), Some(1)], vec![Some(2), Some(3)]],
        };

        assert_eq!(mapping.abstract_state(&[1, 0]), Some(2));
        assert_eq!(mapping.abstract_state(&[1, 1]), None);

        mapping.apply_shrink(&[Some(0), None, Some(0), Some(1)]);
        assert_eq!(mapping.abstract_state(&[0, 0]), Some(0));
        assert_eq!(mapping.abstract_state(&[1, 0]), Some(0));

        let stored = serde_json::to_string(&mapping).expect("Serialization should succeed");
        let restored: StateMapping = serde_json::from_str(&stored).expect("Deserialization should succeed");
        assert_eq!(restored, mapping);
    }

    #[test]
    fn test_pdb_rank() {
        // Pattern (2, 0) with domains 3 and 2, the last pattern variable is least significant.
        assert_eq!(pdb_rank(&[2, 0], &[3, 2], &[1, 5, 2]), 2 * 2 + 1);
    }
}
