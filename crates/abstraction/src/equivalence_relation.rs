use rustc_hash::FxHashMap;

/// A partition of (a subset of) the elements `0..num_elements` into blocks.
///
/// Elements that are in no block are unconstrained, refining with a relation
/// that omits an element leaves it in its current block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EquivalenceRelation {
    num_elements: usize,
    blocks: Vec<Vec<usize>>,
}

impl EquivalenceRelation {
    pub fn new(num_elements: usize, blocks: Vec<Vec<usize>>) -> Self {
        debug_assert!(
            blocks.iter().flatten().all(|&e| e < num_elements),
            "Block element exceeds the number of elements"
        );
        Self { num_elements, blocks }
    }

    /// Groups the elements by equal annotation, blocks are ordered by the
    /// first occurrence of their annotation.
    pub fn from_annotated_elements<T>(num_elements: usize, annotated: Vec<(T, usize)>) -> Self
    where
        T: Eq + std::hash::Hash,
    {
        let mut block_of: FxHashMap<T, usize> = FxHashMap::default();
        let mut blocks: Vec<Vec<usize>> = Vec::new();

        for (annotation, element) in annotated {
            let index = *block_of.entry(annotation).or_insert_with(|| {
                blocks.push(Vec::new());
                blocks.len() - 1
            });
            blocks[index].push(element);
        }

        Self::new(num_elements, blocks)
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Vec<usize>] {
        &self.blocks
    }

    /// Splits every block such that elements end up together only when they
    /// also share a block in `other`.
    pub fn refine(&mut self, other: &EquivalenceRelation) {
        let mut other_block = vec![None; self.num_elements.max(other.num_elements)];
        for (index, block) in other.blocks.iter().enumerate() {
            for &element in block {
                other_block[element] = Some(index);
            }
        }

        let mut result = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            let mut split: Vec<(Option<usize>, Vec<usize>)> = Vec::new();
            for element in block {
                let key = other_block[element];
                match split.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, elements)) => elements.push(element),
                    None => split.push((key, vec![element])),
                }
            }
            result.extend(split.into_iter().map(|(_, elements)| elements));
        }

        self.blocks = result;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_refine() {
        let mut relation = EquivalenceRelation::new(6, vec![vec![0, 1, 2, 3], vec![4, 5]]);
        let other = EquivalenceRelation::from_annotated_elements(6, vec![('a', 0), ('b', 1), ('a', 2), ('b', 4)]);

        relation.refine(&other);
        assert_eq!(relation.blocks(), &[vec![0, 2], vec![1], vec![3], vec![4], vec![5]]);
    }
}
