use log::warn;
use rand::Rng;

/// Computes a partition of at most `target` groups from buckets of states.
/// The first buckets are the first to be combined when the budget is tight.
///
/// A bucket becomes singleton groups when the remaining budget allows it.
/// Otherwise random pairs of groups are merged until the bucket fits, or the
/// whole bucket becomes one group. States in no bucket are pruned.
pub fn compute_bucket_abstraction<R: Rng>(buckets: &[Vec<usize>], target: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut show_combine_buckets_warning = true;
    let mut result: Vec<Vec<usize>> = Vec::with_capacity(target.min(1024));

    let mut num_states_to_go: usize = buckets.iter().map(|bucket| bucket.len()).sum();
    for (bucket_no, bucket) in buckets.iter().enumerate() {
        let remaining_state_budget = target as i64 - result.len() as i64;
        num_states_to_go -= bucket.len();
        let budget_for_this_bucket = remaining_state_budget - num_states_to_go as i64;

        if budget_for_this_bucket >= bucket.len() as i64 {
            // Every state of the bucket becomes a singleton group.
            result.extend(bucket.iter().map(|&state| vec![state]));
        } else if budget_for_this_bucket <= 1 {
            // The whole bucket must form one group.
            let remaining_buckets = (buckets.len() - bucket_no) as i64;
            if remaining_state_budget >= remaining_buckets || bucket_no == 0 {
                result.push(Vec::new());
            }

            if remaining_state_budget < remaining_buckets && show_combine_buckets_warning {
                show_combine_buckets_warning = false;
                warn!("Very small node limit, must combine buckets.");
            }

            if let Some(group) = result.last_mut() {
                group.extend_from_slice(bucket);
            }
        } else {
            // Combine random groups until the budget of the bucket is met.
            let budget = budget_for_this_bucket as usize;
            let mut groups: Vec<Vec<usize>> = bucket.iter().map(|&state| vec![state]).collect();
            while groups.len() > budget {
                let pos1 = rng.random_range(0..groups.len());
                let mut pos2 = rng.random_range(0..groups.len());
                while pos2 == pos1 {
                    pos2 = rng.random_range(0..groups.len());
                }

                let merged = groups.swap_remove(pos2);
                // The removal moved the last group into pos2, which may have been pos1.
                let pos1 = if pos1 == groups.len() { pos2 } else { pos1 };
                groups[pos1].extend(merged);
            }

            result.extend(groups);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    use ldsim_utilities::random_test;
    use test_log::test;

    #[test]
    fn test_bucket_abstraction_respects_target() {
        random_test(100, |rng| {
            let num_buckets = rng.random_range(1..6);
            let mut next_state = 0;
            let buckets: Vec<Vec<usize>> = (0..num_buckets)
                .map(|_| {
                    let size = rng.random_range(1..6);
                    next_state += size;
                    (next_state - size..next_state).collect()
                })
                .collect();

            let target = rng.random_range(1..=next_state);
            let groups = compute_bucket_abstraction(&buckets, target, rng);
            assert!(groups.len() <= target.max(1));

            let mut states: Vec<usize> = groups.iter().flatten().copied().collect();
            states.sort_unstable();
            assert_eq!(states, (0..next_state).collect::<Vec<_>>(), "Every state ends up in exactly one group");
            assert!(groups.iter().all(|group| !group.is_empty()));
        });
    }

    #[test]
    fn test_bucket_abstraction_singletons() {
        let mut rng = rand::rng();
        let groups = compute_bucket_abstraction(&[vec![0, 2], vec![1]], 3, &mut rng);
        assert_eq!(groups, vec![vec![0], vec![2], vec![1]]);
    }
}
