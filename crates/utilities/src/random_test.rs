use log::info;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Runs the given test `iterations` times with a random number generator.
///
/// The seed is logged so that a failing run can be reproduced by setting the
/// `LDSIM_SEED` environment variable.
pub fn random_test<F>(iterations: usize, mut test: F)
where
    F: FnMut(&mut StdRng),
{
    let seed: u64 = match std::env::var("LDSIM_SEED").ok().and_then(|s| s.parse().ok()) {
        Some(seed) => seed,
        None => rand::rng().random(),
    };

    info!("random_test seed: {seed}");
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..iterations {
        test(&mut rng);
    }
}
