use num::BigRational;
use pomdp_core::belief::freudenthal;
use pomdp_core::model::{RandomPomdpParams, random_pomdp};
use pomdp_core::{BeliefManager, Value};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn random_belief(rng: &mut SmallRng, support: usize) -> Vec<(usize, BigRational)> {
    let weights: Vec<u64> = (0..support).map(|_| rng.gen_range(1..=20)).collect();
    let total: u64 = weights.iter().sum();
    weights
        .into_iter()
        .enumerate()
        .map(|(state, w)| (state, BigRational::from_u64(w) / BigRational::from_u64(total)))
        .collect()
}

#[test]
fn corners_recombine_exactly_for_random_beliefs() {
    let mut rng = SmallRng::seed_from_u64(2024);
    let zero = BigRational::from_u64(0);
    for _ in 0..200 {
        let support = rng.gen_range(1..=6);
        let resolution = rng.gen_range(1..=12);
        let belief = random_belief(&mut rng, support);
        let corners = freudenthal(&belief, resolution, &zero);

        assert!(!corners.is_empty());
        assert!(corners.len() <= support);
        let weights = corners
            .iter()
            .fold(zero.clone(), |acc, corner| acc + corner.weight.clone());
        assert_eq!(weights, BigRational::from_u64(1));
        for (state, prob) in &belief {
            let recombined = corners.iter().fold(zero.clone(), |acc, corner| {
                let mass = corner
                    .distribution
                    .iter()
                    .find(|(s, _)| s == state)
                    .map_or(zero.clone(), |(_, v)| v.clone());
                acc + mass * corner.weight.clone()
            });
            assert_eq!(&recombined, prob);
        }
    }
}

#[test]
fn triangulated_successors_of_random_models_are_distributions() {
    for seed in 0..10 {
        let pomdp = random_pomdp::<BigRational>(RandomPomdpParams {
            states: 8,
            observations: 2,
            actions: 2,
            branching: 3,
            seed,
        });
        let resolutions = vec![3u64; pomdp.num_observations() as usize];
        let mut manager = BeliefManager::new(&pomdp, 0.0);
        let initial = manager.initial_belief();
        for action in 0..manager.number_of_choices(initial) {
            let exact = manager.expand(initial, action);
            let grid = manager.expand_and_triangulate(initial, action, &resolutions);
            let exact_total = exact
                .iter()
                .fold(BigRational::from_u64(0), |acc, (_, p)| acc + p.clone());
            let grid_total = grid
                .iter()
                .fold(BigRational::from_u64(0), |acc, (_, p)| acc + p.clone());
            assert_eq!(exact_total, BigRational::from_u64(1));
            assert_eq!(grid_total, BigRational::from_u64(1));
            for (corner, _) in &grid {
                let belief = manager.belief(*corner);
                let scaled_ok = belief.distribution().values().all(|p| {
                    let scaled = p.clone() * BigRational::from_u64(3);
                    Value::floor(&scaled) == scaled
                });
                assert!(scaled_ok, "corner {corner} is not on the resolution-3 grid");
            }
        }
    }
}
