//! Seeded synthetic POMDPs for tests and benchmark runs.

use super::{Pomdp, PomdpBuilder};
use crate::numeric::Value;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const GOAL_LABEL: &str = "goal";
pub const STEPS_REWARD: &str = "steps";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomPomdpParams {
    /// Number of non-goal states.
    pub states: usize,
    /// Number of observations shared by the non-goal states.
    pub observations: u32,
    pub actions: usize,
    /// Maximum number of successors per choice.
    pub branching: usize,
    pub seed: u64,
}

impl Default for RandomPomdpParams {
    fn default() -> Self {
        Self {
            states: 6,
            observations: 2,
            actions: 2,
            branching: 2,
            seed: 7,
        }
    }
}

/// Generates a POMDP whose last state is an absorbing goal with its own
/// observation. Transition weights are small integers, so probabilities are
/// exact in both value types. Every choice of a non-goal state reaches the
/// goal with positive probability, which keeps expected rewards finite.
pub fn random_pomdp<V: Value>(params: RandomPomdpParams) -> Pomdp<V> {
    let mut rng = SmallRng::seed_from_u64(params.seed);
    let states = params.states.max(1);
    let observations = params.observations.max(1);
    let actions = params.actions.max(1);
    let branching = params.branching.max(1);
    let goal = states;

    let mut builder = PomdpBuilder::<V>::new(states + 1)
        .observation(goal, observations)
        .label(GOAL_LABEL, [goal]);
    for state in 0..states {
        let observation = if state == 0 {
            0
        } else {
            rng.gen_range(0..observations)
        };
        builder = builder.observation(state, observation);
    }

    let mut steps = Vec::with_capacity(states + 1);
    for state in 0..states {
        for _ in 0..actions {
            let successors = rng.gen_range(1..=branching);
            let mut weighted: Vec<(usize, u64)> = (0..successors)
                .map(|_| (rng.gen_range(0..states), rng.gen_range(1..=4u64)))
                .collect();
            weighted.push((goal, 1));
            let total: u64 = weighted.iter().map(|(_, w)| *w).sum();
            let dist = weighted
                .into_iter()
                .map(|(target, w)| (target, V::from_u64(w) / V::from_u64(total)))
                .collect();
            builder = builder.choice(state, dist);
        }
        steps.push(vec![V::one(); actions]);
    }
    for _ in 0..actions {
        builder = builder.choice(goal, vec![(goal, V::one())]);
    }
    steps.push(vec![V::zero(); actions]);

    // Weights are exact and every choice is non-empty, so validation cannot fail.
    match builder.reward_model(STEPS_REWARD, steps).build(1e-9) {
        Ok(pomdp) => pomdp,
        Err(err) => unreachable!("generated model is invalid: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_for_a_seed() {
        let params = RandomPomdpParams::default();
        let a = random_pomdp::<f64>(params);
        let b = random_pomdp::<f64>(params);
        for state in 0..a.num_states() {
            assert_eq!(a.observation(state), b.observation(state));
            for choice in 0..a.num_choices(state) {
                assert_eq!(a.transitions(state, choice), b.transitions(state, choice));
            }
        }
    }

    #[test]
    fn goal_is_absorbing_with_own_observation() {
        let pomdp = random_pomdp::<f64>(RandomPomdpParams::default());
        let goal = pomdp.num_states() - 1;
        assert_eq!(pomdp.label(GOAL_LABEL).map(|s| s.contains(&goal)), Some(true));
        assert_eq!(pomdp.states_with_observation(pomdp.observation(goal)), &[goal]);
        assert_eq!(pomdp.transitions(goal, 0), &[(goal, 1.0)]);
    }
}
