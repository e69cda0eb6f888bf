//! Per-state value bounds used before any belief MDP has been solved.

use crate::model::Pomdp;
use crate::numeric::Value;
use crate::property::FormulaInformation;
use crate::solver::{OptimizationDirection, SparseChoice, SparseMdp, ValueIterationSolver};

/// Lower and upper value of every POMDP state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrivialBounds<V> {
    pub lower: Vec<V>,
    pub upper: Vec<V>,
}

impl<V: Value> TrivialBounds<V> {
    /// The fully observable optimum is the optimistic side. The pessimistic
    /// side is the value of an observation-based memoryless scheduler that
    /// picks, per observation, the action with the best summed fully
    /// observable Q value.
    pub fn compute(pomdp: &Pomdp<V>, info: &FormulaInformation, solver: &ValueIterationSolver) -> Self {
        let direction = info.direction();
        let mdp = fully_observable_mdp(pomdp, info);
        let optimum = solver.solve_values(&mdp, direction);

        let mut policy = vec![0usize; pomdp.num_states()];
        for observation in 0..pomdp.num_observations() {
            let states = pomdp.states_with_observation(observation);
            let Some(first) = states.first() else {
                continue;
            };
            let mut best: Option<(usize, V)> = None;
            for action in 0..pomdp.num_choices(*first) {
                let summed = states.iter().fold(V::zero(), |acc, s| {
                    acc + mdp.choice_value(*s, action, &optimum.values)
                });
                let better = best
                    .as_ref()
                    .is_none_or(|(_, incumbent)| direction.improves(&summed, incumbent));
                if better {
                    best = Some((action, summed));
                }
            }
            let action = best.map_or(0, |(action, _)| action);
            for state in states {
                policy[*state] = action;
            }
        }
        let scheduler = solver.evaluate_values(&mdp, &policy);

        let (lower, upper) = match direction {
            OptimizationDirection::Minimize => (optimum.values, scheduler.values),
            OptimizationDirection::Maximize => (scheduler.values, optimum.values),
        };
        let mut bounds = Self { lower, upper };
        bounds.clamp();
        bounds
    }

    /// Repairs solver noise that put an upper bound below its lower bound.
    fn clamp(&mut self) {
        for (state, (lower, upper)) in self.lower.iter().zip(self.upper.iter_mut()).enumerate() {
            if *upper < *lower {
                tracing::warn!(
                    target: "pomdp_core::bounds",
                    state,
                    lower = %lower,
                    upper = %upper,
                    "upper state bound below lower bound; clamping"
                );
                *upper = lower.clone();
            }
        }
    }

    pub fn at(&self, state: usize) -> (&V, &V) {
        (&self.lower[state], &self.upper[state])
    }
}

/// The POMDP with its observations ignored. Target states are fixed at one
/// (probabilities) or zero (rewards); sink states at zero.
pub fn fully_observable_mdp<V: Value>(pomdp: &Pomdp<V>, info: &FormulaInformation) -> SparseMdp<V> {
    let mut mdp = SparseMdp::with_states(pomdp.num_states());
    let rewards = info
        .reward_model()
        .and_then(|name| pomdp.reward_model(name));
    for state in 0..pomdp.num_states() {
        if info.target_states().contains(&state) {
            mdp.fixed[state] = Some(if rewards.is_some() { V::zero() } else { V::one() });
        } else if info.sink_states().contains(&state) {
            mdp.fixed[state] = Some(V::zero());
        }
        mdp.choices[state] = (0..pomdp.num_choices(state))
            .map(|choice| SparseChoice {
                transitions: pomdp.transitions(state, choice).to_vec(),
                reward: rewards.map_or_else(V::zero, |model| model.reward(state, choice)),
            })
            .collect();
    }
    mdp
}
