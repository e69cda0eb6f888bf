//! Sparse POMDP representation.

mod file;
pub mod generator;

pub use file::PomdpFile;
pub use generator::{RandomPomdpParams, random_pomdp};

use crate::numeric::{ParseValueError, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Sparse probability distribution over successor states.
pub type Distribution<V> = Vec<(usize, V)>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model has no states")]
    NoStates,
    #[error("{context}: state {state} is out of range (model has {count} states)")]
    StateOutOfRange {
        context: &'static str,
        state: usize,
        count: usize,
    },
    #[error("state {state} has no enabled choice")]
    NoChoices { state: usize },
    #[error("state {state}, choice {choice}: probabilities sum to {sum}")]
    NotStochastic {
        state: usize,
        choice: usize,
        sum: String,
    },
    #[error("state {state}, choice {choice}: negative probability")]
    NegativeProbability { state: usize, choice: usize },
    #[error(
        "observation {observation}: state {state} has {found} choices but other states with this observation have {expected}"
    )]
    ObservationChoiceMismatch {
        observation: u32,
        state: usize,
        expected: usize,
        found: usize,
    },
    #[error("reward model '{name}': state {state} must list one reward per choice")]
    RewardShape { name: String, state: usize },
    #[error("invalid number: {0}")]
    Parse(#[from] ParseValueError),
}

/// State-action rewards.
#[derive(Debug, Clone)]
pub struct RewardModel<V> {
    state_action: Vec<Vec<V>>,
}

impl<V: Value> RewardModel<V> {
    pub fn reward(&self, state: usize, choice: usize) -> V {
        self.state_action[state]
            .get(choice)
            .cloned()
            .unwrap_or_else(V::zero)
    }
}

/// Partially observable MDP with one initial state.
#[derive(Debug, Clone)]
pub struct Pomdp<V> {
    initial_state: usize,
    observations: Vec<u32>,
    num_observations: u32,
    choices: Vec<Vec<Distribution<V>>>,
    labels: BTreeMap<String, BTreeSet<usize>>,
    reward_models: BTreeMap<String, RewardModel<V>>,
    states_per_observation: Vec<Vec<usize>>,
}

impl<V: Value> Pomdp<V> {
    pub fn num_states(&self) -> usize {
        self.observations.len()
    }

    pub fn num_observations(&self) -> u32 {
        self.num_observations
    }

    pub fn num_choices_total(&self) -> usize {
        self.choices.iter().map(Vec::len).sum()
    }

    pub fn initial_state(&self) -> usize {
        self.initial_state
    }

    pub fn observation(&self, state: usize) -> u32 {
        self.observations[state]
    }

    pub fn num_choices(&self, state: usize) -> usize {
        self.choices[state].len()
    }

    pub fn transitions(&self, state: usize, choice: usize) -> &[(usize, V)] {
        &self.choices[state][choice]
    }

    pub fn label(&self, name: &str) -> Option<&BTreeSet<usize>> {
        self.labels.get(name)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn reward_model(&self, name: &str) -> Option<&RewardModel<V>> {
        self.reward_models.get(name)
    }

    pub fn states_with_observation(&self, observation: u32) -> &[usize] {
        self.states_per_observation
            .get(observation as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn max_states_per_observation(&self) -> usize {
        self.states_per_observation
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    /// Successor states of `state` under any choice.
    pub fn successors(&self, state: usize) -> impl Iterator<Item = usize> + '_ {
        self.choices[state]
            .iter()
            .flat_map(|dist| dist.iter().map(|(target, _)| *target))
    }
}

/// Incremental construction with validation in [`PomdpBuilder::build`].
#[derive(Debug, Clone)]
pub struct PomdpBuilder<V> {
    initial_state: usize,
    observations: Vec<u32>,
    choices: Vec<Vec<Distribution<V>>>,
    labels: BTreeMap<String, BTreeSet<usize>>,
    reward_models: BTreeMap<String, Vec<Vec<V>>>,
}

impl<V: Value> PomdpBuilder<V> {
    pub fn new(num_states: usize) -> Self {
        Self {
            initial_state: 0,
            observations: vec![0; num_states],
            choices: vec![Vec::new(); num_states],
            labels: BTreeMap::new(),
            reward_models: BTreeMap::new(),
        }
    }

    pub fn initial_state(mut self, state: usize) -> Self {
        self.initial_state = state;
        self
    }

    pub fn observation(mut self, state: usize, observation: u32) -> Self {
        if let Some(slot) = self.observations.get_mut(state) {
            *slot = observation;
        }
        self
    }

    pub fn observations(mut self, observations: Vec<u32>) -> Self {
        self.observations = observations;
        self
    }

    pub fn choice(mut self, state: usize, distribution: Distribution<V>) -> Self {
        if state >= self.choices.len() {
            self.choices.resize(state + 1, Vec::new());
        }
        self.choices[state].push(distribution);
        self
    }

    pub fn label(mut self, name: impl Into<String>, states: impl IntoIterator<Item = usize>) -> Self {
        self.labels
            .entry(name.into())
            .or_default()
            .extend(states);
        self
    }

    pub fn reward_model(mut self, name: impl Into<String>, state_action: Vec<Vec<V>>) -> Self {
        self.reward_models.insert(name.into(), state_action);
        self
    }

    /// Validates and freezes the model. Distributions must sum to one within
    /// `precision`; zero-probability entries are dropped and duplicate
    /// targets merged.
    pub fn build(self, precision: f64) -> Result<Pomdp<V>, ModelError> {
        let count = self.observations.len();
        if count == 0 {
            return Err(ModelError::NoStates);
        }
        if self.choices.len() != count {
            return Err(ModelError::StateOutOfRange {
                context: "choices",
                state: self.choices.len().max(count) - 1,
                count,
            });
        }
        if self.initial_state >= count {
            return Err(ModelError::StateOutOfRange {
                context: "initial state",
                state: self.initial_state,
                count,
            });
        }

        let tolerance = V::from_f64(precision);
        let mut choices = Vec::with_capacity(count);
        for (state, state_choices) in self.choices.into_iter().enumerate() {
            if state_choices.is_empty() {
                return Err(ModelError::NoChoices { state });
            }
            let mut normalized = Vec::with_capacity(state_choices.len());
            for (choice, dist) in state_choices.into_iter().enumerate() {
                normalized.push(normalize_distribution(state, choice, dist, count, &tolerance)?);
            }
            choices.push(normalized);
        }

        let num_observations = self.observations.iter().copied().max().unwrap_or(0) + 1;
        let mut states_per_observation = vec![Vec::new(); num_observations as usize];
        for (state, observation) in self.observations.iter().enumerate() {
            let group: &mut Vec<usize> = &mut states_per_observation[*observation as usize];
            if let Some(first) = group.first() {
                let expected = choices[*first].len();
                let found = choices[state].len();
                if expected != found {
                    return Err(ModelError::ObservationChoiceMismatch {
                        observation: *observation,
                        state,
                        expected,
                        found,
                    });
                }
            }
            group.push(state);
        }

        for states in self.labels.values() {
            if let Some(bad) = states.iter().find(|s| **s >= count) {
                return Err(ModelError::StateOutOfRange {
                    context: "label",
                    state: *bad,
                    count,
                });
            }
        }

        let mut reward_models = BTreeMap::new();
        for (name, state_action) in self.reward_models {
            if state_action.len() != count {
                return Err(ModelError::RewardShape {
                    name,
                    state: state_action.len().min(count),
                });
            }
            if let Some(state) = (0..count).find(|s| state_action[*s].len() != choices[*s].len()) {
                return Err(ModelError::RewardShape { name, state });
            }
            reward_models.insert(name, RewardModel { state_action });
        }

        Ok(Pomdp {
            initial_state: self.initial_state,
            observations: self.observations,
            num_observations,
            choices,
            labels: self.labels,
            reward_models,
            states_per_observation,
        })
    }
}

fn normalize_distribution<V: Value>(
    state: usize,
    choice: usize,
    dist: Distribution<V>,
    count: usize,
    tolerance: &V,
) -> Result<Distribution<V>, ModelError> {
    let mut merged: BTreeMap<usize, V> = BTreeMap::new();
    for (target, prob) in dist {
        if target >= count {
            return Err(ModelError::StateOutOfRange {
                context: "transition target",
                state: target,
                count,
            });
        }
        if prob < V::zero() {
            return Err(ModelError::NegativeProbability { state, choice });
        }
        if prob.is_zero() {
            continue;
        }
        let slot = merged.entry(target).or_insert_with(V::zero);
        *slot = slot.clone() + prob;
    }
    let sum = merged.values().fold(V::zero(), |acc, p| acc + p.clone());
    if (sum.clone() - V::one()).abs() > *tolerance {
        return Err(ModelError::NotStochastic {
            state,
            choice,
            sum: sum.to_string(),
        });
    }
    Ok(merged.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_merges_duplicate_targets() {
        let pomdp = PomdpBuilder::<f64>::new(2)
            .observation(1, 1)
            .choice(0, vec![(1, 0.25), (1, 0.25), (0, 0.5), (0, 0.0)])
            .choice(1, vec![(1, 1.0)])
            .label("goal", [1])
            .build(1e-9)
            .expect("valid model");
        assert_eq!(pomdp.transitions(0, 0), &[(0, 0.5), (1, 0.5)]);
        assert_eq!(pomdp.num_observations(), 2);
        assert_eq!(pomdp.max_states_per_observation(), 1);
    }

    #[test]
    fn rejects_non_stochastic_choice() {
        let err = PomdpBuilder::<f64>::new(1)
            .choice(0, vec![(0, 0.7)])
            .build(1e-9)
            .expect_err("sum is 0.7");
        assert!(matches!(err, ModelError::NotStochastic { state: 0, .. }));
    }

    #[test]
    fn rejects_observation_with_mismatched_choices() {
        let err = PomdpBuilder::<f64>::new(2)
            .choice(0, vec![(0, 1.0)])
            .choice(1, vec![(1, 1.0)])
            .choice(1, vec![(0, 1.0)])
            .build(1e-9)
            .expect_err("both states share observation 0");
        assert!(matches!(
            err,
            ModelError::ObservationChoiceMismatch {
                observation: 0,
                state: 1,
                ..
            }
        ));
    }

    #[test]
    fn rejects_reward_model_with_wrong_shape() {
        let err = PomdpBuilder::<f64>::new(1)
            .choice(0, vec![(0, 1.0)])
            .reward_model("cost", vec![vec![1.0, 2.0]])
            .build(1e-9)
            .expect_err("one choice but two rewards");
        assert!(matches!(err, ModelError::RewardShape { state: 0, .. }));
    }
}
