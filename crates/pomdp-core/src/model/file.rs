//! Serializable model representation (JSON or YAML).
//!
//! Probabilities and rewards may be written as numbers or as strings; strings
//! such as `"1/3"` keep exact rationals intact when loading into an exact
//! value type.

use super::{ModelError, Pomdp, PomdpBuilder};
use crate::numeric::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(f64),
}

impl Scalar {
    fn to_value<V: Value>(&self) -> Result<V, ModelError> {
        match self {
            Scalar::Text(raw) => Ok(V::parse(raw)?),
            Scalar::Number(value) => Ok(V::from_f64(*value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PomdpFile {
    #[serde(default)]
    pub initial: usize,
    /// Observation of each state.
    pub observations: Vec<u32>,
    /// Per state, per choice: `(target, probability)` pairs.
    pub choices: Vec<Vec<Vec<(usize, Scalar)>>>,
    #[serde(default)]
    pub labels: BTreeMap<String, Vec<usize>>,
    /// Per reward model, per state, per choice.
    #[serde(default)]
    pub rewards: BTreeMap<String, Vec<Vec<Scalar>>>,
}

impl PomdpFile {
    pub fn into_pomdp<V: Value>(&self, precision: f64) -> Result<Pomdp<V>, ModelError> {
        let mut builder = PomdpBuilder::<V>::new(self.observations.len())
            .initial_state(self.initial)
            .observations(self.observations.clone());
        for (state, choices) in self.choices.iter().enumerate() {
            for choice in choices {
                let mut dist = Vec::with_capacity(choice.len());
                for (target, prob) in choice {
                    dist.push((*target, prob.to_value::<V>()?));
                }
                builder = builder.choice(state, dist);
            }
        }
        for (name, states) in &self.labels {
            builder = builder.label(name.clone(), states.iter().copied());
        }
        for (name, per_state) in &self.rewards {
            let mut state_action = Vec::with_capacity(per_state.len());
            for row in per_state {
                let mut converted = Vec::with_capacity(row.len());
                for reward in row {
                    converted.push(reward.to_value::<V>()?);
                }
                state_action.push(converted);
            }
            builder = builder.reward_model(name.clone(), state_action);
        }
        builder.build(precision)
    }

    pub fn from_pomdp<V: Value>(pomdp: &Pomdp<V>) -> Self {
        let states = 0..pomdp.num_states();
        let choices = states
            .clone()
            .map(|state| {
                (0..pomdp.num_choices(state))
                    .map(|choice| {
                        pomdp
                            .transitions(state, choice)
                            .iter()
                            .map(|(target, prob)| (*target, Scalar::Text(prob.to_string())))
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let labels = pomdp
            .labels
            .iter()
            .map(|(name, set)| (name.clone(), set.iter().copied().collect()))
            .collect();
        let rewards = pomdp
            .reward_models
            .iter()
            .map(|(name, model)| {
                let rows = states
                    .clone()
                    .map(|state| {
                        (0..pomdp.num_choices(state))
                            .map(|choice| Scalar::Text(model.reward(state, choice).to_string()))
                            .collect()
                    })
                    .collect();
                (name.clone(), rows)
            })
            .collect();
        Self {
            initial: pomdp.initial_state(),
            observations: pomdp.observations.clone(),
            choices,
            labels,
            rewards,
        }
    }
}
