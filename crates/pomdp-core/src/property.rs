//! Supported properties and their analysis against a model.

use crate::model::Pomdp;
use crate::numeric::Value;
use crate::solver::{OptimizationDirection, SparseChoice, SparseMdp, ValueIterationSolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Probability mass below which a reward target counts as not reached.
const ALMOST_SURE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Property {
    /// `P{min,max}=? [!avoid U target]` over state labels.
    Reachability {
        direction: OptimizationDirection,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avoid: Option<String>,
    },
    /// `R{reward_model}{min,max}=? [F target]`.
    ExpectedReward {
        direction: OptimizationDirection,
        reward_model: String,
        target: String,
    },
}

impl Property {
    pub fn reachability(direction: OptimizationDirection, target: impl Into<String>) -> Self {
        Self::Reachability {
            direction,
            target: target.into(),
            avoid: None,
        }
    }

    pub fn expected_reward(
        direction: OptimizationDirection,
        reward_model: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::ExpectedReward {
            direction,
            reward_model: reward_model.into(),
            target: target.into(),
        }
    }

    pub fn direction(&self) -> OptimizationDirection {
        match self {
            Self::Reachability { direction, .. } | Self::ExpectedReward { direction, .. } => *direction,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
    #[error("unknown reward model '{0}'")]
    UnknownRewardModel(String),
    #[error("target states are not observation-closed: observation {observation} mixes target and non-target states")]
    TargetNotObservationClosed { observation: u32 },
    #[error("sink state {state} can reach the non-sink state {successor}")]
    SinkStatesNotClosed { state: usize, successor: usize },
    #[error("target is not reached almost surely under every scheduler (minimal probability {probability})")]
    RewardTargetNotAlmostSure { probability: String },
}

/// Everything the approximation needs to know about a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaInformation {
    direction: OptimizationDirection,
    target_states: BTreeSet<usize>,
    target_observations: BTreeSet<u32>,
    sink_states: BTreeSet<usize>,
    reward_model: Option<String>,
}

impl FormulaInformation {
    pub fn analyze<V: Value>(pomdp: &Pomdp<V>, property: &Property) -> Result<Self, PropertyError> {
        let (target_label, avoid_label, reward_model) = match property {
            Property::Reachability { target, avoid, .. } => (target, avoid.as_ref(), None),
            Property::ExpectedReward {
                reward_model, target, ..
            } => {
                if pomdp.reward_model(reward_model).is_none() {
                    return Err(PropertyError::UnknownRewardModel(reward_model.clone()));
                }
                (target, None, Some(reward_model.clone()))
            }
        };
        let target_states = lookup_label(pomdp, target_label)?.clone();

        let mut target_observations = BTreeSet::new();
        for state in &target_states {
            let observation = pomdp.observation(*state);
            if target_observations.insert(observation)
                && pomdp
                    .states_with_observation(observation)
                    .iter()
                    .any(|s| !target_states.contains(s))
            {
                return Err(PropertyError::TargetNotObservationClosed { observation });
            }
        }

        let sink_states: BTreeSet<usize> = match avoid_label {
            Some(label) => lookup_label(pomdp, label)?
                .difference(&target_states)
                .copied()
                .collect(),
            None => BTreeSet::new(),
        };
        for state in &sink_states {
            if let Some(successor) = pomdp.successors(*state).find(|s| !sink_states.contains(s)) {
                return Err(PropertyError::SinkStatesNotClosed {
                    state: *state,
                    successor,
                });
            }
        }

        let info = Self {
            direction: property.direction(),
            target_states,
            target_observations,
            sink_states,
            reward_model,
        };
        if info.reward_model.is_some() {
            info.check_target_almost_sure(pomdp)?;
        }
        tracing::debug!(
            target: "pomdp_core::property",
            targets = info.target_states.len(),
            target_observations = ?info.target_observations,
            sinks = info.sink_states.len(),
            "analyzed property"
        );
        Ok(info)
    }

    /// Expected rewards are only finite if every scheduler reaches the target
    /// with probability one.
    fn check_target_almost_sure<V: Value>(&self, pomdp: &Pomdp<V>) -> Result<(), PropertyError> {
        let mut mdp = SparseMdp::with_states(pomdp.num_states());
        for state in 0..pomdp.num_states() {
            if self.target_states.contains(&state) {
                mdp.fixed[state] = Some(1.0);
                continue;
            }
            mdp.choices[state] = (0..pomdp.num_choices(state))
                .map(|choice| SparseChoice {
                    transitions: pomdp
                        .transitions(state, choice)
                        .iter()
                        .map(|(target, prob)| (*target, prob.to_f64()))
                        .collect(),
                    reward: 0.0,
                })
                .collect();
        }
        let outcome = ValueIterationSolver::default().solve(&mdp, OptimizationDirection::Minimize);
        let probability = outcome.values[pomdp.initial_state()];
        if probability < 1.0 - ALMOST_SURE_TOLERANCE {
            return Err(PropertyError::RewardTargetNotAlmostSure {
                probability: probability.to_string(),
            });
        }
        Ok(())
    }

    pub fn direction(&self) -> OptimizationDirection {
        self.direction
    }

    pub fn minimize(&self) -> bool {
        self.direction.is_minimize()
    }

    pub fn target_states(&self) -> &BTreeSet<usize> {
        &self.target_states
    }

    pub fn target_observations(&self) -> &BTreeSet<u32> {
        &self.target_observations
    }

    pub fn sink_states(&self) -> &BTreeSet<usize> {
        &self.sink_states
    }

    pub fn reward_model(&self) -> Option<&str> {
        self.reward_model.as_deref()
    }

    pub fn computes_rewards(&self) -> bool {
        self.reward_model.is_some()
    }
}

fn lookup_label<'p, V: Value>(pomdp: &'p Pomdp<V>, label: &str) -> Result<&'p BTreeSet<usize>, PropertyError> {
    pomdp
        .label(label)
        .ok_or_else(|| PropertyError::UnknownLabel(label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PomdpBuilder;

    fn chain() -> PomdpBuilder<f64> {
        // 0 -> 1 (goal) or 2 (trap); 1 and 2 absorbing
        PomdpBuilder::new(3)
            .observations(vec![0, 1, 2])
            .choice(0, vec![(1, 0.5), (2, 0.5)])
            .choice(1, vec![(1, 1.0)])
            .choice(2, vec![(2, 1.0)])
            .label("goal", [1])
            .label("trap", [2])
    }

    #[test]
    fn reachability_collects_targets_and_sinks() {
        let pomdp = chain().build(1e-9).expect("valid");
        let property = Property::Reachability {
            direction: OptimizationDirection::Maximize,
            target: "goal".into(),
            avoid: Some("trap".into()),
        };
        let info = FormulaInformation::analyze(&pomdp, &property).expect("supported");
        assert_eq!(info.target_observations(), &BTreeSet::from([1]));
        assert_eq!(info.sink_states(), &BTreeSet::from([2]));
        assert!(!info.minimize());
        assert!(!info.computes_rewards());
    }

    #[test]
    fn unknown_label_is_rejected() {
        let pomdp = chain().build(1e-9).expect("valid");
        let property = Property::reachability(OptimizationDirection::Minimize, "missing");
        assert_eq!(
            FormulaInformation::analyze(&pomdp, &property),
            Err(PropertyError::UnknownLabel("missing".into()))
        );
    }

    #[test]
    fn target_must_be_observation_closed() {
        let pomdp = chain()
            .observations(vec![0, 1, 1])
            .build(1e-9)
            .expect("valid");
        let property = Property::reachability(OptimizationDirection::Maximize, "goal");
        assert_eq!(
            FormulaInformation::analyze(&pomdp, &property),
            Err(PropertyError::TargetNotObservationClosed { observation: 1 })
        );
    }

    #[test]
    fn sink_states_must_be_closed() {
        let pomdp = chain().label("leaky", [0]).build(1e-9).expect("valid");
        let property = Property::Reachability {
            direction: OptimizationDirection::Maximize,
            target: "goal".into(),
            avoid: Some("leaky".into()),
        };
        assert!(matches!(
            FormulaInformation::analyze(&pomdp, &property),
            Err(PropertyError::SinkStatesNotClosed { state: 0, .. })
        ));
    }

    #[test]
    fn reward_target_must_be_reached_almost_surely() {
        let pomdp = chain()
            .reward_model("steps", vec![vec![1.0], vec![0.0], vec![0.0]])
            .build(1e-9)
            .expect("valid");
        let property = Property::expected_reward(OptimizationDirection::Minimize, "steps", "goal");
        assert!(matches!(
            FormulaInformation::analyze(&pomdp, &property),
            Err(PropertyError::RewardTargetNotAlmostSure { .. })
        ));
        let unknown = Property::expected_reward(OptimizationDirection::Minimize, "cost", "goal");
        assert_eq!(
            FormulaInformation::analyze(&pomdp, &unknown),
            Err(PropertyError::UnknownRewardModel("cost".into()))
        );
    }

    #[test]
    fn property_reads_from_yaml_style_json() {
        let property: Property = serde_json::from_str(
            r#"{"kind": "expected_reward", "direction": "min", "reward_model": "steps", "target": "goal"}"#,
        )
        .expect("parse");
        assert_eq!(property.direction(), OptimizationDirection::Minimize);
    }
}
