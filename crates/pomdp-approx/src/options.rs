//! Tunables of the approximation and the heuristic parameters derived from them.

use pomdp_core::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// User-facing options. Thresholds are given as floats and converted to the
/// value type of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproximationOptions {
    /// Build the over-approximation (triangulated grid MDP).
    pub discretize: bool,
    /// Build the under-approximation (unfolded belief MDP).
    pub unfold: bool,
    /// Refine both approximations in a loop instead of building them once.
    pub refine: bool,
    pub refine_step_limit: Option<u64>,
    pub refine_precision: f64,
    pub numeric_precision: f64,
    pub exploration_time_limit_secs: Option<u64>,
    pub resolution_init: u64,
    pub resolution_factor: f64,
    /// Zero selects a size automatically.
    pub size_threshold_init: u64,
    pub size_threshold_factor: f64,
    pub gap_threshold_init: f64,
    pub gap_threshold_factor: f64,
    pub optimal_choice_value_threshold_init: f64,
    pub optimal_choice_value_threshold_factor: f64,
    pub obs_threshold_init: f64,
    pub obs_threshold_increment_factor: f64,
}

impl Default for ApproximationOptions {
    fn default() -> Self {
        Self {
            discretize: true,
            unfold: true,
            refine: true,
            refine_step_limit: None,
            refine_precision: 1e-4,
            numeric_precision: 1e-9,
            exploration_time_limit_secs: None,
            resolution_init: 2,
            resolution_factor: 2.0,
            size_threshold_init: 0,
            size_threshold_factor: 4.0,
            gap_threshold_init: 0.1,
            gap_threshold_factor: 0.25,
            optimal_choice_value_threshold_init: 1e-3,
            optimal_choice_value_threshold_factor: 1.0,
            obs_threshold_init: 0.1,
            obs_threshold_increment_factor: 0.1,
        }
    }
}

impl ApproximationOptions {
    pub fn exploration_time_limit(&self) -> Option<Duration> {
        self.exploration_time_limit_secs.map(Duration::from_secs)
    }

    /// Checks ranges without looking at a model.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.resolution_init == 0 {
            return Err(invalid("resolution_init", "resolution must be at least 1"));
        }
        for (field, value) in [
            ("refine_precision", self.refine_precision),
            ("numeric_precision", self.numeric_precision),
            ("gap_threshold_init", self.gap_threshold_init),
            ("gap_threshold_factor", self.gap_threshold_factor),
            ("size_threshold_factor", self.size_threshold_factor),
            ("optimal_choice_value_threshold_init", self.optimal_choice_value_threshold_init),
            ("optimal_choice_value_threshold_factor", self.optimal_choice_value_threshold_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "must be a finite, non-negative number"));
            }
        }
        if !self.resolution_factor.is_finite() || self.resolution_factor < 1.0 {
            return Err(invalid("resolution_factor", "resolutions may only grow (factor >= 1)"));
        }
        for (field, value) in [
            ("obs_threshold_init", self.obs_threshold_init),
            ("obs_threshold_increment_factor", self.obs_threshold_increment_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, "must lie in [0, 1]"));
            }
        }
        Ok(())
    }

    /// Initial parameters of the over-approximation heuristic.
    pub fn initial_over_parameters<V: Value>(&self) -> HeuristicParameters<V> {
        HeuristicParameters {
            gap_threshold: V::from_f64(self.gap_threshold_init),
            size_threshold: match self.size_threshold_init {
                0 => u64::MAX,
                size => size,
            },
            observation_threshold: V::from_f64(self.obs_threshold_init),
            optimal_choice_value_epsilon: V::from_f64(self.optimal_choice_value_threshold_init),
        }
    }

    /// Initial parameters of the under-approximation heuristic. A zero size
    /// threshold is replaced by `automatic_size`.
    pub fn initial_under_parameters<V: Value>(&self, automatic_size: u64) -> HeuristicParameters<V> {
        HeuristicParameters {
            gap_threshold: V::from_f64(self.gap_threshold_init),
            size_threshold: match self.size_threshold_init {
                0 => automatic_size,
                size => size,
            },
            observation_threshold: V::zero(),
            optimal_choice_value_epsilon: V::from_f64(self.optimal_choice_value_threshold_init),
        }
    }
}

fn invalid(field: &str, message: &str) -> OptionsError {
    OptionsError::InvalidField {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}

/// Knobs of one approximation build; tightened between refinement rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicParameters<V> {
    /// States whose relative bound gap is not above this are truncated.
    pub gap_threshold: V,
    /// Budget of explored (or rewired) states; `u64::MAX` is unbounded.
    pub size_threshold: u64,
    /// Observations rated at or below this get a finer resolution.
    pub observation_threshold: V,
    pub optimal_choice_value_epsilon: V,
}

impl<V: Value> HeuristicParameters<V> {
    /// Next-round over-approximation parameters for an MDP of `mdp_states`.
    pub fn tighten_over(&mut self, options: &ApproximationOptions, mdp_states: usize) {
        self.tighten_common(options, mdp_states);
        let one = V::one();
        let increment = V::from_f64(options.obs_threshold_increment_factor);
        self.observation_threshold =
            self.observation_threshold.clone() + increment * (one - self.observation_threshold.clone());
    }

    /// Next-round under-approximation parameters for an MDP of `mdp_states`.
    pub fn tighten_under(&mut self, options: &ApproximationOptions, mdp_states: usize) {
        self.tighten_common(options, mdp_states);
    }

    fn tighten_common(&mut self, options: &ApproximationOptions, mdp_states: usize) {
        self.gap_threshold = self.gap_threshold.clone() * V::from_f64(options.gap_threshold_factor);
        self.size_threshold =
            (V::from_u64(mdp_states as u64) * V::from_f64(options.size_threshold_factor)).to_u64_saturating();
        self.optimal_choice_value_epsilon = self.optimal_choice_value_epsilon.clone()
            * V::from_f64(options.optimal_choice_value_threshold_factor);
    }
}
