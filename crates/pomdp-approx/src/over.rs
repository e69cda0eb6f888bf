//! Over-approximation: belief successors are triangulated onto a grid whose
//! resolution is chosen per observation.

use crate::heuristic::observation_ratings;
use crate::options::{ApproximationOptions, HeuristicParameters};
use crate::statistics::ApproximationStatistics;
use crate::termination::{CancellationToken, ExplorationBudget, StopStatus};
use num::{BigInt, BigRational, ToPrimitive};
use pomdp_core::{
    BeliefId, BeliefManager, BeliefMdpExplorer, ExplorationMode, FormulaInformation, OptimizationDirection, Pomdp,
    TrivialBounds, Value, relative_gap,
};
use std::collections::BTreeSet;
use std::time::Duration;

/// Outcome of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// The MDP was built and solved. `fixpoint` is set when refining could
    /// not change it any further.
    Finished { fixpoint: bool },
    /// Cancelled; the previously solved MDP (if any) is kept.
    Aborted,
}

/// How a non-target state is handled in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatePlan {
    ExploreAll,
    TruncateAll,
    /// Decide per action; with `restore_all` no action may be rewired now.
    CheckRewire { restore_all: bool },
}

pub struct OverApproximationBuilder<'a, V: Value> {
    explorer: BeliefMdpExplorer<'a, V>,
    resolutions: Vec<u64>,
    resolution_factor: BigRational,
    target_observations: BTreeSet<u32>,
    direction: OptimizationDirection,
    computes_rewards: bool,
    time_limit: Option<Duration>,
}

impl<'a, V: Value> OverApproximationBuilder<'a, V> {
    pub fn new(
        pomdp: &'a Pomdp<V>,
        info: &FormulaInformation,
        bounds: &TrivialBounds<V>,
        options: &ApproximationOptions,
    ) -> Self {
        let mut manager = BeliefManager::new(pomdp, options.numeric_precision);
        manager.set_reward_model(info.reward_model());
        Self {
            explorer: BeliefMdpExplorer::new(manager, bounds.lower.clone(), bounds.upper.clone()),
            resolutions: vec![options.resolution_init; pomdp.num_observations() as usize],
            resolution_factor: BigRational::from_float(options.resolution_factor)
                .unwrap_or_else(|| BigRational::from_integer(BigInt::from(1))),
            target_observations: info.target_observations().clone(),
            direction: info.direction(),
            computes_rewards: info.computes_rewards(),
            time_limit: options.exploration_time_limit(),
        }
    }

    pub fn explorer(&self) -> &BeliefMdpExplorer<'a, V> {
        &self.explorer
    }

    /// Current resolution of every observation.
    pub fn resolutions(&self) -> &[u64] {
        &self.resolutions
    }

    pub fn max_resolution(&self) -> u64 {
        self.resolutions.iter().copied().max().unwrap_or(1)
    }

    pub fn value_at_initial_state(&self) -> Option<V> {
        self.explorer.computed_value_at_initial_state()
    }

    pub fn num_states(&self) -> usize {
        self.explorer.num_explored_states()
    }

    /// Lets the explored values replace the state bounds on the side this
    /// approximation computes.
    pub fn take_current_values_as_bounds(&mut self) {
        if self.direction.is_minimize() {
            self.explorer.take_current_values_as_lower_bounds();
        } else {
            self.explorer.take_current_values_as_upper_bounds();
        }
    }

    /// Builds the grid MDP from scratch or, with `refine`, by refining the
    /// resolution of poorly rated observations and rewiring the previous MDP.
    pub fn build(
        &mut self,
        refine: bool,
        params: &HeuristicParameters<V>,
        stats: &mut ApproximationStatistics,
        cancel: &CancellationToken,
    ) -> BuildStatus {
        let budget = ExplorationBudget::start(self.time_limit, cancel.clone());
        self.build_with_budget(refine, params, stats, &budget)
    }

    /// [`Self::build`] polling the given budget instead of a fresh one.
    pub fn build_with_budget(
        &mut self,
        refine: bool,
        params: &HeuristicParameters<V>,
        stats: &mut ApproximationStatistics,
        budget: &ExplorationBudget,
    ) -> BuildStatus {
        let mut fixpoint = true;
        let old_max_resolution = self.max_resolution();
        stats.build_time.start();

        let mut refined_observations = BTreeSet::new();
        if !refine {
            let mode = if self.computes_rewards {
                ExplorationMode::Rewards
            } else {
                ExplorationMode::Probabilities
            };
            self.explorer.start_new_exploration(mode);
        } else {
            self.explorer
                .compute_optimal_choices_and_reachable_states(&params.optimal_choice_value_epsilon, true);
            let ratings = observation_ratings(&self.explorer, &self.resolutions, old_max_resolution);
            if ratings.iter().any(|rating| *rating < V::one()) {
                fixpoint = false;
            }
            for (observation, rating) in ratings.iter().enumerate() {
                if *rating <= params.observation_threshold {
                    refined_observations.insert(observation as u32);
                }
            }
            tracing::debug!(
                target: "pomdp_approx::over",
                refined = refined_observations.len(),
                observations = ratings.len(),
                "refining observation resolutions"
            );
            for observation in &refined_observations {
                let slot = &mut self.resolutions[*observation as usize];
                *slot = grow_resolution(*slot, &self.resolution_factor);
            }
            self.explorer.restart_exploration();
        }
        stats.max_resolution = Some(self.max_resolution());

        let mut time_limit_exceeded = false;
        let mut rewired_or_explored: u64 = 0;
        let mut aborted = false;
        while self.explorer.has_unexplored_state() {
            match budget.should_stop() {
                StopStatus::Cancelled => {
                    aborted = true;
                    break;
                }
                StopStatus::TimeLimitExceeded if !time_limit_exceeded => {
                    tracing::info!(target: "pomdp_approx::over", "exploration time limit exceeded");
                    time_limit_exceeded = true;
                    fixpoint = false;
                }
                _ => {}
            }

            let Some(belief) = self.explorer.explore_next_state() else {
                break;
            };
            let has_old_behavior = refine && self.explorer.current_state_has_old_behavior();
            if !has_old_behavior {
                fixpoint = false;
            }
            let observation = self.explorer.belief_manager().observation(belief);
            if self.target_observations.contains(&observation) {
                self.explorer.set_current_state_is_target();
                self.explorer.add_selfloop_transition();
                continue;
            }

            let gap = relative_gap(
                &self.explorer.lower_value_bound_at_current_state(),
                &self.explorer.upper_value_bound_at_current_state(),
            );
            let worth_exploring = !time_limit_exceeded
                && gap > params.gap_threshold
                && rewired_or_explored < params.size_threshold;
            let reachable = has_old_behavior && self.explorer.current_state_is_optimal_scheduler_reachable();

            let plan = if !has_old_behavior {
                if worth_exploring {
                    StatePlan::ExploreAll
                } else {
                    StatePlan::TruncateAll
                }
            } else if self.explorer.current_state_was_truncated() {
                if worth_exploring && reachable {
                    fixpoint = false;
                    StatePlan::ExploreAll
                } else {
                    // Truncating again picks up the updated bounds.
                    if reachable && !gap.is_zero() {
                        fixpoint = false;
                    }
                    StatePlan::TruncateAll
                }
            } else {
                StatePlan::CheckRewire {
                    restore_all: !(worth_exploring && reachable),
                }
            };
            if plan == StatePlan::TruncateAll {
                self.explorer.set_current_state_is_truncated();
            }

            let mut expanded_any = false;
            for action in 0..self.explorer.belief_manager().number_of_choices(belief) {
                let mut expand = matches!(plan, StatePlan::ExploreAll | StatePlan::TruncateAll);
                if let StatePlan::CheckRewire { restore_all } = plan {
                    let was_delayed = self.explorer.current_state_action_exploration_was_delayed(action);
                    if was_delayed
                        || self
                            .explorer
                            .current_state_has_successor_observation_in(action, &refined_observations)
                    {
                        let was_optimal = self.explorer.action_at_current_state_was_optimal(action);
                        if !restore_all && was_optimal {
                            expand = true;
                            fixpoint = false;
                        } else {
                            self.explorer.set_current_choice_is_delayed(action);
                            if !was_delayed || (reachable && was_optimal && !gap.is_zero()) {
                                fixpoint = false;
                            }
                        }
                    }
                }

                if !expand {
                    self.explorer.restore_old_behavior_at_current_state(action);
                } else if plan == StatePlan::TruncateAll {
                    expanded_any = true;
                    self.truncate_action(belief, action);
                } else {
                    expanded_any = true;
                    self.expand_action(belief, action);
                }
            }
            if expanded_any {
                rewired_or_explored += 1;
            }
        }

        if aborted || budget.is_cancelled() {
            stats.record_aborted_build(self.explorer.current_number_of_states());
            stats.build_time.stop();
            tracing::info!(target: "pomdp_approx::over", "over-approximation build cancelled");
            return BuildStatus::Aborted;
        }

        self.explorer.finish_exploration();
        stats.build_time.stop();

        stats.check_time.start();
        self.explorer.compute_values_of_explored_mdp(self.direction);
        stats.check_time.stop();
        stats.record_finished_build(self.explorer.num_explored_states());
        tracing::debug!(
            target: "pomdp_approx::over",
            states = self.explorer.num_explored_states(),
            rewired_or_explored,
            fixpoint,
            "over-approximation built"
        );
        BuildStatus::Finished { fixpoint }
    }

    /// Connects `action` to the triangulated successors of `belief`.
    fn expand_action(&mut self, belief: BeliefId, action: usize) {
        let successors = self
            .explorer
            .belief_manager_mut()
            .expand_and_triangulate(belief, action, &self.resolutions);
        for (successor, weight) in successors {
            self.explorer.add_transition_to_belief(action, successor, weight, false);
        }
        if self.computes_rewards {
            self.explorer.compute_reward_at_current_state(action, V::zero());
        }
    }

    /// Connects `action` only to known successors; the remaining mass goes to
    /// the extra states, weighted by the optimistic bound of each successor.
    fn truncate_action(&mut self, belief: BeliefId, action: usize) {
        let successors = self
            .explorer
            .belief_manager_mut()
            .expand_and_triangulate(belief, action, &self.resolutions);
        let mut truncated_probability = V::zero();
        let mut truncated_value = V::zero();
        for (successor, weight) in successors {
            if !self
                .explorer
                .add_transition_to_belief(action, successor, weight.clone(), true)
            {
                let bound = if self.direction.is_minimize() {
                    self.explorer.compute_lower_value_bound_at_belief(successor)
                } else {
                    self.explorer.compute_upper_value_bound_at_belief(successor)
                };
                truncated_probability = truncated_probability + weight.clone();
                truncated_value = truncated_value + weight * bound;
            }
        }
        if self.computes_rewards {
            self.explorer
                .add_transitions_to_extra_states(action, V::zero(), truncated_probability);
            self.explorer.compute_reward_at_current_state(action, truncated_value);
        } else {
            let bottom = (truncated_probability - truncated_value.clone()).max_of(V::zero());
            self.explorer
                .add_transitions_to_extra_states(action, truncated_value, bottom);
        }
    }
}

/// `resolution * factor`, computed exactly and clamped to `u64::MAX`.
/// Resolutions never shrink.
pub fn grow_resolution(resolution: u64, factor: &BigRational) -> u64 {
    let grown = BigRational::from_integer(BigInt::from(resolution)) * factor;
    let grown = grown.to_integer();
    if grown > BigInt::from(u64::MAX) {
        return u64::MAX;
    }
    grown.to_u64().unwrap_or(u64::MAX).max(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(value: f64) -> BigRational {
        BigRational::from_float(value).expect("finite factor")
    }

    #[test]
    fn resolution_growth_saturates() {
        assert_eq!(grow_resolution(2, &factor(2.0)), 4);
        assert_eq!(grow_resolution(u64::MAX / 2 + 1, &factor(2.0)), u64::MAX);
        assert_eq!(grow_resolution(u64::MAX, &factor(3.0)), u64::MAX);
    }

    #[test]
    fn resolution_never_shrinks() {
        assert_eq!(grow_resolution(3, &factor(1.2)), 3);
        assert_eq!(grow_resolution(10, &factor(1.5)), 15);
    }
}
