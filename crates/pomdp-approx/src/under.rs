//! Under-approximation: the belief MDP is unfolded exactly up to a state
//! budget; cut-off beliefs are valued by the pessimistic bound.

use crate::options::{ApproximationOptions, HeuristicParameters};
use crate::over::BuildStatus;
use crate::statistics::ApproximationStatistics;
use crate::termination::{CancellationToken, ExplorationBudget, StopStatus};
use pomdp_core::{
    BeliefManager, BeliefMdpExplorer, ExplorationMode, FormulaInformation, OptimizationDirection, Pomdp,
    TrivialBounds, Value, relative_gap,
};
use std::collections::BTreeSet;
use std::time::Duration;

pub struct UnderApproximationBuilder<'a, V: Value> {
    explorer: BeliefMdpExplorer<'a, V>,
    target_observations: BTreeSet<u32>,
    direction: OptimizationDirection,
    computes_rewards: bool,
    time_limit: Option<Duration>,
}

impl<'a, V: Value> UnderApproximationBuilder<'a, V> {
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
            target_observations: info.target_observations().clone(),
            direction: info.direction(),
            computes_rewards: info.computes_rewards(),
            time_limit: options.exploration_time_limit(),
        }
    }

    pub fn explorer(&self) -> &BeliefMdpExplorer<'a, V> {
        &self.explorer
    }

    pub fn value_at_initial_state(&self) -> Option<V> {
        self.explorer.computed_value_at_initial_state()
    }

    pub fn num_states(&self) -> usize {
        self.explorer.num_explored_states()
    }

    /// Unfolds the belief MDP from scratch or, with `refine`, continues the
    /// previous unfolding at the states it truncated.
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
        stats.build_time.start();
        let mut fixpoint = true;
        if params.size_threshold != u64::MAX {
            stats.state_limit = Some(params.size_threshold);
        }
        if refine {
            self.explorer.restart_exploration();
        } else {
            let mode = if self.computes_rewards {
                ExplorationMode::Rewards
            } else {
                ExplorationMode::Probabilities
            };
            self.explorer.start_new_exploration(mode);
        }

        let mut time_limit_exceeded = false;
        let mut aborted = false;
        while self.explorer.has_unexplored_state() {
            match budget.should_stop() {
                StopStatus::Cancelled => {
                    aborted = true;
                    break;
                }
                StopStatus::TimeLimitExceeded if !time_limit_exceeded => {
                    tracing::info!(target: "pomdp_approx::under", "exploration time limit exceeded");
                    time_limit_exceeded = true;
                }
                _ => {}
            }

            let Some(belief) = self.explorer.explore_next_state() else {
                break;
            };
            let already_explored = refine
                && self.explorer.current_state_has_old_behavior()
                && !self.explorer.current_state_was_truncated();
            if !already_explored || time_limit_exceeded {
                fixpoint = false;
            }
            let observation = self.explorer.belief_manager().observation(belief);
            if self.target_observations.contains(&observation) {
                self.explorer.set_current_state_is_target();
                self.explorer.add_selfloop_transition();
                continue;
            }

            let mut stop_exploration = false;
            if time_limit_exceeded {
                stop_exploration = true;
                self.explorer.set_current_state_is_truncated();
            } else if !already_explored {
                let gap = relative_gap(
                    &self.explorer.lower_value_bound_at_current_state(),
                    &self.explorer.upper_value_bound_at_current_state(),
                );
                if gap < params.gap_threshold
                    || self.explorer.current_number_of_states() as u64 >= params.size_threshold
                {
                    stop_exploration = true;
                    self.explorer.set_current_state_is_truncated();
                }
            }

            for action in 0..self.explorer.belief_manager().number_of_choices(belief) {
                if already_explored {
                    self.explorer.restore_old_behavior_at_current_state(action);
                    continue;
                }
                let successors = self.explorer.belief_manager_mut().expand(belief, action);
                let mut truncated_probability = V::zero();
                let mut truncated_value = V::zero();
                for (successor, probability) in successors {
                    if !self.explorer.add_transition_to_belief(
                        action,
                        successor,
                        probability.clone(),
                        stop_exploration,
                    ) {
                        // Cut-off beliefs get the value of a memoryless
                        // scheduler, which is achievable from there.
                        let bound = if self.direction.is_minimize() {
                            self.explorer.compute_upper_value_bound_at_belief(successor)
                        } else {
                            self.explorer.compute_lower_value_bound_at_belief(successor)
                        };
                        truncated_probability = truncated_probability + probability.clone();
                        truncated_value = truncated_value + probability * bound;
                    }
                }
                if stop_exploration {
                    if self.computes_rewards {
                        self.explorer
                            .add_transitions_to_extra_states(action, V::zero(), truncated_probability);
                    } else {
                        let bottom = (truncated_probability - truncated_value.clone()).max_of(V::zero());
                        self.explorer
                            .add_transitions_to_extra_states(action, truncated_value.clone(), bottom);
                    }
                }
                if self.computes_rewards {
                    self.explorer.compute_reward_at_current_state(action, truncated_value);
                }
            }
        }

        if aborted || budget.is_cancelled() {
            stats.record_aborted_build(self.explorer.current_number_of_states());
            stats.build_time.stop();
            tracing::info!(target: "pomdp_approx::under", "under-approximation build cancelled");
            return BuildStatus::Aborted;
        }

        self.explorer.finish_exploration();
        stats.build_time.stop();

        stats.check_time.start();
        self.explorer.compute_values_of_explored_mdp(self.direction);
        stats.check_time.stop();
        stats.record_finished_build(self.explorer.num_explored_states());
        tracing::debug!(
            target: "pomdp_approx::under",
            states = self.explorer.num_explored_states(),
            fixpoint,
            "under-approximation built"
        );
        BuildStatus::Finished { fixpoint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pomdp_core::model::generator::GOAL_LABEL;
    use pomdp_core::{PomdpBuilder, Property, ValueIterationSolver};

    /// Optimal value 3/4; the memoryless scheduler reaches 5/8.
    fn ambiguous_model() -> Pomdp<f64> {
        PomdpBuilder::new(5)
            .observations(vec![0, 1, 1, 2, 3])
            .choice(0, vec![(1, 0.75), (2, 0.25)])
            .choice(1, vec![(3, 1.0)])
            .choice(1, vec![(3, 0.5), (4, 0.5)])
            .choice(2, vec![(4, 1.0)])
            .choice(2, vec![(3, 1.0)])
            .choice(3, vec![(3, 1.0)])
            .choice(4, vec![(4, 1.0)])
            .label(GOAL_LABEL, [3])
            .build(1e-9)
            .expect("valid model")
    }

    #[test]
    fn refined_unfolding_keeps_model_derived_bounds() {
        let pomdp = ambiguous_model();
        let property = Property::reachability(OptimizationDirection::Maximize, GOAL_LABEL);
        let info = FormulaInformation::analyze(&pomdp, &property).expect("supported property");
        let bounds = TrivialBounds::compute(&pomdp, &info, &ValueIterationSolver::default());
        let options = ApproximationOptions::default();
        let mut under = UnderApproximationBuilder::new(&pomdp, &info, &bounds, &options);
        let params: HeuristicParameters<f64> = options.initial_under_parameters(u64::MAX);
        let mut stats = ApproximationStatistics::default();
        let cancel = CancellationToken::new();

        under.build(false, &params, &mut stats, &cancel);
        let value = under.value_at_initial_state().expect("solved");
        assert!((value - 0.75).abs() < 1e-9, "{value}");

        under.build(true, &params, &mut stats, &cancel);
        assert_eq!(under.value_at_initial_state(), Some(value));

        // A further pass still sees the trivial bound at the initial belief,
        // not the value computed by the unfolding.
        under.explorer.restart_exploration();
        under.explorer.explore_next_state();
        let lower = under.explorer.lower_value_bound_at_current_state();
        assert!((lower - 0.625).abs() < 1e-9, "{lower}");
    }
}
