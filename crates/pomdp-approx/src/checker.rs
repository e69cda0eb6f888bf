//! Entry point: bounds the optimal value at the initial belief by building
//! (and optionally refining) the over- and under-approximation.

use crate::options::{ApproximationOptions, HeuristicParameters, OptionsError};
use crate::over::{BuildStatus, OverApproximationBuilder};
use crate::result::ApproxResult;
use crate::statistics::{ModelSummary, Statistics, StatisticsReport};
use crate::termination::CancellationToken;
use crate::under::UnderApproximationBuilder;
use pomdp_core::{FormulaInformation, Pomdp, Property, PropertyError, TrivialBounds, Value, ValueIterationSolver};
use thiserror::Error;
use tracing::{debug, info, warn};

const REFINEMENT_LOG_LIMIT: u64 = 1000;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("nothing to compute: enable the over-approximation, the under-approximation, or both")]
    NoTask,
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
    #[error("unsupported property: {0}")]
    Property(#[from] PropertyError),
}

pub struct ApproximationChecker<'a, V: Value> {
    pomdp: &'a Pomdp<V>,
    options: ApproximationOptions,
    statistics: Statistics,
}

impl<'a, V: Value> ApproximationChecker<'a, V> {
    pub fn new(pomdp: &'a Pomdp<V>, options: ApproximationOptions) -> Self {
        Self {
            pomdp,
            options,
            statistics: Statistics::default(),
        }
    }

    pub fn options(&self) -> &ApproximationOptions {
        &self.options
    }

    /// Statistics of the last `check` call.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn statistics_report(&self) -> StatisticsReport<'_> {
        StatisticsReport {
            model: ModelSummary::of(self.pomdp),
            statistics: &self.statistics,
        }
    }

    /// Bounds the optimal value of `property` at the initial state.
    ///
    /// Cancellation is not an error: the bounds found so far are returned
    /// and the statistics are flagged as aborted.
    pub fn check(&mut self, property: &Property, cancel: &CancellationToken) -> Result<ApproxResult<V>, CheckError> {
        self.options.validate()?;
        if !self.options.discretize && !self.options.unfold {
            return Err(CheckError::NoTask);
        }

        self.statistics = Statistics::default();
        self.statistics.total_time.start();
        let info = FormulaInformation::analyze(self.pomdp, property)?;
        let bounds = TrivialBounds::compute(self.pomdp, &info, &ValueIterationSolver::default());

        let (lower, upper) = bounds.at(self.pomdp.initial_state());
        let mut result = ApproxResult::new(lower.clone(), upper.clone());
        info!(target: "pomdp_approx::checker", "Initial value bounds are {result}");

        if self.options.refine {
            self.refine_approximation(&info, &bounds, &mut result, cancel);
        } else {
            self.compute_once(&info, &bounds, &mut result, cancel);
        }

        if cancel.is_cancelled() {
            self.statistics.aborted = true;
        }
        self.statistics.total_time.stop();
        Ok(result)
    }

    /// Builds each requested approximation once.
    fn compute_once(
        &mut self,
        info: &FormulaInformation,
        bounds: &TrivialBounds<V>,
        result: &mut ApproxResult<V>,
        cancel: &CancellationToken,
    ) {
        let minimize = info.minimize();
        if self.options.discretize {
            let mut over = OverApproximationBuilder::new(self.pomdp, info, bounds, &self.options);
            let params: HeuristicParameters<V> = self.options.initial_over_parameters();
            let status = over.build(false, &params, &mut self.statistics.over_approximation, cancel);
            if status != BuildStatus::Aborted {
                if let Some(value) = over.value_at_initial_state() {
                    update_optimistic(result, &value, minimize);
                }
            }
        }
        if self.options.unfold && !cancel.is_cancelled() {
            let mut under = UnderApproximationBuilder::new(self.pomdp, info, bounds, &self.options);
            let params: HeuristicParameters<V> =
                self.options.initial_under_parameters(self.automatic_under_size());
            let status = under.build(false, &params, &mut self.statistics.under_approximation, cancel);
            if status != BuildStatus::Aborted {
                if let Some(value) = under.value_at_initial_state() {
                    update_pessimistic(result, &value, minimize);
                }
            }
        }
    }

    /// Size budget of the first unfolding when none is configured.
    fn automatic_under_size(&self) -> u64 {
        if self.options.size_threshold_init != 0 {
            return self.options.size_threshold_init;
        }
        if self.options.refine || self.options.exploration_time_limit().is_none() {
            let size = (self.pomdp.num_states() as u64).saturating_mul(self.pomdp.max_states_per_observation() as u64);
            info!(target: "pomdp_approx::checker", size, "Heuristically selected an under-approximation MDP size");
            size
        } else {
            u64::MAX
        }
    }

    fn refine_approximation(
        &mut self,
        info: &FormulaInformation,
        bounds: &TrivialBounds<V>,
        result: &mut ApproxResult<V>,
        cancel: &CancellationToken,
    ) {
        let minimize = info.minimize();
        let options = self.options.clone();
        let precision = V::from_f64(options.refine_precision);
        self.statistics.refinement_steps = Some(0);
        self.statistics.refined = true;

        let mut over = options
            .discretize
            .then(|| OverApproximationBuilder::new(self.pomdp, info, bounds, &options));
        let mut over_params: HeuristicParameters<V> = options.initial_over_parameters();
        let mut over_fixpoint = true;
        if let Some(over) = over.as_mut() {
            match over.build(false, &over_params, &mut self.statistics.over_approximation, cancel) {
                BuildStatus::Aborted => return,
                BuildStatus::Finished { fixpoint } => over_fixpoint = fixpoint,
            }
            if let Some(value) = over.value_at_initial_state() {
                update_optimistic(result, &value, minimize);
            }
        }

        let mut under = options
            .unfold
            .then(|| UnderApproximationBuilder::new(self.pomdp, info, bounds, &options));
        let automatic_size = if options.unfold { self.automatic_under_size() } else { 0 };
        let mut under_params: HeuristicParameters<V> = options.initial_under_parameters(automatic_size);
        let mut under_fixpoint = true;
        if let Some(under) = under.as_mut() {
            match under.build(false, &under_params, &mut self.statistics.under_approximation, cancel) {
                BuildStatus::Aborted => return,
                BuildStatus::Finished { fixpoint } => under_fixpoint = fixpoint,
            }
            if let Some(value) = under.value_at_initial_state() {
                update_pessimistic(result, &value, minimize);
            }
        }
        info!(
            target: "pomdp_approx::checker",
            "Completed iteration #0. Current checktime is {}.", self.statistics.total_time
        );
        self.log_progress(over.as_ref(), under.as_ref(), result, minimize);

        if options.refine_step_limit.is_none() && options.refine_precision == 0.0 {
            warn!(
                target: "pomdp_approx::checker",
                "No termination criterion for refinement given; refining until a fixpoint or cancellation"
            );
        }
        if options.refine_precision != 0.0 && !(options.discretize && options.unfold) {
            warn!(
                target: "pomdp_approx::checker",
                "Refinement goal precision is given, but only one bound is going to be refined"
            );
        }

        let mut steps: u64 = 0;
        while options.refine_step_limit.is_none_or(|limit| steps < limit) && result.diff(false) > precision {
            if let Some(over) = over.as_mut() {
                over.take_current_values_as_bounds();
                over_params.tighten_over(&options, over.num_states());
                match over.build(true, &over_params, &mut self.statistics.over_approximation, cancel) {
                    BuildStatus::Aborted => break,
                    BuildStatus::Finished { fixpoint } => over_fixpoint = fixpoint,
                }
                if let Some(value) = over.value_at_initial_state() {
                    update_optimistic(result, &value, minimize);
                }
            }
            if let Some(under) = under.as_mut().filter(|_| result.diff(false) > precision) {
                under_params.tighten_under(&options, under.num_states());
                match under.build(true, &under_params, &mut self.statistics.under_approximation, cancel) {
                    BuildStatus::Aborted => break,
                    BuildStatus::Finished { fixpoint } => under_fixpoint = fixpoint,
                }
                if let Some(value) = under.value_at_initial_state() {
                    update_pessimistic(result, &value, minimize);
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            steps += 1;
            self.statistics.refinement_steps = Some(steps);
            if steps <= REFINEMENT_LOG_LIMIT {
                info!(
                    target: "pomdp_approx::checker",
                    "Completed iteration #{steps}. Current checktime is {}.", self.statistics.total_time
                );
                self.log_progress(over.as_ref(), under.as_ref(), result, minimize);
            }
            if steps == REFINEMENT_LOG_LIMIT {
                warn!(
                    target: "pomdp_approx::checker",
                    "Refinement requires at least {REFINEMENT_LOG_LIMIT} iterations; further progress is not logged"
                );
            }
            if over_fixpoint && under_fixpoint {
                info!(target: "pomdp_approx::checker", "Refinement fixpoint reached after {steps} iteration(s)");
                break;
            }
        }
    }

    fn log_progress(
        &self,
        over: Option<&OverApproximationBuilder<'_, V>>,
        under: Option<&UnderApproximationBuilder<'_, V>>,
        result: &ApproxResult<V>,
        minimize: bool,
    ) {
        if let Some(over) = over {
            debug!(
                target: "pomdp_approx::checker",
                states = over.num_states(),
                max_resolution = over.max_resolution(),
                "over-approximation MDP"
            );
        }
        if let Some(under) = under {
            debug!(target: "pomdp_approx::checker", states = under.num_states(), "under-approximation MDP");
        }
        match (over.is_some(), under.is_some()) {
            (true, true) => info!(target: "pomdp_approx::checker", "Current result is {result}"),
            (true, false) => {
                let (relation, bound) = if minimize {
                    (">=", &result.lower_bound)
                } else {
                    ("<=", &result.upper_bound)
                };
                info!(target: "pomdp_approx::checker", "Current result is {relation} {bound}");
            }
            (false, _) => {
                let (relation, bound) = if minimize {
                    ("<=", &result.upper_bound)
                } else {
                    (">=", &result.lower_bound)
                };
                info!(target: "pomdp_approx::checker", "Current result is {relation} {bound}");
            }
        }
    }
}

/// The over-approximation bounds the optimum from the optimistic side.
fn update_optimistic<V: Value>(result: &mut ApproxResult<V>, value: &V, minimize: bool) {
    if minimize {
        result.update_lower_bound(value);
    } else {
        result.update_upper_bound(value);
    }
}

fn update_pessimistic<V: Value>(result: &mut ApproxResult<V>, value: &V, minimize: bool) {
    if minimize {
        result.update_upper_bound(value);
    } else {
        result.update_lower_bound(value);
    }
}
