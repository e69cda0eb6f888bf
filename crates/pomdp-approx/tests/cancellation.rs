use pomdp_approx::{
    ApproximationChecker, ApproximationOptions, ApproximationStatistics, BuildStatus, CancellationToken,
    HeuristicParameters, OverApproximationBuilder,
};
use pomdp_core::model::generator::{GOAL_LABEL, RandomPomdpParams, random_pomdp};
use pomdp_core::{
    FormulaInformation, OptimizationDirection, Pomdp, PomdpBuilder, Property, TrivialBounds, ValueIterationSolver,
};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

fn model() -> Pomdp<f64> {
    random_pomdp(RandomPomdpParams {
        states: 8,
        observations: 3,
        actions: 2,
        branching: 3,
        seed: 17,
    })
}

#[test]
fn cancelled_before_exploration_returns_initial_bounds() {
    let pomdp = model();
    let property = Property::reachability(OptimizationDirection::Maximize, GOAL_LABEL);

    let token = CancellationToken::new();
    token.cancel();
    let mut checker = ApproximationChecker::new(&pomdp, ApproximationOptions::default());
    let result = checker.check(&property, &token).expect("cancellation is not an error");

    let stats = checker.statistics();
    assert!(stats.aborted);
    assert!(stats.over_approximation.build_aborted);
    assert_eq!(stats.over_approximation.states, Some(3));
    assert!(stats.under_approximation.states.is_none());
    assert!(result.lower_bound <= result.upper_bound);

    // Nothing was solved, so the interval is the trivial one.
    let info = FormulaInformation::analyze(&pomdp, &property).expect("supported property");
    let bounds = TrivialBounds::compute(&pomdp, &info, &ValueIterationSolver::default());
    let (lower, upper) = bounds.at(pomdp.initial_state());
    assert_eq!(result.lower_bound, *lower);
    assert_eq!(result.upper_bound, *upper);
}

#[test]
fn cancelled_one_shot_run_skips_the_unfolding() {
    let pomdp = model();
    let token = CancellationToken::new();
    token.cancel();
    let options = ApproximationOptions {
        refine: false,
        ..ApproximationOptions::default()
    };
    let mut checker = ApproximationChecker::new(&pomdp, options);
    checker
        .check(&Property::reachability(OptimizationDirection::Minimize, GOAL_LABEL), &token)
        .expect("check");

    let stats = checker.statistics();
    assert!(stats.aborted);
    assert!(stats.refinement_steps.is_none());
    assert!(stats.under_approximation.states.is_none());
    let report = checker.statistics_report().to_string();
    assert!(report.contains("# Computation aborted early"));
    assert!(report.contains("over-approximation: >=3"));
}

#[test]
fn cancelled_refinement_round_keeps_the_last_finished_pass() {
    let pomdp = model();
    let property = Property::reachability(OptimizationDirection::Maximize, GOAL_LABEL);
    let info = FormulaInformation::analyze(&pomdp, &property).expect("supported property");
    let bounds = TrivialBounds::compute(&pomdp, &info, &ValueIterationSolver::default());
    let options = ApproximationOptions::default();
    let token = CancellationToken::new();

    let mut over = OverApproximationBuilder::new(&pomdp, &info, &bounds, &options);
    let mut params: HeuristicParameters<f64> = options.initial_over_parameters();
    let mut stats = ApproximationStatistics::default();

    assert!(matches!(
        over.build(false, &params, &mut stats, &token),
        BuildStatus::Finished { .. }
    ));
    let value = over.value_at_initial_state().expect("solved");
    let states = stats.states;
    assert!(states.is_some());

    token.cancel();
    over.take_current_values_as_bounds();
    params.tighten_over(&options, over.num_states());
    assert_eq!(over.build(true, &params, &mut stats, &token), BuildStatus::Aborted);

    // The aborted pass leaves the solved MDP and its statistics alone.
    assert_eq!(over.value_at_initial_state(), Some(value));
    assert_eq!(stats.states, states);
    assert!(!stats.build_aborted);
}

/// Cancels the token once a log message containing `trigger` is emitted.
struct CancelOnMessage {
    trigger: &'static str,
    token: CancellationToken,
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CancelOnMessage {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if visitor.0.contains(self.trigger) {
            self.token.cancel();
        }
    }
}

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
fn cancellation_after_the_first_round_keeps_its_bounds() {
    let pomdp = ambiguous_model();
    let token = CancellationToken::new();
    let subscriber = Registry::default().with(CancelOnMessage {
        trigger: "Completed iteration #0.",
        token: token.clone(),
    });

    let mut checker = ApproximationChecker::new(&pomdp, ApproximationOptions::default());
    let result = tracing::subscriber::with_default(subscriber, || {
        checker.check(&Property::reachability(OptimizationDirection::Maximize, GOAL_LABEL), &token)
    })
    .expect("cancellation is not an error");

    // Round 0 gives [3/4, 7/8]; the cancelled round 1 changes nothing.
    assert!((result.lower_bound - 0.75).abs() < 1e-9);
    assert!((result.upper_bound - 0.875).abs() < 1e-9);
    let stats = checker.statistics();
    assert!(stats.aborted);
    assert_eq!(stats.refinement_steps, Some(0));
    assert_eq!(stats.over_approximation.states, Some(7));
    assert!(!stats.over_approximation.build_aborted);
    assert!(!stats.under_approximation.build_aborted);
}
