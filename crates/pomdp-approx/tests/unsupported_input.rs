use pomdp_approx::{ApproximationChecker, ApproximationOptions, CancellationToken, CheckError, OptionsError};
use pomdp_core::model::generator::{GOAL_LABEL, STEPS_REWARD};
use pomdp_core::{OptimizationDirection, Pomdp, PomdpBuilder, Property, PropertyError};

/// State 0 either reaches the goal or gets stuck in state 1 forever.
fn escapable_model() -> Pomdp<f64> {
    PomdpBuilder::new(3)
        .observations(vec![0, 1, 2])
        .choice(0, vec![(2, 1.0)])
        .choice(0, vec![(1, 1.0)])
        .choice(1, vec![(1, 1.0)])
        .choice(2, vec![(2, 1.0)])
        .label(GOAL_LABEL, [2])
        .reward_model(STEPS_REWARD, vec![vec![1.0, 1.0], vec![1.0], vec![0.0]])
        .build(1e-9)
        .expect("valid model")
}

fn check(pomdp: &Pomdp<f64>, options: ApproximationOptions, property: &Property) -> Result<(), CheckError> {
    ApproximationChecker::new(pomdp, options)
        .check(property, &CancellationToken::new())
        .map(|_| ())
}

#[test]
fn nothing_requested_is_rejected() {
    let pomdp = escapable_model();
    let options = ApproximationOptions {
        discretize: false,
        unfold: false,
        ..ApproximationOptions::default()
    };
    let property = Property::reachability(OptimizationDirection::Maximize, GOAL_LABEL);
    assert!(matches!(check(&pomdp, options, &property), Err(CheckError::NoTask)));
}

#[test]
fn unknown_label_is_rejected() {
    let pomdp = escapable_model();
    let property = Property::reachability(OptimizationDirection::Maximize, "missing");
    let err = check(&pomdp, ApproximationOptions::default(), &property).expect_err("unknown label");
    assert!(matches!(
        err,
        CheckError::Property(PropertyError::UnknownLabel(label)) if label == "missing"
    ));
}

#[test]
fn rewards_need_an_almost_surely_reached_target() {
    let pomdp = escapable_model();
    let property = Property::expected_reward(OptimizationDirection::Minimize, STEPS_REWARD, GOAL_LABEL);
    let err = check(&pomdp, ApproximationOptions::default(), &property).expect_err("target avoidable");
    assert!(matches!(
        err,
        CheckError::Property(PropertyError::RewardTargetNotAlmostSure { .. })
    ));
}

#[test]
fn invalid_options_are_reported_before_any_work() {
    let pomdp = escapable_model();
    let options = ApproximationOptions {
        resolution_init: 0,
        ..ApproximationOptions::default()
    };
    let property = Property::reachability(OptimizationDirection::Maximize, GOAL_LABEL);
    let err = check(&pomdp, options, &property).expect_err("invalid options");
    assert!(matches!(
        err,
        CheckError::Options(OptionsError::InvalidField { field, .. }) if field == "resolution_init"
    ));
}
