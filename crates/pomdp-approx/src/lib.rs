//! Belief-space approximation of optimal reachability probabilities and
//! expected rewards in POMDPs.
//!
//! [`ApproximationChecker`] bounds the optimal value at the initial belief
//! from both sides: a triangulated grid MDP over-approximates it, a
//! truncated unfolding of the belief MDP under-approximates it. With
//! refinement enabled both are rebuilt with tighter heuristics until the
//! bounds meet, a fixpoint is reached, or the run is cancelled.

pub mod checker;
pub mod heuristic;
pub mod options;
pub mod over;
pub mod result;
pub mod statistics;
pub mod termination;
pub mod under;

pub use checker::{ApproximationChecker, CheckError};
pub use options::{ApproximationOptions, HeuristicParameters, OptionsError};
pub use over::{BuildStatus, OverApproximationBuilder};
pub use result::ApproxResult;
pub use statistics::{ApproximationStatistics, ModelSummary, Statistics, StatisticsReport, Stopwatch};
pub use termination::{CancellationToken, ExplorationBudget, StopStatus};
pub use under::UnderApproximationBuilder;
