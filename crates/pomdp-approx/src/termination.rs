//! Cooperative stopping: external cancellation and the exploration time limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cloneable flag shared with whoever may ask a run to stop (e.g. a Ctrl-C
/// handler).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    Continue,
    TimeLimitExceeded,
    Cancelled,
}

/// Budget of one exploration pass, polled once per explored state.
#[derive(Debug, Clone)]
pub struct ExplorationBudget {
    start: Instant,
    time_limit: Option<Duration>,
    cancel: CancellationToken,
}

impl ExplorationBudget {
    /// Starts the wall clock for a pass.
    pub fn start(time_limit: Option<Duration>, cancel: CancellationToken) -> Self {
        Self::started_at(Instant::now(), time_limit, cancel)
    }

    /// A budget whose clock started at `start`.
    pub fn started_at(start: Instant, time_limit: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            start,
            time_limit,
            cancel,
        }
    }

    /// Cancellation wins over the time limit. The limit is compared in whole
    /// seconds.
    pub fn should_stop(&self) -> StopStatus {
        if self.cancel.is_cancelled() {
            return StopStatus::Cancelled;
        }
        match self.time_limit {
            Some(limit) if self.start.elapsed().as_secs() > limit.as_secs() => StopStatus::TimeLimitExceeded,
            _ => StopStatus::Continue,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let budget = ExplorationBudget::start(None, token.clone());
        assert_eq!(budget.should_stop(), StopStatus::Continue);
        token.cancel();
        assert_eq!(budget.should_stop(), StopStatus::Cancelled);
        assert!(budget.is_cancelled());
    }

    #[test]
    fn exceeded_time_limit_is_reported() {
        let start = Instant::now() - Duration::from_secs(2);
        let budget = ExplorationBudget::started_at(start, Some(Duration::ZERO), CancellationToken::new());
        assert_eq!(budget.should_stop(), StopStatus::TimeLimitExceeded);

        let fresh = ExplorationBudget::start(Some(Duration::from_secs(60)), CancellationToken::new());
        assert_eq!(fresh.should_stop(), StopStatus::Continue);
    }
}
