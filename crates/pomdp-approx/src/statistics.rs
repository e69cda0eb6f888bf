//! Counters and timers collected during one `check` call.

use pomdp_core::{Pomdp, Value};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};

/// Accumulating wall-clock timer. Serializes as seconds.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Accumulated time, including a running interval.
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.elapsed().as_secs_f64())
    }
}

impl Serialize for Stopwatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.elapsed().as_secs_f64())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApproximationStatistics {
    /// Number of MDP states of the last successful build, or of the aborted
    /// build if no build succeeded.
    pub states: Option<usize>,
    pub build_aborted: bool,
    pub build_time: Stopwatch,
    pub check_time: Stopwatch,
    /// Largest observation resolution (over-approximation only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<u64>,
    /// Exploration state budget (under-approximation only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_limit: Option<u64>,
}

impl ApproximationStatistics {
    /// An aborted build never replaces the state count of a successful one.
    pub fn record_aborted_build(&mut self, states: usize) {
        if self.states.is_none() {
            self.build_aborted = true;
            self.states = Some(states);
        }
    }

    pub fn record_finished_build(&mut self, states: usize) {
        self.states = Some(states);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total_time: Stopwatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_steps: Option<u64>,
    pub aborted: bool,
    /// Whether the run refined, which makes the reported sizes final ones.
    pub refined: bool,
    pub over_approximation: ApproximationStatistics,
    pub under_approximation: ApproximationStatistics,
}

/// Shape of the input model, printed at the top of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub states: usize,
    pub choices: usize,
    pub observations: u32,
    pub max_states_per_observation: usize,
}

impl ModelSummary {
    pub fn of<V: Value>(pomdp: &Pomdp<V>) -> Self {
        Self {
            states: pomdp.num_states(),
            choices: pomdp.num_choices_total(),
            observations: pomdp.num_observations(),
            max_states_per_observation: pomdp.max_states_per_observation(),
        }
    }
}

/// Human-readable diagnostic report.
#[derive(Debug, Clone, Copy)]
pub struct StatisticsReport<'a> {
    pub model: ModelSummary,
    pub statistics: &'a Statistics,
}

impl fmt::Display for StatisticsReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.statistics;
        let model = &self.model;
        writeln!(f, "##### Grid Approximation Statistics ######")?;
        writeln!(f, "# Input model: POMDP")?;
        writeln!(f, "# States: {}", model.states)?;
        writeln!(f, "# Choices: {}", model.choices)?;
        writeln!(f, "# Observations: {}", model.observations)?;
        writeln!(
            f,
            "# Max. Number of states with same observation: {}",
            model.max_states_per_observation
        )?;
        if stats.aborted {
            writeln!(f, "# Computation aborted early")?;
        }
        writeln!(f, "# Total check time: {}", stats.total_time)?;
        if let Some(steps) = stats.refinement_steps {
            writeln!(f, "# Number of refinement steps: {steps}")?;
        }

        let last = if stats.refined { "final " } else { "" };
        let over = &stats.over_approximation;
        if let Some(states) = over.states {
            let prefix = if over.build_aborted { ">=" } else { "" };
            writeln!(
                f,
                "# Number of states in the {last}grid MDP for the over-approximation: {prefix}{states}"
            )?;
            if let Some(resolution) = over.max_resolution {
                writeln!(f, "# Maximal resolution for over-approximation: {resolution}")?;
            }
            writeln!(f, "# Time spent building the over-approx grid MDP(s): {}", over.build_time)?;
            writeln!(f, "# Time spent checking the over-approx grid MDP(s): {}", over.check_time)?;
        }

        let under = &stats.under_approximation;
        if let Some(states) = under.states {
            let prefix = if under.build_aborted { ">=" } else { "" };
            writeln!(
                f,
                "# Number of states in the {last}grid MDP for the under-approximation: {prefix}{states}"
            )?;
            if let Some(limit) = under.state_limit {
                writeln!(f, "# Exploration state limit for under-approximation: {limit}")?;
            }
            writeln!(f, "# Time spent building the under-approx grid MDP(s): {}", under.build_time)?;
            writeln!(f, "# Time spent checking the under-approx grid MDP(s): {}", under.check_time)?;
        }
        write!(f, "##########################################")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_build_keeps_successful_state_count() {
        let mut stats = ApproximationStatistics::default();
        stats.record_finished_build(12);
        stats.record_aborted_build(40);
        assert_eq!(stats.states, Some(12));
        assert!(!stats.build_aborted);

        let mut fresh = ApproximationStatistics::default();
        fresh.record_aborted_build(7);
        assert_eq!(fresh.states, Some(7));
        assert!(fresh.build_aborted);
    }

    #[test]
    fn report_lists_required_fields() {
        let mut statistics = Statistics {
            refinement_steps: Some(3),
            aborted: true,
            refined: true,
            ..Statistics::default()
        };
        statistics.over_approximation.record_finished_build(10);
        statistics.over_approximation.max_resolution = Some(8);
        statistics.under_approximation.record_aborted_build(4);
        let report = StatisticsReport {
            model: ModelSummary {
                states: 5,
                choices: 9,
                observations: 3,
                max_states_per_observation: 2,
            },
            statistics: &statistics,
        }
        .to_string();

        assert!(report.starts_with("##### Grid Approximation Statistics ######"));
        assert!(report.contains("# Computation aborted early"));
        assert!(report.contains("# Total check time: "));
        assert!(report.contains("# Number of refinement steps: 3"));
        assert!(report.contains("final grid MDP for the over-approximation: 10"));
        assert!(report.contains("# Maximal resolution for over-approximation: 8"));
        assert!(report.contains("under-approximation: >=4"));
    }

    #[test]
    fn stopwatch_accumulates_intervals() {
        let mut watch = Stopwatch::default();
        watch.start();
        watch.stop();
        let first = watch.elapsed();
        watch.start();
        watch.stop();
        assert!(watch.elapsed() >= first);
    }
}
