//! Rates how well each observation's resolution approximates the beliefs
//! reached under optimal schedulers. 0 is a poor approximation, 1 exact.

use pomdp_core::{BeliefMdpExplorer, SuccessorObservationInformation, Value};

/// Rating of the successors of one choice that share an observation.
///
/// The largest triangulation weight ranges from `1/n` (the belief sits in
/// the middle of its simplex) to `1` (the belief is a grid point); it is
/// normalized to `[0, 1]` and scaled by `resolution / max_resolution`, so
/// coarse observations are refined first. Dirac beliefs rate exactly 1.
pub fn rate_observation<V: Value>(
    info: &SuccessorObservationInformation<V>,
    resolution: u64,
    max_resolution: u64,
) -> V {
    let one = V::one();
    let n = info.support.len() as u64;
    if n <= 1 {
        return one;
    }
    let n = V::from_u64(n);
    let largest = info.max_probability_to_successor_with_obs.clone() / info.observation_probability.clone();
    let normalized = (largest * n.clone() - one.clone()) / (n - one);
    normalized * V::from_u64(resolution) / V::from_u64(max_resolution.max(1))
}

/// Minimum rating per observation over all optimal choices at states
/// reachable under an optimal scheduler. Observations that never occur
/// there keep the rating 1.
pub fn observation_ratings<V: Value>(
    explorer: &BeliefMdpExplorer<'_, V>,
    resolutions: &[u64],
    max_resolution: u64,
) -> Vec<V> {
    let mut ratings = vec![V::one(); resolutions.len()];
    for state in 0..explorer.num_explored_belief_states() {
        if !explorer.state_is_optimal_scheduler_reachable(state) {
            continue;
        }
        for action in 0..explorer.number_of_choices_at(state) {
            if !explorer.action_is_optimal(state, action) {
                continue;
            }
            for (observation, info) in explorer.gather_successor_observation_information(state, action) {
                let index = observation as usize;
                let rating = rate_observation(&info, resolutions[index], max_resolution);
                if rating < ratings[index] {
                    ratings[index] = rating;
                }
            }
        }
    }
    ratings
}
