//! Lazy construction of finite MDPs over beliefs.
//!
//! One exploration pass discovers states in FIFO order starting from the
//! initial belief. Transitions name their successor beliefs rather than MDP
//! indices, so a finished pass can be replayed in the next one: states that
//! keep their behavior are restored verbatim, others are re-expanded
//! ("rewired"). States that are not reached again simply drop out of the MDP;
//! their beliefs stay in the [`BeliefManager`].

mod record;

pub use record::{ChoiceStatus, Successor};

use crate::belief::{BeliefId, BeliefManager};
use crate::numeric::Value;
use crate::solver::{OptimizationDirection, SparseChoice, SparseMdp, ValueIterationSolver};
use record::{ChoiceRecord, StateRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

const BOTTOM: usize = 0;
const TARGET: usize = 1;

/// What the MDP values mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationMode {
    /// Reachability probabilities: an extra bottom (value 0) and an extra
    /// target (value 1) state.
    Probabilities,
    /// Expected rewards: a single extra bottom state.
    Rewards,
}

impl ExplorationMode {
    pub const fn extra_states(self) -> usize {
        match self {
            Self::Probabilities => 2,
            Self::Rewards => 1,
        }
    }
}

/// Aggregate over the successors of one choice that share an observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessorObservationInformation<V> {
    pub observation_probability: V,
    pub max_probability_to_successor_with_obs: V,
    pub successor_count: usize,
    /// Union of the supports of all successor beliefs with this observation.
    pub support: BTreeSet<usize>,
}

#[derive(Debug)]
struct Pass<V> {
    states: Vec<StateRecord<V>>,
    index: HashMap<BeliefId, usize>,
}

impl<V> Default for Pass<V> {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> Pass<V> {
    fn record(&self, belief: BeliefId) -> Option<&StateRecord<V>> {
        self.index.get(&belief).map(|i| &self.states[*i])
    }
}

/// The MDP of the last finished pass, with solver output once computed.
#[derive(Debug)]
struct ExploredMdp<V> {
    pass: Pass<V>,
    values: Option<Vec<V>>,
    optimal_choices: Vec<Vec<bool>>,
    optimal_reachable: Vec<bool>,
}

#[derive(Debug)]
pub struct BeliefMdpExplorer<'a, V: Value> {
    manager: BeliefManager<'a, V>,
    pomdp_lower: Vec<V>,
    pomdp_upper: Vec<V>,
    solver: ValueIterationSolver,
    mode: ExplorationMode,
    refining: bool,
    current: Pass<V>,
    queue: VecDeque<usize>,
    current_state: usize,
    explored: Option<ExploredMdp<V>>,
}

impl<'a, V: Value> BeliefMdpExplorer<'a, V> {
    /// `pomdp_lower` and `pomdp_upper` bound the value of every POMDP state;
    /// beliefs without explored values are bounded by their weighted sums.
    pub fn new(manager: BeliefManager<'a, V>, pomdp_lower: Vec<V>, pomdp_upper: Vec<V>) -> Self {
        Self {
            manager,
            pomdp_lower,
            pomdp_upper,
            solver: ValueIterationSolver::default(),
            mode: ExplorationMode::Probabilities,
            refining: false,
            current: Pass::default(),
            queue: VecDeque::new(),
            current_state: 0,
            explored: None,
        }
    }

    pub fn with_solver(mut self, solver: ValueIterationSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn belief_manager(&self) -> &BeliefManager<'a, V> {
        &self.manager
    }

    pub fn belief_manager_mut(&mut self) -> &mut BeliefManager<'a, V> {
        &mut self.manager
    }

    pub fn mode(&self) -> ExplorationMode {
        self.mode
    }

    /// Drops any previous MDP and starts a pass at the initial belief.
    pub fn start_new_exploration(&mut self, mode: ExplorationMode) {
        self.mode = mode;
        self.refining = false;
        self.explored = None;
        self.begin_pass();
    }

    /// Starts a pass that may reuse the behavior of the last finished MDP.
    pub fn restart_exploration(&mut self) {
        self.refining = self.explored.is_some();
        self.begin_pass();
    }

    fn begin_pass(&mut self) {
        self.current = Pass::default();
        self.queue.clear();
        self.current_state = 0;
        let initial = self.manager.initial_belief();
        self.get_or_add_state(initial);
    }

    pub fn has_unexplored_state(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pops the next discovered state and makes it current.
    pub fn explore_next_state(&mut self) -> Option<BeliefId> {
        let next = self.queue.pop_front()?;
        self.current_state = next;
        Some(self.current.states[next].belief)
    }

    pub fn current_belief(&self) -> BeliefId {
        self.current().belief
    }

    fn current(&self) -> &StateRecord<V> {
        &self.current.states[self.current_state]
    }

    fn current_mut(&mut self) -> &mut StateRecord<V> {
        &mut self.current.states[self.current_state]
    }

    /// Record and index of the current belief in the last finished MDP.
    fn old_record(&self) -> Option<(usize, &StateRecord<V>)> {
        if !self.refining {
            return None;
        }
        let explored = self.explored.as_ref()?;
        let index = *explored.pass.index.get(&self.current().belief)?;
        Some((index, &explored.pass.states[index]))
    }

    pub fn current_state_has_old_behavior(&self) -> bool {
        self.old_record().is_some()
    }

    pub fn current_state_was_truncated(&self) -> bool {
        self.old_record().is_some_and(|(_, record)| record.truncated)
    }

    pub fn current_state_is_optimal_scheduler_reachable(&self) -> bool {
        self.old_record().is_some_and(|(index, _)| self.state_is_optimal_scheduler_reachable(index))
    }

    pub fn action_at_current_state_was_optimal(&self, action: usize) -> bool {
        self.old_record()
            .is_some_and(|(index, _)| self.action_is_optimal(index, action))
    }

    pub fn current_state_action_exploration_was_delayed(&self, action: usize) -> bool {
        self.old_record().is_some_and(|(_, record)| {
            record
                .choices
                .get(action)
                .is_some_and(|choice| choice.status == ChoiceStatus::Delayed)
        })
    }

    /// Whether the previous behavior of `action` leads to a belief whose
    /// observation is in `observations`.
    pub fn current_state_has_successor_observation_in(
        &self,
        action: usize,
        observations: &BTreeSet<u32>,
    ) -> bool {
        let Some((_, record)) = self.old_record() else {
            return false;
        };
        record.choices.get(action).is_some_and(|choice| {
            choice.transitions.keys().any(|successor| match successor {
                Successor::Belief(belief) => observations.contains(&self.manager.observation(*belief)),
                _ => false,
            })
        })
    }

    /// Target states keep a single self-looping choice.
    pub fn set_current_state_is_target(&mut self) {
        let record = self.current_mut();
        record.target = true;
        record.choices.truncate(1);
    }

    pub fn set_current_state_is_truncated(&mut self) {
        self.current_mut().truncated = true;
    }

    pub fn set_current_choice_is_delayed(&mut self, action: usize) {
        self.current_mut().choices[action].status = ChoiceStatus::Delayed;
    }

    pub fn add_selfloop_transition(&mut self) {
        let belief = self.current_belief();
        self.add_probability(0, Successor::Belief(belief), V::one());
    }

    /// Adds `probability` towards `belief` at `action`. With `ignore_new`,
    /// only beliefs already discovered in this pass are connected and
    /// `false` is returned otherwise.
    pub fn add_transition_to_belief(
        &mut self,
        action: usize,
        belief: BeliefId,
        probability: V,
        ignore_new: bool,
    ) -> bool {
        if ignore_new {
            if !self.current.index.contains_key(&belief) {
                return false;
            }
        } else {
            self.get_or_add_state(belief);
        }
        self.add_probability(action, Successor::Belief(belief), probability);
        true
    }

    /// Redirects truncated mass to the extra states.
    pub fn add_transitions_to_extra_states(&mut self, action: usize, target_probability: V, bottom_probability: V) {
        debug_assert!(
            self.mode == ExplorationMode::Probabilities || target_probability.is_zero(),
            "reward exploration has no extra target state"
        );
        if !target_probability.is_zero() {
            self.add_probability(action, Successor::Target, target_probability);
        }
        if !bottom_probability.is_zero() {
            self.add_probability(action, Successor::Bottom, bottom_probability);
        }
    }

    fn add_probability(&mut self, action: usize, successor: Successor, probability: V) {
        let has_old_behavior = self.current_state_has_old_behavior();
        let choice = &mut self.current_mut().choices[action];
        if has_old_behavior && choice.status == ChoiceStatus::Fresh {
            choice.status = ChoiceStatus::Rewired;
        }
        let slot = choice.transitions.entry(successor).or_insert_with(V::zero);
        *slot = slot.clone() + probability;
    }

    /// Copies the previous behavior of `action` and discovers its successors.
    pub fn restore_old_behavior_at_current_state(&mut self, action: usize) {
        let Some((_, record)) = self.old_record() else {
            return;
        };
        let Some(old) = record.choices.get(action).cloned() else {
            return;
        };
        for successor in old.transitions.keys() {
            if let Successor::Belief(belief) = successor {
                self.get_or_add_state(*belief);
            }
        }
        let choice = &mut self.current_mut().choices[action];
        choice.transitions = old.transitions;
        choice.reward = old.reward;
        if choice.status != ChoiceStatus::Delayed {
            choice.status = ChoiceStatus::Restored;
        }
    }

    /// Expected immediate reward of `action` plus `extra`, which carries the
    /// value bound of truncated successors.
    pub fn compute_reward_at_current_state(&mut self, action: usize, extra: V) {
        let reward = self.manager.expected_reward(self.current_belief(), action) + extra;
        self.current_mut().choices[action].reward = reward;
    }

    pub fn lower_value_bound_at_current_state(&self) -> V {
        self.current().lower.clone()
    }

    pub fn upper_value_bound_at_current_state(&self) -> V {
        self.current().upper.clone()
    }

    pub fn compute_lower_value_bound_at_belief(&self, belief: BeliefId) -> V {
        self.manager.weighted_sum(belief, &self.pomdp_lower)
    }

    pub fn compute_upper_value_bound_at_belief(&self, belief: BeliefId) -> V {
        self.manager.weighted_sum(belief, &self.pomdp_upper)
    }

    /// States (including extra states) discovered so far in this pass.
    pub fn current_number_of_states(&self) -> usize {
        self.mode.extra_states() + self.current.states.len()
    }

    fn get_or_add_state(&mut self, belief: BeliefId) -> usize {
        if let Some(index) = self.current.index.get(&belief) {
            return *index;
        }
        let previous = self
            .explored
            .as_ref()
            .filter(|_| self.refining)
            .and_then(|explored| explored.pass.record(belief));
        let (lower, upper) = match previous {
            Some(record) => (record.lower.clone(), record.upper.clone()),
            None => (
                self.compute_lower_value_bound_at_belief(belief),
                self.compute_upper_value_bound_at_belief(belief),
            ),
        };
        let choices = (0..self.manager.number_of_choices(belief))
            .map(|_| ChoiceRecord {
                transitions: BTreeMap::new(),
                reward: V::zero(),
                status: ChoiceStatus::Fresh,
            })
            .collect();
        let index = self.current.states.len();
        self.current.states.push(StateRecord {
            belief,
            lower,
            upper,
            choices,
            target: false,
            truncated: false,
        });
        self.current.index.insert(belief, index);
        self.queue.push_back(index);
        index
    }

    /// Closes the current pass; it becomes the explored MDP. States of the
    /// previous MDP that were not reached again are dropped.
    pub fn finish_exploration(&mut self) {
        debug_assert!(self.queue.is_empty(), "finishing with unexplored states");
        let pass = std::mem::take(&mut self.current);
        tracing::debug!(
            target: "pomdp_core::explorer",
            states = pass.states.len() + self.mode.extra_states(),
            truncated = pass.states.iter().filter(|s| s.truncated).count(),
            "finished exploration pass"
        );
        self.explored = Some(ExploredMdp {
            pass,
            values: None,
            optimal_choices: Vec::new(),
            optimal_reachable: Vec::new(),
        });
        self.queue.clear();
        self.current_state = 0;
    }

    /// Number of states (including extra states) of the explored MDP.
    pub fn num_explored_states(&self) -> usize {
        self.explored
            .as_ref()
            .map_or(0, |explored| self.mode.extra_states() + explored.pass.states.len())
    }

    /// Number of belief states of the explored MDP; they are indexed
    /// `0..n` in discovery order, the initial belief first.
    pub fn num_explored_belief_states(&self) -> usize {
        self.explored.as_ref().map_or(0, |explored| explored.pass.states.len())
    }

    pub fn number_of_choices_at(&self, state: usize) -> usize {
        self.explored
            .as_ref()
            .and_then(|explored| explored.pass.states.get(state))
            .map_or(0, |record| record.choices.len())
    }

    /// Explored MDP state of `belief`, if it is part of the explored MDP.
    pub fn explored_state_of(&self, belief: BeliefId) -> Option<usize> {
        self.explored.as_ref()?.pass.index.get(&belief).copied()
    }

    /// Transitions of `action` at `belief` in the explored MDP.
    pub fn explored_transitions(&self, belief: BeliefId, action: usize) -> Option<&BTreeMap<Successor, V>> {
        let record = self.explored.as_ref()?.pass.record(belief)?;
        record.choices.get(action).map(|choice| &choice.transitions)
    }

    pub fn explored_choice_status(&self, belief: BeliefId, action: usize) -> Option<ChoiceStatus> {
        let record = self.explored.as_ref()?.pass.record(belief)?;
        record.choices.get(action).map(|choice| choice.status)
    }

    pub fn explored_state_was_truncated(&self, belief: BeliefId) -> bool {
        self.explored
            .as_ref()
            .and_then(|explored| explored.pass.record(belief))
            .is_some_and(|record| record.truncated)
    }

    fn sparse_mdp(&self, explored: &ExploredMdp<V>) -> SparseMdp<V> {
        let extras = self.mode.extra_states();
        let pass = &explored.pass;
        let mut mdp = SparseMdp::with_states(extras + pass.states.len());
        let fixed_target_value = match self.mode {
            ExplorationMode::Probabilities => V::one(),
            ExplorationMode::Rewards => V::zero(),
        };

        mdp.fixed[BOTTOM] = Some(V::zero());
        mdp.choices[BOTTOM] = vec![self_loop(BOTTOM)];
        if self.mode == ExplorationMode::Probabilities {
            mdp.fixed[TARGET] = Some(V::one());
            mdp.choices[TARGET] = vec![self_loop(TARGET)];
        }

        for (i, record) in pass.states.iter().enumerate() {
            let state = extras + i;
            if record.target {
                mdp.fixed[state] = Some(fixed_target_value.clone());
                mdp.choices[state] = vec![self_loop(state)];
                continue;
            }
            mdp.choices[state] = record
                .choices
                .iter()
                .map(|choice| SparseChoice {
                    transitions: choice
                        .transitions
                        .iter()
                        .filter_map(|(successor, prob)| {
                            column(pass, extras, *successor).map(|col| (col, prob.clone()))
                        })
                        .collect(),
                    reward: choice.reward.clone(),
                })
                .collect();
        }
        mdp
    }

    /// Solves the explored MDP in the given direction.
    pub fn compute_values_of_explored_mdp(&mut self, direction: OptimizationDirection) {
        let Some(explored) = self.explored.as_ref() else {
            return;
        };
        let mdp = self.sparse_mdp(explored);
        let outcome = self.solver.solve_values(&mdp, direction);
        tracing::debug!(
            target: "pomdp_core::explorer",
            states = mdp.num_states(),
            iterations = outcome.iterations,
            converged = outcome.converged,
            "solved explored MDP"
        );
        if let Some(explored) = self.explored.as_mut() {
            explored.values = Some(outcome.values);
            explored.optimal_choices.clear();
            explored.optimal_reachable.clear();
        }
    }

    pub fn has_computed_values(&self) -> bool {
        self.explored
            .as_ref()
            .is_some_and(|explored| explored.values.is_some())
    }

    pub fn computed_value_at_initial_state(&self) -> Option<V> {
        let values = self.explored.as_ref()?.values.as_ref()?;
        values.get(self.mode.extra_states()).cloned()
    }

    /// Computed value of an explored belief state.
    pub fn computed_value_at_state(&self, state: usize) -> Option<V> {
        let values = self.explored.as_ref()?.values.as_ref()?;
        values.get(self.mode.extra_states() + state).cloned()
    }

    /// Marks the choices whose value is within `epsilon` of the state value
    /// (relative to the state value if `relative`) and the states reachable
    /// from the initial state through such choices. Target states are not
    /// expanded.
    pub fn compute_optimal_choices_and_reachable_states(&mut self, epsilon: &V, relative: bool) {
        let extras = self.mode.extra_states();
        let Some(explored) = self.explored.as_mut() else {
            return;
        };
        let Some(values) = explored.values.as_ref() else {
            return;
        };
        let pass = &explored.pass;

        let mut optimal_choices = Vec::with_capacity(pass.states.len());
        for (i, record) in pass.states.iter().enumerate() {
            if record.target {
                optimal_choices.push(vec![false; record.choices.len()]);
                continue;
            }
            let value = &values[extras + i];
            let tolerance = if relative {
                epsilon.clone() * value.abs()
            } else {
                epsilon.clone()
            };
            let deviations: Vec<V> = record
                .choices
                .iter()
                .map(|choice| {
                    let q = choice
                        .transitions
                        .iter()
                        .fold(choice.reward.clone(), |acc, (successor, prob)| {
                            let next = column(pass, extras, *successor)
                                .map(|col| values[col].clone())
                                .unwrap_or_else(V::zero);
                            acc + prob.clone() * next
                        });
                    (q - value.clone()).abs()
                })
                .collect();
            let mut optimal: Vec<bool> = deviations.iter().map(|d| *d <= tolerance).collect();
            if !optimal.iter().any(|o| *o) {
                // Solver noise can exceed a zero tolerance; keep the closest choice.
                let closest = deviations
                    .iter()
                    .enumerate()
                    .fold(None::<(usize, &V)>, |best, (a, d)| match best {
                        Some((_, incumbent)) if *incumbent <= *d => best,
                        _ => Some((a, d)),
                    });
                if let Some((action, _)) = closest {
                    optimal[action] = true;
                }
            }
            optimal_choices.push(optimal);
        }

        let mut reachable = vec![false; pass.states.len()];
        let mut queue = VecDeque::new();
        if !reachable.is_empty() {
            reachable[0] = true;
            queue.push_back(0);
        }
        while let Some(state) = queue.pop_front() {
            let record = &pass.states[state];
            if record.target {
                continue;
            }
            for (choice, optimal) in record.choices.iter().zip(&optimal_choices[state]) {
                if !optimal {
                    continue;
                }
                for successor in choice.transitions.keys() {
                    if let Successor::Belief(belief) = successor {
                        if let Some(next) = pass.index.get(belief) {
                            if !reachable[*next] {
                                reachable[*next] = true;
                                queue.push_back(*next);
                            }
                        }
                    }
                }
            }
        }

        explored.optimal_choices = optimal_choices;
        explored.optimal_reachable = reachable;
    }

    pub fn state_is_optimal_scheduler_reachable(&self, state: usize) -> bool {
        self.explored
            .as_ref()
            .and_then(|explored| explored.optimal_reachable.get(state))
            .copied()
            .unwrap_or(false)
    }

    pub fn action_is_optimal(&self, state: usize, action: usize) -> bool {
        self.explored
            .as_ref()
            .and_then(|explored| explored.optimal_choices.get(state))
            .and_then(|choices| choices.get(action))
            .copied()
            .unwrap_or(false)
    }

    /// Groups the belief successors of `action` at explored `state` by
    /// observation.
    pub fn gather_successor_observation_information(
        &self,
        state: usize,
        action: usize,
    ) -> BTreeMap<u32, SuccessorObservationInformation<V>> {
        let mut gathered: BTreeMap<u32, SuccessorObservationInformation<V>> = BTreeMap::new();
        let Some(choice) = self
            .explored
            .as_ref()
            .and_then(|explored| explored.pass.states.get(state))
            .and_then(|record| record.choices.get(action))
        else {
            return gathered;
        };
        for (successor, prob) in &choice.transitions {
            let Successor::Belief(belief) = successor else {
                continue;
            };
            let observation = self.manager.observation(*belief);
            let info = gathered
                .entry(observation)
                .or_insert_with(|| SuccessorObservationInformation {
                    observation_probability: V::zero(),
                    max_probability_to_successor_with_obs: V::zero(),
                    successor_count: 0,
                    support: BTreeSet::new(),
                });
            info.observation_probability = info.observation_probability.clone() + prob.clone();
            if *prob > info.max_probability_to_successor_with_obs {
                info.max_probability_to_successor_with_obs = prob.clone();
            }
            info.successor_count += 1;
            info.support.extend(self.manager.belief(*belief).support());
        }
        gathered
    }

    /// Raises the stored lower bound of every explored state to its computed
    /// value. Bounds never loosen.
    pub fn take_current_values_as_lower_bounds(&mut self) {
        self.take_current_values(|record, value| {
            if value > record.lower {
                record.lower = value;
            }
        });
    }

    /// Lowers the stored upper bound of every explored state to its computed
    /// value. Bounds never loosen.
    pub fn take_current_values_as_upper_bounds(&mut self) {
        self.take_current_values(|record, value| {
            if value < record.upper {
                record.upper = value;
            }
        });
    }

    fn take_current_values<F>(&mut self, mut apply: F)
    where
        F: FnMut(&mut StateRecord<V>, V),
    {
        let extras = self.mode.extra_states();
        let Some(explored) = self.explored.as_mut() else {
            return;
        };
        let Some(values) = explored.values.as_ref() else {
            return;
        };
        for (i, record) in explored.pass.states.iter_mut().enumerate() {
            apply(record, values[extras + i].clone());
        }
    }
}

fn self_loop<V: Value>(state: usize) -> SparseChoice<V> {
    SparseChoice {
        transitions: vec![(state, V::one())],
        reward: V::zero(),
    }
}

fn column<V>(pass: &Pass<V>, extras: usize, successor: Successor) -> Option<usize> {
    match successor {
        Successor::Bottom => Some(BOTTOM),
        Successor::Target => (extras > TARGET).then_some(TARGET),
        Successor::Belief(belief) => pass.index.get(&belief).map(|i| extras + i),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Pomdp, PomdpBuilder};

    /// 0 --a0--> {1: 1/2, 2: 1/2}, 1 and 2 share an observation; a0 at 1
    /// reaches the goal 3, a1 at 2 reaches the goal.
    fn guess_model() -> Pomdp<f64> {
        PomdpBuilder::new(5)
            .observations(vec![0, 1, 1, 2, 3])
            .choice(0, vec![(1, 0.5), (2, 0.5)])
            .choice(0, vec![(1, 0.5), (2, 0.5)])
            .choice(1, vec![(3, 1.0)])
            .choice(1, vec![(4, 1.0)])
            .choice(2, vec![(4, 1.0)])
            .choice(2, vec![(3, 1.0)])
            .choice(3, vec![(3, 1.0)])
            .choice(3, vec![(3, 1.0)])
            .choice(4, vec![(4, 1.0)])
            .choice(4, vec![(4, 1.0)])
            .label("goal", [3])
            .build(1e-9)
            .expect("valid model")
    }

    fn explore_exactly(explorer: &mut BeliefMdpExplorer<'_, f64>, targets: &BTreeSet<u32>) {
        while let Some(belief) = explorer.explore_next_state() {
            let observation = explorer.belief_manager().observation(belief);
            if targets.contains(&observation) {
                explorer.set_current_state_is_target();
                explorer.add_selfloop_transition();
                continue;
            }
            for action in 0..explorer.belief_manager().number_of_choices(belief) {
                if explorer.current_state_has_old_behavior() {
                    explorer.restore_old_behavior_at_current_state(action);
                    continue;
                }
                let successors = explorer.belief_manager_mut().expand(belief, action);
                for (successor, prob) in successors {
                    explorer.add_transition_to_belief(action, successor, prob, false);
                }
            }
        }
        explorer.finish_exploration();
    }

    fn explorer(pomdp: &Pomdp<f64>) -> BeliefMdpExplorer<'_, f64> {
        let n = pomdp.num_states();
        BeliefMdpExplorer::new(BeliefManager::new(pomdp, 1e-9), vec![0.0; n], vec![1.0; n])
    }

    #[test]
    fn exact_exploration_finds_the_uniform_guess_value() {
        let pomdp = guess_model();
        let targets = BTreeSet::from([2]);
        let mut explorer = explorer(&pomdp);
        explorer.start_new_exploration(ExplorationMode::Probabilities);
        explore_exactly(&mut explorer, &targets);
        explorer.compute_values_of_explored_mdp(OptimizationDirection::Maximize);

        let value = explorer.computed_value_at_initial_state().expect("values");
        assert!((value - 0.5).abs() < 1e-9);
        // initial, mixed belief, goal and fail Diracs plus two extra states
        assert_eq!(explorer.num_explored_states(), 6);
    }

    #[test]
    fn restoring_an_unchanged_pass_reproduces_its_transitions() {
        let pomdp = guess_model();
        let targets = BTreeSet::from([2]);
        let mut explorer = explorer(&pomdp);
        explorer.start_new_exploration(ExplorationMode::Probabilities);
        explore_exactly(&mut explorer, &targets);

        let initial = explorer.belief_manager().initial_belief();
        let before: Vec<_> = (0..2)
            .map(|a| explorer.explored_transitions(initial, a).cloned())
            .collect();

        for _ in 0..3 {
            explorer.restart_exploration();
            explore_exactly(&mut explorer, &targets);
            let after: Vec<_> = (0..2)
                .map(|a| explorer.explored_transitions(initial, a).cloned())
                .collect();
            assert_eq!(before, after);
            assert_eq!(explorer.explored_choice_status(initial, 0), Some(ChoiceStatus::Restored));
        }
        assert_eq!(explorer.num_explored_states(), 6);
    }

    #[test]
    fn ignoring_new_beliefs_rejects_undiscovered_successors() {
        let pomdp = guess_model();
        let mut explorer = explorer(&pomdp);
        explorer.start_new_exploration(ExplorationMode::Probabilities);
        let initial = explorer.explore_next_state().expect("initial state");
        let successors = explorer.belief_manager_mut().expand(initial, 0);
        let (mixed, prob) = successors[0];
        assert!(!explorer.add_transition_to_belief(0, mixed, prob, true));
        assert!(explorer.add_transition_to_belief(0, initial, prob, true));
        assert_eq!(explorer.current_number_of_states(), 3);
    }

    #[test]
    fn gathered_information_groups_by_observation() {
        let pomdp = guess_model();
        let targets = BTreeSet::from([2]);
        let mut explorer = explorer(&pomdp);
        explorer.start_new_exploration(ExplorationMode::Probabilities);
        explore_exactly(&mut explorer, &targets);

        let info = explorer.gather_successor_observation_information(0, 0);
        let mixed = &info[&1];
        assert_eq!(mixed.observation_probability, 1.0);
        assert_eq!(mixed.successor_count, 1);
        assert_eq!(mixed.support, BTreeSet::from([1, 2]));
    }

    #[test]
    fn optimal_choices_and_reachability() {
        let pomdp = guess_model();
        let targets = BTreeSet::from([2]);
        let mut explorer = explorer(&pomdp);
        explorer.start_new_exploration(ExplorationMode::Probabilities);
        explore_exactly(&mut explorer, &targets);
        explorer.compute_values_of_explored_mdp(OptimizationDirection::Maximize);
        explorer.compute_optimal_choices_and_reachable_states(&1e-6, true);

        // Both actions at the mixed belief are worth 1/2.
        assert!(explorer.state_is_optimal_scheduler_reachable(0));
        assert!(explorer.state_is_optimal_scheduler_reachable(1));
        assert!(explorer.action_is_optimal(1, 0));
        assert!(explorer.action_is_optimal(1, 1));
    }

    #[test]
    fn taking_values_as_bounds_only_tightens() {
        let pomdp = guess_model();
        let targets = BTreeSet::from([2]);
        let mut explorer = explorer(&pomdp);
        explorer.start_new_exploration(ExplorationMode::Probabilities);
        explore_exactly(&mut explorer, &targets);
        explorer.compute_values_of_explored_mdp(OptimizationDirection::Maximize);
        explorer.take_current_values_as_upper_bounds();

        explorer.restart_exploration();
        explorer.explore_next_state();
        assert!((explorer.upper_value_bound_at_current_state() - 0.5).abs() < 1e-9);
        assert_eq!(explorer.lower_value_bound_at_current_state(), 0.0);
    }
}
