//! Value iteration on explicit sparse MDPs.
//!
//! This is the numeric back end used to evaluate grid MDPs and the fully
//! observable relaxation of a POMDP. It computes least fixed points starting
//! from zero, which yields reachability probabilities and expected rewards
//! for both optimization directions. Exact value types finish with policy
//! iteration over the rationals, so their results carry no rounding.

use crate::numeric::Value;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

const DEFAULT_PRECISION: f64 = 1e-10;
const DEFAULT_MAX_ITERATIONS: usize = 100_000;
const MAX_POLICY_ROUNDS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationDirection {
    #[serde(alias = "min")]
    Minimize,
    #[serde(alias = "max")]
    Maximize,
}

impl OptimizationDirection {
    pub const fn is_minimize(self) -> bool {
        matches!(self, Self::Minimize)
    }

    /// Returns true when `candidate` is strictly better than `incumbent`.
    pub fn improves<T: PartialOrd>(self, candidate: T, incumbent: T) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }
}

impl fmt::Display for OptimizationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minimize => f.write_str("min"),
            Self::Maximize => f.write_str("max"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SparseChoice<V = f64> {
    pub transitions: Vec<(usize, V)>,
    pub reward: V,
}

/// Explicit MDP handed to the solver. States with a `fixed` value are not
/// updated.
#[derive(Debug, Clone, Default)]
pub struct SparseMdp<V = f64> {
    pub choices: Vec<Vec<SparseChoice<V>>>,
    pub fixed: Vec<Option<V>>,
}

impl<V: Value> SparseMdp<V> {
    pub fn with_states(count: usize) -> Self {
        Self {
            choices: vec![Vec::new(); count],
            fixed: vec![None; count],
        }
    }

    pub fn num_states(&self) -> usize {
        self.choices.len()
    }

    pub fn choice_value(&self, state: usize, choice: usize, values: &[V]) -> V {
        let choice = &self.choices[state][choice];
        choice
            .transitions
            .iter()
            .fold(choice.reward.clone(), |acc, (target, prob)| {
                acc + prob.clone() * values[*target].clone()
            })
    }

    pub fn to_float(&self) -> SparseMdp<f64> {
        SparseMdp {
            choices: self
                .choices
                .iter()
                .map(|choices| {
                    choices
                        .iter()
                        .map(|choice| SparseChoice {
                            transitions: choice
                                .transitions
                                .iter()
                                .map(|(target, prob)| (*target, prob.to_f64()))
                                .collect(),
                            reward: choice.reward.to_f64(),
                        })
                        .collect()
                })
                .collect(),
            fixed: self.fixed.iter().map(|v| v.as_ref().map(|v| v.to_f64())).collect(),
        }
    }

    /// The choice a memoryless policy takes in a non-fixed state.
    fn policy_choice(&self, state: usize, policy: &[usize]) -> Option<&SparseChoice<V>> {
        if self.fixed[state].is_some() {
            return None;
        }
        let choices = &self.choices[state];
        let last = choices.len().checked_sub(1)?;
        choices.get(policy[state].min(last))
    }
}

#[derive(Debug, Clone)]
pub struct SolverOutcome<V = f64> {
    pub values: Vec<V>,
    pub iterations: usize,
    pub converged: bool,
}

impl SolverOutcome {
    fn convert<V: Value>(self) -> SolverOutcome<V> {
        SolverOutcome {
            values: self.values.into_iter().map(V::from_f64).collect(),
            iterations: self.iterations,
            converged: self.converged,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValueIterationSolver {
    precision: f64,
    max_iterations: usize,
}

impl Default for ValueIterationSolver {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION, DEFAULT_MAX_ITERATIONS)
    }
}

impl ValueIterationSolver {
    pub const fn new(precision: f64, max_iterations: usize) -> Self {
        Self {
            precision,
            max_iterations,
        }
    }

    /// Optimal values in the given direction (Gauss-Seidel sweeps).
    pub fn solve(&self, mdp: &SparseMdp, direction: OptimizationDirection) -> SolverOutcome {
        self.iterate(mdp, |state, values| {
            let mut best: Option<f64> = None;
            for choice in 0..mdp.choices[state].len() {
                let value = mdp.choice_value(state, choice, values);
                best = match best {
                    Some(incumbent) if !direction.improves(value, incumbent) => Some(incumbent),
                    _ => Some(value),
                };
            }
            best.unwrap_or(0.0)
        })
    }

    /// Values of the memoryless policy selecting `policy[state]` in each state.
    pub fn evaluate(&self, mdp: &SparseMdp, policy: &[usize]) -> SolverOutcome {
        self.iterate(mdp, |state, values| {
            if mdp.choices[state].is_empty() {
                return 0.0;
            }
            let choice = policy[state].min(mdp.choices[state].len() - 1);
            mdp.choice_value(state, choice, values)
        })
    }

    /// Optimal values in the value type of `mdp`.
    ///
    /// Exact types use value iteration only to pick a memoryless policy. Its
    /// values are then solved as a linear system in `V`, and the policy is
    /// switched wherever a choice is strictly better, until none is.
    pub fn solve_values<V: Value>(&self, mdp: &SparseMdp<V>, direction: OptimizationDirection) -> SolverOutcome<V> {
        let float = mdp.to_float();
        let outcome = self.solve(&float, direction);
        if !V::IS_EXACT {
            return outcome.convert();
        }

        let mut policy = greedy_policy(&float, &outcome.values, direction);
        let mut rounds = 0;
        loop {
            let Some(values) = exact_policy_values(mdp, &policy) else {
                tracing::warn!(
                    target: "pomdp_core::solver",
                    "policy system is singular; keeping the floating-point values"
                );
                return SolverOutcome {
                    converged: false,
                    ..outcome.convert()
                };
            };
            rounds += 1;
            let improved = improve_policy(mdp, &values, direction, &mut policy);
            if !improved || rounds == MAX_POLICY_ROUNDS {
                if improved {
                    tracing::warn!(
                        target: "pomdp_core::solver",
                        rounds,
                        "policy iteration stopped before reaching an optimal policy"
                    );
                }
                return SolverOutcome {
                    values,
                    iterations: outcome.iterations + rounds,
                    converged: outcome.converged && !improved,
                };
            }
        }
    }

    /// Values of a memoryless policy in the value type of `mdp`; exact types
    /// solve the policy's linear system.
    pub fn evaluate_values<V: Value>(&self, mdp: &SparseMdp<V>, policy: &[usize]) -> SolverOutcome<V> {
        if V::IS_EXACT {
            if let Some(values) = exact_policy_values(mdp, policy) {
                return SolverOutcome {
                    values,
                    iterations: 1,
                    converged: true,
                };
            }
            tracing::warn!(
                target: "pomdp_core::solver",
                "policy system is singular; keeping the floating-point values"
            );
        }
        self.evaluate(&mdp.to_float(), policy).convert()
    }

    fn iterate<F>(&self, mdp: &SparseMdp, mut update: F) -> SolverOutcome
    where
        F: FnMut(usize, &[f64]) -> f64,
    {
        let mut values: Vec<f64> = mdp.fixed.iter().map(|v| v.unwrap_or(0.0)).collect();
        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            iterations += 1;
            let mut max_delta = 0.0f64;
            for state in 0..mdp.num_states() {
                if mdp.fixed[state].is_some() {
                    continue;
                }
                let next = update(state, &values);
                let delta = (next - values[state]).abs() / next.abs().max(1.0);
                max_delta = max_delta.max(delta);
                values[state] = next;
            }
            if max_delta <= self.precision {
                converged = true;
                break;
            }
        }
        if !converged {
            tracing::warn!(
                target: "pomdp_core::solver",
                iterations,
                "value iteration did not converge within the iteration budget"
            );
        }
        SolverOutcome {
            values,
            iterations,
            converged,
        }
    }
}

/// Per state, the first choice with the best value.
fn greedy_policy(mdp: &SparseMdp, values: &[f64], direction: OptimizationDirection) -> Vec<usize> {
    (0..mdp.num_states())
        .map(|state| {
            let mut best: Option<(usize, f64)> = None;
            for choice in 0..mdp.choices[state].len() {
                let value = mdp.choice_value(state, choice, values);
                best = match best {
                    Some((_, incumbent)) if !direction.improves(value, incumbent) => best,
                    _ => Some((choice, value)),
                };
            }
            best.map_or(0, |(choice, _)| choice)
        })
        .collect()
}

/// Switches every state to its best choice if that is strictly better than
/// the current value. Returns whether anything changed.
fn improve_policy<V: Value>(
    mdp: &SparseMdp<V>,
    values: &[V],
    direction: OptimizationDirection,
    policy: &mut [usize],
) -> bool {
    let mut changed = false;
    for state in 0..mdp.num_states() {
        if mdp.fixed[state].is_some() {
            continue;
        }
        let mut best = policy[state];
        let mut best_value = values[state].clone();
        for choice in 0..mdp.choices[state].len() {
            let value = mdp.choice_value(state, choice, values);
            if direction.improves(&value, &best_value) {
                best = choice;
                best_value = value;
            }
        }
        if best != policy[state] {
            policy[state] = best;
            changed = true;
        }
    }
    changed
}

/// Least fixed point of a memoryless policy in exact arithmetic.
///
/// States that cannot reach a nonzero fixed value or a rewarded choice are
/// zero; the others form a linear system. `None` if that system is singular,
/// which happens when rewards are collected forever.
fn exact_policy_values<V: Value>(mdp: &SparseMdp<V>, policy: &[usize]) -> Option<Vec<V>> {
    let n = mdp.num_states();
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut positive = vec![false; n];
    let mut queue = VecDeque::new();
    for state in 0..n {
        let source = match (&mdp.fixed[state], mdp.policy_choice(state, policy)) {
            (Some(value), _) => !value.is_zero(),
            (None, Some(choice)) => {
                for (target, prob) in &choice.transitions {
                    if !prob.is_zero() {
                        predecessors[*target].push(state);
                    }
                }
                !choice.reward.is_zero()
            }
            (None, None) => false,
        };
        if source {
            positive[state] = true;
            queue.push_back(state);
        }
    }
    while let Some(state) = queue.pop_front() {
        for &pred in &predecessors[state] {
            if !positive[pred] {
                positive[pred] = true;
                queue.push_back(pred);
            }
        }
    }

    let unknowns: Vec<usize> = (0..n)
        .filter(|&state| positive[state] && mdp.fixed[state].is_none())
        .collect();
    let mut column = vec![None; n];
    for (i, &state) in unknowns.iter().enumerate() {
        column[state] = Some(i);
    }

    // v_s - sum_{t unknown} p v_t = r + sum_{t fixed} p * fixed_t
    let m = unknowns.len();
    let mut matrix = vec![vec![V::zero(); m]; m];
    let mut rhs = vec![V::zero(); m];
    for (row, &state) in unknowns.iter().enumerate() {
        matrix[row][row] = V::one();
        let Some(choice) = mdp.policy_choice(state, policy) else {
            continue;
        };
        rhs[row] = choice.reward.clone();
        for (target, prob) in &choice.transitions {
            if let Some(col) = column[*target] {
                matrix[row][col] = matrix[row][col].clone() - prob.clone();
            } else if let Some(value) = &mdp.fixed[*target] {
                rhs[row] = rhs[row].clone() + prob.clone() * value.clone();
            }
        }
    }
    let solution = solve_linear_system(matrix, rhs)?;

    let mut values: Vec<V> = mdp.fixed.iter().map(|v| v.clone().unwrap_or_else(V::zero)).collect();
    for (state, value) in unknowns.into_iter().zip(solution) {
        values[state] = value;
    }
    Some(values)
}

/// Gaussian elimination with the first nonzero pivot of each column.
fn solve_linear_system<V: Value>(mut matrix: Vec<Vec<V>>, mut rhs: Vec<V>) -> Option<Vec<V>> {
    let m = rhs.len();
    for k in 0..m {
        let pivot = (k..m).find(|&row| !matrix[row][k].is_zero())?;
        matrix.swap(k, pivot);
        rhs.swap(k, pivot);
        for row in k + 1..m {
            if matrix[row][k].is_zero() {
                continue;
            }
            let factor = matrix[row][k].clone() / matrix[k][k].clone();
            for col in k..m {
                let delta = factor.clone() * matrix[k][col].clone();
                matrix[row][col] = matrix[row][col].clone() - delta;
            }
            let delta = factor * rhs[k].clone();
            rhs[row] = rhs[row].clone() - delta;
        }
    }
    let mut solution = vec![V::zero(); m];
    for k in (0..m).rev() {
        let mut acc = rhs[k].clone();
        for col in k + 1..m {
            acc = acc - matrix[k][col].clone() * solution[col].clone();
        }
        solution[k] = acc / matrix[k][k].clone();
    }
    Some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num::BigRational;
    use num::bigint::BigInt;

    fn gamble() -> SparseMdp {
        // 0: safe (0.5 -> goal, 0.5 -> fail) or loop-then-goal (0.9 -> goal, 0.1 -> 0)
        let mut mdp = SparseMdp::with_states(3);
        mdp.choices[0] = vec![
            SparseChoice {
                transitions: vec![(1, 0.5), (2, 0.5)],
                reward: 0.0,
            },
            SparseChoice {
                transitions: vec![(1, 0.9), (0, 0.1)],
                reward: 0.0,
            },
        ];
        mdp.fixed[1] = Some(1.0);
        mdp.choices[2] = vec![SparseChoice {
            transitions: vec![(2, 1.0)],
            reward: 0.0,
        }];
        mdp
    }

    #[test]
    fn maximizes_reachability() {
        let outcome = ValueIterationSolver::default().solve(&gamble(), OptimizationDirection::Maximize);
        assert!(outcome.converged);
        assert!((outcome.values[0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn minimizes_reachability() {
        let outcome = ValueIterationSolver::default().solve(&gamble(), OptimizationDirection::Minimize);
        assert!((outcome.values[0] - 0.5).abs() < 1e-8);
        assert_eq!(outcome.values[2], 0.0);
    }

    #[test]
    fn evaluates_fixed_policy() {
        let outcome = ValueIterationSolver::default().evaluate(&gamble(), &[0, 0, 0]);
        assert!((outcome.values[0] - 0.5).abs() < 1e-12);
    }

    fn ratio(numerator: i64, denominator: i64) -> BigRational {
        BigRational::new(BigInt::from(numerator), BigInt::from(denominator))
    }

    /// 0: stay forever, or reach the goal 1 with 1/3 and the sink 2 with 2/3.
    fn exact_trap() -> SparseMdp<BigRational> {
        let mut mdp = SparseMdp::with_states(3);
        mdp.choices[0] = vec![
            SparseChoice {
                transitions: vec![(0, ratio(1, 1))],
                reward: ratio(0, 1),
            },
            SparseChoice {
                transitions: vec![(1, ratio(1, 3)), (2, ratio(2, 3))],
                reward: ratio(0, 1),
            },
        ];
        mdp.fixed[1] = Some(ratio(1, 1));
        mdp.fixed[2] = Some(ratio(0, 1));
        mdp
    }

    #[test]
    fn exact_values_carry_no_rounding() {
        let solver = ValueIterationSolver::default();
        let outcome = solver.solve_values(&exact_trap(), OptimizationDirection::Maximize);
        assert!(outcome.converged);
        assert_eq!(outcome.values[0], ratio(1, 3));

        let outcome = solver.solve_values(&exact_trap(), OptimizationDirection::Minimize);
        assert_eq!(outcome.values[0], ratio(0, 1));
    }

    #[test]
    fn exact_policy_evaluation_solves_loops() {
        let mut mdp: SparseMdp<BigRational> = SparseMdp::with_states(3);
        mdp.choices[0] = vec![SparseChoice {
            transitions: vec![(0, ratio(1, 3)), (1, ratio(1, 3)), (2, ratio(1, 3))],
            reward: ratio(0, 1),
        }];
        mdp.fixed[1] = Some(ratio(1, 1));
        mdp.fixed[2] = Some(ratio(0, 1));

        let outcome = ValueIterationSolver::default().evaluate_values(&mdp, &[0, 0, 0]);
        assert_eq!(outcome.values, vec![ratio(1, 2), ratio(1, 1), ratio(0, 1)]);
    }

    #[test]
    fn exact_rewards_along_a_chain() {
        // 0 -> 1 -> 2 (target), one unit each, 1 retries with probability 2/3.
        let mut mdp: SparseMdp<BigRational> = SparseMdp::with_states(3);
        mdp.choices[0] = vec![SparseChoice {
            transitions: vec![(1, ratio(1, 1))],
            reward: ratio(1, 1),
        }];
        mdp.choices[1] = vec![SparseChoice {
            transitions: vec![(1, ratio(2, 3)), (2, ratio(1, 3))],
            reward: ratio(1, 1),
        }];
        mdp.fixed[2] = Some(ratio(0, 1));

        let outcome = ValueIterationSolver::default().solve_values(&mdp, OptimizationDirection::Minimize);
        assert_eq!(outcome.values[1], ratio(3, 1));
        assert_eq!(outcome.values[0], ratio(4, 1));
    }

    #[test]
    fn endless_rewards_fall_back_to_floats() {
        let mut mdp: SparseMdp<BigRational> = SparseMdp::with_states(1);
        mdp.choices[0] = vec![SparseChoice {
            transitions: vec![(0, ratio(1, 1))],
            reward: ratio(1, 1),
        }];
        let outcome = ValueIterationSolver::new(1e-10, 10).evaluate_values(&mdp, &[0]);
        assert!(!outcome.converged);
        assert_eq!(outcome.values[0], ratio(10, 1));
    }

    #[test]
    fn direction_parses_short_names() {
        let dir: OptimizationDirection = serde_json::from_str("\"max\"").expect("alias");
        assert_eq!(dir, OptimizationDirection::Maximize);
    }
}
