//! Belief store: creation, deduplication, exact and triangulated successors.

use super::triangulation::freudenthal;
use super::{Belief, BeliefId};
use crate::model::Pomdp;
use crate::numeric::Value;
use std::collections::{BTreeMap, HashMap};

type BeliefKey<K> = (u32, Vec<(usize, K)>);

/// Owns every belief created while exploring one POMDP. Beliefs are never
/// removed, so ids stay valid across exploration passes.
#[derive(Debug)]
pub struct BeliefManager<'a, V: Value> {
    pomdp: &'a Pomdp<V>,
    precision: V,
    precision_f64: f64,
    beliefs: Vec<Belief<V>>,
    index: HashMap<BeliefKey<V::Key>, BeliefId>,
    reward_model: Option<String>,
    initial: BeliefId,
}

impl<'a, V: Value> BeliefManager<'a, V> {
    /// `precision` is the tolerance for treating two probabilities as equal
    /// (ignored beyond zero by exact value types).
    pub fn new(pomdp: &'a Pomdp<V>, precision: f64) -> Self {
        let precision_f64 = if V::IS_EXACT { 0.0 } else { precision };
        let mut manager = Self {
            pomdp,
            precision: V::from_f64(precision_f64),
            precision_f64,
            beliefs: Vec::new(),
            index: HashMap::new(),
            reward_model: None,
            initial: BeliefId(0),
        };
        let mut dirac = BTreeMap::new();
        dirac.insert(pomdp.initial_state(), V::one());
        manager.initial = manager.get_or_add(dirac);
        manager
    }

    pub fn pomdp(&self) -> &'a Pomdp<V> {
        self.pomdp
    }

    /// Selects the reward model used by [`BeliefManager::expected_reward`].
    /// Unknown names are ignored by the caller's prior validation.
    pub fn set_reward_model(&mut self, name: Option<&str>) {
        self.reward_model = name.map(str::to_string);
    }

    pub fn initial_belief(&self) -> BeliefId {
        self.initial
    }

    pub fn belief(&self, id: BeliefId) -> &Belief<V> {
        &self.beliefs[id.index()]
    }

    pub fn observation(&self, id: BeliefId) -> u32 {
        self.beliefs[id.index()].observation
    }

    pub fn number_of_beliefs(&self) -> usize {
        self.beliefs.len()
    }

    /// States sharing an observation share their number of choices.
    pub fn number_of_choices(&self, id: BeliefId) -> usize {
        self.belief(id)
            .support()
            .next()
            .map(|state| self.pomdp.num_choices(state))
            .unwrap_or(0)
    }

    /// Expected immediate reward of `action` under the selected reward model.
    pub fn expected_reward(&self, id: BeliefId, action: usize) -> V {
        let Some(model) = self
            .reward_model
            .as_deref()
            .and_then(|name| self.pomdp.reward_model(name))
        else {
            return V::zero();
        };
        self.belief(id)
            .distribution
            .iter()
            .fold(V::zero(), |acc, (state, prob)| {
                acc + prob.clone() * model.reward(*state, action)
            })
    }

    /// `sum_s b(s) * values[s]`, used to interpolate per-state bounds.
    pub fn weighted_sum(&self, id: BeliefId, values: &[V]) -> V {
        self.belief(id)
            .distribution
            .iter()
            .fold(V::zero(), |acc, (state, prob)| acc + prob.clone() * values[*state].clone())
    }

    /// Exact successor beliefs of `action`, one per successor observation,
    /// paired with the probability of that observation.
    pub fn expand(&mut self, id: BeliefId, action: usize) -> Vec<(BeliefId, V)> {
        let per_observation = {
            let pomdp = self.pomdp;
            let mut per_observation: BTreeMap<u32, BTreeMap<usize, V>> = BTreeMap::new();
            for (state, prob) in &self.beliefs[id.index()].distribution {
                for (successor, trans) in pomdp.transitions(*state, action) {
                    let mass = prob.clone() * trans.clone();
                    if mass.is_zero() {
                        continue;
                    }
                    let slot = per_observation
                        .entry(pomdp.observation(*successor))
                        .or_default()
                        .entry(*successor)
                        .or_insert_with(V::zero);
                    *slot = slot.clone() + mass;
                }
            }
            per_observation
        };

        let mut successors = Vec::with_capacity(per_observation.len());
        for (_, unnormalized) in per_observation {
            let total = unnormalized.values().fold(V::zero(), |acc, p| acc + p.clone());
            let distribution = unnormalized
                .into_iter()
                .map(|(state, p)| (state, p / total.clone()))
                .collect();
            successors.push((self.get_or_add(distribution), total));
        }
        successors
    }

    /// Grid corners approximating `id` at `resolution`, with their weights.
    pub fn triangulate(&mut self, id: BeliefId, resolution: u64) -> Vec<(BeliefId, V)> {
        let belief = &self.beliefs[id.index()];
        if belief.is_dirac() {
            return vec![(id, V::one())];
        }
        let entries: Vec<(usize, V)> = belief
            .distribution
            .iter()
            .map(|(state, prob)| (*state, prob.clone()))
            .collect();
        freudenthal(&entries, resolution, &self.precision)
            .into_iter()
            .map(|point| {
                let corner = self.get_or_add(point.distribution.into_iter().collect());
                (corner, point.weight)
            })
            .collect()
    }

    /// Successors of `action` replaced by their grid corners at the resolution
    /// of each successor observation. Weights of shared corners are merged.
    pub fn expand_and_triangulate(
        &mut self,
        id: BeliefId,
        action: usize,
        resolutions: &[u64],
    ) -> Vec<(BeliefId, V)> {
        let mut merged: BTreeMap<BeliefId, V> = BTreeMap::new();
        for (successor, prob) in self.expand(id, action) {
            let resolution = resolutions
                .get(self.observation(successor) as usize)
                .copied()
                .unwrap_or(1);
            for (corner, weight) in self.triangulate(successor, resolution) {
                let slot = merged.entry(corner).or_insert_with(V::zero);
                *slot = slot.clone() + prob.clone() * weight;
            }
        }
        merged.into_iter().collect()
    }

    fn get_or_add(&mut self, distribution: BTreeMap<usize, V>) -> BeliefId {
        let observation = distribution
            .keys()
            .next()
            .map(|state| self.pomdp.observation(*state))
            .unwrap_or(0);
        debug_assert!(
            distribution
                .keys()
                .all(|state| self.pomdp.observation(*state) == observation),
            "belief mixes observations"
        );
        let key: BeliefKey<V::Key> = (
            observation,
            distribution
                .iter()
                .map(|(state, prob)| (*state, prob.fingerprint(self.precision_f64)))
                .collect(),
        );
        if let Some(existing) = self.index.get(&key) {
            return *existing;
        }
        let id = BeliefId(self.beliefs.len());
        self.beliefs.push(Belief {
            id,
            observation,
            distribution,
        });
        self.index.insert(key, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PomdpBuilder;
    use num::BigRational;

    fn rational(raw: &str) -> BigRational {
        <BigRational as Value>::parse(raw).expect("rational literal")
    }

    /// 0 -> {1: 1/3, 2: 2/3} where 1 and 2 share observation 1; 3 has observation 2.
    fn split_model() -> Pomdp<BigRational> {
        PomdpBuilder::new(4)
            .observations(vec![0, 1, 1, 2])
            .choice(0, vec![(1, rational("1/3")), (2, rational("1/3")), (3, rational("1/3"))])
            .choice(1, vec![(1, rational("1"))])
            .choice(2, vec![(2, rational("1"))])
            .choice(3, vec![(3, rational("1"))])
            .reward_model(
                "cost",
                vec![
                    vec![rational("2")],
                    vec![rational("0")],
                    vec![rational("0")],
                    vec![rational("0")],
                ],
            )
            .build(0.0)
            .expect("valid model")
    }

    #[test]
    fn expand_groups_successors_by_observation() {
        let pomdp = split_model();
        let mut manager = BeliefManager::new(&pomdp, 0.0);
        let initial = manager.initial_belief();
        let successors = manager.expand(initial, 0);
        assert_eq!(successors.len(), 2);

        let (shared, prob) = &successors[0];
        assert_eq!(prob, &rational("2/3"));
        assert_eq!(manager.observation(*shared), 1);
        assert_eq!(
            manager.belief(*shared).distribution().get(&1),
            Some(&rational("1/2"))
        );
        assert_eq!(successors[1].1, rational("1/3"));
        assert!(manager.belief(successors[1].0).is_dirac());
    }

    #[test]
    fn beliefs_are_deduplicated() {
        let pomdp = split_model();
        let mut manager = BeliefManager::new(&pomdp, 0.0);
        let initial = manager.initial_belief();
        let first = manager.expand(initial, 0);
        let count = manager.number_of_beliefs();
        let second = manager.expand(initial, 0);
        assert_eq!(first, second);
        assert_eq!(manager.number_of_beliefs(), count);
    }

    #[test]
    fn triangulated_weights_sum_to_one() {
        let pomdp = split_model();
        let mut manager = BeliefManager::new(&pomdp, 0.0);
        let initial = manager.initial_belief();
        let corners = manager.expand_and_triangulate(initial, 0, &[3, 3, 3]);
        let total = corners
            .iter()
            .fold(rational("0"), |acc, (_, w)| acc + w.clone());
        assert_eq!(total, rational("1"));
    }

    #[test]
    fn expected_reward_uses_selected_model() {
        let pomdp = split_model();
        let mut manager = BeliefManager::new(&pomdp, 0.0);
        let initial = manager.initial_belief();
        assert_eq!(manager.expected_reward(initial, 0), rational("0"));
        manager.set_reward_model(Some("cost"));
        assert_eq!(manager.expected_reward(initial, 0), rational("2"));
    }
}
