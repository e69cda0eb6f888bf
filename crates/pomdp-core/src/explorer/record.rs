use crate::belief::BeliefId;
use std::collections::BTreeMap;

/// Successor of an MDP choice. Extra states come first in the solver layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Successor {
    /// Absorbing state with value zero.
    Bottom,
    /// Absorbing state with value one (probability mode only).
    Target,
    Belief(BeliefId),
}

/// How a choice got its transitions in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChoiceStatus {
    /// Expanded at a state without previous behavior.
    #[default]
    Fresh,
    /// Copied verbatim from the previous pass.
    Restored,
    /// Copied verbatim, but rewiring is still pending.
    Delayed,
    /// Re-expanded at a state that had previous behavior.
    Rewired,
}

#[derive(Debug, Clone)]
pub(super) struct ChoiceRecord<V> {
    pub transitions: BTreeMap<Successor, V>,
    pub reward: V,
    pub status: ChoiceStatus,
}

#[derive(Debug, Clone)]
pub(super) struct StateRecord<V> {
    pub belief: BeliefId,
    pub lower: V,
    pub upper: V,
    pub choices: Vec<ChoiceRecord<V>>,
    pub target: bool,
    pub truncated: bool,
}
