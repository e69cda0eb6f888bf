//! Beliefs over POMDP states and their on-demand construction.
//!
//! This module is composed of:
//! - `manager`: the belief store (deduplicating cache, successor computation).
//! - `triangulation`: grid approximation of beliefs at a given resolution.

mod manager;
pub mod triangulation;

pub use manager::BeliefManager;
pub use triangulation::{GridPoint, freudenthal};

use std::collections::BTreeMap;
use std::fmt;

/// Opaque handle of a belief stored in a [`BeliefManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeliefId(usize);

impl BeliefId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BeliefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Probability distribution over states that share one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Belief<V> {
    id: BeliefId,
    observation: u32,
    distribution: BTreeMap<usize, V>,
}

impl<V> Belief<V> {
    pub fn id(&self) -> BeliefId {
        self.id
    }

    pub fn observation(&self) -> u32 {
        self.observation
    }

    pub fn distribution(&self) -> &BTreeMap<usize, V> {
        &self.distribution
    }

    pub fn support_size(&self) -> usize {
        self.distribution.len()
    }

    pub fn is_dirac(&self) -> bool {
        self.distribution.len() == 1
    }

    pub fn support(&self) -> impl Iterator<Item = usize> + '_ {
        self.distribution.keys().copied()
    }
}
