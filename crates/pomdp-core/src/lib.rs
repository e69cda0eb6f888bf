//! POMDP models, beliefs and the belief MDP explorer.
//!
//! Everything is generic over [`numeric::Value`] and instantiated for `f64`
//! and `num::BigRational`.

pub mod belief;
pub mod bounds;
pub mod explorer;
pub mod model;
pub mod numeric;
pub mod property;
pub mod solver;

pub use belief::{Belief, BeliefId, BeliefManager};
pub use bounds::TrivialBounds;
pub use explorer::{BeliefMdpExplorer, ChoiceStatus, ExplorationMode, SuccessorObservationInformation};
pub use model::{ModelError, Pomdp, PomdpBuilder, PomdpFile};
pub use numeric::{Value, relative_gap};
pub use property::{FormulaInformation, Property, PropertyError};
pub use solver::{OptimizationDirection, ValueIterationSolver};
