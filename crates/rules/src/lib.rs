pub mod constraint;
pub mod context;
pub mod engine;

pub use constraint::{Constraint, ConstraintSet, Severity};
pub use context::{InteractionContext, TriggerReason};
pub use engine::{ExpectancyEngine, ExpectancyRule};
