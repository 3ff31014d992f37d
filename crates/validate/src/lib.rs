pub mod escalate;
pub mod gate;
pub mod patterns;

pub use escalate::escalate;
pub use gate::{
    CustomRule, FailureReason, GateResult, ValidationContext, ValidationFailure, ValidationGate,
};
pub use patterns::{Pattern, effective_patterns};
