pub mod agent;
pub mod fallback;
pub mod functions;
pub mod intents;
pub mod mutator;
pub mod replay;

pub use agent::{AgentError, NpcAgent, WorldFacts};
pub use fallback::FallbackLibrary;
pub use functions::{FunctionCallDispatcher, FunctionCallResult};
pub use intents::{IntentDispatcher, intent_channel};
pub use mutator::{MutationBatch, apply_gate_result};
pub use replay::{ReplayConfig, ReplaySession};
