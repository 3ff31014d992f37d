pub mod assembler;
pub mod snapshot;

pub use assembler::{AssembledPrompt, assemble};
pub use snapshot::{DialogueExchange, FewShotExample, SnapshotBuilder, StateSnapshot};
