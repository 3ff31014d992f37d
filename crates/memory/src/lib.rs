pub mod hash;
pub mod mutation;
pub mod persist;
pub mod retrieval;
pub mod schema;
pub mod store;
pub mod ticks;

pub use hash::{memory_hash, sha256_hex};
pub use mutation::{IntentPriority, Mutation, WorldIntent};
pub use persist::PersonaMemorySnapshot;
pub use retrieval::{MemoryBundle, keyword_overlap, quantize, retrieve};
pub use schema::{
    AuthoritySource, Belief, BeliefDraft, CanonicalFact, EpisodeType, EpisodicDraft,
    EpisodicMemory, RELATIONSHIP_PREDICATE, WorldStateEntry,
};
pub use store::{DecayReport, MemoryError, MemoryStats, PersonaMemory};
pub use ticks::{Clock, ManualClock, SystemClock, TICKS_PER_MINUTE, TICKS_PER_SECOND, Ticks, ticks_from_datetime};
