//! Stable hashing over canonically ordered memory.

use sha2::{Digest, Sha256};

use crate::store::PersonaMemory;

/// Lowercase-hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hash the memory's canonical serialization: each tier in its deterministic
/// order (ids/keys ordinal, mutable tiers by sequence number), fields joined
/// with unit separators and floats written as raw bits so the digest is
/// identical across platforms.
pub fn memory_hash(memory: &PersonaMemory) -> String {
    let mut hasher = Sha256::new();

    for fact in memory.canonical_facts() {
        hasher.update(b"CF\x1e");
        hasher.update(fact.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(fact.content.as_bytes());
        hasher.update(b"\x1f");
        hasher.update([fact.source.rank()]);
        for keyword in &fact.contradiction_keywords {
            hasher.update(b"\x1f");
            hasher.update(keyword.as_bytes());
        }
    }

    for entry in memory.world_state() {
        hasher.update(b"WS\x1e");
        hasher.update(entry.key.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(entry.value.as_bytes());
        hasher.update(b"\x1f");
        hasher.update([entry.source.rank()]);
        hasher.update(b"\x1f");
        hasher.update(entry.updated_at_ticks.to_le_bytes());
    }

    let mut episodic: Vec<_> = memory.episodic().iter().collect();
    episodic.sort_by_key(|e| e.sequence_number);
    for entry in episodic {
        hasher.update(b"EP\x1e");
        hasher.update(entry.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(entry.content.as_bytes());
        hasher.update(b"\x1f");
        hasher.update([entry.episode_type.as_u8()]);
        hasher.update(b"\x1f");
        hasher.update(entry.significance.to_bits().to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update(entry.created_at_ticks.to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update(entry.sequence_number.to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update([u8::from(entry.contradicted)]);
    }

    let mut beliefs: Vec<_> = memory.beliefs().iter().collect();
    beliefs.sort_by_key(|b| b.sequence_number);
    for belief in beliefs {
        hasher.update(b"BL\x1e");
        hasher.update(belief.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(belief.subject.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(belief.predicate.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(belief.confidence.to_bits().to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update(belief.sentiment.to_bits().to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update(belief.created_at_ticks.to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update(belief.sequence_number.to_le_bytes());
        hasher.update(b"\x1f");
        hasher.update([u8::from(belief.contradicted)]);
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
