//! Versioned world save/load.
//!
//! The save payload bundles every NPC's memory snapshot, conversation
//! history, and interaction counter. Writes are atomic (temp file, fsync,
//! rename), slot names are sanitized against path traversal, and a size cap
//! bounds the serialized payload. Errors surface as values; nothing in here
//! panics through the pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use loreguard_config::PersistenceConfig;
use loreguard_memory::{PersonaMemorySnapshot, Ticks};
use loreguard_prompt::DialogueExchange;

pub const SAVE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistorySnapshot {
    pub exchanges: Vec<DialogueExchange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePayload {
    pub version: u32,
    pub saved_at_ticks: Ticks,
    pub personas: BTreeMap<String, PersonaMemorySnapshot>,
    pub dialogues: BTreeMap<String, ConversationHistorySnapshot>,
    pub interaction_counts: BTreeMap<String, i64>,
}

impl SavePayload {
    pub fn new(saved_at_ticks: Ticks) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at_ticks,
            personas: BTreeMap::new(),
            dialogues: BTreeMap::new(),
            interaction_counts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("invalid save slot name `{0}`")]
    InvalidSlot(String),
    #[error("save payload is {size} bytes, cap is {max}")]
    TooLarge { size: u64, max: u64 },
    #[error("save file not found for slot `{0}`")]
    NotFound(String),
    #[error("save file is corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported save version {0}")]
    UnsupportedVersion(u32),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SaveStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl SaveStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(&config.save_dir, config.max_file_bytes)
    }

    pub fn slot_path(&self, slot: &str) -> Result<PathBuf, PersistError> {
        let slot = sanitize_slot(slot)?;
        Ok(self.dir.join(format!("{slot}.json")))
    }

    /// Write the payload atomically: temp sibling, fsync, rename.
    pub fn save(&self, slot: &str, payload: &SavePayload) -> Result<(), PersistError> {
        let path = self.slot_path(slot)?;
        let serialized =
            serde_json::to_vec_pretty(payload).map_err(|e| PersistError::Corrupt(e.to_string()))?;
        let size = serialized.len() as u64;
        if size > self.max_bytes {
            return Err(PersistError::TooLarge { size, max: self.max_bytes });
        }

        fs::create_dir_all(&self.dir)?;
        let tmp_path = path.with_extension("json.tmp");

        let write_result: Result<(), std::io::Error> = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(error) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(error.into());
        }
        if let Err(error) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(error.into());
        }
        Ok(())
    }

    pub fn load(&self, slot: &str) -> Result<SavePayload, PersistError> {
        let path = self.slot_path(slot)?;
        if !path.exists() {
            return Err(PersistError::NotFound(slot.to_string()));
        }

        let metadata = fs::metadata(&path)?;
        if metadata.len() > self.max_bytes {
            return Err(PersistError::TooLarge { size: metadata.len(), max: self.max_bytes });
        }

        let raw = fs::read_to_string(&path)?;
        let payload: SavePayload =
            serde_json::from_str(&raw).map_err(|e| PersistError::Corrupt(e.to_string()))?;
        if payload.version != SAVE_VERSION {
            return Err(PersistError::UnsupportedVersion(payload.version));
        }
        Ok(payload)
    }

    pub fn delete(&self, slot: &str) -> Result<(), PersistError> {
        let path = self.slot_path(slot)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Slot names are plain identifiers: alphanumeric, `-`, `_`, at most 64
/// chars. Anything else (separators, traversal, empty) is rejected.
fn sanitize_slot(slot: &str) -> Result<&str, PersistError> {
    let valid = !slot.is_empty()
        && slot.len() <= 64
        && slot.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(slot)
    } else {
        Err(PersistError::InvalidSlot(slot.to_string()))
    }
}
