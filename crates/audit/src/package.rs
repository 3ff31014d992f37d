//! Debug-package export/import.
//!
//! A package is versioned JSON, optionally wrapped in a gzip container with a
//! four-byte magic header. The integrity hash covers the canonical record
//! serialization; import refuses packages whose hash does not match.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use loreguard_memory::{Ticks, sha256_hex};

use crate::record::AuditRecord;

pub const PACKAGE_FORMAT_VERSION: &str = "1.0";

/// `LBPK`: marks the gzip container.
pub const PACKAGE_MAGIC: [u8; 4] = [0x4C, 0x42, 0x50, 0x4B];

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package is corrupted: {0}")]
    Corrupted(String),
    #[error("package integrity hash mismatch")]
    IntegrityMismatch,
    #[error("unsupported package format version {0}")]
    UnsupportedVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFingerprint {
    pub file_name: String,
    pub file_size: u64,
    pub context_length: u32,
    pub fingerprint_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugPackage {
    pub format_version: String,
    pub package_id: Uuid,
    pub created_at_ticks: Ticks,
    pub game_version: String,
    pub scene_name: String,
    pub creator_notes: String,
    pub model_fingerprint: ModelFingerprint,
    pub records: Vec<AuditRecord>,
    pub package_integrity_hash: String,
}

/// Export metadata supplied by the host.
#[derive(Debug, Clone)]
pub struct PackageMeta {
    pub created_at_ticks: Ticks,
    pub game_version: String,
    pub scene_name: String,
    pub creator_notes: String,
    pub model_fingerprint: ModelFingerprint,
}

impl DebugPackage {
    pub fn export(records: Vec<AuditRecord>, meta: PackageMeta) -> Self {
        let package_integrity_hash = integrity_hash(&records);
        Self {
            format_version: PACKAGE_FORMAT_VERSION.to_string(),
            package_id: Uuid::new_v4(),
            created_at_ticks: meta.created_at_ticks,
            game_version: meta.game_version,
            scene_name: meta.scene_name,
            creator_notes: meta.creator_notes,
            model_fingerprint: meta.model_fingerprint,
            records,
            package_integrity_hash,
        }
    }

    /// Serialize; `compress = true` wraps the JSON in a gzip container behind
    /// the magic header.
    pub fn to_bytes(&self, compress: bool) -> Result<Vec<u8>, PackageError> {
        let json =
            serde_json::to_vec(self).map_err(|e| PackageError::Corrupted(e.to_string()))?;
        if !compress {
            return Ok(json);
        }

        let mut out = PACKAGE_MAGIC.to_vec();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|()| encoder.finish())
            .map(|compressed| {
                out.extend_from_slice(&compressed);
                out
            })
            .map_err(|e| PackageError::Corrupted(e.to_string()))
    }

    /// Parse and validate a package, decompressing when the magic header is
    /// present.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        let json: Vec<u8> = if bytes.starts_with(&PACKAGE_MAGIC) {
            let mut decoder = GzDecoder::new(&bytes[PACKAGE_MAGIC.len()..]);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| PackageError::Corrupted(e.to_string()))?;
            decompressed
        } else {
            bytes.to_vec()
        };

        let package: Self =
            serde_json::from_slice(&json).map_err(|e| PackageError::Corrupted(e.to_string()))?;
        if package.format_version != PACKAGE_FORMAT_VERSION {
            return Err(PackageError::UnsupportedVersion(package.format_version));
        }
        if integrity_hash(&package.records) != package.package_integrity_hash {
            tracing::warn!(package_id = %package.package_id,
                "refusing debug package with bad integrity hash");
            return Err(PackageError::IntegrityMismatch);
        }
        Ok(package)
    }
}

fn integrity_hash(records: &[AuditRecord]) -> String {
    let serialized = serde_json::to_vec(records).unwrap_or_default();
    sha256_hex(&serialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_record;

    fn meta() -> PackageMeta {
        PackageMeta {
            created_at_ticks: 123,
            game_version: "0.9.1".to_string(),
            scene_name: "gatehouse".to_string(),
            creator_notes: "repro of king-name drift".to_string(),
            model_fingerprint: ModelFingerprint {
                file_name: "model-q4.gguf".to_string(),
                file_size: 4_000_000_000,
                context_length: 8192,
                fingerprint_hash: "abc123".to_string(),
            },
        }
    }

    // Export then import roundtrip, both plain and compressed.
    #[test]
    fn roundtrip_uncompressed() {
        let package = DebugPackage::export(vec![test_record(1), test_record(2)], meta());
        let bytes = package.to_bytes(false).unwrap();
        let back = DebugPackage::from_bytes(&bytes).unwrap();
        assert_eq!(back, package);
    }

    #[test]
    fn roundtrip_compressed_with_magic() {
        let package = DebugPackage::export(vec![test_record(1)], meta());
        let bytes = package.to_bytes(true).unwrap();
        assert_eq!(&bytes[..4], &PACKAGE_MAGIC);
        let back = DebugPackage::from_bytes(&bytes).unwrap();
        assert_eq!(back, package);
    }

    #[test]
    fn tampered_record_fails_integrity() {
        let mut package = DebugPackage::export(vec![test_record(1)], meta());
        package.records[0].dialogue_text = "tampered".to_string();
        let bytes = package.to_bytes(false).unwrap();
        assert!(matches!(
            DebugPackage::from_bytes(&bytes),
            Err(PackageError::IntegrityMismatch)
        ));
    }

    #[test]
    fn garbage_bytes_are_corrupted() {
        assert!(matches!(
            DebugPackage::from_bytes(b"definitely not json"),
            Err(PackageError::Corrupted(_))
        ));
    }

    #[test]
    fn truncated_gzip_is_corrupted() {
        let package = DebugPackage::export(vec![test_record(1)], meta());
        let bytes = package.to_bytes(true).unwrap();
        assert!(DebugPackage::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut package = DebugPackage::export(vec![], meta());
        package.format_version = "2.7".to_string();
        let bytes = package.to_bytes(false).unwrap();
        assert!(matches!(
            DebugPackage::from_bytes(&bytes),
            Err(PackageError::UnsupportedVersion(_))
        ));
    }
}
