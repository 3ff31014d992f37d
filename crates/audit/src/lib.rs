pub mod drift;
pub mod package;
pub mod record;

pub use drift::{Drift, DriftReport, ReplayedHashes, classify_drift};
pub use package::{
    DebugPackage, ModelFingerprint, PACKAGE_FORMAT_VERSION, PACKAGE_MAGIC, PackageError,
    PackageMeta,
};
pub use record::{AuditRecord, AuditRecorder};
