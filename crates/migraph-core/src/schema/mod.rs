//! Table structure fingerprints and model-declared versions.

pub mod fingerprint;
pub mod model;

pub use fingerprint::{ColumnChange, ColumnFingerprint, FingerprintDiff, SchemaFingerprint};
pub use model::{ModelSchema, VersionedModels};
