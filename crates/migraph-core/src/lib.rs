//! migraph core - schema migration graph engine and storage backends.
//!
//! Resolves which tables are out of date, orders every needed upgrade step
//! across tables by their dependencies, and applies them transactionally
//! while recording a structural fingerprint per table for drift detection.

pub mod backend;
pub mod error;
pub mod loader;
pub mod migration;
pub mod schema;

pub use backend::{
    BackendCapabilities, Row, RunLog, SchemaBackend, SledBackend, TrackingTable, Value,
};
#[cfg(feature = "postgres")]
pub use backend::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use backend::SqliteBackend;
pub use error::Error;
pub use migration::{
    DependencyGraph, MigrationError, Migrator, PathFinder, TableVersionKey, UpgradePath,
    UpgradeRegistry, UpgradeReport, UpgradeStep,
};
pub use schema::{FingerprintDiff, ModelSchema, SchemaFingerprint, VersionedModels};
