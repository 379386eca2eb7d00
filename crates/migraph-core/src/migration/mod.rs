//! Migration graph engine.
//!
//! Tables declare an expected version; registered upgrade steps move a table
//! from one version to another. An upgrade run:
//!
//! 1. compares recorded versions with the declared ones,
//! 2. finds the shortest step path for every out-of-date table,
//! 3. merges all paths (plus stubbed history of tables already recorded)
//!    into one dependency graph,
//! 4. runs the topologically ordered steps in a single transaction,
//!    recording each table's fingerprint after its step succeeds.
//!
//! # Example
//!
//! ```
//! use migraph_core::backend::SledBackend;
//! use migraph_core::migration::{Migrator, UpgradeRegistry};
//! use migraph_core::schema::VersionedModels;
//!
//! let mut registry = UpgradeRegistry::new();
//! registry
//!     .register_fn("quick", None, "bgh_1", vec![], |db| {
//!         db.execute(r#"{"op": "create_table", "table": "quick", "columns": []}"#, &[])?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let models = VersionedModels::new().versioned("quick", "bgh_1");
//! let mut db = SledBackend::temporary().unwrap();
//!
//! let report = Migrator::new(&registry).upgrade(&mut db, &models).unwrap();
//! assert_eq!(report.executed.len(), 1);
//! ```

pub mod error;
pub mod executor;
pub mod graph;
pub mod path;
pub mod registry;
pub mod step;
pub mod validator;

pub use error::MigrationError;
pub use executor::{Migrator, UpgradeReport};
pub use graph::DependencyGraph;
pub use path::{PathFinder, UpgradePath};
pub use registry::UpgradeRegistry;
pub use step::{StepAction, TableVersionKey, UpgradeStep};
pub use validator::{find_schema_drift, find_version_mismatches, SchemaMismatch, VersionMismatch};
