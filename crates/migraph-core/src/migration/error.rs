//! Migration-specific error types.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use thiserror::Error;

use super::step::TableVersionKey;
use super::validator::{SchemaMismatch, VersionMismatch};

/// Render an optional version for messages.
pub(crate) fn version_text(version: Option<&str>) -> &str {
    version.unwrap_or("<none>")
}

fn describe_versions(mismatches: &[VersionMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_drift(mismatches: &[SchemaMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| format!("{}: {}", m.table, m.diff.lines().join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_edges(unresolved: &BTreeMap<TableVersionKey, BTreeSet<TableVersionKey>>) -> String {
    unresolved
        .iter()
        .map(|(node, deps)| {
            let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
            format!("{} -> [{}]", node, deps.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A step with the same table and versions is already registered.
    #[error("duplicate upgrade step for {table}: {} -> {to}", version_text(.from.as_deref()))]
    DuplicateStep {
        table: String,
        from: Option<String>,
        to: String,
    },

    /// No chain of registered steps connects the two versions.
    #[error("no upgrade path for {table} from {} to {to}", version_text(.from.as_deref()))]
    NoUpgradePath {
        table: String,
        from: Option<String>,
        to: String,
    },

    /// A path for one table would visit the same version twice.
    #[error("cyclic upgrade path for {table}: version {} visited twice", version_text(.version.as_deref()))]
    CyclicPath {
        table: String,
        version: Option<String>,
    },

    /// A step depends on a table version no path produces.
    #[error("{dependent} depends on {missing}, which is not part of the upgrade graph")]
    UnmetDependency {
        dependent: TableVersionKey,
        missing: TableVersionKey,
    },

    /// The dependency graph cannot be ordered.
    #[error("cyclic dependency between upgrade steps: {}", describe_edges(.unresolved))]
    CyclicDependency {
        /// Remaining nodes and the dependencies they still wait on.
        unresolved: BTreeMap<TableVersionKey, BTreeSet<TableVersionKey>>,
    },

    /// Declared and recorded versions disagree. Run an upgrade.
    #[error("version mismatch: {}", describe_versions(.mismatches))]
    VersionMismatch { mismatches: Vec<VersionMismatch> },

    /// Recorded and live structure disagree. Needs manual attention.
    #[error("schema drift: {}", describe_drift(.mismatches))]
    SchemaDrift { mismatches: Vec<SchemaMismatch> },

    /// An upgrade step action failed.
    #[error("upgrade step {key} failed: {source}")]
    StepFailed {
        key: TableVersionKey,
        #[source]
        source: crate::error::Error,
    },

    /// A definition or model file could not be loaded.
    #[error("failed to load {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    /// Backend error.
    #[error("backend error: {0}")]
    Backend(#[from] crate::error::Error),
}

impl MigrationError {
    /// Whether running `upgrade` can resolve this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MigrationError::VersionMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::NoUpgradePath {
            table: "quick".into(),
            from: None,
            to: "bgh_9".into(),
        };
        assert_eq!(
            err.to_string(),
            "no upgrade path for quick from <none> to bgh_9"
        );

        let err = MigrationError::UnmetDependency {
            dependent: TableVersionKey::new("b", "1"),
            missing: TableVersionKey::new("a", "1"),
        };
        assert_eq!(
            err.to_string(),
            "b@1 depends on a@1, which is not part of the upgrade graph"
        );
    }

    #[test]
    fn test_cyclic_dependency_lists_edges() {
        let mut unresolved = BTreeMap::new();
        unresolved.insert(
            TableVersionKey::new("a", "1"),
            BTreeSet::from([TableVersionKey::new("b", "1")]),
        );
        unresolved.insert(
            TableVersionKey::new("b", "1"),
            BTreeSet::from([TableVersionKey::new("a", "1")]),
        );

        let err = MigrationError::CyclicDependency { unresolved };
        assert_eq!(
            err.to_string(),
            "cyclic dependency between upgrade steps: a@1 -> [b@1]; b@1 -> [a@1]"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(MigrationError::VersionMismatch { mismatches: vec![] }.is_recoverable());
        assert!(!MigrationError::SchemaDrift { mismatches: vec![] }.is_recoverable());
    }
}
