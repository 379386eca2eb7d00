//! Migration orchestrator.
//!
//! Sequences the validator, path finder and dependency graph against a
//! backend and a model schema.

use serde::Serialize;

use super::error::MigrationError;
use super::graph::DependencyGraph;
use super::path::PathFinder;
use super::registry::UpgradeRegistry;
use super::step::{TableVersionKey, UpgradeStep};
use super::validator::{find_schema_drift, find_version_mismatches, VersionMismatch};
use crate::backend::SchemaBackend;
use crate::schema::ModelSchema;

/// Outcome of an upgrade run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpgradeReport {
    /// Steps that were executed, in order.
    pub executed: Vec<TableVersionKey>,
    /// Statements run (or that would have run, in dry-run mode).
    pub log: Vec<String>,
}

impl UpgradeReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.log.is_empty()
    }
}

/// Runs validate, upgrade and snapshot against one registry.
pub struct Migrator<'a> {
    registry: &'a UpgradeRegistry,
}

impl<'a> Migrator<'a> {
    pub fn new(registry: &'a UpgradeRegistry) -> Self {
        Self { registry }
    }

    /// Declared versions that disagree with the tracking records.
    pub fn version_mismatches(
        &self,
        backend: &mut dyn SchemaBackend,
        model: &dyn ModelSchema,
    ) -> Result<Vec<VersionMismatch>, MigrationError> {
        let actual = backend.recorded_versions()?;
        let expected = model.expected_versions();
        Ok(find_version_mismatches(&actual, &expected))
    }

    /// Check that the store matches the models.
    ///
    /// Version mismatches are reported first; structure is only compared
    /// once every version agrees.
    pub fn validate(
        &self,
        backend: &mut dyn SchemaBackend,
        model: &dyn ModelSchema,
    ) -> Result<(), MigrationError> {
        let mismatches = self.version_mismatches(backend, model)?;
        if !mismatches.is_empty() {
            tracing::warn!(count = mismatches.len(), "table versions out of date");
            return Err(MigrationError::VersionMismatch { mismatches });
        }

        let drift = find_schema_drift(backend)?;
        if !drift.is_empty() {
            tracing::warn!(count = drift.len(), "schema drift detected");
            return Err(MigrationError::SchemaDrift { mismatches: drift });
        }

        tracing::info!(backend = backend.name(), "schema is up to date");
        Ok(())
    }

    /// Ordered steps an upgrade would run, stubs included.
    fn ordered_steps(
        &self,
        backend: &mut dyn SchemaBackend,
        mismatches: &[VersionMismatch],
    ) -> Result<Vec<UpgradeStep>, MigrationError> {
        let finder = PathFinder::new(self.registry);
        let mut graph = DependencyGraph::new();

        for mismatch in mismatches {
            let Some(target) = mismatch.expected.as_deref() else {
                tracing::warn!(
                    table = %mismatch.table,
                    "table recorded but no longer declared, skipping"
                );
                continue;
            };

            let path = finder.find_path(&mismatch.table, mismatch.actual.as_deref(), target)?;
            tracing::debug!(
                table = %mismatch.table,
                from = ?mismatch.actual,
                to = target,
                steps = path.len(),
                "planned table upgrade"
            );
            graph.add_path(&path);
        }

        // History of already recorded tables, so dependencies on them resolve.
        for (table, current) in backend.recorded_versions()? {
            graph.add_path(&finder.path_to_current(&table, &current)?);
        }

        graph.calculate_edges()?;
        graph.topological_sort()
    }

    /// Steps `upgrade` would execute, in order, without running anything.
    pub fn plan(
        &self,
        backend: &mut dyn SchemaBackend,
        model: &dyn ModelSchema,
    ) -> Result<Vec<UpgradeStep>, MigrationError> {
        let mismatches = self.version_mismatches(backend, model)?;
        if mismatches.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .ordered_steps(backend, &mismatches)?
            .into_iter()
            .filter(|step| !step.is_stub())
            .collect())
    }

    /// Bring every out-of-date table to its declared version.
    ///
    /// All steps run inside one transaction. Any failure rolls the
    /// transaction back and is returned; backends without transactions keep
    /// whatever was applied before the failure.
    pub fn upgrade(
        &self,
        backend: &mut dyn SchemaBackend,
        model: &dyn ModelSchema,
    ) -> Result<UpgradeReport, MigrationError> {
        discard_log(backend);

        let mismatches = self.version_mismatches(backend, model)?;
        if mismatches.is_empty() {
            tracing::info!(backend = backend.name(), "nothing to upgrade");
            discard_log(backend);
            return Ok(UpgradeReport::default());
        }

        let steps = self.ordered_steps(backend, &mismatches)?;

        backend.ensure_tracking_table()?;
        if !backend.capabilities().transactional {
            tracing::warn!(
                backend = backend.name(),
                "backend has no transactions; a failed step cannot be rolled back"
            );
        }
        if backend.is_dry_run() {
            tracing::info!(backend = backend.name(), "dry run, statements are logged only");
        }

        backend.begin()?;
        let result = Self::run_steps(backend, &steps).and_then(|executed| {
            backend.commit()?;
            Ok(executed)
        });

        match result {
            Ok(executed) => {
                tracing::info!(steps = executed.len(), "upgrade complete");
                Ok(UpgradeReport {
                    executed,
                    log: backend.flush_log(),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "upgrade failed, rolling back");
                abort(backend);
                Err(e)
            }
        }
    }

    fn run_steps(
        backend: &mut dyn SchemaBackend,
        steps: &[UpgradeStep],
    ) -> Result<Vec<TableVersionKey>, MigrationError> {
        let mut executed = Vec::new();

        for step in steps.iter().filter(|s| !s.is_stub()) {
            let key = step.key();
            tracing::info!(
                table = %step.table,
                from = ?step.from_version,
                to = %step.to_version,
                "upgrading table"
            );

            step.run(backend).map_err(|source| MigrationError::StepFailed {
                key: key.clone(),
                source,
            })?;
            backend.record_version(&step.table, &step.to_version)?;
            executed.push(key);
        }

        Ok(executed)
    }

    fn record_expected(
        backend: &mut dyn SchemaBackend,
        model: &dyn ModelSchema,
    ) -> Result<(), MigrationError> {
        backend.clear_tracking_table()?;
        for (table, version) in model.expected_versions() {
            tracing::info!(table = %table, version = %version, "recording table version");
            backend.record_version(&table, &version)?;
        }
        Ok(())
    }

    /// Record the declared versions as current without running any step.
    ///
    /// Used once to start tracking a store whose structure already matches
    /// the models.
    pub fn snapshot(
        &self,
        backend: &mut dyn SchemaBackend,
        model: &dyn ModelSchema,
    ) -> Result<Vec<String>, MigrationError> {
        discard_log(backend);
        backend.ensure_tracking_table()?;
        backend.begin()?;

        let result = Self::record_expected(backend, model).and_then(|()| {
            backend.commit()?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(backend.flush_log()),
            Err(e) => {
                tracing::error!(error = %e, "snapshot failed, rolling back");
                abort(backend);
                Err(e)
            }
        }
    }
}

/// Drop statements left over from earlier calls so a report only shows its own run.
fn discard_log(backend: &mut dyn SchemaBackend) {
    let stale = backend.flush_log();
    if !stale.is_empty() {
        tracing::debug!(count = stale.len(), "discarding earlier statement log");
    }
}

/// Roll back after a failed run. Logged statements never happened, so they are dropped.
fn abort(backend: &mut dyn SchemaBackend) {
    if let Err(rollback) = backend.rollback() {
        tracing::error!(error = %rollback, "rollback failed");
    }
    backend.flush_log();
}
