//! Registry of known upgrade steps.

use std::collections::BTreeMap;

use super::error::MigrationError;
use super::step::{TableVersionKey, UpgradeStep};
use crate::backend::SchemaBackend;
use crate::error::Error;

/// All registered upgrade steps, keyed by table, then origin version, then
/// target version.
///
/// Populated once at load time and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRegistry {
    steps: BTreeMap<String, BTreeMap<Option<String>, BTreeMap<String, UpgradeStep>>>,
    count: usize,
}

impl UpgradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Fails if one already exists for the same table and
    /// version pair.
    pub fn register(&mut self, step: UpgradeStep) -> Result<(), MigrationError> {
        let targets = self
            .steps
            .entry(step.table.clone())
            .or_default()
            .entry(step.from_version.clone())
            .or_default();

        if targets.contains_key(&step.to_version) {
            return Err(MigrationError::DuplicateStep {
                table: step.table,
                from: step.from_version,
                to: step.to_version,
            });
        }

        tracing::debug!(
            table = %step.table,
            from = ?step.from_version,
            to = %step.to_version,
            "registered upgrade step"
        );
        targets.insert(step.to_version.clone(), step);
        self.count += 1;
        Ok(())
    }

    /// Register a step from its parts.
    pub fn register_fn<F>(
        &mut self,
        table: &str,
        from: Option<&str>,
        to: &str,
        dependencies: Vec<TableVersionKey>,
        action: F,
    ) -> Result<(), MigrationError>
    where
        F: Fn(&mut dyn SchemaBackend) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.register(
            UpgradeStep::new(table, from, to)
                .with_dependencies(dependencies)
                .with_action(action),
        )
    }

    /// Outgoing transitions of `table` at `from`, keyed by target version.
    /// Unknown tables or versions yield an empty map.
    pub fn lookup(&self, table: &str, from: Option<&str>) -> BTreeMap<String, UpgradeStep> {
        self.steps
            .get(table)
            .and_then(|by_from| by_from.get(&from.map(String::from)))
            .cloned()
            .unwrap_or_default()
    }

    /// Names of tables with at least one step.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Every registered step in `(table, from, to)` order.
    pub fn steps(&self) -> impl Iterator<Item = &UpgradeStep> {
        self.steps
            .values()
            .flat_map(|by_from| by_from.values())
            .flat_map(|targets| targets.values())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
