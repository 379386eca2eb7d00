//! Per-table upgrade path search.
//!
//! Paths are found breadth-first over the registry's transitions, so the
//! returned path has the fewest steps. Transitions out of a version are
//! expanded in ascending target-version order, which makes the choice between
//! equally short paths deterministic.

use std::collections::{BTreeSet, VecDeque};

use super::error::MigrationError;
use super::registry::UpgradeRegistry;
use super::step::UpgradeStep;

/// Ordered chain of steps for one table.
#[derive(Debug, Clone)]
pub struct UpgradePath {
    table: String,
    start: Option<String>,
    steps: Vec<UpgradeStep>,
    visited: BTreeSet<Option<String>>,
}

impl UpgradePath {
    /// Empty path sitting at `start`.
    pub fn new(table: impl Into<String>, start: Option<&str>) -> Self {
        let start = start.map(String::from);
        Self {
            table: table.into(),
            visited: BTreeSet::from([start.clone()]),
            start,
            steps: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn steps(&self) -> &[UpgradeStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<UpgradeStep> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Version the path starts from.
    pub fn first_version(&self) -> Option<&str> {
        self.start.as_deref()
    }

    /// Version the path ends at.
    pub fn last_version(&self) -> Option<&str> {
        match self.steps.last() {
            Some(step) => Some(&step.to_version),
            None => self.start.as_deref(),
        }
    }

    /// Whether `version` already occurs on this path.
    pub fn has_visited(&self, version: Option<&str>) -> bool {
        self.visited.contains(&version.map(String::from))
    }

    /// Append a step. Fails if the step leads to a version already on the path.
    pub fn push(&mut self, step: UpgradeStep) -> Result<(), MigrationError> {
        let next = Some(step.to_version.clone());
        if !self.visited.insert(next) {
            return Err(MigrationError::CyclicPath {
                table: self.table.clone(),
                version: Some(step.to_version),
            });
        }
        self.steps.push(step);
        Ok(())
    }

    /// Copy of this path extended by `step`.
    pub fn pushed(&self, step: UpgradeStep) -> Result<Self, MigrationError> {
        let mut branch = self.clone();
        branch.push(step)?;
        Ok(branch)
    }

    /// Same path with every action stripped.
    pub fn into_stubs(self) -> Self {
        Self {
            steps: self.steps.iter().map(UpgradeStep::to_stub).collect(),
            ..self
        }
    }
}

/// Breadth-first search over one registry.
pub struct PathFinder<'a> {
    registry: &'a UpgradeRegistry,
}

impl<'a> PathFinder<'a> {
    pub fn new(registry: &'a UpgradeRegistry) -> Self {
        Self { registry }
    }

    /// Find the shortest path taking `table` from `from` to `to`.
    pub fn find_path(
        &self,
        table: &str,
        from: Option<&str>,
        to: &str,
    ) -> Result<UpgradePath, MigrationError> {
        if from == Some(to) {
            return Err(MigrationError::CyclicPath {
                table: table.to_string(),
                version: Some(to.to_string()),
            });
        }

        let mut frontier = VecDeque::from([UpgradePath::new(table, from)]);
        let mut expanded = 0usize;

        while let Some(path) = frontier.pop_front() {
            expanded += 1;

            for (target, step) in self.registry.lookup(table, path.last_version()) {
                if path.has_visited(Some(target.as_str())) {
                    continue;
                }

                let candidate = path.pushed(step)?;
                if target == to {
                    tracing::debug!(
                        table,
                        from = ?from,
                        to,
                        steps = candidate.len(),
                        expanded,
                        "found upgrade path"
                    );
                    return Ok(candidate);
                }
                frontier.push_back(candidate);
            }
        }

        Err(MigrationError::NoUpgradePath {
            table: table.to_string(),
            from: from.map(String::from),
            to: to.to_string(),
        })
    }

    /// History of `table` from nonexistence up to `current`, as stubs.
    pub fn path_to_current(
        &self,
        table: &str,
        current: &str,
    ) -> Result<UpgradePath, MigrationError> {
        Ok(self.find_path(table, None, current)?.into_stubs())
    }
}
