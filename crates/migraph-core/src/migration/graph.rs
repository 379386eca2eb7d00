//! Cross-table dependency graph and execution ordering.

use std::collections::{BTreeMap, BTreeSet};

use super::error::MigrationError;
use super::path::UpgradePath;
use super::step::{TableVersionKey, UpgradeStep};

/// Merged graph of every step in one migration run.
///
/// Nodes are keyed by the version a step produces. Edges point from a step to
/// the keys it must wait for: its declared dependencies plus its predecessor
/// within the same table's path.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<TableVersionKey, UpgradeStep>,
    implicit: BTreeMap<TableVersionKey, TableVersionKey>,
    edges: Option<BTreeMap<TableVersionKey, BTreeSet<TableVersionKey>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every step of a path, each one depending on the step before it.
    ///
    /// The implicit predecessor of a node always comes from the path that
    /// supplied the node itself.
    pub fn add_path(&mut self, path: &UpgradePath) {
        let mut previous: Option<TableVersionKey> = None;
        for step in path.steps() {
            let key = step.key();
            if self.add_step(step.clone()) {
                match previous.take() {
                    Some(prev) => self.implicit.insert(key.clone(), prev),
                    None => self.implicit.remove(&key),
                };
            }
            previous = Some(key);
        }
    }

    /// Add a single step. A real step replaces a stub with the same key; a
    /// stub never replaces anything. Returns whether the step was kept.
    pub fn add_step(&mut self, step: UpgradeStep) -> bool {
        let key = step.key();
        let replace = match self.nodes.get(&key) {
            None => true,
            Some(existing) => existing.is_stub() && !step.is_stub(),
        };

        if replace {
            self.nodes.insert(key, step);
            self.edges = None;
        }
        replace
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &TableVersionKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Resolved edges, once [`calculate_edges`](Self::calculate_edges) ran.
    pub fn edges(&self) -> Option<&BTreeMap<TableVersionKey, BTreeSet<TableVersionKey>>> {
        self.edges.as_ref()
    }

    /// Resolve every node's dependencies against the node set.
    pub fn calculate_edges(&mut self) -> Result<(), MigrationError> {
        let mut edges = BTreeMap::new();

        for (key, step) in &self.nodes {
            let mut deps: BTreeSet<TableVersionKey> = step.dependencies.iter().cloned().collect();
            if let Some(prev) = self.implicit.get(key) {
                deps.insert(prev.clone());
            }

            if let Some(missing) = deps.iter().find(|d| !self.nodes.contains_key(*d)) {
                return Err(MigrationError::UnmetDependency {
                    dependent: key.clone(),
                    missing: missing.clone(),
                });
            }

            edges.insert(key.clone(), deps);
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            edges = edges.values().map(BTreeSet::len).sum::<usize>(),
            "calculated dependency edges"
        );
        self.edges = Some(edges);
        Ok(())
    }

    /// Order all steps so every step follows its dependencies.
    ///
    /// Works in passes: each pass emits every node with no remaining
    /// dependencies, in key order, and removes them from the rest.
    pub fn topological_sort(&mut self) -> Result<Vec<UpgradeStep>, MigrationError> {
        if self.edges.is_none() {
            self.calculate_edges()?;
        }
        let mut pending = self.edges.clone().unwrap_or_default();
        let mut order = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let free: BTreeSet<TableVersionKey> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(key, _)| key.clone())
                .collect();

            if free.is_empty() {
                return Err(MigrationError::CyclicDependency { unresolved: pending });
            }

            for key in &free {
                pending.remove(key);
                if let Some(step) = self.nodes.get(key) {
                    order.push(step.clone());
                }
            }
            for deps in pending.values_mut() {
                deps.retain(|d| !free.contains(d));
            }
        }

        Ok(order)
    }
}
