//! Upgrade steps and the keys that identify them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::error::version_text;
use crate::backend::SchemaBackend;
use crate::error::Error;

/// Executable body of an upgrade step.
pub type StepAction = Arc<dyn Fn(&mut dyn SchemaBackend) -> Result<(), Error> + Send + Sync>;

/// A table at a specific version. Graph nodes are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TableVersionKey {
    pub table: String,
    pub version: String,
}

impl TableVersionKey {
    pub fn new(table: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for TableVersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.table, self.version)
    }
}

impl<T: Into<String>, V: Into<String>> From<(T, V)> for TableVersionKey {
    fn from((table, version): (T, V)) -> Self {
        Self::new(table, version)
    }
}

/// One registered transition of a table from one version to another.
///
/// A step without an action is a stub: it stands in for history that has
/// already been applied and only exists so dependencies can resolve.
#[derive(Clone)]
pub struct UpgradeStep {
    pub table: String,
    pub from_version: Option<String>,
    pub to_version: String,
    pub action: Option<StepAction>,
    pub dependencies: Vec<TableVersionKey>,
}

impl UpgradeStep {
    /// Create a step with no action and no dependencies.
    pub fn new(
        table: impl Into<String>,
        from_version: Option<&str>,
        to_version: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            from_version: from_version.map(String::from),
            to_version: to_version.into(),
            action: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut dyn SchemaBackend) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    pub fn with_dependency(mut self, key: impl Into<TableVersionKey>) -> Self {
        self.dependencies.push(key.into());
        self
    }

    pub fn with_dependencies(mut self, keys: Vec<TableVersionKey>) -> Self {
        self.dependencies = keys;
        self
    }

    /// Node key of the version this step produces.
    pub fn key(&self) -> TableVersionKey {
        TableVersionKey::new(&self.table, &self.to_version)
    }

    /// Key of the version this step starts from, if the table exists then.
    pub fn predecessor(&self) -> Option<TableVersionKey> {
        self.from_version
            .as_ref()
            .map(|v| TableVersionKey::new(&self.table, v))
    }

    pub fn is_stub(&self) -> bool {
        self.action.is_none()
    }

    /// Copy of this step with the action removed.
    pub fn to_stub(&self) -> Self {
        Self {
            action: None,
            ..self.clone()
        }
    }

    /// Run the action. Stubs do nothing.
    pub fn run(&self, backend: &mut dyn SchemaBackend) -> Result<(), Error> {
        match &self.action {
            Some(action) => action(backend),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeStep")
            .field("table", &self.table)
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("stub", &self.is_stub())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.table,
            version_text(self.from_version.as_deref()),
            self.to_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SledBackend;

    #[test]
    fn test_key_and_predecessor() {
        let step = UpgradeStep::new("quick", Some("bgh_1"), "bgh_2");
        assert_eq!(step.key(), TableVersionKey::new("quick", "bgh_2"));
        assert_eq!(step.predecessor(), Some(TableVersionKey::new("quick", "bgh_1")));
        assert_eq!(UpgradeStep::new("quick", None, "bgh_1").predecessor(), None);
        assert_eq!(step.to_string(), "quick: bgh_1 -> bgh_2");
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            TableVersionKey::new("b", "1"),
            TableVersionKey::new("a", "2"),
            TableVersionKey::new("a", "1"),
        ];
        keys.sort();
        let rendered: Vec<_> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a@1", "a@2", "b@1"]);
    }

    #[test]
    fn test_stub_does_not_run() {
        let mut backend = SledBackend::temporary().unwrap();
        let step = UpgradeStep::new("t", None, "1").with_action(|backend| {
            backend.execute(r#"{"op": "create_table", "table": "t", "columns": []}"#, &[])?;
            Ok(())
        });
        assert!(!step.is_stub());

        let stub = step.to_stub();
        assert!(stub.is_stub());
        stub.run(&mut backend).unwrap();
        assert!(backend.run_log().is_empty());

        step.run(&mut backend).unwrap();
        assert_eq!(backend.run_log().len(), 1);
    }
}
