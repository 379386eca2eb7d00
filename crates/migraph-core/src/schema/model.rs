//! Expected table versions declared by the application's models.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::migration::MigrationError;

/// Source of the table versions the application expects.
pub trait ModelSchema {
    /// Expected `(table, version)` pairs, sorted by table name.
    fn expected_versions(&self) -> Vec<(String, String)>;
}

/// In-memory model registry.
///
/// ```
/// use migraph_core::schema::{ModelSchema, VersionedModels};
///
/// let models = VersionedModels::new()
///     .versioned("quick", "bgh_3")
///     .versioned("new_table", "bgh_1");
///
/// assert_eq!(models.expected_versions()[0].0, "new_table");
/// ```
#[derive(Debug, Clone, Default)]
pub struct VersionedModels {
    tables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    tables: BTreeMap<String, String>,
}

impl VersionedModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the expected version of a table. A later call for the same
    /// table replaces the earlier one.
    pub fn versioned(mut self, table: impl Into<String>, version: impl Into<String>) -> Self {
        self.insert(table, version);
        self
    }

    pub fn insert(&mut self, table: impl Into<String>, version: impl Into<String>) {
        self.tables.insert(table.into(), version.into());
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Parse `[tables]` from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, MigrationError> {
        let file: ModelFile = toml::from_str(text).map_err(|e| MigrationError::Load {
            path: "<models>".into(),
            message: e.to_string(),
        })?;
        Ok(Self { tables: file.tables })
    }

    /// Parse a flat JSON object of `table -> version`.
    pub fn from_json_str(text: &str) -> Result<Self, MigrationError> {
        let tables: BTreeMap<String, String> =
            serde_json::from_str(text).map_err(|e| MigrationError::Load {
                path: "<models>".into(),
                message: e.to_string(),
            })?;
        Ok(Self { tables })
    }

    /// Load a models file, picking the format from its extension.
    pub fn from_file(path: &Path) -> Result<Self, MigrationError> {
        let text = std::fs::read_to_string(path).map_err(|e| MigrationError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        };

        parsed.map_err(|e| match e {
            MigrationError::Load { message, .. } => MigrationError::Load {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }
}

impl ModelSchema for VersionedModels {
    fn expected_versions(&self) -> Vec<(String, String)> {
        self.tables
            .iter()
            .map(|(t, v)| (t.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_versions_sorted() {
        let models = VersionedModels::new()
            .versioned("zeta", "1")
            .versioned("alpha", "2")
            .versioned("mid", "3");

        let names: Vec<_> = models
            .expected_versions()
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_from_toml() {
        let models = VersionedModels::from_toml_str(
            r#"
            [tables]
            quick = "bgh_3"
            new_table = "bgh_1"
            "#,
        )
        .unwrap();

        assert_eq!(
            models.expected_versions(),
            vec![
                ("new_table".to_string(), "bgh_1".to_string()),
                ("quick".to_string(), "bgh_3".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_json() {
        let models = VersionedModels::from_json_str(r#"{"quick": "bgh_3"}"#).unwrap();
        assert_eq!(models.len(), 1);
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        match VersionedModels::from_file(&path) {
            Err(MigrationError::Load { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected load error, got {other:?}"),
        }
    }
}
