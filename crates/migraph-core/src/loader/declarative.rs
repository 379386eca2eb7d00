//! Declarative step files.
//!
//! A file is a list of step blocks. In TOML:
//!
//! ```toml
//! [[step]]
//! table = "quick"
//! to = "bgh_1"
//! sql = "CREATE TABLE quick (id INTEGER NOT NULL)"
//!
//! [[step]]
//! table = "quick"
//! to = "bgh_2"                     # from defaults to "bgh_1"
//! dependencies = [["other", "1"]]
//! sql = ["ALTER TABLE quick ADD x INTEGER", "UPDATE quick SET x = 0"]
//! ```
//!
//! JSON files hold either a top-level array of blocks or `{"step": [...]}`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::migration::{MigrationError, TableVersionKey, UpgradeRegistry, UpgradeStep};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Statements {
    One(String),
    Many(Vec<String>),
}

impl Statements {
    fn into_vec(self) -> Vec<String> {
        match self {
            Statements::One(s) => vec![s],
            Statements::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepBlock {
    table: String,
    #[serde(default)]
    from: Option<String>,
    to: String,
    #[serde(default)]
    dependencies: Vec<(String, String)>,
    sql: Statements,
}

#[derive(Debug, Deserialize)]
struct StepFile {
    #[serde(default)]
    step: Vec<StepBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    Blocks(Vec<StepBlock>),
    File(StepFile),
}

/// Turn parsed blocks into steps, filling omitted `from` versions.
fn into_steps(blocks: Vec<StepBlock>) -> Vec<UpgradeStep> {
    let mut last_to: BTreeMap<String, String> = BTreeMap::new();

    blocks
        .into_iter()
        .map(|block| {
            let from = block.from.or_else(|| last_to.get(&block.table).cloned());
            last_to.insert(block.table.clone(), block.to.clone());

            let statements = block.sql.into_vec();
            let dependencies = block
                .dependencies
                .into_iter()
                .map(TableVersionKey::from)
                .collect();

            UpgradeStep::new(block.table, from.as_deref(), block.to)
                .with_dependencies(dependencies)
                .with_action(move |backend| {
                    for statement in &statements {
                        backend.execute(statement, &[])?;
                    }
                    Ok(())
                })
        })
        .collect()
}

/// Parse a TOML step document.
pub fn parse_toml(text: &str) -> Result<Vec<UpgradeStep>, String> {
    let file: StepFile = toml::from_str(text).map_err(|e| e.to_string())?;
    Ok(into_steps(file.step))
}

/// Parse a JSON step document.
pub fn parse_json(text: &str) -> Result<Vec<UpgradeStep>, String> {
    let blocks = match serde_json::from_str::<JsonDocument>(text).map_err(|e| e.to_string())? {
        JsonDocument::Blocks(blocks) => blocks,
        JsonDocument::File(file) => file.step,
    };
    Ok(into_steps(blocks))
}

/// Load one declarative file into the registry. Returns the number of steps
/// registered.
pub fn load_file(registry: &mut UpgradeRegistry, path: &Path) -> Result<usize, MigrationError> {
    let load_error = |message: String| MigrationError::Load {
        path: path.to_path_buf(),
        message,
    };

    let text = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let steps = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&text),
        _ => parse_toml(&text),
    }
    .map_err(load_error)?;

    let count = steps.len();
    for step in steps {
        registry.register(step)?;
    }

    tracing::debug!(path = %path.display(), steps = count, "loaded step file");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_defaults_to_previous_block() {
        let steps = parse_toml(
            r#"
            [[step]]
            table = "quick"
            to = "bgh_1"
            sql = "CREATE TABLE quick (id INTEGER)"

            [[step]]
            table = "other"
            to = "1"
            sql = "CREATE TABLE other (id INTEGER)"

            [[step]]
            table = "quick"
            to = "bgh_2"
            dependencies = [["other", "1"]]
            sql = ["ALTER TABLE quick ADD x INTEGER", "UPDATE quick SET x = 0"]
            "#,
        )
        .unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].from_version, None);
        assert_eq!(steps[1].from_version, None);
        assert_eq!(steps[2].from_version.as_deref(), Some("bgh_1"));
        assert_eq!(steps[2].dependencies, vec![TableVersionKey::new("other", "1")]);
        assert!(steps.iter().all(|s| !s.is_stub()));
    }

    #[test]
    fn test_explicit_from_wins() {
        let steps = parse_toml(
            r#"
            [[step]]
            table = "quick"
            to = "bgh_1"
            sql = "SELECT 1"

            [[step]]
            table = "quick"
            from = "legacy"
            to = "bgh_2"
            sql = "SELECT 1"
            "#,
        )
        .unwrap();
        assert_eq!(steps[1].from_version.as_deref(), Some("legacy"));
    }

    #[test]
    fn test_json_forms() {
        let array = parse_json(r#"[{"table": "t", "to": "1", "sql": "SELECT 1"}]"#).unwrap();
        assert_eq!(array.len(), 1);

        let object = parse_json(
            r#"{"step": [{"table": "t", "to": "1", "sql": "x"}, {"table": "t", "to": "2", "sql": "y"}]}"#,
        )
        .unwrap();
        assert_eq!(object[1].from_version.as_deref(), Some("1"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(parse_toml("[[step]]\ntable = \"t\"\nto = \"1\"\nsql = \"x\"\nsqll = \"y\"\n").is_err());
    }

    #[test]
    fn test_load_file_reports_path_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quick.toml");
        std::fs::write(
            &path,
            "[[step]]\ntable = \"quick\"\nto = \"1\"\nsql = \"x\"\n",
        )
        .unwrap();

        let mut registry = UpgradeRegistry::new();
        assert_eq!(load_file(&mut registry, &path).unwrap(), 1);
        assert!(matches!(
            load_file(&mut registry, &path),
            Err(MigrationError::DuplicateStep { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        match load_file(&mut registry, &broken) {
            Err(MigrationError::Load { path, .. }) => assert_eq!(path, broken),
            other => panic!("expected load error, got {other:?}"),
        }
    }
}
