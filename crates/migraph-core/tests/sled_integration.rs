//! Migration runs against the embedded sled backend, driven by step files.

use std::path::Path;

use migraph_core::backend::{SchemaBackend, SledBackend, Value};
use migraph_core::loader;
use migraph_core::migration::{MigrationError, Migrator, UpgradeRegistry};
use migraph_core::schema::VersionedModels;

const QUICK_STEPS: &str = r#"
[[step]]
table = "quick"
to = "bgh_1"
sql = '{"op": "create_table", "table": "quick", "columns": [{"name": "id", "type": "INTEGER", "nullable": false}, {"name": "name", "type": "VARCHAR"}]}'

[[step]]
table = "quick"
to = "bgh_2"
sql = [
    '{"op": "insert", "table": "quick", "key": "first", "row": {"id": 1, "name": "one"}}',
    '{"op": "add_column", "table": "quick", "column": {"name": "another", "type": "VARCHAR", "nullable": false, "default": "hey"}}',
]

[[step]]
table = "quick"
to = "bgh_3"
sql = '{"op": "add_column", "table": "quick", "column": {"name": "onemore", "type": "INTEGER"}}'
"#;

const NEW_TABLE_STEPS: &str = r#"[
    {
        "table": "new_table",
        "to": "bgh_1",
        "dependencies": [["quick", "bgh_3"]],
        "sql": "{\"op\": \"create_table\", \"table\": \"new_table\", \"columns\": [{\"name\": \"quick_id\", \"type\": \"INTEGER\"}]}"
    }
]"#;

fn write_steps(dir: &Path) {
    std::fs::write(dir.join("quick.toml"), QUICK_STEPS).unwrap();
    std::fs::create_dir(dir.join("later")).unwrap();
    std::fs::write(dir.join("later/new_table.json"), NEW_TABLE_STEPS).unwrap();
}

fn load_registry(dir: &Path) -> UpgradeRegistry {
    let mut registry = UpgradeRegistry::new();
    loader::load_dir(&mut registry, dir).unwrap();
    registry
}

#[test]
fn test_upgrade_from_step_files() {
    let migrations = tempfile::tempdir().unwrap();
    write_steps(migrations.path());
    let registry = load_registry(migrations.path());
    assert_eq!(registry.len(), 4);

    let store = tempfile::tempdir().unwrap();
    let mut db = SledBackend::open(store.path().join("db")).unwrap();
    let models = VersionedModels::new()
        .versioned("quick", "bgh_3")
        .versioned("new_table", "bgh_1");

    let migrator = Migrator::new(&registry);
    let report = migrator.upgrade(&mut db, &models).unwrap();
    let order: Vec<String> = report.executed.iter().map(ToString::to_string).collect();
    assert_eq!(
        order,
        vec!["quick@bgh_1", "quick@bgh_2", "quick@bgh_3", "new_table@bgh_1"]
    );

    let rows = db
        .execute(r#"{"op": "scan", "table": "quick"}"#, &[])
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![
            Value::from("first"),
            Value::from("hey"),
            Value::Integer(1),
            Value::from("one"),
            Value::Null,
        ]]
    );

    migrator.validate(&mut db, &models).unwrap();
    assert!(migrator.upgrade(&mut db, &models).unwrap().is_empty());
}

#[test]
fn test_tracking_survives_reopen() {
    let migrations = tempfile::tempdir().unwrap();
    write_steps(migrations.path());
    let registry = load_registry(migrations.path());
    let models = VersionedModels::new().versioned("quick", "bgh_2");

    let store = tempfile::tempdir().unwrap();
    let path = store.path().join("db");
    {
        let mut db = SledBackend::open(&path).unwrap();
        Migrator::new(&registry).upgrade(&mut db, &models).unwrap();
    }

    let mut db = SledBackend::open(&path).unwrap();
    assert_eq!(
        db.recorded_versions().unwrap(),
        vec![("quick".to_string(), "bgh_2".to_string())]
    );
    Migrator::new(&registry).validate(&mut db, &models).unwrap();
}

#[test]
fn test_manual_change_is_drift() {
    let migrations = tempfile::tempdir().unwrap();
    write_steps(migrations.path());
    let registry = load_registry(migrations.path());
    let models = VersionedModels::new().versioned("quick", "bgh_3");

    let mut db = SledBackend::temporary().unwrap();
    let migrator = Migrator::new(&registry);
    migrator.upgrade(&mut db, &models).unwrap();

    db.execute(
        r#"{"op": "drop_column", "table": "quick", "column": "name"}"#,
        &[],
    )
    .unwrap();

    match migrator.validate(&mut db, &models) {
        Err(MigrationError::SchemaDrift { mismatches }) => {
            assert_eq!(mismatches[0].diff.lines(), vec!["Column `name` not found"]);
        }
        other => panic!("expected schema drift, got {other:?}"),
    }
}

#[test]
fn test_failed_step_without_transactions_keeps_earlier_steps() {
    let mut registry = UpgradeRegistry::new();
    registry
        .register_fn("t", None, "1", vec![], |db| {
            db.execute(r#"{"op": "create_table", "table": "t", "columns": []}"#, &[])?;
            Ok(())
        })
        .unwrap();
    registry
        .register_fn("t", Some("1"), "2", vec![], |db| {
            db.execute(r#"{"op": "drop_table", "table": "missing"}"#, &[])?;
            Ok(())
        })
        .unwrap();

    let mut db = SledBackend::temporary().unwrap();
    assert!(!db.capabilities().transactional);

    let result = Migrator::new(&registry).upgrade(&mut db, &VersionedModels::new().versioned("t", "2"));
    assert!(matches!(result, Err(MigrationError::StepFailed { .. })));
    assert_eq!(
        db.recorded_versions().unwrap(),
        vec![("t".to_string(), "1".to_string())]
    );
}
