//! Embedded key-value backend on top of sled.
//!
//! Statements are JSON commands rather than SQL:
//!
//! ```json
//! {"op": "create_table", "table": "quick", "columns": [{"name": "id", "type": "INTEGER", "nullable": false}]}
//! {"op": "add_column", "table": "quick", "column": {"name": "onemore", "type": "INTEGER"}}
//! {"op": "insert", "table": "quick", "key": "$1", "row": {"id": "$2"}}
//! ```
//!
//! Placeholders are bound in the row key and in top-level row values only.
//! A leading `$$` stands for a literal `$`, so `"$$1"` stores the text `$1`.
//!
//! Table definitions live in one tree, rows in one tree per table, and the
//! version tracking records in a tree named after the tracking table. sled
//! offers no multi-statement transactions, so a failed run cannot be undone.

use serde::{Deserialize, Serialize};

use super::{BackendCapabilities, Row, RunLog, SchemaBackend, TrackingTable, Value};
use crate::error::Error;
use crate::schema::{ColumnFingerprint, SchemaFingerprint};

/// Tree name for table definitions.
const TABLES_TREE: &str = "migraph:tables";

/// Prefix for per-table row trees.
const ROWS_TREE_PREFIX: &str = "migraph:rows:";

/// A stored table definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableDef {
    columns: Vec<ColumnFingerprint>,
}

impl TableDef {
    fn column_mut(&mut self, name: &str) -> Option<&mut ColumnFingerprint> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// One tracking record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackingRecord {
    table_name: String,
    version: String,
    is_current: bool,
    schema: String,
}

/// Statement language understood by this backend.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    CreateTable {
        table: String,
        columns: Vec<ColumnFingerprint>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnFingerprint,
    },
    DropColumn {
        table: String,
        column: String,
    },
    AlterColumn {
        table: String,
        column: ColumnFingerprint,
    },
    Insert {
        table: String,
        key: String,
        row: serde_json::Map<String, serde_json::Value>,
    },
    Delete {
        table: String,
        key: String,
    },
    Scan {
        table: String,
    },
}

impl Command {
    /// Substitute `$N` placeholders in the row key and in top-level row values.
    fn bind(mut self, args: &[Value]) -> Result<Self, Error> {
        match &mut self {
            Command::Insert { key, row, .. } => {
                bind_key(key, args)?;
                for cell in row.values_mut() {
                    bind_cell(cell, args)?;
                }
            }
            Command::Delete { key, .. } => bind_key(key, args)?,
            _ => {}
        }
        Ok(self)
    }

    fn is_ddl(&self) -> bool {
        matches!(
            self,
            Command::CreateTable { .. }
                | Command::DropTable { .. }
                | Command::AddColumn { .. }
                | Command::DropColumn { .. }
                | Command::AlterColumn { .. }
        )
    }
}

/// What a string in a bindable position stands for.
enum Placeholder<'a> {
    /// `$N`: the N-th argument.
    Arg(usize),
    /// `$$...`: the literal text with one leading `$` removed.
    Escaped(&'a str),
    /// Anything else.
    Literal,
}

fn placeholder(text: &str) -> Placeholder<'_> {
    match text.strip_prefix('$') {
        Some(rest) if rest.starts_with('$') => Placeholder::Escaped(rest),
        Some(rest) => rest
            .parse::<usize>()
            .map_or(Placeholder::Literal, Placeholder::Arg),
        None => Placeholder::Literal,
    }
}

fn argument(index: usize, args: &[Value]) -> Result<&Value, Error> {
    index
        .checked_sub(1)
        .and_then(|i| args.get(i))
        .ok_or_else(|| Error::InvalidStatement(format!("missing argument for placeholder ${index}")))
}

/// Bind a row key. Non-text arguments are rendered as JSON text.
fn bind_key(key: &mut String, args: &[Value]) -> Result<(), Error> {
    match placeholder(key) {
        Placeholder::Arg(index) => {
            *key = match argument(index, args)? {
                Value::Text(text) => text.clone(),
                other => other.to_json().to_string(),
            };
        }
        Placeholder::Escaped(literal) => *key = literal.to_string(),
        Placeholder::Literal => {}
    }
    Ok(())
}

/// Bind a whole cell value. Strings nested in arrays or objects are left alone.
fn bind_cell(cell: &mut serde_json::Value, args: &[Value]) -> Result<(), Error> {
    let serde_json::Value::String(text) = &*cell else {
        return Ok(());
    };
    match placeholder(text) {
        Placeholder::Arg(index) => *cell = argument(index, args)?.to_json(),
        Placeholder::Escaped(literal) => *cell = serde_json::Value::String(literal.to_string()),
        Placeholder::Literal => {}
    }
    Ok(())
}

/// Turn a column default expression into a stored cell value.
fn default_cell(expr: &str) -> serde_json::Value {
    serde_json::from_str(expr).unwrap_or_else(|_| {
        serde_json::Value::String(expr.trim_matches('\'').to_string())
    })
}

/// sled-backed schema backend.
pub struct SledBackend {
    db: sled::Db,
    tables: sled::Tree,
    tracking: TrackingTable,
    dry_run: bool,
    log: RunLog,
}

impl SledBackend {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        Self::from_db(sled::open(path)?)
    }

    /// Open a store that is removed when dropped.
    pub fn temporary() -> Result<Self, Error> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Wrap an already opened database.
    pub fn from_db(db: sled::Db) -> Result<Self, Error> {
        let tables = db.open_tree(TABLES_TREE)?;
        Ok(Self {
            db,
            tables,
            tracking: TrackingTable::default(),
            dry_run: false,
            log: RunLog::new(),
        })
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_tracking_table(mut self, tracking: TrackingTable) -> Self {
        self.tracking = tracking;
        self
    }

    fn rows_tree(&self, table: &str) -> Result<sled::Tree, Error> {
        Ok(self.db.open_tree(format!("{ROWS_TREE_PREFIX}{table}"))?)
    }

    fn tracking_tree(&self) -> Result<sled::Tree, Error> {
        Ok(self.db.open_tree(self.tracking.as_str())?)
    }

    fn load_table(&self, table: &str) -> Result<Option<TableDef>, Error> {
        match self.tables.get(table)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require_table(&self, table: &str) -> Result<TableDef, Error> {
        self.load_table(table)?
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    fn store_table(&self, table: &str, def: &TableDef) -> Result<(), Error> {
        let bytes =
            serde_json::to_vec(def).map_err(|e| Error::Serialization(e.to_string()))?;
        self.tables.insert(table, bytes)?;
        Ok(())
    }

    /// Rewrite every row of a table.
    fn update_rows<F>(&self, table: &str, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut serde_json::Map<String, serde_json::Value>) -> Result<(), Error>,
    {
        let rows = self.rows_tree(table)?;
        for entry in rows.iter() {
            let (key, bytes) = entry?;
            let mut row: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&bytes)?;
            f(&mut row)?;
            let bytes =
                serde_json::to_vec(&row).map_err(|e| Error::Serialization(e.to_string()))?;
            rows.insert(key, bytes)?;
        }
        Ok(())
    }

    fn apply(&self, command: Command) -> Result<Vec<Row>, Error> {
        match command {
            Command::CreateTable { table, columns } => {
                if self.load_table(&table)?.is_some() {
                    return Err(Error::InvalidStatement(format!(
                        "table {table} already exists"
                    )));
                }
                self.store_table(&table, &TableDef { columns })?;
            }
            Command::DropTable { table } => {
                self.require_table(&table)?;
                self.tables.remove(table.as_str())?;
                self.db.drop_tree(format!("{ROWS_TREE_PREFIX}{table}"))?;
            }
            Command::AddColumn { table, column } => {
                let mut def = self.require_table(&table)?;
                if def.has_column(&column.name) {
                    return Err(Error::InvalidStatement(format!(
                        "column {}.{} already exists",
                        table, column.name
                    )));
                }

                let fill = column.default.as_deref().map(default_cell);
                if fill.is_none() && !column.nullable && !self.rows_tree(&table)?.is_empty() {
                    return Err(Error::InvalidStatement(format!(
                        "cannot add NOT NULL column {}.{} without default to a non-empty table",
                        table, column.name
                    )));
                }

                let name = column.name.clone();
                def.columns.push(column);
                self.update_rows(&table, |row| {
                    row.insert(name.clone(), fill.clone().unwrap_or(serde_json::Value::Null));
                    Ok(())
                })?;
                self.store_table(&table, &def)?;
            }
            Command::DropColumn { table, column } => {
                let mut def = self.require_table(&table)?;
                if !def.has_column(&column) {
                    return Err(Error::InvalidStatement(format!(
                        "no column {table}.{column}"
                    )));
                }
                def.columns.retain(|c| c.name != column);
                self.update_rows(&table, |row| {
                    row.remove(&column);
                    Ok(())
                })?;
                self.store_table(&table, &def)?;
            }
            Command::AlterColumn { table, column } => {
                let mut def = self.require_table(&table)?;
                let existing = def.column_mut(&column.name).ok_or_else(|| {
                    Error::InvalidStatement(format!("no column {}.{}", table, column.name))
                })?;

                if !column.nullable && existing.nullable {
                    let name = column.name.clone();
                    let fill = column.default.as_deref().map(default_cell);
                    let table_name = table.clone();
                    self.update_rows(&table, |row| {
                        let is_null = row.get(&name).map_or(true, |v| v.is_null());
                        if is_null {
                            match &fill {
                                Some(value) => {
                                    row.insert(name.clone(), value.clone());
                                }
                                None => {
                                    return Err(Error::InvalidStatement(format!(
                                        "column {table_name}.{name} contains NULL values"
                                    )))
                                }
                            }
                        }
                        Ok(())
                    })?;
                }

                // Re-borrow after the row pass.
                if let Some(existing) = def.column_mut(&column.name) {
                    *existing = column;
                }
                self.store_table(&table, &def)?;
            }
            Command::Insert { table, key, mut row } => {
                let def = self.require_table(&table)?;
                if let Some(unknown) = row.keys().find(|k| !def.has_column(k)) {
                    return Err(Error::InvalidStatement(format!(
                        "no column {table}.{unknown}"
                    )));
                }

                for column in &def.columns {
                    if !row.contains_key(&column.name) {
                        let value = column
                            .default
                            .as_deref()
                            .map(default_cell)
                            .unwrap_or(serde_json::Value::Null);
                        row.insert(column.name.clone(), value);
                    }
                    let is_null = row.get(&column.name).map_or(true, |v| v.is_null());
                    if is_null && !column.nullable {
                        return Err(Error::InvalidStatement(format!(
                            "NULL value in NOT NULL column {}.{}",
                            table, column.name
                        )));
                    }
                }

                let bytes =
                    serde_json::to_vec(&row).map_err(|e| Error::Serialization(e.to_string()))?;
                self.rows_tree(&table)?.insert(key.as_bytes(), bytes)?;
            }
            Command::Delete { table, key } => {
                self.require_table(&table)?;
                self.rows_tree(&table)?.remove(key.as_bytes())?;
            }
            Command::Scan { table } => {
                let def = self.require_table(&table)?;
                let mut names: Vec<&str> = def.columns.iter().map(|c| c.name.as_str()).collect();
                names.sort_unstable();

                let mut result = Vec::new();
                for entry in self.rows_tree(&table)?.iter() {
                    let (key, bytes) = entry?;
                    let row: serde_json::Map<String, serde_json::Value> =
                        serde_json::from_slice(&bytes)?;

                    let mut cells = Vec::with_capacity(names.len() + 1);
                    cells.push(Value::Text(String::from_utf8_lossy(&key).into_owned()));
                    for name in &names {
                        cells.push(
                            row.get(*name)
                                .map(Value::from_json)
                                .unwrap_or(Value::Null),
                        );
                    }
                    result.push(cells);
                }
                return Ok(result);
            }
        }
        Ok(Vec::new())
    }

    fn tracking_records(&self) -> Result<Vec<TrackingRecord>, Error> {
        let mut records = Vec::new();
        for entry in self.tracking_tree()?.iter() {
            let (_, bytes) = entry?;
            records.push(serde_json::from_slice::<TrackingRecord>(&bytes)?);
        }
        Ok(records)
    }

    fn current_records(&self) -> Result<Vec<TrackingRecord>, Error> {
        let mut current: Vec<_> = self
            .tracking_records()?
            .into_iter()
            .filter(|r| r.is_current)
            .collect();
        current.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(current)
    }

    fn tracking_key(&self, table: &str) -> Result<Vec<u8>, Error> {
        let id = self.db.generate_id()?;
        let mut key = Vec::with_capacity(table.len() + 9);
        key.extend_from_slice(table.as_bytes());
        key.push(0);
        key.extend_from_slice(&id.to_be_bytes());
        Ok(key)
    }
}

impl SchemaBackend for SledBackend {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            transactional: false,
            parameterized_ddl: false,
        }
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    fn execute(&mut self, statement: &str, args: &[Value]) -> Result<Vec<Row>, Error> {
        let command = serde_json::from_str::<Command>(statement)
            .map_err(|e| Error::InvalidStatement(format!("{e}: {statement}")))?;

        if command.is_ddl() && !args.is_empty() {
            return Err(Error::InvalidStatement(
                "arguments cannot be passed to DDL statements".into(),
            ));
        }

        self.log.record(statement, args);

        if self.dry_run {
            return Ok(Vec::new());
        }

        self.apply(command.bind(args)?)
    }

    fn begin(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("START TRANSACTION");
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("COMMIT");
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("ROLLBACK");
            return Ok(());
        }
        tracing::warn!(
            backend = self.name(),
            "rollback requested but sled has no multi-statement transactions; applied statements remain"
        );
        Ok(())
    }

    fn ensure_tracking_table(&mut self) -> Result<(), Error> {
        self.tracking_tree()?;
        Ok(())
    }

    fn clear_tracking_table(&mut self) -> Result<(), Error> {
        self.log.push(format!("CLEAR {}", self.tracking));
        if self.dry_run {
            return Ok(());
        }
        self.tracking_tree()?.clear()?;
        Ok(())
    }

    fn live_fingerprint(&mut self, table: &str) -> Result<SchemaFingerprint, Error> {
        Ok(self
            .load_table(table)?
            .map(|def| SchemaFingerprint::new(def.columns))
            .unwrap_or_default())
    }

    fn recorded_versions(&mut self) -> Result<Vec<(String, String)>, Error> {
        self.ensure_tracking_table()?;
        Ok(self
            .current_records()?
            .into_iter()
            .map(|r| (r.table_name, r.version))
            .collect())
    }

    fn recorded_fingerprints(&mut self) -> Result<Vec<(String, SchemaFingerprint)>, Error> {
        self.current_records()?
            .into_iter()
            .map(|r| -> Result<_, Error> {
                Ok((r.table_name, SchemaFingerprint::parse(&r.schema)?))
            })
            .collect()
    }

    fn record_version(&mut self, table: &str, version: &str) -> Result<(), Error> {
        let fingerprint = self.live_fingerprint(table)?;
        self.log.record(
            &format!("RECORD {}", self.tracking),
            &[Value::from(table), Value::from(version)],
        );

        if self.dry_run {
            return Ok(());
        }

        let tree = self.tracking_tree()?;
        let mut prefix = table.as_bytes().to_vec();
        prefix.push(0);

        for entry in tree.scan_prefix(&prefix) {
            let (key, bytes) = entry?;
            let mut record: TrackingRecord = serde_json::from_slice(&bytes)?;
            if record.is_current {
                record.is_current = false;
                let bytes = serde_json::to_vec(&record)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                tree.insert(key, bytes)?;
            }
        }

        let record = TrackingRecord {
            table_name: table.to_string(),
            version: version.to_string(),
            is_current: true,
            schema: fingerprint.canonical(),
        };
        let bytes =
            serde_json::to_vec(&record).map_err(|e| Error::Serialization(e.to_string()))?;
        tree.insert(self.tracking_key(table)?, bytes)?;
        Ok(())
    }

    fn run_log(&self) -> &RunLog {
        &self.log
    }

    fn flush_log(&mut self) -> Vec<String> {
        self.log.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SledBackend {
        SledBackend::temporary().unwrap()
    }

    const CREATE_QUICK: &str = r#"{"op": "create_table", "table": "quick", "columns": [
        {"name": "id", "type": "INTEGER", "nullable": false},
        {"name": "name", "type": "TEXT"}
    ]}"#;

    #[test]
    fn test_create_table_fingerprint() {
        let mut db = backend();
        db.execute(CREATE_QUICK, &[]).unwrap();

        let fp = db.live_fingerprint("quick").unwrap();
        assert_eq!(fp.canonical(), "id|INTEGER|NO|None\nname|TEXT|YES|None");
        assert!(db.live_fingerprint("other").unwrap().is_empty());
    }

    #[test]
    fn test_insert_with_placeholders_and_scan() {
        let mut db = backend();
        db.execute(CREATE_QUICK, &[]).unwrap();
        db.execute(
            r#"{"op": "insert", "table": "quick", "key": "$1", "row": {"id": "$2", "name": "$3"}}"#,
            &[Value::from("k1"), Value::Integer(7), Value::from("seven")],
        )
        .unwrap();

        let rows = db
            .execute(r#"{"op": "scan", "table": "quick"}"#, &[])
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::from("k1"), Value::Integer(7), Value::from("seven")]]
        );
    }

    #[test]
    fn test_literal_dollar_values() {
        let mut db = backend();
        db.execute(CREATE_QUICK, &[]).unwrap();
        db.execute(
            r#"{"op": "insert", "table": "quick", "key": "$$1", "row": {"id": 1, "name": "$$2"}}"#,
            &[],
        )
        .unwrap();
        db.execute(
            r#"{"op": "insert", "table": "quick", "key": "$1", "row": {"id": "$2", "name": "$price"}}"#,
            &[Value::Integer(2), Value::Integer(2)],
        )
        .unwrap();

        let rows = db
            .execute(r#"{"op": "scan", "table": "quick"}"#, &[])
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::from("$1"), Value::Integer(1), Value::from("$2")],
                vec![Value::from("2"), Value::Integer(2), Value::from("$price")],
            ]
        );

        let err = db
            .execute(
                r#"{"op": "insert", "table": "quick", "key": "k", "row": {"id": "$3"}}"#,
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStatement(_)));
    }

    #[test]
    fn test_add_column_backfills_default() {
        let mut db = backend();
        db.execute(CREATE_QUICK, &[]).unwrap();
        db.execute(
            r#"{"op": "insert", "table": "quick", "key": "a", "row": {"id": 1}}"#,
            &[],
        )
        .unwrap();
        db.execute(
            r#"{"op": "add_column", "table": "quick", "column": {"name": "another", "type": "TEXT", "nullable": false, "default": "'hey'"}}"#,
            &[],
        )
        .unwrap();

        let rows = db
            .execute(r#"{"op": "scan", "table": "quick"}"#, &[])
            .unwrap();
        assert_eq!(rows[0][1], Value::from("hey"));
    }

    #[test]
    fn test_add_not_null_column_without_default_rejected() {
        let mut db = backend();
        db.execute(CREATE_QUICK, &[]).unwrap();
        db.execute(
            r#"{"op": "insert", "table": "quick", "key": "a", "row": {"id": 1}}"#,
            &[],
        )
        .unwrap();

        let result = db.execute(
            r#"{"op": "add_column", "table": "quick", "column": {"name": "x", "type": "TEXT", "nullable": false}}"#,
            &[],
        );
        assert!(matches!(result, Err(Error::InvalidStatement(_))));
    }

    #[test]
    fn test_ddl_rejects_arguments() {
        let mut db = backend();
        let result = db.execute(CREATE_QUICK, &[Value::from("x")]);
        assert!(matches!(result, Err(Error::InvalidStatement(_))));
        assert!(db.run_log().is_empty());
    }

    #[test]
    fn test_unknown_table() {
        let mut db = backend();
        let result = db.execute(r#"{"op": "drop_table", "table": "nope"}"#, &[]);
        assert!(matches!(result, Err(Error::UnknownTable(t)) if t == "nope"));
    }

    #[test]
    fn test_record_version_history() {
        let mut db = backend();
        db.execute(CREATE_QUICK, &[]).unwrap();
        db.record_version("quick", "bgh_1").unwrap();
        db.execute(
            r#"{"op": "drop_column", "table": "quick", "column": "name"}"#,
            &[],
        )
        .unwrap();
        db.record_version("quick", "bgh_2").unwrap();

        assert_eq!(
            db.recorded_versions().unwrap(),
            vec![("quick".to_string(), "bgh_2".to_string())]
        );
        assert_eq!(db.tracking_records().unwrap().len(), 2);

        let fps = db.recorded_fingerprints().unwrap();
        assert_eq!(fps[0].1.canonical(), "id|INTEGER|NO|None");

        db.clear_tracking_table().unwrap();
        assert!(db.recorded_versions().unwrap().is_empty());
    }

    #[test]
    fn test_dry_run_does_not_apply() {
        let mut db = backend().with_dry_run(true);
        db.begin().unwrap();
        db.execute(CREATE_QUICK, &[]).unwrap();
        db.commit().unwrap();

        assert!(db.live_fingerprint("quick").unwrap().is_empty());
        let log = db.flush_log();
        assert_eq!(log.first().map(String::as_str), Some("START TRANSACTION"));
        assert_eq!(log.last().map(String::as_str), Some("COMMIT"));
    }
}
