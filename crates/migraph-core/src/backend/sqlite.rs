//! SQLite backend.
//!
//! Full transactional DDL; structure is introspected through
//! `pragma_table_info`.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use super::{BackendCapabilities, Row, RunLog, SchemaBackend, TrackingTable, Value};
use crate::error::Error;
use crate::schema::{ColumnFingerprint, SchemaFingerprint};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Bool(b) => ToSqlOutput::from(*b),
        })
    }
}

fn value_from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(hex::encode(bytes)),
    }
}

/// SQLite schema backend.
pub struct SqliteBackend {
    conn: Connection,
    tracking: TrackingTable,
    dry_run: bool,
    in_transaction: bool,
    log: RunLog,
}

impl SqliteBackend {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Create a new in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            tracking: TrackingTable::default(),
            dry_run: false,
            in_transaction: false,
            log: RunLog::new(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_tracking_table(mut self, tracking: TrackingTable) -> Self {
        self.tracking = tracking;
        self
    }

    /// Direct access to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn tracking_table_exists(&self) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.tracking.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl SchemaBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            transactional: true,
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
        self.log.record(statement, args);

        if self.dry_run {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(statement)?;
        let column_count = stmt.column_count();

        if column_count == 0 {
            stmt.execute(rusqlite::params_from_iter(args.iter()))?;
            return Ok(Vec::new());
        }

        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                (0..column_count)
                    .map(|i| row.get_ref(i).map(value_from_sqlite))
                    .collect::<rusqlite::Result<Row>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn begin(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("START TRANSACTION");
            return Ok(());
        }

        if self.in_transaction {
            return Err(Error::Transaction("transaction already open".into()));
        }
        self.conn.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("COMMIT");
            return Ok(());
        }

        if self.in_transaction {
            let result = self.conn.execute_batch("COMMIT");
            // Some COMMIT failures (deferred constraints, busy) leave the transaction open.
            self.in_transaction = !self.conn.is_autocommit();
            result?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("ROLLBACK");
            return Ok(());
        }

        if self.in_transaction {
            self.in_transaction = false;
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn ensure_tracking_table(&mut self) -> Result<(), Error> {
        if self.tracking_table_exists()? {
            return Ok(());
        }

        let ddl = format!(
            "CREATE TABLE {} (\
             table_name TEXT NOT NULL, \
             version TEXT NOT NULL, \
             is_current INTEGER NOT NULL DEFAULT 0, \
             schema TEXT)",
            self.tracking
        );

        if self.dry_run {
            self.log.push(ddl);
            return Ok(());
        }

        tracing::info!(table = %self.tracking, "creating tracking table");
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn clear_tracking_table(&mut self) -> Result<(), Error> {
        let statement = format!("DELETE FROM {}", self.tracking);
        self.execute(&statement, &[])?;
        Ok(())
    }

    fn live_fingerprint(&mut self, table: &str) -> Result<SchemaFingerprint, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value \
             FROM pragma_table_info(?1) \
             ORDER BY name",
        )?;

        let columns = stmt
            .query_map(params![table], |row| {
                let name: String = row.get(0)?;
                let data_type: String = row.get(1)?;
                let not_null: i64 = row.get(2)?;
                let default: Option<String> = row.get(3)?;
                Ok(ColumnFingerprint {
                    name,
                    data_type: data_type.to_uppercase(),
                    nullable: not_null == 0,
                    default,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(SchemaFingerprint::new(columns))
    }

    fn recorded_versions(&mut self) -> Result<Vec<(String, String)>, Error> {
        if !self.dry_run {
            self.ensure_tracking_table()?;
        }
        if !self.tracking_table_exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT table_name, version FROM {} WHERE is_current = 1 ORDER BY table_name",
            self.tracking
        ))?;

        let versions = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn recorded_fingerprints(&mut self) -> Result<Vec<(String, SchemaFingerprint)>, Error> {
        if !self.tracking_table_exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT table_name, schema FROM {} WHERE is_current = 1 ORDER BY table_name",
            self.tracking
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(table, schema)| -> Result<_, Error> {
                let fingerprint = SchemaFingerprint::parse(schema.as_deref().unwrap_or(""))?;
                Ok((table, fingerprint))
            })
            .collect()
    }

    fn record_version(&mut self, table: &str, version: &str) -> Result<(), Error> {
        let fingerprint = self.live_fingerprint(table)?;

        let supersede = format!(
            "UPDATE {} SET is_current = 0 WHERE table_name = ?1",
            self.tracking
        );
        let insert = format!(
            "INSERT INTO {} (table_name, version, is_current, schema) VALUES (?1, ?2, 1, ?3)",
            self.tracking
        );

        self.execute(&supersede, &[Value::from(table)])?;
        self.execute(
            &insert,
            &[
                Value::from(table),
                Value::from(version),
                Value::from(fingerprint.canonical()),
            ],
        )?;
        Ok(())
    }

    fn run_log(&self) -> &RunLog {
        &self.log
    }

    fn flush_log(&mut self) -> Vec<String> {
        self.log.flush()
    }
}

impl SqliteBackend {
    /// Version currently recorded for one table, if any.
    pub fn current_version(&self, table: &str) -> Result<Option<String>, Error> {
        if !self.tracking_table_exists()? {
            return Ok(None);
        }

        let version = self
            .conn
            .query_row(
                &format!(
                    "SELECT version FROM {} WHERE table_name = ?1 AND is_current = 1",
                    self.tracking
                ),
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }
}
