//! PostgreSQL backend.
//!
//! sqlx is async; the backend owns a Tokio runtime and drives one connection
//! synchronously with `block_on`. Enable with `--features postgres`.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, Connection, PgConnection, Row as _, TypeInfo};
use tokio::runtime::Runtime;

use super::{BackendCapabilities, Row, RunLog, SchemaBackend, TrackingTable, Value};
use crate::error::Error;
use crate::schema::{ColumnFingerprint, SchemaFingerprint};

/// PostgreSQL schema backend.
pub struct PostgresBackend {
    conn: PgConnection,
    rt: Runtime,
    tracking: TrackingTable,
    dry_run: bool,
    in_transaction: bool,
    log: RunLog,
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bool(b) => query.bind(*b),
    }
}

async fn fetch(
    conn: &mut PgConnection,
    statement: &str,
    args: &[Value],
) -> Result<Vec<PgRow>, sqlx::Error> {
    if args.is_empty() {
        return sqlx::raw_sql(statement).fetch_all(conn).await;
    }

    args.iter()
        .fold(sqlx::query(statement), bind_value)
        .fetch_all(conn)
        .await
}

fn decode_row(row: &PgRow) -> Result<Row, Error> {
    row.columns()
        .iter()
        .map(|column| -> Result<Value, Error> {
            let i = column.ordinal();
            let value = match column.type_info().name() {
                "INT2" => row.try_get::<Option<i16>, _>(i)?.map(|v| Value::Integer(v.into())),
                "INT4" => row.try_get::<Option<i32>, _>(i)?.map(|v| Value::Integer(v.into())),
                "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
                "FLOAT4" => row.try_get::<Option<f32>, _>(i)?.map(|v| Value::Real(v.into())),
                "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(Value::Real),
                "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
                _ => row.try_get::<Option<String>, _>(i)?.map(Value::Text),
            };
            Ok(value.unwrap_or(Value::Null))
        })
        .collect()
}

impl PostgresBackend {
    /// Connect to `database_url`.
    pub fn connect(database_url: &str) -> Result<Self, Error> {
        let rt = Runtime::new()?;
        let conn = rt.block_on(PgConnection::connect(database_url))?;

        Ok(Self {
            conn,
            rt,
            tracking: TrackingTable::default(),
            dry_run: false,
            in_transaction: false,
            log: RunLog::new(),
        })
    }

    /// Connect using the `DATABASE_URL` environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::InvalidData("DATABASE_URL environment variable not set".into()))?;
        Self::connect(&url)
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_tracking_table(mut self, tracking: TrackingTable) -> Self {
        self.tracking = tracking;
        self
    }

    /// Run a statement without logging, regardless of dry-run.
    fn run(&mut self, statement: &str, args: &[Value]) -> Result<Vec<Row>, Error> {
        let rows = self.rt.block_on(fetch(&mut self.conn, statement, args))?;
        rows.iter().map(decode_row).collect()
    }

    fn tracking_table_exists(&mut self) -> Result<bool, Error> {
        let rows = self.run(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1",
            &[Value::from(self.tracking.as_str())],
        )?;
        Ok(!rows.is_empty())
    }

    fn current_rows(&mut self, column: &str) -> Result<Vec<(String, Option<String>)>, Error> {
        if !self.tracking_table_exists()? {
            return Ok(Vec::new());
        }

        let statement = format!(
            "SELECT table_name, {column} FROM {} WHERE is_current ORDER BY table_name",
            self.tracking
        );
        let rows = self.run(&statement, &[])?;

        rows.into_iter()
            .map(|row| match row.as_slice() {
                [Value::Text(table), value] => Ok((table.clone(), value.as_str().map(String::from))),
                other => Err(Error::InvalidData(format!(
                    "unexpected tracking row: {other:?}"
                ))),
            })
            .collect()
    }
}

impl SchemaBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
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
        self.run(statement, args)
    }

    fn begin(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("START TRANSACTION");
            return Ok(());
        }

        if self.in_transaction {
            return Err(Error::Transaction("transaction already open".into()));
        }
        self.run("BEGIN", &[])?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        if self.dry_run {
            self.log.push("COMMIT");
            return Ok(());
        }

        // A failed COMMIT still ends the transaction on the server.
        if self.in_transaction {
            self.in_transaction = false;
            self.run("COMMIT", &[])?;
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
            self.run("ROLLBACK", &[])?;
        }
        Ok(())
    }

    fn ensure_tracking_table(&mut self) -> Result<(), Error> {
        if self.tracking_table_exists()? {
            return Ok(());
        }

        let ddl = format!(
            "CREATE TABLE {} (\
             table_name VARCHAR(255) NOT NULL, \
             version VARCHAR(255) NOT NULL, \
             is_current BOOLEAN NOT NULL DEFAULT FALSE, \
             schema TEXT)",
            self.tracking
        );

        if self.dry_run {
            self.log.push(ddl);
            return Ok(());
        }

        tracing::info!(table = %self.tracking, "creating tracking table");
        self.run(&ddl, &[])?;
        Ok(())
    }

    fn clear_tracking_table(&mut self) -> Result<(), Error> {
        let statement = format!("DELETE FROM {}", self.tracking);
        self.execute(&statement, &[])?;
        Ok(())
    }

    fn live_fingerprint(&mut self, table: &str) -> Result<SchemaFingerprint, Error> {
        let rows = self.run(
            "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY column_name",
            &[Value::from(table)],
        )?;

        let columns = rows
            .into_iter()
            .map(|row| match row.as_slice() {
                [Value::Text(name), Value::Text(data_type), Value::Text(nullable), default] => {
                    Ok(ColumnFingerprint {
                        name: name.clone(),
                        data_type: data_type.to_uppercase(),
                        nullable: nullable == "YES",
                        default: default.as_str().map(String::from),
                    })
                }
                other => Err(Error::InvalidData(format!(
                    "unexpected column row: {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(SchemaFingerprint::new(columns))
    }

    fn recorded_versions(&mut self) -> Result<Vec<(String, String)>, Error> {
        if !self.dry_run {
            self.ensure_tracking_table()?;
        }
        Ok(self
            .current_rows("version")?
            .into_iter()
            .map(|(table, version)| (table, version.unwrap_or_default()))
            .collect())
    }

    fn recorded_fingerprints(&mut self) -> Result<Vec<(String, SchemaFingerprint)>, Error> {
        self.current_rows("schema")?
            .into_iter()
            .map(|(table, schema)| -> Result<_, Error> {
                let fingerprint = SchemaFingerprint::parse(schema.as_deref().unwrap_or(""))?;
                Ok((table, fingerprint))
            })
            .collect()
    }

    fn record_version(&mut self, table: &str, version: &str) -> Result<(), Error> {
        let fingerprint = self.live_fingerprint(table)?;

        let supersede = format!(
            "UPDATE {} SET is_current = FALSE WHERE table_name = $1",
            self.tracking
        );
        let insert = format!(
            "INSERT INTO {} (table_name, version, is_current, schema) VALUES ($1, $2, TRUE, $3)",
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

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Option<PostgresBackend> {
        std::env::var("DATABASE_URL").ok()?;
        PostgresBackend::from_env().ok()
    }

    #[test]
    fn test_live_fingerprint_and_tracking() {
        let Some(mut db) = backend() else {
            eprintln!("DATABASE_URL not set, skipping");
            return;
        };

        let tracking = TrackingTable::new("migraph_pg_test_tracking").unwrap();
        db = db.with_tracking_table(tracking);
        db.execute("DROP TABLE IF EXISTS migraph_pg_test_tracking", &[])
            .unwrap();
        db.execute("DROP TABLE IF EXISTS migraph_pg_quick", &[])
            .unwrap();
        db.execute(
            "CREATE TABLE migraph_pg_quick (id INTEGER NOT NULL, name VARCHAR)",
            &[],
        )
        .unwrap();

        let fp = db.live_fingerprint("migraph_pg_quick").unwrap();
        assert_eq!(
            fp.canonical(),
            "id|INTEGER|NO|None\nname|CHARACTER VARYING|YES|None"
        );

        db.ensure_tracking_table().unwrap();
        db.record_version("migraph_pg_quick", "bgh_1").unwrap();
        assert_eq!(
            db.recorded_versions().unwrap(),
            vec![("migraph_pg_quick".to_string(), "bgh_1".to_string())]
        );

        db.execute("DROP TABLE migraph_pg_quick", &[]).unwrap();
        db.execute("DROP TABLE migraph_pg_test_tracking", &[]).unwrap();
    }
}
