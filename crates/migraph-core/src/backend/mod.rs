//! Storage backend adapters.
//!
//! Every supported engine implements [`SchemaBackend`], the single capability
//! set the migration engine talks to. Engine differences (transaction support,
//! parameter handling, introspection) stay behind this trait.

pub mod kv;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use kv::SledBackend;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

use crate::error::Error;
use crate::schema::SchemaFingerprint;

/// Default name of the version tracking table.
pub const DEFAULT_TRACKING_TABLE: &str = "migraph_tables";

/// A statement argument or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    /// Text content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }

    pub(crate) fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Real(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row.
pub type Row = Vec<Value>;

/// Statements executed (or, in dry-run mode, that would have been executed)
/// during one backend session. Cleared on flush, never persisted.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    entries: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Record a statement with its rendered arguments.
    pub fn record(&mut self, statement: &str, args: &[Value]) {
        self.entries.push(render_statement(statement, args));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Take all entries, leaving the log empty.
    pub fn flush(&mut self) -> Vec<String> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render a statement the way it appears in the run log.
pub fn render_statement(statement: &str, args: &[Value]) -> String {
    if args.is_empty() {
        statement.to_string()
    } else {
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        format!("{} [{}]", statement, rendered.join(","))
    }
}

/// What an engine can and cannot do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Multi-statement transactions with rollback.
    pub transactional: bool,
    /// Whether DDL statements accept bound arguments.
    pub parameterized_ddl: bool,
}

/// Validated name of the version tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTable(String);

impl TrackingTable {
    /// Accepts `[A-Za-z_][A-Za-z0-9_]*` only, since the name is spliced into DDL.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if valid {
            Ok(Self(name))
        } else {
            Err(Error::InvalidStatement(format!(
                "invalid tracking table name: {name:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TrackingTable {
    fn default() -> Self {
        Self(DEFAULT_TRACKING_TABLE.to_string())
    }
}

impl std::fmt::Display for TrackingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability set every storage engine exposes to the migration engine.
///
/// The backend owns its connection and its [`RunLog`]. In dry-run mode
/// statements passed to [`execute`](Self::execute) are logged but not run;
/// reads needed for planning (introspection, tracking queries) still hit the
/// store.
pub trait SchemaBackend {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities;

    fn is_dry_run(&self) -> bool;

    fn set_dry_run(&mut self, dry_run: bool);

    /// Execute a statement, returning any result rows.
    fn execute(&mut self, statement: &str, args: &[Value]) -> Result<Vec<Row>, Error>;

    fn begin(&mut self) -> Result<(), Error>;

    fn commit(&mut self) -> Result<(), Error>;

    /// Abandon the open transaction. Engines without transactions cannot
    /// undo applied statements.
    fn rollback(&mut self) -> Result<(), Error>;

    /// Create the tracking table if it does not exist yet.
    fn ensure_tracking_table(&mut self) -> Result<(), Error>;

    /// Delete every tracking record.
    fn clear_tracking_table(&mut self) -> Result<(), Error>;

    /// Introspect the live structure of a table. A missing table yields an
    /// empty fingerprint.
    fn live_fingerprint(&mut self, table: &str) -> Result<SchemaFingerprint, Error>;

    /// Current `(table, version)` records, sorted by table.
    fn recorded_versions(&mut self) -> Result<Vec<(String, String)>, Error>;

    /// Current `(table, fingerprint)` records, sorted by table.
    fn recorded_fingerprints(&mut self) -> Result<Vec<(String, SchemaFingerprint)>, Error>;

    /// Capture the live fingerprint of `table` and mark `version` current,
    /// superseding any earlier record for that table.
    fn record_version(&mut self, table: &str, version: &str) -> Result<(), Error>;

    fn run_log(&self) -> &RunLog;

    /// Drain the run log.
    fn flush_log(&mut self) -> Vec<String>;
}
