//! Structural table fingerprints and fingerprint diffing.
//!
//! A fingerprint is the ordered list of a table's columns with their data
//! type, nullability and default. Backends produce one by introspecting the
//! live store; the tracking table caches the fingerprint recorded at the last
//! successful migration so drift can be detected later.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker used in the canonical text for an absent default.
const NO_DEFAULT: &str = "None";

/// A single column as seen by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFingerprint {
    /// Column name.
    pub name: String,
    /// Backend-reported data type.
    #[serde(alias = "type")]
    pub data_type: String,
    /// Whether the column accepts NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default expression, if any.
    #[serde(default)]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnFingerprint {
    /// Create a nullable column without default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default expression.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    fn nullable_text(&self) -> &'static str {
        if self.nullable {
            "YES"
        } else {
            "NO"
        }
    }

    fn default_text(&self) -> &str {
        self.default.as_deref().unwrap_or(NO_DEFAULT)
    }

    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            escape_field(&self.name),
            escape_field(&self.data_type),
            self.nullable_text(),
            escape_field(self.default_text())
        )
    }

    fn parse(line: &str) -> Result<Self, Error> {
        let fields = split_fields(line)?;
        let [name, data_type, nullable, default] = fields.as_slice() else {
            return Err(Error::InvalidData(format!(
                "malformed fingerprint line: {line:?}"
            )));
        };

        let nullable = match nullable.as_str() {
            "YES" => true,
            "NO" => false,
            other => {
                return Err(Error::InvalidData(format!(
                    "invalid nullability {other:?} for column {name}"
                )))
            }
        };

        Ok(Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            default: (default != NO_DEFAULT).then(|| default.to_string()),
        })
    }
}

/// Escape the field and line separators so any name or default survives a round trip.
fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Split one canonical line on unescaped `|`, unescaping each field.
fn split_fields(line: &str) -> Result<Vec<String>, Error> {
    let mut fields = Vec::with_capacity(4);
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '|' => fields.push(std::mem::take(&mut current)),
            '\\' => match chars.next() {
                Some('\\') => current.push('\\'),
                Some('|') => current.push('|'),
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                other => {
                    return Err(Error::InvalidData(format!(
                        "invalid escape {other:?} in fingerprint line: {line:?}"
                    )))
                }
            },
            other => current.push(other),
        }
    }
    fields.push(current);
    Ok(fields)
}

/// Canonical structural description of a table.
///
/// Columns are kept sorted by name. Two fingerprints are equal iff their
/// canonical text representations are equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFingerprint {
    columns: Vec<ColumnFingerprint>,
}

impl SchemaFingerprint {
    /// Build a fingerprint from columns in any order.
    pub fn new(mut columns: Vec<ColumnFingerprint>) -> Self {
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        Self { columns }
    }

    /// Fingerprint of a table with no columns (or no table at all).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a column, keeping name order.
    pub fn with_column(mut self, column: ColumnFingerprint) -> Self {
        self.columns.push(column);
        self.columns.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    /// Columns in name order.
    pub fn columns(&self) -> &[ColumnFingerprint] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnFingerprint> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Canonical text: one `name|type|YES/NO|default` line per column.
    ///
    /// `\\`, `|`, newlines and carriage returns inside a field are backslash-escaped.
    pub fn canonical(&self) -> String {
        self.columns
            .iter()
            .map(ColumnFingerprint::canonical)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse canonical text back into a fingerprint.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let columns = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ColumnFingerprint::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(columns))
    }

    /// Short digest of the canonical text, for reports and logs.
    pub fn digest(&self) -> String {
        let hash = blake3::hash(self.canonical().as_bytes());
        hex::encode(&hash.as_bytes()[..8])
    }
}

impl PartialEq for SchemaFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for SchemaFingerprint {}

impl std::fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Difference in one attribute of a column present on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    /// Data type differs.
    TypeChanged {
        column: String,
        actual: String,
        expected: String,
    },
    /// Nullability differs.
    NullableChanged {
        column: String,
        actual: bool,
        expected: bool,
    },
    /// Default differs.
    DefaultChanged {
        column: String,
        actual: Option<String>,
        expected: Option<String>,
    },
}

impl ColumnChange {
    /// Human-readable report line.
    pub fn describe(&self) -> String {
        fn yes_no(value: bool) -> &'static str {
            if value {
                "YES"
            } else {
                "NO"
            }
        }

        match self {
            ColumnChange::TypeChanged {
                column,
                actual,
                expected,
            } => format!("Column `{column}`: found {actual}, expected {expected}"),
            ColumnChange::NullableChanged {
                column,
                actual,
                expected,
            } => format!(
                "Column `{column}`: nullable {}, expected {}",
                yes_no(*actual),
                yes_no(*expected)
            ),
            ColumnChange::DefaultChanged {
                column,
                actual,
                expected,
            } => format!(
                "Column `{column}`: default {}, expected {}",
                actual.as_deref().unwrap_or(NO_DEFAULT),
                expected.as_deref().unwrap_or(NO_DEFAULT)
            ),
        }
    }
}

/// Structured diff between a live fingerprint and the recorded one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintDiff {
    /// Columns present live but not recorded.
    pub unexpected: Vec<String>,
    /// Columns recorded but missing live.
    pub missing: Vec<String>,
    /// Attribute differences on shared columns.
    pub changed: Vec<ColumnChange>,
}

impl FingerprintDiff {
    /// Compute the diff of `actual` (live) against `expected` (recorded).
    pub fn compute(actual: &SchemaFingerprint, expected: &SchemaFingerprint) -> Self {
        let actual_cols: BTreeMap<_, _> = actual.columns.iter().map(|c| (&c.name, c)).collect();
        let expected_cols: BTreeMap<_, _> =
            expected.columns.iter().map(|c| (&c.name, c)).collect();

        let mut diff = FingerprintDiff::default();

        for name in actual_cols.keys() {
            if !expected_cols.contains_key(name) {
                diff.unexpected.push((*name).clone());
            }
        }

        for name in expected_cols.keys() {
            if !actual_cols.contains_key(name) {
                diff.missing.push((*name).clone());
            }
        }

        for (name, actual_col) in &actual_cols {
            let Some(expected_col) = expected_cols.get(name) else {
                continue;
            };

            if actual_col.data_type != expected_col.data_type {
                diff.changed.push(ColumnChange::TypeChanged {
                    column: (*name).clone(),
                    actual: actual_col.data_type.clone(),
                    expected: expected_col.data_type.clone(),
                });
            }

            if actual_col.nullable != expected_col.nullable {
                diff.changed.push(ColumnChange::NullableChanged {
                    column: (*name).clone(),
                    actual: actual_col.nullable,
                    expected: expected_col.nullable,
                });
            }

            if actual_col.default != expected_col.default {
                diff.changed.push(ColumnChange::DefaultChanged {
                    column: (*name).clone(),
                    actual: actual_col.default.clone(),
                    expected: expected_col.default.clone(),
                });
            }
        }

        diff
    }

    /// Check if the two fingerprints agree.
    pub fn is_empty(&self) -> bool {
        self.unexpected.is_empty() && self.missing.is_empty() && self.changed.is_empty()
    }

    /// One report line per difference.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.change_count());
        lines.extend(
            self.unexpected
                .iter()
                .map(|c| format!("Column `{c}` not expected")),
        );
        lines.extend(self.missing.iter().map(|c| format!("Column `{c}` not found")));
        lines.extend(self.changed.iter().map(ColumnChange::describe));
        lines
    }

    pub fn change_count(&self) -> usize {
        self.unexpected.len() + self.missing.len() + self.changed.len()
    }
}

impl std::fmt::Display for FingerprintDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}
