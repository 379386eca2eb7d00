//! Version and structure validation.
//!
//! Two independent checks: declared versions against recorded versions (no
//! I/O), and recorded fingerprints against live structure.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::error::{version_text, MigrationError};
use crate::backend::SchemaBackend;
use crate::schema::{FingerprintDiff, SchemaFingerprint};

/// A table whose recorded version differs from the expected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMismatch {
    pub table: String,
    /// Recorded version, `None` if the table has no record.
    pub actual: Option<String>,
    /// Expected version, `None` if the models no longer declare the table.
    pub expected: Option<String>,
}

impl fmt::Display for VersionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: found {}, expected {}",
            self.table,
            version_text(self.actual.as_deref()),
            version_text(self.expected.as_deref())
        )
    }
}

/// A table whose live structure differs from its recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMismatch {
    pub table: String,
    pub actual: SchemaFingerprint,
    pub expected: SchemaFingerprint,
    pub diff: FingerprintDiff,
}

/// Compare recorded against expected `(table, version)` pairs.
///
/// Every table named on either side is considered; results are sorted by
/// table name.
pub fn find_version_mismatches(
    actual: &[(String, String)],
    expected: &[(String, String)],
) -> Vec<VersionMismatch> {
    let actual: BTreeMap<&str, &str> = actual
        .iter()
        .map(|(t, v)| (t.as_str(), v.as_str()))
        .collect();
    let expected: BTreeMap<&str, &str> = expected
        .iter()
        .map(|(t, v)| (t.as_str(), v.as_str()))
        .collect();

    let mut tables: Vec<&str> = actual.keys().chain(expected.keys()).copied().collect();
    tables.sort_unstable();
    tables.dedup();

    tables
        .into_iter()
        .filter_map(|table| {
            let a = actual.get(table).copied();
            let e = expected.get(table).copied();
            (a != e).then(|| VersionMismatch {
                table: table.to_string(),
                actual: a.map(String::from),
                expected: e.map(String::from),
            })
        })
        .collect()
}

/// Compare every recorded fingerprint with the table's live structure.
pub fn find_schema_drift(
    backend: &mut dyn SchemaBackend,
) -> Result<Vec<SchemaMismatch>, MigrationError> {
    let mut mismatches = Vec::new();

    for (table, expected) in backend.recorded_fingerprints()? {
        let actual = backend.live_fingerprint(&table)?;
        if actual == expected {
            continue;
        }

        let diff = FingerprintDiff::compute(&actual, &expected);
        tracing::debug!(
            table = %table,
            actual = %actual.digest(),
            expected = %expected.digest(),
            changes = diff.change_count(),
            "schema drift detected"
        );
        mismatches.push(SchemaMismatch {
            table,
            actual,
            expected,
            diff,
        });
    }

    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(t, v)| (t.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_mismatches_when_equal() {
        let versions = pairs(&[("quick", "bgh_3"), ("other", "1")]);
        assert!(find_version_mismatches(&versions, &versions).is_empty());
    }

    #[test]
    fn test_mismatches_cover_both_sides() {
        let actual = pairs(&[("dropped", "2"), ("quick", "bgh_1"), ("same", "1")]);
        let expected = pairs(&[("new_table", "bgh_1"), ("quick", "bgh_3"), ("same", "1")]);

        let mismatches = find_version_mismatches(&actual, &expected);
        let rendered: Vec<_> = mismatches.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "dropped: found 2, expected <none>",
                "new_table: found <none>, expected bgh_1",
                "quick: found bgh_1, expected bgh_3",
            ]
        );
    }

    #[test]
    fn test_schema_drift_on_sled() {
        use crate::backend::{SledBackend, SchemaBackend};

        let mut backend = SledBackend::temporary().unwrap();
        backend
            .execute(
                r#"{"op": "create_table", "table": "quick", "columns": [{"name": "id", "type": "INTEGER"}]}"#,
                &[],
            )
            .unwrap();
        backend.record_version("quick", "bgh_1").unwrap();
        assert!(find_schema_drift(&mut backend).unwrap().is_empty());

        backend
            .execute(
                r#"{"op": "add_column", "table": "quick", "column": {"name": "sneaky", "type": "TEXT"}}"#,
                &[],
            )
            .unwrap();

        let drift = find_schema_drift(&mut backend).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].table, "quick");
        assert_eq!(drift[0].diff.lines(), vec!["Column `sneaky` not expected"]);
    }
}
