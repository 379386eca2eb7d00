//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::Table;
use serde_json::json;

use migraph_core::migration::{SchemaMismatch, UpgradeReport, UpgradeStep, VersionMismatch};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format version mismatches found by validation.
    fn format_version_mismatches(&self, mismatches: &[VersionMismatch]) -> String;

    /// Format structural drift found by validation.
    fn format_schema_drift(&self, mismatches: &[SchemaMismatch]) -> String;

    /// Format the result of an upgrade.
    fn format_report(&self, report: &UpgradeReport) -> String;

    /// Format the steps an upgrade would run.
    fn format_plan(&self, steps: &[UpgradeStep]) -> String;

    /// Format a statement log.
    fn format_log(&self, log: &[String]) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn version_cell(version: Option<&str>) -> String {
    version.unwrap_or("-").to_string()
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_version_mismatches(&self, mismatches: &[VersionMismatch]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Recorded", "Expected"]);

        for m in mismatches {
            table.add_row(vec![
                m.table.clone(),
                version_cell(m.actual.as_deref()),
                version_cell(m.expected.as_deref()),
            ]);
        }

        table.to_string()
    }

    fn format_schema_drift(&self, mismatches: &[SchemaMismatch]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Difference"]);

        for m in mismatches {
            for line in m.diff.lines() {
                table.add_row(vec![m.table.clone(), line.to_string()]);
            }
        }

        table.to_string()
    }

    fn format_report(&self, report: &UpgradeReport) -> String {
        if report.is_empty() {
            return "Nothing to upgrade".to_string();
        }

        let mut output = self.format_log(&report.log);
        output.push_str(&format!("\n\n{} step(s) executed", report.executed.len()));
        output
    }

    fn format_plan(&self, steps: &[UpgradeStep]) -> String {
        if steps.is_empty() {
            return "Nothing to upgrade".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["#", "Table", "From", "To", "Depends on"]);

        for (i, step) in steps.iter().enumerate() {
            let deps: Vec<String> = step.dependencies.iter().map(ToString::to_string).collect();
            table.add_row(vec![
                (i + 1).to_string(),
                step.table.clone(),
                version_cell(step.from_version.as_deref()),
                step.to_version.clone(),
                deps.join(", "),
            ]);
        }

        table.to_string()
    }

    fn format_log(&self, log: &[String]) -> String {
        log.join("\n")
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn render(value: serde_json::Value) -> String {
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "null".to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_version_mismatches(&self, mismatches: &[VersionMismatch]) -> String {
        Self::render(json!({
            "error": "version_mismatch",
            "mismatches": mismatches,
        }))
    }

    fn format_schema_drift(&self, mismatches: &[SchemaMismatch]) -> String {
        let tables: Vec<serde_json::Value> = mismatches
            .iter()
            .map(|m| {
                json!({
                    "table": m.table,
                    "actual": m.actual.digest(),
                    "expected": m.expected.digest(),
                    "differences": m.diff.lines(),
                })
            })
            .collect();

        Self::render(json!({
            "error": "schema_drift",
            "mismatches": tables,
        }))
    }

    fn format_report(&self, report: &UpgradeReport) -> String {
        Self::render(json!(report))
    }

    fn format_plan(&self, steps: &[UpgradeStep]) -> String {
        let steps: Vec<serde_json::Value> = steps
            .iter()
            .map(|step| {
                json!({
                    "table": step.table,
                    "from": step.from_version,
                    "to": step.to_version,
                    "dependencies": step.dependencies,
                })
            })
            .collect();
        Self::render(json!(steps))
    }

    fn format_log(&self, log: &[String]) -> String {
        Self::render(json!(log))
    }

    fn format_message(&self, message: &str) -> String {
        Self::render(json!({ "message": message }))
    }
}
