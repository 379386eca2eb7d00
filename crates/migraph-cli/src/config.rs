//! CLI configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::formatter::OutputFormat;

/// Default SQLite database file.
pub const DEFAULT_DATABASE: &str = "./migraph.db";

/// Default directory scanned for step files.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

/// Default models file.
pub const DEFAULT_MODELS_PATH: &str = "./models.toml";

pub use migraph_core::backend::DEFAULT_TRACKING_TABLE;

/// Storage engine to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// SQLite database file
    Sqlite,
    /// Embedded sled store directory
    Sled,
    /// PostgreSQL connection URL (requires the `postgres` feature)
    Postgres,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Sled => write!(f, "sled"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Storage engine.
    pub backend: BackendKind,

    /// Database file, store directory or connection URL.
    pub database: String,

    /// Directory holding declarative step files.
    pub migrations_dir: PathBuf,

    /// File declaring the expected table versions.
    pub models_path: PathBuf,

    /// Log statements instead of running them.
    pub dry_run: bool,

    /// Output format.
    pub format: OutputFormat,

    /// Name of the version tracking table.
    pub tracking_table: String,
}

impl MigrateConfig {
    /// Configuration for the given backend and database, other settings at
    /// their defaults.
    pub fn new(backend: BackendKind, database: impl Into<String>) -> Self {
        Self {
            backend,
            database: database.into(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            models_path: PathBuf::from(DEFAULT_MODELS_PATH),
            dry_run: false,
            format: OutputFormat::Table,
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
        }
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_models_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.models_path = path.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_tracking_table(mut self, name: impl Into<String>) -> Self {
        self.tracking_table = name.into();
        self
    }
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self::new(BackendKind::Sqlite, DEFAULT_DATABASE)
    }
}

/// Operation to run.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Check recorded versions and structure against the models
    Validate,
    /// Run every step needed to reach the declared versions
    Upgrade,
    /// Record the declared versions as current without running steps
    Snapshot,
    /// Show the steps an upgrade would run
    Plan,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "migraph")]
#[command(version, about = "Versioned table migrations", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Storage engine.
    #[arg(short, long, global = true, default_value = "sqlite", value_enum)]
    pub backend: BackendKind,

    /// Database file, sled directory or PostgreSQL URL.
    #[arg(short, long, global = true, default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Directory containing step files.
    #[arg(short, long, global = true, default_value = DEFAULT_MIGRATIONS_DIR)]
    pub migrations: PathBuf,

    /// Models file declaring expected table versions (TOML or JSON).
    #[arg(long, global = true, default_value = DEFAULT_MODELS_PATH)]
    pub models: PathBuf,

    /// Log statements without running them.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Output format.
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Name of the version tracking table.
    #[arg(long, global = true, default_value = DEFAULT_TRACKING_TABLE)]
    pub tracking_table: String,
}

impl Args {
    /// Convert command-line arguments to a configuration.
    pub fn into_config(self) -> MigrateConfig {
        MigrateConfig::new(self.backend, self.database)
            .with_migrations_dir(self.migrations)
            .with_models_path(self.models)
            .with_dry_run(self.dry_run)
            .with_format(self.format)
            .with_tracking_table(self.tracking_table)
    }
}
