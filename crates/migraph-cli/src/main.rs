//! migraph - versioned table migrations from the command line.

mod config;
mod error;
mod formatter;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use migraph_core::backend::{SchemaBackend, SledBackend, TrackingTable};
use migraph_core::migration::{MigrationError, Migrator, UpgradeRegistry};
use migraph_core::schema::VersionedModels;

use config::{Args, BackendKind, Command, MigrateConfig};
use error::Error;
use formatter::Formatter;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "migraph_cli=info,migraph_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let command = args.command;
    let config = args.into_config();

    if let Err(e) = run(command, &config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Open the configured backend.
fn open_backend(config: &MigrateConfig) -> Result<Box<dyn SchemaBackend>, Error> {
    let tracking = TrackingTable::new(config.tracking_table.as_str())?;

    let backend: Box<dyn SchemaBackend> = match config.backend {
        BackendKind::Sqlite => Box::new(
            migraph_core::backend::SqliteBackend::open(&config.database)?
                .with_tracking_table(tracking)
                .with_dry_run(config.dry_run),
        ),
        BackendKind::Sled => Box::new(
            SledBackend::open(&config.database)?
                .with_tracking_table(tracking)
                .with_dry_run(config.dry_run),
        ),
        #[cfg(feature = "postgres")]
        BackendKind::Postgres => Box::new(
            migraph_core::backend::PostgresBackend::connect(&config.database)?
                .with_tracking_table(tracking)
                .with_dry_run(config.dry_run),
        ),
        #[cfg(not(feature = "postgres"))]
        BackendKind::Postgres => {
            return Err(Error::Config(
                "postgres support not compiled in; rebuild with --features postgres".into(),
            ))
        }
    };

    Ok(backend)
}

fn run(command: Command, config: &MigrateConfig) -> Result<(), Error> {
    tracing::info!(
        backend = %config.backend,
        database = %config.database,
        migrations = %config.migrations_dir.display(),
        models = %config.models_path.display(),
        dry_run = config.dry_run,
        "configuration loaded"
    );

    let mut registry = UpgradeRegistry::new();
    if command != Command::Snapshot {
        migraph_core::loader::load_dir(&mut registry, &config.migrations_dir)?;
    }
    let models = VersionedModels::from_file(&config.models_path)?;
    if models.is_empty() {
        return Err(Error::Config(format!(
            "{} declares no tables",
            config.models_path.display()
        )));
    }

    let mut backend = open_backend(config)?;
    let formatter = formatter::create_formatter(config.format);
    let migrator = Migrator::new(&registry);

    match command {
        Command::Validate => validate(&migrator, backend.as_mut(), &models, &*formatter),
        Command::Upgrade => {
            let report = migrator.upgrade(backend.as_mut(), &models)?;
            println!("{}", formatter.format_report(&report));
            Ok(())
        }
        Command::Snapshot => {
            let log = migrator.snapshot(backend.as_mut(), &models)?;
            println!("{}", formatter.format_log(&log));
            Ok(())
        }
        Command::Plan => {
            let steps = migrator.plan(backend.as_mut(), &models)?;
            println!("{}", formatter.format_plan(&steps));
            Ok(())
        }
    }
}

fn validate(
    migrator: &Migrator<'_>,
    backend: &mut dyn SchemaBackend,
    models: &VersionedModels,
    formatter: &dyn Formatter,
) -> Result<(), Error> {
    match migrator.validate(backend, models) {
        Ok(()) => {
            println!("{}", formatter.format_message("Schema is up to date"));
            Ok(())
        }
        Err(MigrationError::VersionMismatch { mismatches }) => {
            println!("{}", formatter.format_version_mismatches(&mismatches));
            Err(Error::Invalid(format!(
                "{} table(s) need an upgrade",
                mismatches.len()
            )))
        }
        Err(MigrationError::SchemaDrift { mismatches }) => {
            println!("{}", formatter.format_schema_drift(&mismatches));
            Err(Error::Invalid(format!(
                "{} table(s) drifted from their recorded structure",
                mismatches.len()
            )))
        }
        Err(e) => Err(e.into()),
    }
}
