//! Populate an [`UpgradeRegistry`] from disk or from code.

pub mod declarative;
pub mod module;

pub use module::{load_modules, StepModule};

use std::path::{Path, PathBuf};

use crate::migration::{MigrationError, UpgradeRegistry};

/// Extensions picked up by [`load_dir`].
const STEP_FILE_PATTERNS: &[&str] = &["**/*.toml", "**/*.json"];

/// Step files under `dir`, in sorted path order.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, MigrationError> {
    if !dir.is_dir() {
        return Err(MigrationError::Load {
            path: dir.to_path_buf(),
            message: "not a directory".into(),
        });
    }

    let mut files = Vec::new();
    for pattern in STEP_FILE_PATTERNS {
        let full = dir.join(pattern);
        let matches = glob::glob(&full.to_string_lossy()).map_err(|e| MigrationError::Load {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        files.extend(matches.filter_map(Result::ok).filter(|p| p.is_file()));
    }

    files.sort();
    Ok(files)
}

/// Load every declarative step file under `dir`. Returns the number of steps
/// registered.
pub fn load_dir(registry: &mut UpgradeRegistry, dir: &Path) -> Result<usize, MigrationError> {
    let files = discover(dir)?;
    let mut count = 0;

    for path in &files {
        count += declarative::load_file(registry, path)?;
    }

    tracing::info!(dir = %dir.display(), files = files.len(), steps = count, "loaded migrations");
    Ok(count)
}
