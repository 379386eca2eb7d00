//! CLI error types.

use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Migration failed.
    #[error(transparent)]
    Migration(#[from] migraph_core::MigrationError),

    /// Backend error while opening the store.
    #[error("backend error: {0}")]
    Backend(#[from] migraph_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation reported problems; details were already printed.
    #[error("{0}")]
    Invalid(String),
}
