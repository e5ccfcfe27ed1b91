//! Crate-level error taxonomy.
//!
//! Configuration problems carry their own [`ConfigError`] (fatal at load
//! time, fail closed). Everything else that can fail here is bypass-log
//! I/O. Match warnings and critical-gate violations are not errors: they
//! travel in-band inside the decision.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::error::ConfigError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, GatekitError>;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum GatekitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read bypass log {path}: {source}")]
    BypassRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write bypass log {path}: {source}")]
    BypassWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize bypass record: {source}")]
    BypassSerialize { source: serde_json::Error },
}
