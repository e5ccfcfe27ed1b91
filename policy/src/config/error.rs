//! Errors produced while loading and validating the policy configuration.
//!
//! Configuration functions as executable policy controlling production
//! validation, so the caller must fail closed on any of these: refuse to
//! skip gates and run everything instead of proceeding with a partial or
//! ambiguous model.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(ValidationReport),
}

/// Type alias for Results using ConfigError
pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// One concrete problem found in the configuration document, with the
/// exact location at fault (e.g. `branch_policies[2].pattern`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigProblem {
    pub location: String,
    pub message: String,
}

impl ConfigProblem {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Every problem found in one validation pass. Validation never stops at
/// the first problem: the operator gets the full list in one round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub problems: Vec<ConfigProblem>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "configuration validation failed ({} problem{}); this is a policy \
             configuration issue, not a problem with your changes:",
            self.problems.len(),
            if self.problems.len() == 1 { "" } else { "s" },
        )?;
        for (idx, problem) in self.problems.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {problem}")?;
        }
        Ok(())
    }
}
