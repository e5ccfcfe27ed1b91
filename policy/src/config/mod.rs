/// Configuration module for the gate policy engine
///
/// Implements layered configuration with the 12-factor app pattern:
/// 1. Defaults (from code)
/// 2. Config file (gatekit.toml)
/// 3. Environment variables (GATEKIT_* prefix)
///
/// Loading is a pure parse + validate step: the result is either a fully
/// validated [`crate::model::PolicyModel`] or a [`ConfigError`] listing
/// every problem found. Callers must fail closed on error: run every
/// gate rather than proceed with ambiguous policy.
///
/// # Example
///
/// ```no_run
/// use gatekit_policy::config::ConfigLoader;
///
/// // Load from default locations
/// let model = ConfigLoader::load_default().expect("failed to load config");
///
/// // Or load from a specific file
/// let model = ConfigLoader::new()
///     .with_file("./gatekit.toml")
///     .load()
///     .expect("failed to load config");
/// ```
pub mod error;
pub mod loader;
pub mod reload;
pub mod validator;

// Re-export main types
pub use error::{ConfigError, ConfigProblem, Result, ValidationReport};
pub use loader::{
    BranchPolicyConfig, ConfigLoader, FilePatternRuleConfig, GateConfig, OverrideConfig,
    PolicyConfig, StagePolicyConfig,
};
pub use reload::ModelHandle;
pub use validator::{EXEMPT_ALL, ValidateOptions, validate, validate_with};

use crate::model::PolicyModel;
use std::path::Path;

/// Load and validate the configuration file at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<PolicyModel> {
    ConfigLoader::new().with_file(path).load()
}

/// Load configuration from the default locations.
pub fn load_default() -> Result<PolicyModel> {
    ConfigLoader::load_default()
}
