use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::config::error::{ConfigError, Result};
use crate::config::validator::{self, ValidateOptions};
use crate::model::PolicyModel;

/// Prefix for environment variable overrides
/// (e.g. `GATEKIT_GATES__TESTING__ENABLED=false`).
pub const ENV_PREFIX: &str = "GATEKIT";

/// Top-level sections the loader understands. Anything else is warned
/// about and ignored so newer configs keep working with older binaries.
const KNOWN_SECTIONS: [&str; 4] = [
    "gates",
    "branch_policies",
    "file_pattern_rules",
    "stage_policies",
];

/// Raw policy document as read from disk and environment, before
/// semantic validation. Field names are the operator-facing TOML surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Gate registry (gate name → definition)
    #[serde(default)]
    pub gates: BTreeMap<String, GateConfig>,

    /// Branch policies, in declaration order (first match wins)
    #[serde(default)]
    pub branch_policies: Vec<BranchPolicyConfig>,

    /// File-pattern rules (all matches apply)
    #[serde(default)]
    pub file_pattern_rules: Vec<FilePatternRuleConfig>,

    /// Stage policies (stage id → partial overrides)
    #[serde(default)]
    pub stage_policies: BTreeMap<String, StagePolicyConfig>,
}

/// One gate in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Critical gates can never be exempted
    #[serde(default)]
    pub critical: bool,

    /// Opaque invocation descriptor handed to the gate executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Optional numeric threshold (meaning is gate-specific)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Optional glob filter limiting when the gate is even considered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<Vec<String>>,
}

/// One branch policy entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchPolicyConfig {
    /// Policy name; matches the branch exactly, independent of `pattern`
    pub name: String,

    /// Optional regular expression matched against the branch name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// One of: strict, standard, advisory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Gate names to skip; may contain the sentinel `"all"`
    #[serde(default)]
    pub exempt_gates: Vec<String>,

    /// Gate names that must run even if an exemption also matches
    #[serde(default)]
    pub required_gates: Vec<String>,

    /// Per-gate partial overrides (gate name → fields to replace)
    #[serde(default)]
    pub overrides: BTreeMap<String, OverrideConfig>,
}

/// One file-pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatternRuleConfig {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Globs matched against changed file paths. An empty list matches
    /// only an empty changeset.
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub exempt_gates: Vec<String>,

    #[serde(default)]
    pub required_gates: Vec<String>,

    #[serde(default)]
    pub overrides: BTreeMap<String, OverrideConfig>,
}

/// One stage policy entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Gate name → fields this stage relaxes
    #[serde(default)]
    pub overrides: BTreeMap<String, OverrideConfig>,
}

/// Partial gate override: only the supplied fields replace the base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_timeout_seconds() -> u64 {
    600
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    options: ValidateOptions,
}

impl ConfigLoader {
    /// Create a new ConfigLoader
    pub fn new() -> Self {
        Self {
            config_path: None,
            options: ValidateOptions::default(),
        }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Adjust validation options (e.g. strict stage-override checking)
    pub fn with_options(mut self, options: ValidateOptions) -> Self {
        self.options = options;
        self
    }

    /// Load and validate, producing the immutable policy model.
    ///
    /// Layered merging:
    /// 1. Defaults (from the `Default` implementations)
    /// 2. Config file (if provided)
    /// 3. Environment variables (`GATEKIT_` prefix, `__` for nesting)
    pub fn load(&self) -> Result<PolicyModel> {
        let raw = self.load_raw()?;
        validator::validate_with(&raw, self.options)
    }

    /// Load the raw document without semantic validation.
    pub fn load_raw(&self) -> Result<PolicyConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults (serialize defaults to JSON and load as base)
        let defaults = PolicyConfig::default();
        let defaults_json = serde_json::to_string(&defaults)?;
        builder = builder.add_source(File::from_str(&defaults_json, FileFormat::Json));

        // Layer 2: Config file (if provided)
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment variables (GATEKIT_ prefix, double
        // underscore for nesting). Example: GATEKIT_GATES__TESTING__ENABLED=false
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let merged = builder.build()?;

        // Deserialize via a generic value first so unknown sections can be
        // reported instead of silently dropped.
        let document: serde_json::Value = merged.try_deserialize()?;
        warn_unknown_sections(&document);

        let raw: PolicyConfig = serde_json::from_value(document)?;
        if raw.gates.is_empty() {
            tracing::warn!(
                "no gates defined in configuration; every resolution will produce an empty gate set"
            );
        }
        Ok(raw)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./gatekit.toml
    /// 2. XDG config: ~/.config/gatekit/config.toml
    /// 3. Home directory: ~/.gatekit.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./gatekit.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("gatekit").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".gatekit.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<PolicyModel> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn warn_unknown_sections(document: &serde_json::Value) {
    let Some(map) = document.as_object() else {
        return;
    };
    for key in map.keys() {
        if !KNOWN_SECTIONS.contains(&key.as_str()) {
            tracing::warn!(
                section = %key,
                "unknown top-level configuration section; ignoring for forward compatibility"
            );
        }
    }
}
