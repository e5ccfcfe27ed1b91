//! Quality-gate policy resolution engine.
//!
//! Given a read-only context snapshot (branch name, changed files,
//! pipeline stage), decide which validation gates must run, which are
//! exempted, and which configuration overrides (thresholds, commands,
//! timeouts) apply. The engine only decides; executing the gates and
//! gathering the context belong to the surrounding CLI/hook.
//!
//! Design principles:
//!
//! - **Deterministic**: resolution is a pure function of (model,
//!   context). No clock reads, no environment reads, no hidden state.
//!   Safe to call concurrently from parallel CI jobs.
//! - **Fail closed**: configuration is executable policy, so a broken
//!   config is a load-time error listing every problem, and the caller
//!   runs all gates instead of guessing.
//! - **Critical gates always run**: rejected at load time if a policy
//!   exempts one, and forced back in at resolve time as a backstop.
//!
//! # Example
//!
//! ```no_run
//! use gatekit_policy::{ConfigLoader, ResolveContext, Stage, resolve};
//!
//! fn main() -> Result<(), gatekit_policy::ConfigError> {
//!     let model = ConfigLoader::new().with_file("./gatekit.toml").load()?;
//!     let ctx = ResolveContext::new("feature/login", ["src/auth.rs"], Stage::PrePush);
//!     let decision = resolve(&model, &ctx);
//!     for gate in &decision.gates_to_run {
//!         println!("run {}: {}", gate.name, gate.command);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod bypass;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod matchers;
pub mod model;
pub mod resolver;
pub mod stage;

pub use bypass::{AbuseAlert, BypassLog, BypassRecord, TrackerState};
pub use config::{
    ConfigError, ConfigLoader, ConfigProblem, ModelHandle, ValidateOptions, ValidationReport,
    load_config, load_default,
};
pub use context::ResolveContext;
pub use error::{GatekitError, Result};
pub use guard::CriticalGateViolation;
pub use matchers::MatchWarning;
pub use model::{
    BranchPolicy, EnforcementLevel, ExemptSpec, ExemptionSet, FilePatternRule, GateDefinition,
    GateId, GateOverride, GateRegistry, PolicyModel, StagePolicy,
};
pub use resolver::{ResolutionDecision, ResolvedGate, resolve};
pub use stage::Stage;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
