//! Validated in-memory policy model.
//!
//! Everything in this module is produced by the config validator and is
//! immutable afterwards. Gate references are tagged [`GateId`]s resolved
//! once at load time; resolution code can never encounter an unknown gate
//! name because unknown names fail the load.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use globset::GlobSet;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Tagged reference to a gate in the registry.
///
/// Only minted by [`GateRegistry`]; holding one proves the gate exists.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GateId(pub(crate) usize);

/// Immutable gate registry: ordered definitions plus a name index.
///
/// Order is deterministic (gate-name order, as the configuration document
/// is keyed by name), so decision output is stable across runs.
#[derive(Clone, Debug)]
pub struct GateRegistry {
    gates: Vec<GateDefinition>,
    by_name: HashMap<String, GateId>,
}

impl GateRegistry {
    pub(crate) fn new(gates: Vec<GateDefinition>) -> Self {
        let by_name = gates
            .iter()
            .enumerate()
            .map(|(idx, gate)| (gate.name.clone(), GateId(idx)))
            .collect();
        Self { gates, by_name }
    }

    pub fn get(&self, id: GateId) -> &GateDefinition {
        &self.gates[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<GateId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GateId, &GateDefinition)> {
        self.gates
            .iter()
            .enumerate()
            .map(|(idx, gate)| (GateId(idx), gate))
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

/// A single named validation check.
#[derive(Clone, Debug)]
pub struct GateDefinition {
    /// Unique gate name (registry key)
    pub name: String,
    /// Disabled gates are never considered; a registry-level kill switch
    pub enabled: bool,
    /// Critical gates can never be exempted by any policy
    pub critical: bool,
    /// Opaque invocation descriptor handed to the gate executor
    pub command: String,
    /// Optional numeric threshold (meaning is gate-specific)
    pub threshold: Option<f64>,
    /// Execution timeout, enforced by the gate executor
    pub timeout: Duration,
    /// Optional glob filter limiting when the gate is even considered
    pub applies_to: Option<PathFilter>,
}

/// Compiled glob filter over changed file paths.
#[derive(Clone, Debug)]
pub struct PathFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PathFilter {
    pub(crate) fn new(patterns: Vec<String>, set: GlobSet) -> Self {
        Self { patterns, set }
    }

    /// True if any changed file matches any pattern.
    pub fn matches_any(&self, files: &[String]) -> bool {
        files.iter().any(|file| self.set.is_match(file))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Which gates a policy source exempts.
#[derive(Clone, Debug)]
pub enum ExemptSpec {
    /// The `"all"` sentinel: every non-critical gate is exempt.
    All,
    /// An explicit set of gates.
    Gates(BTreeSet<GateId>),
}

impl Default for ExemptSpec {
    fn default() -> Self {
        Self::Gates(BTreeSet::new())
    }
}

/// What one matched policy source contributes to a decision.
#[derive(Clone, Debug, Default)]
pub struct ExemptionSet {
    pub exempt: ExemptSpec,
    /// Required gates override exemptions for the same gate.
    pub required: BTreeSet<GateId>,
    /// Per-gate partial configuration overrides.
    pub overrides: BTreeMap<GateId, GateOverride>,
    /// Human-readable description, surfaced in the decision audit trail.
    pub description: String,
}

impl ExemptionSet {
    pub fn empty(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

/// Partial gate configuration: only the fields a policy overrides.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GateOverride {
    pub command: Option<String>,
    pub threshold: Option<f64>,
    pub timeout: Option<Duration>,
}

impl GateOverride {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.threshold.is_none() && self.timeout.is_none()
    }

    /// Layer `other` on top of `self`; fields present in `other` win.
    pub(crate) fn merge_from(&mut self, other: &GateOverride) {
        if other.command.is_some() {
            self.command = other.command.clone();
        }
        if other.threshold.is_some() {
            self.threshold = other.threshold;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
    }
}

/// How strictly violations on a branch are treated by the caller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    Strict,
    #[default]
    Standard,
    Advisory,
}

impl EnforcementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Advisory => "advisory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(Self::Strict),
            "standard" => Some(Self::Standard),
            "advisory" => Some(Self::Advisory),
            _ => None,
        }
    }
}

/// A branch pattern as written in config plus its compiled form.
///
/// The validator always populates `regex`; a `None` can only appear in
/// hand-built models and is skipped with a warning at match time.
#[derive(Clone, Debug)]
pub struct CompiledPattern {
    pub raw: String,
    pub regex: Option<Regex>,
}

/// Branch-keyed policy source. Declaration order is significant: the
/// first policy whose name equals the branch, or whose pattern matches
/// it, wins.
#[derive(Clone, Debug)]
pub struct BranchPolicy {
    pub name: String,
    pub pattern: Option<CompiledPattern>,
    pub enforcement: EnforcementLevel,
    pub exemptions: ExemptionSet,
}

/// File-pattern policy source. All matching rules apply (union), so no
/// ordering is needed here.
///
/// A rule with no patterns is the empty-changeset sentinel: it matches
/// exactly when no files changed.
#[derive(Clone, Debug)]
pub struct FilePatternRule {
    pub name: String,
    pub patterns: Vec<String>,
    /// `None` when `patterns` is empty (sentinel), or in hand-built
    /// models that skipped compilation (skipped with a warning).
    pub glob_set: Option<GlobSet>,
    pub exemptions: ExemptionSet,
}

/// Per-stage partial overrides. Stage policies never add or remove
/// gates; they only adjust parameters of gates already selected.
#[derive(Clone, Debug)]
pub struct StagePolicy {
    pub stage: Stage,
    pub description: String,
    pub overrides: BTreeMap<GateId, GateOverride>,
}

/// The complete validated model handed to the resolver.
#[derive(Clone, Debug)]
pub struct PolicyModel {
    pub registry: GateRegistry,
    pub branch_policies: Vec<BranchPolicy>,
    pub file_rules: Vec<FilePatternRule>,
    pub stage_policies: HashMap<Stage, StagePolicy>,
}
