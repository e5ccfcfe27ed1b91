//! Semantic validation: raw document → validated [`PolicyModel`].
//!
//! Validation collects every problem before failing so the operator gets
//! the full list in one round trip. All gate-name references are resolved
//! to [`GateId`]s here; the resolver never sees a raw string reference.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex_lite::Regex;

use crate::config::error::{ConfigError, ConfigProblem, Result, ValidationReport};
use crate::config::loader::{OverrideConfig, PolicyConfig};
use crate::model::{
    BranchPolicy, CompiledPattern, EnforcementLevel, ExemptSpec, ExemptionSet, FilePatternRule,
    GateDefinition, GateOverride, GateRegistry, PathFilter, PolicyModel, StagePolicy,
};
use crate::stage::Stage;

/// Sentinel in `exempt_gates` meaning "every non-critical gate".
pub const EXEMPT_ALL: &str = "all";

/// Knobs for optional validation passes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidateOptions {
    /// Reject stage overrides that raise a threshold above the base gate
    /// configuration. Off by default: stage policies relax by convention
    /// only, and the direction is not enforced.
    pub strict_stage_overrides: bool,
}

/// Validate a raw document with default options.
pub fn validate(raw: &PolicyConfig) -> Result<PolicyModel> {
    validate_with(raw, ValidateOptions::default())
}

/// Validate a raw document, collecting every problem found.
pub fn validate_with(raw: &PolicyConfig, options: ValidateOptions) -> Result<PolicyModel> {
    let mut problems: Vec<ConfigProblem> = Vec::new();

    // Gate registry first; every policy below resolves names against it.
    let mut gates = Vec::new();
    for (name, gate) in &raw.gates {
        let location = format!("gates.{name}");
        if gate.critical && !gate.enabled {
            problems.push(ConfigProblem::new(
                format!("{location}.enabled"),
                format!("critical gate `{name}` may not be disabled"),
            ));
        }
        let command = match &gate.command {
            Some(command) => command.clone(),
            None => {
                problems.push(ConfigProblem::new(
                    format!("{location}.command"),
                    "missing required field `command`",
                ));
                String::new()
            }
        };
        let applies_to = gate.applies_to.as_ref().and_then(|patterns| {
            build_glob_set(patterns, &format!("{location}.applies_to"), &mut problems)
                .map(|set| PathFilter::new(patterns.clone(), set))
        });
        gates.push(GateDefinition {
            name: name.clone(),
            enabled: gate.enabled,
            critical: gate.critical,
            command,
            threshold: gate.threshold,
            timeout: Duration::from_secs(gate.timeout_seconds),
            applies_to,
        });
    }
    let registry = GateRegistry::new(gates);

    // Branch policies; declaration order is preserved because first match
    // wins at resolve time.
    let mut branch_policies = Vec::new();
    let mut seen_branch_names: BTreeSet<&str> = BTreeSet::new();
    for (idx, policy) in raw.branch_policies.iter().enumerate() {
        let location = format!("branch_policies[{idx}]");
        if policy.name.is_empty() {
            problems.push(ConfigProblem::new(
                format!("{location}.name"),
                "missing required field `name`",
            ));
        } else if !seen_branch_names.insert(policy.name.as_str()) {
            problems.push(ConfigProblem::new(
                format!("{location}.name"),
                format!("duplicate branch policy name `{}`", policy.name),
            ));
        }
        let enforcement = match &policy.enforcement_level {
            None => EnforcementLevel::default(),
            Some(level) => EnforcementLevel::parse(level).unwrap_or_else(|| {
                problems.push(ConfigProblem::new(
                    format!("{location}.enforcement_level"),
                    format!("`{level}` is not one of: strict, standard, advisory"),
                ));
                EnforcementLevel::default()
            }),
        };
        let pattern = policy.pattern.as_ref().map(|pattern| {
            let regex = match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    problems.push(ConfigProblem::new(
                        format!("{location}.pattern"),
                        format!("invalid regular expression: {err}"),
                    ));
                    None
                }
            };
            CompiledPattern {
                raw: pattern.clone(),
                regex,
            }
        });
        let description = policy.description.clone().unwrap_or_else(|| match &policy.pattern {
            Some(pattern) => format!("branch policy `{}` (pattern `{pattern}`)", policy.name),
            None => format!("branch policy `{}`", policy.name),
        });
        let exemptions = resolve_exemption_set(
            &location,
            description,
            &policy.exempt_gates,
            &policy.required_gates,
            &policy.overrides,
            &registry,
            &mut problems,
        );
        branch_policies.push(BranchPolicy {
            name: policy.name.clone(),
            pattern,
            enforcement,
            exemptions,
        });
    }

    // File-pattern rules.
    let mut file_rules = Vec::new();
    let mut seen_rule_names: BTreeSet<&str> = BTreeSet::new();
    for (idx, rule) in raw.file_pattern_rules.iter().enumerate() {
        let location = format!("file_pattern_rules[{idx}]");
        if rule.name.is_empty() {
            problems.push(ConfigProblem::new(
                format!("{location}.name"),
                "missing required field `name`",
            ));
        } else if !seen_rule_names.insert(rule.name.as_str()) {
            problems.push(ConfigProblem::new(
                format!("{location}.name"),
                format!("duplicate file pattern rule name `{}`", rule.name),
            ));
        }
        // An empty pattern list is the empty-changeset sentinel, not an
        // error: the rule then matches only when no files changed.
        let glob_set = if rule.patterns.is_empty() {
            None
        } else {
            build_glob_set(&rule.patterns, &format!("{location}.patterns"), &mut problems)
        };
        let description = rule
            .description
            .clone()
            .unwrap_or_else(|| format!("file pattern rule `{}`", rule.name));
        let exemptions = resolve_exemption_set(
            &location,
            description,
            &rule.exempt_gates,
            &rule.required_gates,
            &rule.overrides,
            &registry,
            &mut problems,
        );
        file_rules.push(FilePatternRule {
            name: rule.name.clone(),
            patterns: rule.patterns.clone(),
            glob_set,
            exemptions,
        });
    }

    // Stage policies, keyed by exact stage id.
    let mut stage_policies = HashMap::new();
    for (key, stage_config) in &raw.stage_policies {
        let location = format!("stage_policies.{key}");
        let Some(stage) = Stage::from_id(key) else {
            problems.push(ConfigProblem::new(
                location,
                format!("unknown stage `{key}`; expected one of: pre-push, pr, push-to-main"),
            ));
            continue;
        };
        let mut overrides = BTreeMap::new();
        for (gate_name, override_config) in &stage_config.overrides {
            let Some(id) = registry.lookup(gate_name) else {
                problems.push(ConfigProblem::new(
                    format!("{location}.overrides.{gate_name}"),
                    format!("unknown gate `{gate_name}`"),
                ));
                continue;
            };
            if options.strict_stage_overrides {
                if let (Some(new), Some(base)) =
                    (override_config.threshold, registry.get(id).threshold)
                {
                    if new > base {
                        problems.push(ConfigProblem::new(
                            format!("{location}.overrides.{gate_name}.threshold"),
                            format!(
                                "stage override raises threshold above base ({new} > {base}); \
                                 stage policies are expected to relax"
                            ),
                        ));
                    }
                }
            }
            overrides.insert(id, convert_override(override_config));
        }
        let description = stage_config
            .description
            .clone()
            .unwrap_or_else(|| format!("stage policy `{}`", stage.as_str()));
        stage_policies.insert(
            stage,
            StagePolicy {
                stage,
                description,
                overrides,
            },
        );
    }

    if !problems.is_empty() {
        return Err(ConfigError::Validation(ValidationReport { problems }));
    }

    Ok(PolicyModel {
        registry,
        branch_policies,
        file_rules,
        stage_policies,
    })
}

/// Resolve one policy source's gate references against the registry.
fn resolve_exemption_set(
    location: &str,
    description: String,
    exempt_gates: &[String],
    required_gates: &[String],
    overrides: &BTreeMap<String, OverrideConfig>,
    registry: &GateRegistry,
    problems: &mut Vec<ConfigProblem>,
) -> ExemptionSet {
    let mut exempt_all = false;
    let mut exempt = BTreeSet::new();
    for name in exempt_gates {
        if name == EXEMPT_ALL {
            exempt_all = true;
            continue;
        }
        match registry.lookup(name) {
            Some(id) => {
                if registry.get(id).critical {
                    problems.push(ConfigProblem::new(
                        format!("{location}.exempt_gates"),
                        format!("critical gate `{name}` may not be exempted"),
                    ));
                }
                exempt.insert(id);
            }
            None => problems.push(ConfigProblem::new(
                format!("{location}.exempt_gates"),
                format!("unknown gate `{name}`"),
            )),
        }
    }

    let mut required = BTreeSet::new();
    for name in required_gates {
        if name == EXEMPT_ALL {
            problems.push(ConfigProblem::new(
                format!("{location}.required_gates"),
                "the `all` sentinel is only valid in exempt_gates",
            ));
            continue;
        }
        match registry.lookup(name) {
            Some(id) => {
                required.insert(id);
            }
            None => problems.push(ConfigProblem::new(
                format!("{location}.required_gates"),
                format!("unknown gate `{name}`"),
            )),
        }
    }

    let mut resolved_overrides = BTreeMap::new();
    for (name, override_config) in overrides {
        match registry.lookup(name) {
            Some(id) => {
                resolved_overrides.insert(id, convert_override(override_config));
            }
            None => problems.push(ConfigProblem::new(
                format!("{location}.overrides.{name}"),
                format!("unknown gate `{name}`"),
            )),
        }
    }

    ExemptionSet {
        exempt: if exempt_all {
            ExemptSpec::All
        } else {
            ExemptSpec::Gates(exempt)
        },
        required,
        overrides: resolved_overrides,
        description,
    }
}

fn convert_override(config: &OverrideConfig) -> GateOverride {
    GateOverride {
        command: config.command.clone(),
        threshold: config.threshold,
        timeout: config.timeout_seconds.map(Duration::from_secs),
    }
}

/// Compile a glob list, pushing one problem per invalid pattern. Returns
/// `None` when any pattern failed.
///
/// `**` matches any depth; `*` does not cross `/`; matching is
/// case-sensitive.
fn build_glob_set(
    patterns: &[String],
    location: &str,
    problems: &mut Vec<ConfigProblem>,
) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut failed = false;
    for pattern in patterns {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => {
                failed = true;
                problems.push(ConfigProblem::new(
                    location.to_string(),
                    format!("invalid glob `{pattern}`: {err}"),
                ));
            }
        }
    }
    if failed {
        return None;
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(err) => {
            problems.push(ConfigProblem::new(location.to_string(), err.to_string()));
            None
        }
    }
}
