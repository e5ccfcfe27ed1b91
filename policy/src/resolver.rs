//! Policy resolver: compose exemptions, requirements, and overrides from
//! every matched policy source into one decision.
//!
//! Resolution is deterministic. Identical (model, context) inputs always
//! yield identical decisions: no hidden state, no clock reads, no
//! environment reads. It is safe to call concurrently from parallel CI
//! jobs without coordination.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;

use crate::context::ResolveContext;
use crate::guard::{self, CriticalGateViolation};
use crate::matchers::{MatchWarning, match_branch_policy, match_file_rules};
use crate::model::{ExemptSpec, ExemptionSet, GateId, GateOverride, PolicyModel};

/// One gate the caller must run, with every override already applied.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedGate {
    pub name: String,
    pub critical: bool,
    /// Effective invocation descriptor
    pub command: String,
    /// Effective threshold, if the gate has one
    pub threshold: Option<f64>,
    /// Effective execution timeout
    pub timeout: Duration,
}

/// The complete outcome of one resolution, recomputed each time.
///
/// Serializable so callers can persist it as an audit record alongside
/// the gate results.
#[derive(Clone, Debug, Serialize)]
pub struct ResolutionDecision {
    /// Gates to run, in registry order
    pub gates_to_run: Vec<ResolvedGate>,
    /// Considered gates that were skipped due to an exemption
    pub exempted_gate_names: Vec<String>,
    /// Human-readable descriptions of every matched policy source
    pub matched_policy_descriptions: Vec<String>,
    /// Non-fatal anomalies observed while matching
    pub warnings: Vec<MatchWarning>,
    /// Attempts to exempt critical gates (the gates run anyway)
    pub critical_violations: Vec<CriticalGateViolation>,
}

impl ResolutionDecision {
    /// Quick check: is a gate with this name scheduled to run?
    pub fn runs(&self, gate_name: &str) -> bool {
        self.gates_to_run.iter().any(|gate| gate.name == gate_name)
    }
}

/// Resolve the gate set for one context against a validated model.
pub fn resolve(model: &PolicyModel, ctx: &ResolveContext) -> ResolutionDecision {
    // Consideration set: enabled gates whose applies_to filter (if any)
    // matches the changeset. This is registry-level scoping, distinct
    // from policy exemptions.
    let mut considered: BTreeSet<GateId> = BTreeSet::new();
    for (id, gate) in model.registry.iter() {
        if !gate.enabled {
            continue;
        }
        if let Some(filter) = &gate.applies_to {
            if !filter.matches_any(&ctx.changed_files) {
                continue;
            }
        }
        considered.insert(id);
    }

    // Match the three policy sources. No branch match means the
    // strictest behavior: run everything, no branch exemptions.
    let (branch_policy, mut warnings) = match_branch_policy(&ctx.branch, &model.branch_policies);
    let (file_rules, file_warnings) = match_file_rules(&ctx.changed_files, &model.file_rules);
    warnings.extend(file_warnings);
    let stage_policy = model.stage_policies.get(&ctx.stage);

    let mut matched_policy_descriptions = Vec::new();
    let mut sources: Vec<&ExemptionSet> = Vec::new();
    if let Some(policy) = branch_policy {
        matched_policy_descriptions.push(policy.exemptions.description.clone());
        sources.push(&policy.exemptions);
    }
    for rule in &file_rules {
        matched_policy_descriptions.push(rule.exemptions.description.clone());
        sources.push(&rule.exemptions);
    }

    // Union of exemptions and requirements across matched sources, with
    // attribution of explicit exemptions for the guard's violation trace.
    let mut exempt_all = false;
    let mut exempt: BTreeSet<GateId> = BTreeSet::new();
    let mut attempted: BTreeMap<GateId, Vec<String>> = BTreeMap::new();
    let mut required: BTreeSet<GateId> = BTreeSet::new();
    for source in &sources {
        match &source.exempt {
            ExemptSpec::All => exempt_all = true,
            ExemptSpec::Gates(ids) => {
                for &id in ids {
                    exempt.insert(id);
                    attempted.entry(id).or_default().push(source.description.clone());
                }
            }
        }
        required.extend(source.required.iter().copied());
    }
    if exempt_all {
        // The sentinel exempts every non-critical gate; it never targets
        // critical gates, so it contributes no violation attribution.
        for &id in &considered {
            if !model.registry.get(id).critical {
                exempt.insert(id);
            }
        }
    }

    // Required overrides exempt: an explicit requirement is a stronger
    // signal than a broad exemption. Requirements also override
    // applies_to scoping, but never resurrect disabled gates.
    let mut candidate: BTreeSet<GateId> = considered.difference(&exempt).copied().collect();
    for &id in &required {
        if model.registry.get(id).enabled {
            candidate.insert(id);
        }
    }

    let (final_set, critical_violations) =
        guard::enforce(candidate, &considered, &attempted, &model.registry);

    let exempted_gate_names: Vec<String> = considered
        .iter()
        .filter(|id| !final_set.contains(id))
        .map(|&id| model.registry.get(id).name.clone())
        .collect();

    // Overrides layer in order: branch policy, file rules (declaration
    // order), then the stage policy last. Stage policies adjust
    // parameters only; they never add or remove gates.
    let mut effective: BTreeMap<GateId, GateOverride> = BTreeMap::new();
    for source in &sources {
        for (id, override_config) in &source.overrides {
            effective.entry(*id).or_default().merge_from(override_config);
        }
    }
    if let Some(stage) = stage_policy {
        matched_policy_descriptions.push(stage.description.clone());
        for (id, override_config) in &stage.overrides {
            effective.entry(*id).or_default().merge_from(override_config);
        }
    }

    let mut gates_to_run = Vec::new();
    for (id, gate) in model.registry.iter() {
        if !final_set.contains(&id) {
            continue;
        }
        let overrides = effective.get(&id);
        gates_to_run.push(ResolvedGate {
            name: gate.name.clone(),
            critical: gate.critical,
            command: overrides
                .and_then(|o| o.command.clone())
                .unwrap_or_else(|| gate.command.clone()),
            threshold: overrides.and_then(|o| o.threshold).or(gate.threshold),
            timeout: overrides.and_then(|o| o.timeout).unwrap_or(gate.timeout),
        });
    }

    tracing::debug!(
        branch = %ctx.branch,
        stage = ctx.stage.as_str(),
        to_run = gates_to_run.len(),
        exempted = exempted_gate_names.len(),
        "resolved gate set"
    );

    ResolutionDecision {
        gates_to_run,
        exempted_gate_names,
        matched_policy_descriptions,
        warnings,
        critical_violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BranchPolicy, CompiledPattern, EnforcementLevel, FilePatternRule, GateDefinition,
        GateRegistry, PathFilter, StagePolicy,
    };
    use crate::stage::Stage;
    use globset::{GlobBuilder, GlobSetBuilder};
    use regex_lite::Regex;
    use std::collections::HashMap;

    fn gate(name: &str) -> GateDefinition {
        GateDefinition {
            name: name.to_string(),
            enabled: true,
            critical: false,
            command: format!("run {name}"),
            threshold: None,
            timeout: Duration::from_secs(600),
            applies_to: None,
        }
    }

    fn glob_filter(patterns: &[&str]) -> PathFilter {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(
                GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .expect("test glob"),
            );
        }
        PathFilter::new(
            patterns.iter().map(|p| (*p).to_string()).collect(),
            builder.build().expect("test glob set"),
        )
    }

    fn model(gates: Vec<GateDefinition>) -> PolicyModel {
        PolicyModel {
            registry: GateRegistry::new(gates),
            branch_policies: Vec::new(),
            file_rules: Vec::new(),
            stage_policies: HashMap::new(),
        }
    }

    fn branch_policy(model: &PolicyModel, name: &str, pattern: &str, exempt: &[&str]) -> BranchPolicy {
        let mut ids = BTreeSet::new();
        for gate_name in exempt {
            ids.insert(model.registry.lookup(gate_name).expect("known gate"));
        }
        BranchPolicy {
            name: name.to_string(),
            pattern: Some(CompiledPattern {
                raw: pattern.to_string(),
                regex: Some(Regex::new(pattern).expect("test regex")),
            }),
            enforcement: EnforcementLevel::default(),
            exemptions: ExemptionSet {
                exempt: ExemptSpec::Gates(ids),
                required: BTreeSet::new(),
                overrides: BTreeMap::new(),
                description: format!("branch policy `{name}`"),
            },
        }
    }

    fn names(decision: &ResolutionDecision) -> Vec<&str> {
        decision.gates_to_run.iter().map(|g| g.name.as_str()).collect()
    }

    #[test]
    fn test_no_matching_policy_runs_full_registry() {
        let model = model(vec![gate("coverage"), gate("linting"), gate("testing")]);
        let ctx = ResolveContext::new("main", ["src/app.py"], Stage::PushToMain);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["coverage", "linting", "testing"]);
        assert!(decision.exempted_gate_names.is_empty());
        assert!(decision.matched_policy_descriptions.is_empty());
    }

    #[test]
    fn test_branch_exemptions_apply() {
        let mut model = model(vec![gate("coverage"), gate("linting"), gate("testing")]);
        let policy = branch_policy(&model, "test-branches", "^test/.*", &["coverage"]);
        model.branch_policies.push(policy);

        let ctx = ResolveContext::new("test/foo", ["src/app.py"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["linting", "testing"]);
        assert_eq!(decision.exempted_gate_names, vec!["coverage"]);
        assert_eq!(
            decision.matched_policy_descriptions,
            vec!["branch policy `test-branches`"]
        );
    }

    #[test]
    fn test_all_sentinel_exempts_every_non_critical_gate() {
        let mut critical = gate("secret_scanning");
        critical.critical = true;
        let mut model = model(vec![critical, gate("linting"), gate("testing")]);
        let mut policy = branch_policy(&model, "throwaway", "^throwaway/.*", &[]);
        policy.exemptions.exempt = ExemptSpec::All;
        model.branch_policies.push(policy);

        let ctx = ResolveContext::new("throwaway/spike", ["src/spike.rs"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["secret_scanning"]);
        assert_eq!(decision.exempted_gate_names, vec!["linting", "testing"]);
        // The sentinel never targets critical gates, so no violation.
        assert!(decision.critical_violations.is_empty());
    }

    #[test]
    fn test_required_overrides_exemption_for_same_gate() {
        let mut model = model(vec![gate("linting"), gate("testing")]);
        let mut policy = branch_policy(&model, "wip", "^wip/.*", &["testing"]);
        policy
            .exemptions
            .required
            .insert(model.registry.lookup("testing").expect("known gate"));
        model.branch_policies.push(policy);

        let ctx = ResolveContext::new("wip/x", ["src/a.rs"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        assert!(decision.runs("testing"));
        assert!(!decision.exempted_gate_names.contains(&"testing".to_string()));
    }

    #[test]
    fn test_critical_exemption_attempt_is_recorded_and_overridden() {
        let mut secret = gate("secret_scanning");
        secret.critical = true;
        let mut model = model(vec![secret, gate("linting")]);
        // Hand-built policy targeting a critical gate directly; the
        // validator would reject this, the guard is the runtime backstop.
        let policy = branch_policy(&model, "rogue", "^rogue/.*", &["secret_scanning"]);
        model.branch_policies.push(policy);

        let ctx = ResolveContext::new("rogue/x", ["src/a.rs"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        assert!(decision.runs("secret_scanning"));
        assert!(!decision.exempted_gate_names.contains(&"secret_scanning".to_string()));
        assert_eq!(decision.critical_violations.len(), 1);
        assert_eq!(decision.critical_violations[0].gate, "secret_scanning");
        assert_eq!(
            decision.critical_violations[0].attempted_by,
            vec!["branch policy `rogue`"]
        );
    }

    #[test]
    fn test_applies_to_limits_consideration() {
        let mut workflow_gate = gate("workflow_validation");
        workflow_gate.applies_to = Some(glob_filter(&[".github/workflows/*.yml"]));
        let model = model(vec![gate("linting"), workflow_gate]);

        let ctx = ResolveContext::new("main", ["src/app.py"], Stage::Pr);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["linting"]);
        // Not considered, so not "exempted" either.
        assert!(decision.exempted_gate_names.is_empty());

        let ctx = ResolveContext::new("main", [".github/workflows/ci.yml"], Stage::Pr);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["linting", "workflow_validation"]);
    }

    #[test]
    fn test_disabled_gate_is_never_resolved() {
        let mut disabled = gate("coverage");
        disabled.enabled = false;
        let model = model(vec![disabled, gate("linting")]);

        let ctx = ResolveContext::new("main", ["src/a.rs"], Stage::Pr);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["linting"]);
        assert!(decision.exempted_gate_names.is_empty());
    }

    #[test]
    fn test_stage_override_adjusts_parameters_only() {
        let mut testing = gate("testing");
        testing.threshold = Some(80.0);
        let mut model = model(vec![gate("linting"), testing]);
        let testing_id = model.registry.lookup("testing").expect("known gate");
        let overrides: BTreeMap<GateId, GateOverride> = [(
            testing_id,
            GateOverride {
                command: Some("pytest -x -q".to_string()),
                threshold: Some(70.0),
                timeout: Some(Duration::from_secs(120)),
            },
        )]
        .into_iter()
        .collect();
        model.stage_policies.insert(
            Stage::PrePush,
            StagePolicy {
                stage: Stage::PrePush,
                description: "stage policy `pre-push`".to_string(),
                overrides,
            },
        );

        let ctx = ResolveContext::new("main", ["src/a.rs"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        assert_eq!(names(&decision), vec!["linting", "testing"]);
        let testing = decision
            .gates_to_run
            .iter()
            .find(|g| g.name == "testing")
            .expect("testing runs");
        assert_eq!(testing.command, "pytest -x -q");
        assert_eq!(testing.threshold, Some(70.0));
        assert_eq!(testing.timeout, Duration::from_secs(120));

        // A stage without an entry uses the base configuration.
        let ctx = ResolveContext::new("main", ["src/a.rs"], Stage::Pr);
        let decision = resolve(&model, &ctx);
        let testing = decision
            .gates_to_run
            .iter()
            .find(|g| g.name == "testing")
            .expect("testing runs");
        assert_eq!(testing.command, "run testing");
        assert_eq!(testing.threshold, Some(80.0));
        assert_eq!(testing.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_stage_override_layers_over_branch_override() {
        let mut model = model(vec![gate("testing")]);
        let testing_id = model.registry.lookup("testing").expect("known gate");
        let mut policy = branch_policy(&model, "feature", "^feature/.*", &[]);
        policy.exemptions.overrides.insert(
            testing_id,
            GateOverride {
                command: Some("pytest --branch-flavor".to_string()),
                threshold: Some(75.0),
                timeout: None,
            },
        );
        model.branch_policies.push(policy);
        model.stage_policies.insert(
            Stage::PrePush,
            StagePolicy {
                stage: Stage::PrePush,
                description: "stage policy `pre-push`".to_string(),
                overrides: [(
                    testing_id,
                    GateOverride {
                        command: None,
                        threshold: Some(60.0),
                        timeout: None,
                    },
                )]
                .into_iter()
                .collect(),
            },
        );

        let ctx = ResolveContext::new("feature/x", ["src/a.rs"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        let testing = &decision.gates_to_run[0];
        // Stage layer wins per-field; untouched fields keep earlier layers.
        assert_eq!(testing.threshold, Some(60.0));
        assert_eq!(testing.command, "pytest --branch-flavor");
    }

    #[test]
    fn test_file_rule_union_with_branch_policy() {
        let mut model = model(vec![gate("coverage"), gate("linting"), gate("testing")]);
        let policy = branch_policy(&model, "test-branches", "^test/.*", &["coverage"]);
        model.branch_policies.push(policy);
        let docs_exempt: BTreeSet<GateId> =
            [model.registry.lookup("testing").expect("known gate")].into_iter().collect();
        let mut builder = GlobSetBuilder::new();
        builder.add(
            GlobBuilder::new("docs/**/*.md")
                .literal_separator(true)
                .build()
                .expect("test glob"),
        );
        model.file_rules.push(FilePatternRule {
            name: "docs-only".to_string(),
            patterns: vec!["docs/**/*.md".to_string()],
            glob_set: Some(builder.build().expect("test glob set")),
            exemptions: ExemptionSet {
                exempt: ExemptSpec::Gates(docs_exempt),
                required: BTreeSet::new(),
                overrides: BTreeMap::new(),
                description: "file pattern rule `docs-only`".to_string(),
            },
        });

        let ctx = ResolveContext::new("test/foo", ["docs/guide.md"], Stage::PrePush);
        let decision = resolve(&model, &ctx);
        // Branch exempts coverage, file rule exempts testing: union.
        assert_eq!(names(&decision), vec!["linting"]);
        assert_eq!(decision.exempted_gate_names, vec!["coverage", "testing"]);
        assert_eq!(decision.matched_policy_descriptions.len(), 2);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut model = model(vec![gate("coverage"), gate("linting"), gate("testing")]);
        let policy = branch_policy(&model, "test-branches", "^test/.*", &["coverage"]);
        model.branch_policies.push(policy);

        let ctx = ResolveContext::new("test/foo", ["src/a.rs"], Stage::PrePush);
        let first = resolve(&model, &ctx);
        let second = resolve(&model, &ctx);
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.exempted_gate_names, second.exempted_gate_names);
        assert_eq!(
            first.matched_policy_descriptions,
            second.matched_policy_descriptions
        );
    }
}
