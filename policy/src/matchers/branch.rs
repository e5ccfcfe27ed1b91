//! Branch policy matching: first match wins.

use crate::matchers::MatchWarning;
use crate::model::BranchPolicy;

/// Find the branch policy for `branch`, trying policies in declaration
/// order. A policy matches when its name equals the branch exactly or
/// its pattern matches; the first match wins even if later policies
/// would also match.
///
/// Returns `None` when nothing matched; the resolver then behaves as if
/// the strictest policy matched (run everything, no exemptions).
pub fn match_branch_policy<'a>(
    branch: &str,
    policies: &'a [BranchPolicy],
) -> (Option<&'a BranchPolicy>, Vec<MatchWarning>) {
    let mut warnings = Vec::new();
    for policy in policies {
        if policy.name == branch {
            return (Some(policy), warnings);
        }
        let Some(pattern) = &policy.pattern else {
            continue;
        };
        match &pattern.regex {
            Some(regex) => {
                if regex.is_match(branch) {
                    return (Some(policy), warnings);
                }
            }
            None => {
                // Load-time validation compiles every pattern; an
                // uncompiled one can only come from a hand-built model.
                tracing::warn!(
                    policy = %policy.name,
                    pattern = %pattern.raw,
                    "skipping branch policy with uncompiled pattern"
                );
                warnings.push(MatchWarning::new(
                    policy.name.clone(),
                    format!("pattern `{}` was not compiled; policy skipped", pattern.raw),
                ));
            }
        }
    }
    (None, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompiledPattern, EnforcementLevel, ExemptionSet};
    use regex_lite::Regex;

    fn policy(name: &str, pattern: Option<&str>) -> BranchPolicy {
        BranchPolicy {
            name: name.to_string(),
            pattern: pattern.map(|raw| CompiledPattern {
                raw: raw.to_string(),
                regex: Regex::new(raw).ok(),
            }),
            enforcement: EnforcementLevel::default(),
            exemptions: ExemptionSet::empty(format!("branch policy `{name}`")),
        }
    }

    #[test]
    fn test_exact_name_match() {
        let policies = vec![policy("main", None), policy("release", None)];
        let (matched, warnings) = match_branch_policy("release", &policies);
        assert_eq!(matched.map(|p| p.name.as_str()), Some("release"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_first_match_wins_over_later_broader_pattern() {
        let policies = vec![
            policy("feature", Some("^feature/.*")),
            policy("catch-all", Some(".*")),
        ];
        let (matched, _) = match_branch_policy("feature/x", &policies);
        assert_eq!(matched.map(|p| p.name.as_str()), Some("feature"));
    }

    #[test]
    fn test_no_match_returns_none() {
        let policies = vec![policy("feature", Some("^feature/.*"))];
        let (matched, warnings) = match_branch_policy("hotfix/urgent", &policies);
        assert!(matched.is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_uncompiled_pattern_is_skipped_with_warning() {
        let broken = BranchPolicy {
            pattern: Some(CompiledPattern {
                raw: "^broken/(".to_string(),
                regex: None,
            }),
            ..policy("broken", None)
        };
        let policies = vec![broken, policy("catch-all", Some(".*"))];
        let (matched, warnings) = match_branch_policy("feature/x", &policies);
        assert_eq!(matched.map(|p| p.name.as_str()), Some("catch-all"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].policy, "broken");
    }

    #[test]
    fn test_earlier_pattern_beats_later_exact_name() {
        // Exact-name matching is still positional: an earlier pattern
        // that matches wins over a later exact name.
        let policies = vec![policy("catch-all", Some(".*")), policy("main", None)];
        let (matched, _) = match_branch_policy("main", &policies);
        assert_eq!(matched.map(|p| p.name.as_str()), Some("catch-all"));
    }
}
