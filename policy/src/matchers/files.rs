//! File-pattern rule matching: all matching rules apply.

use crate::matchers::MatchWarning;
use crate::model::FilePatternRule;

/// Return every rule with at least one glob matching at least one
/// changed file, plus any rule with an empty pattern list when the
/// changeset itself is empty (the empty-commit sentinel).
///
/// Multiple rules may match simultaneously; exemptions are unioned by
/// the resolver, so no precedence exists here.
pub fn match_file_rules<'a>(
    changed_files: &[String],
    rules: &'a [FilePatternRule],
) -> (Vec<&'a FilePatternRule>, Vec<MatchWarning>) {
    let mut matched = Vec::new();
    let mut warnings = Vec::new();
    for rule in rules {
        if rule.patterns.is_empty() {
            // Sentinel: matches only when no files changed at all,
            // distinguishing that from a real empty-string match.
            if changed_files.is_empty() {
                matched.push(rule);
            }
            continue;
        }
        let Some(set) = &rule.glob_set else {
            tracing::warn!(
                rule = %rule.name,
                "skipping file pattern rule with uncompiled globs"
            );
            warnings.push(MatchWarning::new(
                rule.name.clone(),
                "globs were not compiled; rule skipped",
            ));
            continue;
        };
        if changed_files.iter().any(|file| set.is_match(file)) {
            matched.push(rule);
        }
    }
    (matched, warnings)
}
