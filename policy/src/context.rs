//! Context snapshot supplied by the caller.
//!
//! The engine never reads version-control state itself. The surrounding
//! CLI/hook gathers the branch name, the changed file list, and the stage,
//! and passes them in as a read-only snapshot.

use crate::stage::Stage;

/// Read-only record of the situation a resolution runs against.
#[derive(Clone, Debug)]
pub struct ResolveContext {
    /// Current branch name (e.g. `feature/login`)
    pub branch: String,
    /// Changed file paths, repository-relative
    pub changed_files: Vec<String>,
    /// Pipeline stage this resolution is for
    pub stage: Stage,
}

impl ResolveContext {
    pub fn new(
        branch: impl Into<String>,
        changed_files: impl IntoIterator<Item = impl Into<String>>,
        stage: Stage,
    ) -> Self {
        Self {
            branch: branch.into(),
            changed_files: changed_files.into_iter().map(Into::into).collect(),
            stage,
        }
    }

    /// Fail-safe substitute for callers that cannot determine the real
    /// context: treated as the main branch with an empty changeset, which
    /// resolves to the strictest gate set.
    pub fn strictest(stage: Stage) -> Self {
        Self {
            branch: "main".to_string(),
            changed_files: Vec::new(),
            stage,
        }
    }
}
