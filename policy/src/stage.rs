//! Pipeline stages where gate resolution runs.

use serde::{Deserialize, Serialize};

/// Pipeline stages with their own default strictness.
///
/// The base gate configuration represents the strictest stage; a stage
/// policy entry supplies only the fields it relaxes. Absence of an entry
/// for a stage means "use base".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Local pre-push hook
    PrePush,
    /// Pull-request CI
    Pr,
    /// Push to the main branch
    PushToMain,
}

impl Stage {
    /// All stages in pipeline order
    pub fn all() -> [Self; 3] {
        [Self::PrePush, Self::Pr, Self::PushToMain]
    }

    /// Stage identifier as it appears in configuration keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrePush => "pre-push",
            Self::Pr => "pr",
            Self::PushToMain => "push-to-main",
        }
    }

    /// Human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PrePush => "Pre-push",
            Self::Pr => "Pull request",
            Self::PushToMain => "Push to main",
        }
    }

    /// Parse a stage identifier (exact, as used in configuration keys)
    pub fn from_id(s: &str) -> Option<Self> {
        match s {
            "pre-push" => Some(Self::PrePush),
            "pr" => Some(Self::Pr),
            "push-to-main" => Some(Self::PushToMain),
            _ => None,
        }
    }
}
