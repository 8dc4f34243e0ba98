//! `StructuredContext` — logical contents of `context_blob`. See `spec.md` §3.

use serde::{Deserialize, Serialize};

/// The structured context attached to an entry. All fields are individually
/// optional, but at least `situation` or `solution` must be non-empty for
/// the context to be worth persisting (enforced by the caller / codec, not
/// this type).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub situation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what_failed: Option<String>,
    /// Ordered, unique, lowercased.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
}

impl StructuredContext {
    /// True if this context carries enough content to be worth persisting.
    pub fn is_persistable(&self) -> bool {
        self.situation.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.solution.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}
