//! Structural log entries.

use serde::{Deserialize, Serialize};

/// Operation carried by a [`StreamStructure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Add the content id, or update it in place if already present.
    UpdateOrAppend,
    /// Remove the content id.
    Remove,
    /// Drop everything known to $HEAD.
    ClearAll,
    /// An operation this build does not understand. Logged and skipped.
    #[serde(other)]
    Unknown,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpdateOrAppend => "update_or_append",
            Self::Remove => "remove",
            Self::ClearAll => "clear_all",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a session's structure log.
///
/// Identity is `content_id`. Position in the log determines parent/child
/// render order downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStructure {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_content_id: Option<String>,
    pub operation: Operation,
}

impl StreamStructure {
    pub fn new(
        content_id: impl Into<String>,
        parent_content_id: Option<String>,
        operation: Operation,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            parent_content_id,
            operation,
        }
    }

    /// An `UPDATE_OR_APPEND` entry without a parent.
    pub fn update_or_append(content_id: impl Into<String>) -> Self {
        Self::new(content_id, None, Operation::UpdateOrAppend)
    }

    /// An `UPDATE_OR_APPEND` entry under `parent`.
    pub fn child_of(content_id: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::new(content_id, Some(parent.into()), Operation::UpdateOrAppend)
    }

    pub fn remove(content_id: impl Into<String>) -> Self {
        Self::new(content_id, None, Operation::Remove)
    }

    /// The `CLEAR_ALL` marker. Its content id is empty.
    pub fn clear_all() -> Self {
        Self::new(String::new(), None, Operation::ClearAll)
    }
}
