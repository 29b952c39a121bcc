use serde::{Deserialize, Serialize};

use crate::temporal::Timestamp;

/// Name of the root branch
pub const MASTER_BRANCH: &str = "master";

/// Immutable identity of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub name: String,
    /// `None` only for master
    pub parent: Option<String>,
    /// Last parent timestamp visible on this branch
    pub branching_timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location_hint: Option<String>,
}

impl BranchMetadata {
    pub fn master() -> Self {
        Self {
            name: MASTER_BRANCH.to_string(),
            parent: None,
            branching_timestamp: 0,
            storage_location_hint: None,
        }
    }

    pub fn child(
        name: impl Into<String>,
        parent: impl Into<String>,
        branching_timestamp: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            branching_timestamp,
            storage_location_hint: None,
        }
    }

    pub fn with_storage_location_hint(mut self, hint: impl Into<String>) -> Self {
        self.storage_location_hint = Some(hint.into());
        self
    }

    pub fn is_master(&self) -> bool {
        self.parent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_has_no_parent() {
        let master = BranchMetadata::master();
        assert!(master.is_master());
        assert_eq!(master.branching_timestamp, 0);
    }

    #[test]
    fn test_hint_is_omitted_when_absent() {
        let json = serde_json::to_string(&BranchMetadata::child("x", "master", 4)).unwrap();
        assert!(!json.contains("storage_location_hint"));
        let parsed: BranchMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.parent.as_deref(), Some("master"));
    }
}
