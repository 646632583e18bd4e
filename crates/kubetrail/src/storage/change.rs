use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User recorded for changes made by the audit logger itself.
pub const SYSTEM_USER: &str = "audit-logger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
    InitialSync,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOperation::Create => "CREATE",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
            ChangeOperation::InitialSync => "INITIAL_SYNC",
        };
        f.write_str(s)
    }
}

/// Contents of `<namespace>/latest-changes.json`: the most recent change
/// touching a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: ChangeOperation,
    pub user: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub namespace: String,
    #[serde(default)]
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChangeRecord {
    pub fn new(
        operation: ChangeOperation,
        user: &str,
        resource_kind: &str,
        resource_name: &str,
        namespace: &str,
        release: Option<&str>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            user: user.to_string(),
            resource_kind: resource_kind.to_string(),
            resource_name: resource_name.to_string(),
            namespace: namespace.to_string(),
            release: release.unwrap_or_default().to_string(),
            message: None,
        }
    }

    /// Record written for each namespace visited by the initial sync.
    pub fn initial_sync(namespace: &str) -> Self {
        Self {
            message: Some("Namespace processed during initial sync".to_string()),
            ..Self::new(
                ChangeOperation::InitialSync,
                SYSTEM_USER,
                "Namespace",
                namespace,
                namespace,
                None,
            )
        }
    }

    /// True when both records describe the same change, ignoring when it happened.
    pub fn same_identity(&self, other: &ChangeRecord) -> bool {
        self.operation == other.operation
            && self.user == other.user
            && self.resource_kind == other.resource_kind
            && self.resource_name == other.resource_name
            && self.namespace == other.namespace
            && self.release == other.release
            && self.message == other.message
    }
}
