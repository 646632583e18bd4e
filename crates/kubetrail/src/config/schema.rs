use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Namespaces that are never audited, regardless of configuration.
pub const SYSTEM_NAMESPACES: &[&str] = &[
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "default",
    "audit-system",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Root of the Git working tree holding the audit trail.
    pub storage_path: PathBuf,

    /// Whether Helm releases are resolved and their values recorded.
    #[serde(default = "default_true")]
    pub helm_tracking: bool,

    /// Namespaces excluded from auditing (system namespaces included).
    #[serde(default)]
    pub excluded_namespaces: BTreeSet<String>,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub helm: HelmSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Service account the audit logger itself acts as; requests from it
    /// carry the real actor in an annotation.
    #[serde(default = "default_audit_service_account")]
    pub audit_service_account: String,
}

impl AuditConfig {
    /// Creates a configuration with defaults rooted at `storage_path`.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            helm_tracking: true,
            excluded_namespaces: SYSTEM_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            git: GitSettings::default(),
            helm: HelmSettings::default(),
            schedule: ScheduleSettings::default(),
            audit_service_account: default_audit_service_account(),
        }
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded_namespaces.contains(namespace)
    }
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_audit_service_account() -> String {
    "system:serviceaccount:audit-system:audit-logger".to_string()
}

/// Git settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSettings {
    /// Remote repository URL. Empty means commits stay local.
    #[serde(default)]
    pub remote_url: String,

    /// Branch to commit to and push.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Authentication settings.
    #[serde(default)]
    pub auth: GitAuthSettings,

    /// Git user name for commits.
    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Git user email for commits.
    #[serde(default = "default_user_email")]
    pub user_email: String,

    /// Timeout for network operations (clone, fetch, pull, push) in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GitSettings {
    pub fn has_remote(&self) -> bool {
        !self.remote_url.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            branch: default_branch(),
            auth: GitAuthSettings::default(),
            user_name: default_user_name(),
            user_email: default_user_email(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_user_name() -> String {
    "audit-logger".to_string()
}

fn default_user_email() -> String {
    "audit-logger@kubernetes.local".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Git authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuthSettings {
    /// Authentication type: none, token, or ssh.
    #[serde(default, rename = "type")]
    pub auth_type: GitAuthType,

    /// Token value, normally injected from a Kubernetes Secret.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Path to a file containing the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    /// Username answered to HTTPS credential prompts.
    #[serde(default = "default_git_username")]
    pub username: String,

    /// Path to SSH key file.
    #[serde(default)]
    pub ssh_key_path: String,
}

impl Default for GitAuthSettings {
    fn default() -> Self {
        Self {
            auth_type: GitAuthType::None,
            token: None,
            token_file: None,
            username: default_git_username(),
            ssh_key_path: String::new(),
        }
    }
}

fn default_git_username() -> String {
    "git".to_string()
}

/// Git authentication type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAuthType {
    #[default]
    None,
    Token,
    Ssh,
}

/// Settings for deriving Helm deployment metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSettings {
    /// Organization preferred when a chart lists several source repositories.
    #[serde(default = "default_primary_org")]
    pub primary_org: String,

    /// Repository name used when nothing else identifies the chart's origin.
    #[serde(default = "default_fallback_org")]
    pub fallback_org: String,

    /// Whether well-known chart repository indexes are probed over HTTP.
    #[serde(default = "default_true")]
    pub probe_repositories: bool,
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self {
            primary_org: default_primary_org(),
            fallback_org: default_fallback_org(),
            probe_repositories: true,
        }
    }
}

fn default_primary_org() -> String {
    "bitnami".to_string()
}

fn default_fallback_org() -> String {
    "custom".to_string()
}

/// Reconciliation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    /// Seconds between cleanup passes.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Seconds between full re-syncs; 0 disables periodic full syncs.
    #[serde(default)]
    pub sync_interval_secs: u64,
}

impl ScheduleSettings {
    /// Never shorter than one second.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            sync_interval_secs: 0,
        }
    }
}

fn default_cleanup_interval() -> u64 {
    120
}
