//! Read-only access to the live cluster.

pub mod apiserver;
pub mod memory;

use serde_json::Value;
use thiserror::Error;

pub use apiserver::KubeClusterClient;
pub use memory::InMemoryCluster;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to create Kubernetes client: {0}")]
    Client(#[source] kube::Error),

    #[error("Failed to start cluster client runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Request '{request}' failed: {source}")]
    Api {
        request: String,
        #[source]
        source: kube::Error,
    },

    #[error("Request '{request}' timed out after {secs}s")]
    Timeout { request: String, secs: u64 },

    #[error("Failed to encode response of '{request}': {source}")]
    Encode {
        request: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

/// A namespaced resource type audited during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    /// API group, empty for the core group.
    pub group: &'static str,
    pub version: &'static str,
    /// Plural resource name as used in API paths.
    pub plural: &'static str,
    /// Object kind, used when listed objects omit their own.
    pub kind: &'static str,
}

impl ResourceKind {
    const fn core(plural: &'static str, kind: &'static str) -> Self {
        Self { group: "", version: "v1", plural, kind }
    }

    const fn grouped(group: &'static str, plural: &'static str, kind: &'static str) -> Self {
        Self { group, version: "v1", plural, kind }
    }

    /// `apiVersion` as written in manifests: `v1` or `apps/v1`.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Resource types enumerated per namespace.
pub const RESOURCE_KINDS: &[ResourceKind] = &[
    ResourceKind::core("pods", "Pod"),
    ResourceKind::core("services", "Service"),
    ResourceKind::core("configmaps", "ConfigMap"),
    ResourceKind::core("secrets", "Secret"),
    ResourceKind::core("persistentvolumeclaims", "PersistentVolumeClaim"),
    ResourceKind::grouped("apps", "deployments", "Deployment"),
    ResourceKind::grouped("apps", "statefulsets", "StatefulSet"),
    ResourceKind::grouped("apps", "daemonsets", "DaemonSet"),
    ResourceKind::grouped("apps", "replicasets", "ReplicaSet"),
    ResourceKind::grouped("batch", "jobs", "Job"),
    ResourceKind::grouped("batch", "cronjobs", "CronJob"),
    ResourceKind::grouped("networking.k8s.io", "ingresses", "Ingress"),
    ResourceKind::grouped("networking.k8s.io", "networkpolicies", "NetworkPolicy"),
];

/// Cluster operations needed by reconciliation and Helm resolution.
pub trait ClusterClient: Send + Sync {
    /// Names of all namespaces.
    fn list_namespaces(&self) -> Result<Vec<String>, ClusterError>;

    /// Secrets in `namespace` that hold Helm release revisions.
    fn list_helm_secrets(&self, namespace: &str) -> Result<Vec<Value>, ClusterError>;

    /// Objects of one resource type in `namespace`.
    fn list_resources(&self, namespace: &str, kind: &ResourceKind) -> Result<Vec<Value>, ClusterError>;
}
