//! Resource classification and storage path mapping.

pub mod classifier;
pub mod release;

use serde_json::Value;
use std::path::PathBuf;

use crate::sanitize::path_segment;

pub use classifier::{strip_volatile_fields, Classification, ResourceClassifier, SkipReason};
pub use release::resolve_release_name;

/// Namespace segment used for objects that have no namespace.
pub const CLUSTER_SCOPE_DIR: &str = "_cluster";

/// Directory holding resources that belong to no Helm release.
pub const STANDALONE_DIR: &str = "standalone-resources";

/// Directory holding a release's resources.
pub const RESOURCES_DIR: &str = "resources";

/// Where a resource lives in the audit tree.
///
/// `path` is relative to the storage root and depends only on the other
/// four fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub release: Option<String>,
    pub path: PathBuf,
}

impl ResourceRecord {
    pub fn new(kind: &str, namespace: &str, name: &str, release: Option<&str>) -> Self {
        let release = release.filter(|r| !r.is_empty()).map(str::to_string);
        let path = record_path(kind, namespace, name, release.as_deref());
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            release,
            path,
        }
    }

    /// Builds the record for a raw object, resolving its release.
    ///
    /// Returns `None` when the object has no name.
    pub fn from_object(obj: &Value) -> Option<Self> {
        let meta = ObjectMeta::of(obj);
        let name = meta.name()?;
        let release = resolve_release_name(obj);
        Some(Self::new(
            &meta.kind(),
            &meta.effective_namespace(),
            name,
            release.as_deref(),
        ))
    }

    /// File name without directories, e.g. `deployment-web.yaml`.
    pub fn file_name(&self) -> String {
        file_name(&self.kind, &self.name)
    }
}

/// Computes `<namespace>/<release>/resources/<kind>-<name>.yaml` or
/// `<namespace>/standalone-resources/<kind>-<name>.yaml`.
pub fn record_path(kind: &str, namespace: &str, name: &str, release: Option<&str>) -> PathBuf {
    let mut path = PathBuf::from(path_segment(namespace));
    match release.filter(|r| !r.is_empty()) {
        Some(release) => {
            path.push(path_segment(release));
            path.push(RESOURCES_DIR);
        }
        None => path.push(STANDALONE_DIR),
    }
    path.push(file_name(kind, name));
    path
}

fn file_name(kind: &str, name: &str) -> String {
    format!(
        "{}-{}.yaml",
        path_segment(&kind.to_lowercase()),
        path_segment(name)
    )
}

/// Read-only view over the identifying fields of a raw object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta<'a> {
    obj: &'a Value,
}

impl<'a> ObjectMeta<'a> {
    pub fn of(obj: &'a Value) -> Self {
        Self { obj }
    }

    pub fn kind(&self) -> String {
        self.obj
            .get("kind")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind().eq_ignore_ascii_case(kind)
    }

    pub fn name(&self) -> Option<&'a str> {
        self.metadata_str("name")
    }

    pub fn namespace(&self) -> Option<&'a str> {
        self.metadata_str("namespace")
    }

    /// The namespace a resource is filed under: its own name for a
    /// `Namespace`, `_cluster` for other cluster-scoped objects.
    pub fn effective_namespace(&self) -> String {
        if self.is_kind("namespace") {
            return self.name().unwrap_or_default().to_string();
        }
        self.namespace().unwrap_or(CLUSTER_SCOPE_DIR).to_string()
    }

    pub fn annotation(&self, key: &str) -> Option<&'a str> {
        self.metadata_map_str("annotations", key)
    }

    pub fn label(&self, key: &str) -> Option<&'a str> {
        self.metadata_map_str("labels", key)
    }

    pub fn owner_references(&self) -> impl Iterator<Item = &'a Value> {
        self.obj
            .pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    fn metadata_str(&self, key: &str) -> Option<&'a str> {
        self.obj
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn metadata_map_str(&self, map: &str, key: &str) -> Option<&'a str> {
        self.obj
            .get("metadata")
            .and_then(|m| m.get(map))
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_release_path() {
        let path = record_path("Deployment", "ns1", "web", Some("web-release"));
        assert_eq!(path, PathBuf::from("ns1/web-release/resources/deployment-web.yaml"));
    }

    #[test]
    fn test_standalone_path() {
        let path = record_path("ConfigMap", "ns1", "settings", None);
        assert_eq!(path, PathBuf::from("ns1/standalone-resources/configmap-settings.yaml"));
        assert_eq!(path, record_path("ConfigMap", "ns1", "settings", Some("")));
    }

    #[test]
    fn test_path_is_deterministic() {
        let a = record_path("Service", "ns1", "api", Some("rel"));
        let b = record_path("Service", "ns1", "api", Some("rel"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespace_kind_uses_own_name() {
        let obj = json!({
            "kind": "Namespace",
            "metadata": {"name": "team-a", "namespace": "ignored"}
        });
        let record = ResourceRecord::from_object(&obj).unwrap();
        assert_eq!(record.namespace, "team-a");
        assert_eq!(
            record.path,
            PathBuf::from("team-a/standalone-resources/namespace-team-a.yaml")
        );
    }

    #[test]
    fn test_cluster_scoped_object() {
        let obj = json!({"kind": "ClusterRole", "metadata": {"name": "viewer"}});
        let meta = ObjectMeta::of(&obj);
        assert_eq!(meta.effective_namespace(), CLUSTER_SCOPE_DIR);
    }

    #[test]
    fn test_record_without_name() {
        let obj = json!({"kind": "Pod", "metadata": {"namespace": "ns1"}});
        assert!(ResourceRecord::from_object(&obj).is_none());
    }

    #[test]
    fn test_missing_kind_defaults() {
        let obj = json!({"metadata": {"name": "x", "namespace": "ns1"}});
        assert_eq!(ObjectMeta::of(&obj).kind(), "Unknown");
    }
}
