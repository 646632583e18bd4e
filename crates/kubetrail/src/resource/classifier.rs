use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use super::{ObjectMeta, ResourceRecord};
use crate::config::AuditConfig;

/// Metadata fields that change without any semantic change to the object.
const VOLATILE_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "creationTimestamp",
    "generation",
    "resourceVersion",
    "uid",
];

/// Prefix of the Secrets in which Helm stores release revisions.
pub const HELM_RELEASE_SECRET_PREFIX: &str = "sh.helm.release.v";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ExcludedNamespace(String),
    RootCaConfigMap,
    ServiceAccountToken,
    HelmReleaseSecret,
    DefaultServiceAccount,
    KubernetesService,
    MissingName,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExcludedNamespace(ns) => write!(f, "namespace '{}' is excluded", ns),
            SkipReason::RootCaConfigMap => write!(f, "cluster root CA ConfigMap"),
            SkipReason::ServiceAccountToken => write!(f, "service account token"),
            SkipReason::HelmReleaseSecret => write!(f, "Helm release secret"),
            SkipReason::DefaultServiceAccount => write!(f, "default service account"),
            SkipReason::KubernetesService => write!(f, "default kubernetes service"),
            SkipReason::MissingName => write!(f, "object has no name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Skip(SkipReason),
    Keep(ResourceRecord),
}

/// Decides whether an object is audited and where it is stored.
#[derive(Debug, Clone)]
pub struct ResourceClassifier {
    excluded_namespaces: BTreeSet<String>,
}

impl ResourceClassifier {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            excluded_namespaces: config.excluded_namespaces.clone(),
        }
    }

    pub fn with_excluded<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded_namespaces.contains(namespace)
    }

    pub fn classify(&self, obj: &Value) -> Classification {
        if let Some(reason) = self.skip_reason(obj) {
            return Classification::Skip(reason);
        }
        match ResourceRecord::from_object(obj) {
            Some(record) => Classification::Keep(record),
            None => Classification::Skip(SkipReason::MissingName),
        }
    }

    /// Returns why an object is not audited, or `None` if it is.
    pub fn skip_reason(&self, obj: &Value) -> Option<SkipReason> {
        let meta = ObjectMeta::of(obj);
        let Some(name) = meta.name() else {
            return Some(SkipReason::MissingName);
        };

        let namespace = meta.effective_namespace();
        if self.is_excluded(&namespace) {
            return Some(SkipReason::ExcludedNamespace(namespace));
        }

        let kind = meta.kind().to_lowercase();
        match kind.as_str() {
            "configmap" if name == "kube-root-ca.crt" => Some(SkipReason::RootCaConfigMap),
            "secret" if name.starts_with(HELM_RELEASE_SECRET_PREFIX) => {
                Some(SkipReason::HelmReleaseSecret)
            }
            "secret" if name.contains("-token-") => Some(SkipReason::ServiceAccountToken),
            "serviceaccount" if name == "default" => Some(SkipReason::DefaultServiceAccount),
            "service" | "endpoints" if name == "kubernetes" => Some(SkipReason::KubernetesService),
            _ => None,
        }
    }
}

/// Removes fields that would make diffs noisy without reflecting a change.
pub fn strip_volatile_fields(obj: &mut Value) {
    if let Some(metadata) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in VOLATILE_METADATA_FIELDS {
            metadata.remove(*field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn classifier() -> ResourceClassifier {
        ResourceClassifier::new(&AuditConfig::new("/tmp/audit"))
    }

    fn object(kind: &str, ns: &str, name: &str) -> Value {
        json!({"kind": kind, "metadata": {"name": name, "namespace": ns}})
    }

    #[test]
    fn test_keep_deployment() {
        let mut obj = object("Deployment", "ns1", "web");
        obj["metadata"]["annotations"] = json!({"app.kubernetes.io/instance": "web-release"});

        match classifier().classify(&obj) {
            Classification::Keep(record) => {
                assert_eq!(record.release.as_deref(), Some("web-release"));
                assert_eq!(
                    record.path,
                    PathBuf::from("ns1/web-release/resources/deployment-web.yaml")
                );
            }
            other => panic!("expected Keep, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_rules() {
        let c = classifier();
        let cases = [
            (object("ConfigMap", "ns1", "kube-root-ca.crt"), SkipReason::RootCaConfigMap),
            (object("configmap", "ns1", "kube-root-ca.crt"), SkipReason::RootCaConfigMap),
            (object("Secret", "ns1", "default-token-x7k2p"), SkipReason::ServiceAccountToken),
            (object("Secret", "ns1", "builder-token-abcde"), SkipReason::ServiceAccountToken),
            (
                object("Secret", "ns1", "sh.helm.release.v1.web.v3"),
                SkipReason::HelmReleaseSecret,
            ),
            (object("ServiceAccount", "ns1", "default"), SkipReason::DefaultServiceAccount),
            (object("Service", "ns1", "kubernetes"), SkipReason::KubernetesService),
            (object("Endpoints", "ns1", "kubernetes"), SkipReason::KubernetesService),
        ];

        for (obj, expected) in cases {
            assert_eq!(c.skip_reason(&obj), Some(expected), "object: {}", obj);
        }
    }

    #[test]
    fn test_not_skipped() {
        let c = classifier();
        assert_eq!(c.skip_reason(&object("ConfigMap", "ns1", "settings")), None);
        assert_eq!(c.skip_reason(&object("Secret", "ns1", "db-password")), None);
        assert_eq!(c.skip_reason(&object("ServiceAccount", "ns1", "builder")), None);
        assert_eq!(c.skip_reason(&object("Service", "ns1", "api")), None);
    }

    #[test]
    fn test_excluded_namespace() {
        let c = ResourceClassifier::with_excluded(["monitoring"]);
        assert_eq!(
            c.skip_reason(&object("Pod", "monitoring", "prom-0")),
            Some(SkipReason::ExcludedNamespace("monitoring".to_string()))
        );

        let ns = json!({"kind": "Namespace", "metadata": {"name": "monitoring"}});
        assert!(matches!(
            c.skip_reason(&ns),
            Some(SkipReason::ExcludedNamespace(_))
        ));
    }

    #[test]
    fn test_missing_name() {
        let obj = json!({"kind": "Pod", "metadata": {"namespace": "ns1"}});
        assert_eq!(
            classifier().classify(&obj),
            Classification::Skip(SkipReason::MissingName)
        );
    }

    #[test]
    fn test_strip_volatile_fields() {
        let mut obj = json!({
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "namespace": "ns1",
                "uid": "1234",
                "resourceVersion": "99",
                "generation": 4,
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "managedFields": [{"manager": "kubectl"}],
                "labels": {"app": "x"}
            },
            "data": {"key": "value"}
        });

        strip_volatile_fields(&mut obj);

        let metadata = obj["metadata"].as_object().unwrap();
        assert_eq!(metadata.len(), 3);
        assert!(metadata.contains_key("labels"));
        assert_eq!(obj["data"]["key"], "value");
    }
}
