//! Builders for admission reviews and cluster objects.

#![allow(dead_code)]

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};

use kubetrail::{AdmissionReview, AuditEvent};

pub const AUDIT_SERVICE_ACCOUNT: &str = "system:serviceaccount:audit-system:audit-logger";

/// Builds an `AdmissionReview` body and the event parsed from it.
pub struct ReviewBuilder {
    operation: &'static str,
    kind: String,
    name: String,
    namespace: Option<String>,
    labels: Map<String, Value>,
    annotations: Map<String, Value>,
    spec: Value,
    user: Option<String>,
    uid: String,
}

impl ReviewBuilder {
    fn new(operation: &'static str, kind: &str, name: &str) -> Self {
        Self {
            operation,
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: None,
            labels: Map::new(),
            annotations: Map::new(),
            spec: Value::Null,
            user: Some("alice".to_string()),
            uid: format!("{}-{}", operation.to_lowercase(), name),
        }
    }

    pub fn create(kind: &str, name: &str) -> Self {
        Self::new("CREATE", kind, name)
    }

    pub fn update(kind: &str, name: &str) -> Self {
        Self::new("UPDATE", kind, name)
    }

    pub fn delete(kind: &str, name: &str) -> Self {
        Self::new("DELETE", kind, name)
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), json!(value));
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), json!(value));
        self
    }

    pub fn spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.user = None;
        self
    }

    pub fn object(&self) -> Value {
        let mut metadata = json!({"name": self.name, "resourceVersion": "4711", "uid": "obj-uid"});
        if let Some(namespace) = &self.namespace {
            metadata["namespace"] = json!(namespace);
        }
        if !self.labels.is_empty() {
            metadata["labels"] = Value::Object(self.labels.clone());
        }
        if !self.annotations.is_empty() {
            metadata["annotations"] = Value::Object(self.annotations.clone());
        }

        let mut object = json!({"apiVersion": "v1", "kind": self.kind, "metadata": metadata});
        if !self.spec.is_null() {
            object["spec"] = self.spec.clone();
        }
        object
    }

    pub fn review(&self) -> Value {
        let object_field = if self.operation == "DELETE" { "oldObject" } else { "object" };
        let mut request = json!({
            "uid": self.uid,
            "operation": self.operation,
            "kind": {"group": "", "version": "v1", "kind": self.kind},
        });
        request[object_field] = self.object();
        if let Some(namespace) = &self.namespace {
            request["namespace"] = json!(namespace);
        }
        if let Some(user) = &self.user {
            request["userInfo"] = json!({"username": user});
        }

        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": request,
        })
    }

    /// Parses the review the way the webhook does.
    pub fn build(&self) -> AuditEvent {
        let body = serde_json::to_vec(&self.review()).expect("Failed to serialize review");
        let review = AdmissionReview::from_slice(&body).expect("Failed to parse review");
        AuditEvent::from_review(review, AUDIT_SERVICE_ACCOUNT).expect("Failed to build event")
    }
}

/// Builds a Helm release Secret as stored by Helm 3.
pub fn release_secret(namespace: &str, release: &str, version: u64, document: &Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "helm.sh/release.v1",
        "metadata": {
            "name": format!("sh.helm.release.v1.{}.v{}", release, version),
            "namespace": namespace,
            "labels": {
                "name": release,
                "owner": "helm",
                "status": "deployed",
                "version": version.to_string(),
            }
        },
        "data": {"release": encode_release(document)}
    })
}

/// Gzip, then base64 twice, as in a Secret's `data.release`.
pub fn encode_release(document: &Value) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(document.to_string().as_bytes())
        .expect("Failed to compress release");
    let gz = encoder.finish().expect("Failed to compress release");
    STANDARD.encode(STANDARD.encode(gz))
}

pub fn release_document(chart: &str, chart_version: &str, values: Value) -> Value {
    json!({
        "name": "ignored",
        "version": 1,
        "config": values,
        "chart": {
            "metadata": {"name": chart, "version": chart_version, "appVersion": "1.0"}
        },
        "info": {"status": "deployed"}
    })
}
