//! AdmissionReview wire types and their conversion into audit events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::AuditError;
use crate::resource::ObjectMeta;
use crate::storage::ChangeOperation;

/// Annotation carrying the real actor when changes are applied through
/// the audit service account.
pub const ORIGINAL_USER_ANNOTATION: &str = "audit-logger.kubernetes.io/original-user";

pub const UNKNOWN_USER: &str = "unknown";

const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub request: Option<AdmissionRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub kind: Option<GroupVersionKind>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub object: Option<Value>,
    #[serde(default)]
    pub old_object: Option<Value>,
    #[serde(default)]
    pub user_info: Option<UserInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: Option<String>,
}

impl AdmissionReview {
    pub fn from_slice(body: &[u8]) -> Result<Self, AuditError> {
        serde_json::from_slice(body)
            .map_err(|e| AuditError::MalformedEvent(format!("invalid AdmissionReview: {}", e)))
    }

    pub fn uid(&self) -> &str {
        self.request.as_ref().map_or("", |r| r.uid.as_str())
    }
}

/// The reply sent for every review: admission is never denied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponseReview {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
}

impl AdmissionResponseReview {
    pub fn allow(uid: &str, api_version: Option<&str>) -> Self {
        Self {
            api_version: api_version.unwrap_or(ADMISSION_API_VERSION).to_string(),
            kind: "AdmissionReview".to_string(),
            response: AdmissionResponse {
                uid: uid.to_string(),
                allowed: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Some(Operation::Create),
            "UPDATE" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }

    pub fn change_operation(self) -> ChangeOperation {
        match self {
            Operation::Create => ChangeOperation::Create,
            Operation::Update => ChangeOperation::Update,
            Operation::Delete => ChangeOperation::Delete,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.change_operation(), f)
    }
}

/// One admission callback, reduced to what the audit trail records.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub operation: Operation,
    /// The object after the change, or before it for DELETE.
    pub object: Value,
    pub user: String,
    pub uid: String,
}

impl AuditEvent {
    /// Extracts the event from a review.
    ///
    /// `audit_service_account` is the username whose changes are attributed
    /// to the user named in [`ORIGINAL_USER_ANNOTATION`].
    pub fn from_review(review: AdmissionReview, audit_service_account: &str) -> Result<Self, AuditError> {
        let request = review
            .request
            .ok_or_else(|| AuditError::MalformedEvent("review has no request".to_string()))?;
        Self::from_request(request, audit_service_account)
    }

    pub fn from_request(request: AdmissionRequest, audit_service_account: &str) -> Result<Self, AuditError> {
        let operation = Operation::parse(&request.operation).ok_or_else(|| {
            AuditError::MalformedEvent(format!("unsupported operation '{}'", request.operation))
        })?;

        let payload = match operation {
            Operation::Delete => request.old_object.or(request.object),
            Operation::Create | Operation::Update => request.object,
        };
        let mut object = match payload {
            Some(Value::Object(map)) => Value::Object(map),
            _ => {
                return Err(AuditError::MalformedEvent(format!(
                    "{} request {} has no object",
                    operation, request.uid
                )))
            }
        };

        if let (Some(gvk), Value::Object(map)) = (&request.kind, &mut object) {
            if !map.contains_key("kind") && !gvk.kind.is_empty() {
                map.insert("kind".to_string(), Value::String(gvk.kind.clone()));
            }
        }

        let username = request.user_info.and_then(|u| u.username);
        let user = resolve_actor(username.as_deref(), &object, audit_service_account);

        Ok(Self {
            operation,
            object,
            user,
            uid: request.uid,
        })
    }
}

fn resolve_actor(username: Option<&str>, object: &Value, audit_service_account: &str) -> String {
    match username {
        Some(name) if name == audit_service_account => ObjectMeta::of(object)
            .annotation(ORIGINAL_USER_ANNOTATION)
            .unwrap_or(name)
            .to_string(),
        Some(name) if !name.is_empty() => name.to_string(),
        _ => UNKNOWN_USER.to_string(),
    }
}
