use serde_json::Value;

use super::ObjectMeta;

const RELEASE_ANNOTATIONS: &[&str] = &[
    "meta.helm.sh/release-name",
    "helm.sh/release-name",
    "app.kubernetes.io/instance",
];

const RELEASE_LABELS: &[&str] = &["app.kubernetes.io/instance", "release", "helm.sh/release-name"];

const HELM_RELEASE_OWNER_KIND: &str = "HelmRelease";

/// Resolves the Helm release that owns an object.
///
/// Annotations win over labels, labels over a `HelmRelease` owner reference.
/// Returns `None` for standalone resources.
pub fn resolve_release_name(obj: &Value) -> Option<String> {
    let meta = ObjectMeta::of(obj);

    let found = RELEASE_ANNOTATIONS
        .iter()
        .find_map(|key| meta.annotation(key))
        .or_else(|| RELEASE_LABELS.iter().find_map(|key| meta.label(key)))
        .or_else(|| {
            meta.owner_references().find_map(|owner| {
                let kind = owner.get("kind").and_then(Value::as_str)?;
                let name = owner.get("name").and_then(Value::as_str)?;
                (kind == HELM_RELEASE_OWNER_KIND && !name.is_empty()).then_some(name)
            })
        });

    if let Some(release) = found {
        log::debug!(
            "Resolved release '{}' for {} {}",
            release,
            meta.kind(),
            meta.name().unwrap_or("<unnamed>")
        );
    }

    found.map(str::to_string)
}
