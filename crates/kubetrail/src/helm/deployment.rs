use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::repository::RepositoryLocator;
use super::secrets::HelmReleaseSecret;

const UNKNOWN: &str = "unknown";

/// Contents of `<namespace>/<release>/deployment-info.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmReleaseInfo {
    pub chart_name: String,
    pub chart_version: String,
    pub app_version: String,
    pub release_version: String,
    pub repository: String,
    pub repository_url: String,
    pub deploy_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_release_version: Option<String>,
    #[serde(default)]
    pub values: Value,
}

impl HelmReleaseInfo {
    pub fn unknown() -> Self {
        Self {
            chart_name: UNKNOWN.to_string(),
            chart_version: UNKNOWN.to_string(),
            app_version: UNKNOWN.to_string(),
            release_version: UNKNOWN.to_string(),
            repository: UNKNOWN.to_string(),
            repository_url: String::new(),
            deploy_command: String::new(),
            helm_release_version: None,
            values: empty_mapping(),
        }
    }

    /// Derives deployment metadata from a decoded release document.
    ///
    /// An empty document yields the `unknown` placeholders.
    pub fn from_release(
        document: &Value,
        secret: &HelmReleaseSecret,
        namespace: &str,
        locator: &RepositoryLocator,
    ) -> Self {
        let mut info = Self::unknown();
        info.helm_release_version = Some(secret.version.to_string());
        info.release_version = document
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(secret.version)
            .to_string();

        let Some(metadata) = document.pointer("/chart/metadata") else {
            return info;
        };

        let field = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };
        info.chart_version = field("version");
        info.app_version = field("appVersion");

        let source = locator.locate(metadata);
        info.chart_name = source.chart.clone();
        info.repository = source.repository.clone();
        info.repository_url = source.repository_url.clone();
        info.deploy_command = source.deploy_command(&secret.release, namespace);
        info.values = extract_values(document);
        info
    }
}

/// User-supplied values of a release: `config`, then `values`, then
/// `chart.values`, then `info.values`. Missing values are an empty mapping.
pub fn extract_values(document: &Value) -> Value {
    const LOCATIONS: &[&str] = &["/config", "/values", "/chart/values", "/info/values"];

    LOCATIONS
        .iter()
        .find_map(|pointer| document.pointer(pointer).filter(|v| !v.is_null()))
        .cloned()
        .unwrap_or_else(empty_mapping)
}

fn empty_mapping() -> Value {
    Value::Object(Map::new())
}
