use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::resource::classifier::HELM_RELEASE_SECRET_PREFIX;
use crate::resource::ObjectMeta;

/// One Helm release revision as stored in a Secret.
#[derive(Debug, Clone, PartialEq)]
pub struct HelmReleaseSecret {
    pub release: String,
    pub version: u64,
    pub secret_name: String,
    /// Raw `data.release` payload, still encoded.
    pub payload: Option<String>,
}

pub fn is_release_secret_name(name: &str) -> bool {
    name.starts_with(HELM_RELEASE_SECRET_PREFIX)
}

static RE_SECRET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sh\.helm\.release\.v\d+\.(?P<release>.+)\.v(?P<version>\d+)$").unwrap()
});

impl HelmReleaseSecret {
    /// Reads a Helm release Secret. Returns `None` for any other Secret.
    ///
    /// The release name comes from the `name` label and the revision from
    /// `helm.sh/release-version` or `version`; an unparsable revision counts
    /// as 0. Secrets without labels fall back to the name Helm gives them,
    /// `sh.helm.release.v1.<release>.v<revision>`.
    pub fn from_secret(secret: &Value) -> Option<Self> {
        let meta = ObjectMeta::of(secret);
        let secret_name = meta.name()?;
        if !is_release_secret_name(secret_name) {
            return None;
        }

        let from_name = RE_SECRET_NAME.captures(secret_name);

        let release = meta
            .label("name")
            .map(str::to_string)
            .or_else(|| from_name.as_ref().map(|c| c["release"].to_string()));
        let Some(release) = release else {
            log::warn!("Found Helm secret {} without release name", secret_name);
            return None;
        };

        let version = match meta.label("helm.sh/release-version").or_else(|| meta.label("version")) {
            Some(label) => label.trim().parse().unwrap_or(0),
            None => from_name
                .as_ref()
                .and_then(|c| c["version"].parse().ok())
                .unwrap_or(0),
        };

        let payload = secret
            .pointer("/data/release")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            release,
            version,
            secret_name: secret_name.to_string(),
            payload,
        })
    }
}

/// Picks the newest revision of every release among `secrets`.
///
/// Ties keep the first revision seen.
pub fn latest_releases(secrets: &[Value]) -> BTreeMap<String, HelmReleaseSecret> {
    let mut latest: BTreeMap<String, HelmReleaseSecret> = BTreeMap::new();

    for release in secrets.iter().filter_map(HelmReleaseSecret::from_secret) {
        match latest.get(&release.release) {
            Some(current) if current.version >= release.version => {
                log::debug!(
                    "Skipping older version {} for release '{}' (current: {})",
                    release.version,
                    release.release,
                    current.version
                );
            }
            _ => {
                latest.insert(release.release.clone(), release);
            }
        }
    }

    latest
}
