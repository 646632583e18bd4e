//! Working out which chart repository a release was installed from.
//!
//! Helm does not record the repository in the release, so it is inferred
//! from chart metadata, falling back to probing well-known repositories.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::HelmSettings;

/// Well-known chart repositories in probing order.
pub const WELL_KNOWN_REPOSITORIES: &[(&str, &str)] = &[
    ("bitnami", "https://charts.bitnami.com/bitnami"),
    ("stable", "https://charts.helm.sh/stable"),
    ("incubator", "https://charts.helm.sh/incubator"),
    ("jetstack", "https://charts.jetstack.io"),
    (
        "prometheus-community",
        "https://prometheus-community.github.io/helm-charts",
    ),
];

const SOURCE_URL_ANNOTATION: &str = "artifacthub.io/source-url";
const INDEX_TTL: Duration = Duration::from_secs(3600);
const INDEX_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a chart comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSource {
    /// Repository name as used in `helm repo add <name> <url>`.
    pub repository: String,
    pub repository_url: String,
    /// Chart name without any repository prefix.
    pub chart: String,
    /// False when the repository is a placeholder and the chart cannot be
    /// referenced as `<repository>/<chart>`.
    pub qualified: bool,
}

impl ChartSource {
    pub fn deploy_command(&self, release: &str, namespace: &str) -> String {
        if self.qualified {
            format!(
                "helm install {} {}/{} --namespace {}",
                release, self.repository, self.chart, namespace
            )
        } else {
            format!("helm install {} {} --namespace {}", release, self.chart, namespace)
        }
    }
}

/// Answers whether a chart repository index lists a chart.
pub trait ChartIndexProbe: Send + Sync {
    fn has_chart(&self, repository_url: &str, chart: &str) -> bool;
}

/// Probe that never finds anything; used when probing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

impl ChartIndexProbe for NoProbe {
    fn has_chart(&self, _repository_url: &str, _chart: &str) -> bool {
        false
    }
}

#[derive(Deserialize)]
struct ChartIndex {
    #[serde(default)]
    entries: BTreeMap<String, serde::de::IgnoredAny>,
}

/// Fetches `<repository>/index.yaml` over HTTP, caching chart names per
/// repository. Failed fetches are cached as empty so a dead repository is
/// not retried on every event.
pub struct HttpIndexProbe {
    client: reqwest::blocking::Client,
    cache: moka::sync::Cache<String, Arc<BTreeSet<String>>>,
}

impl HttpIndexProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(INDEX_TIMEOUT)
            .build()?;
        let cache = moka::sync::Cache::builder()
            .max_capacity(WELL_KNOWN_REPOSITORIES.len() as u64 * 2)
            .time_to_live(INDEX_TTL)
            .build();
        Ok(Self { client, cache })
    }

    fn chart_names(&self, repository_url: &str) -> Arc<BTreeSet<String>> {
        if let Some(names) = self.cache.get(repository_url) {
            return names;
        }

        let names = Arc::new(self.fetch_index(repository_url).unwrap_or_else(|e| {
            log::debug!("Failed to fetch chart index for {}: {}", repository_url, e);
            BTreeSet::new()
        }));
        self.cache.insert(repository_url.to_string(), names.clone());
        names
    }

    fn fetch_index(&self, repository_url: &str) -> Result<BTreeSet<String>, String> {
        let url = format!("{}/index.yaml", repository_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let body = response.bytes().map_err(|e| e.to_string())?;
        let index: ChartIndex = serde_yaml::from_slice(&body).map_err(|e| e.to_string())?;
        Ok(index.entries.into_keys().collect())
    }
}

impl ChartIndexProbe for HttpIndexProbe {
    fn has_chart(&self, repository_url: &str, chart: &str) -> bool {
        self.chart_names(repository_url).contains(chart)
    }
}

/// Infers a [`ChartSource`] from chart metadata.
#[derive(Clone)]
pub struct RepositoryLocator {
    settings: HelmSettings,
    probe: Arc<dyn ChartIndexProbe>,
}

impl RepositoryLocator {
    pub fn new(settings: HelmSettings, probe: Arc<dyn ChartIndexProbe>) -> Self {
        Self { settings, probe }
    }

    /// Builds a locator whose probe matches the settings.
    pub fn from_settings(settings: &HelmSettings) -> Self {
        let probe: Arc<dyn ChartIndexProbe> = if settings.probe_repositories {
            match HttpIndexProbe::new() {
                Ok(probe) => Arc::new(probe),
                Err(e) => {
                    log::warn!("Chart index probing disabled: {}", e);
                    Arc::new(NoProbe)
                }
            }
        } else {
            Arc::new(NoProbe)
        };
        Self::new(settings.clone(), probe)
    }

    /// Resolution order: the metadata's own `repository` URL, its `sources`,
    /// the Artifact Hub source annotation, a `repo/chart` name, the
    /// well-known repository indexes, and finally the fallback organization.
    pub fn locate(&self, chart_metadata: &Value) -> ChartSource {
        let chart_name = chart_metadata
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        if let Some((repo, chart)) = chart_name.split_once('/') {
            if !repo.is_empty() && !chart.is_empty() {
                let from_url = self.from_urls(chart_metadata, chart);
                return from_url.unwrap_or_else(|| ChartSource {
                    repository: repo.to_string(),
                    repository_url: String::new(),
                    chart: chart.to_string(),
                    qualified: true,
                });
            }
        }

        if let Some(source) = self.from_urls(chart_metadata, chart_name) {
            return source;
        }

        if chart_name != "unknown" {
            for (name, url) in WELL_KNOWN_REPOSITORIES {
                if self.probe.has_chart(url, chart_name) {
                    return ChartSource {
                        repository: name.to_string(),
                        repository_url: url.to_string(),
                        chart: chart_name.to_string(),
                        qualified: true,
                    };
                }
            }
        }

        ChartSource {
            repository: self.settings.fallback_org.clone(),
            repository_url: String::new(),
            chart: chart_name.to_string(),
            qualified: false,
        }
    }

    fn from_urls(&self, metadata: &Value, chart: &str) -> Option<ChartSource> {
        let url = metadata
            .get("repository")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| self.preferred_source(metadata))
            .or_else(|| {
                metadata
                    .pointer(&format!("/annotations/{}", SOURCE_URL_ANNOTATION.replace('/', "~1")))
                    .and_then(Value::as_str)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
            })?;

        let repository = repository_name_from_url(&url)?;
        Some(ChartSource {
            repository,
            repository_url: url,
            chart: chart.to_string(),
            qualified: true,
        })
    }

    fn preferred_source(&self, metadata: &Value) -> Option<String> {
        let sources: Vec<&str> = metadata
            .get("sources")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .collect();

        let primary = self.settings.primary_org.to_lowercase();
        sources
            .iter()
            .find(|s| github_org(s).is_some_and(|org| org.eq_ignore_ascii_case(&primary)))
            .or_else(|| sources.iter().find(|s| s.contains("-helm")))
            .or_else(|| sources.iter().find(|s| github_org(s).is_some()))
            .map(|s| s.to_string())
    }
}

/// Organization of a GitHub URL (`github.com/<org>/...` or `<org>.github.io`).
pub fn github_org(url: &str) -> Option<&str> {
    if let Some((_, rest)) = url.split_once("github.com/") {
        return rest.split('/').next().filter(|org| !org.is_empty());
    }
    let host = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = host.split('/').next()?;
    host.strip_suffix(".github.io").filter(|org| !org.is_empty())
}

/// Short repository name for a URL: the GitHub organization, else the
/// last path segment, else the host.
pub fn repository_name_from_url(url: &str) -> Option<String> {
    if let Some(org) = github_org(url) {
        return Some(org.to_string());
    }
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let mut parts = without_scheme.split('/').filter(|p| !p.is_empty());
    let host = parts.next()?;
    Some(parts.last().unwrap_or(host).trim_end_matches(".git").to_string())
}
