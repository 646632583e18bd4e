use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::decode::{decode_release, DecodeError};
use super::deployment::{extract_values, HelmReleaseInfo};
use super::repository::RepositoryLocator;
use super::secrets::{latest_releases, HelmReleaseSecret};
use crate::cluster::{ClusterClient, ClusterError};
use crate::error::{AuditError, Result};
use crate::storage::StorageWriter;

/// Writes `values.yaml` and `deployment-info.yaml` for Helm releases.
pub struct HelmResolver {
    cluster: Arc<dyn ClusterClient>,
    writer: StorageWriter,
    locator: RepositoryLocator,
}

impl HelmResolver {
    pub fn new(cluster: Arc<dyn ClusterClient>, writer: StorageWriter, locator: RepositoryLocator) -> Self {
        Self {
            cluster,
            writer,
            locator,
        }
    }

    /// Newest revision of every release in `namespace`.
    pub fn live_releases(
        &self,
        namespace: &str,
    ) -> std::result::Result<BTreeMap<String, HelmReleaseSecret>, ClusterError> {
        let secrets = self.cluster.list_helm_secrets(namespace)?;
        Ok(latest_releases(&secrets))
    }

    /// Refreshes one release's files. Returns whether any file changed.
    ///
    /// A release with no Secret is logged and left alone.
    pub fn process_release(&self, namespace: &str, release: &str) -> Result<bool> {
        let releases = self.live_releases(namespace)?;
        match releases.get(release) {
            Some(secret) => self.write_release(namespace, secret),
            None => {
                log::warn!(
                    "No Helm secret found for release {} in namespace {}",
                    release,
                    namespace
                );
                Ok(false)
            }
        }
    }

    /// Refreshes every release in `namespace`. Returns the live release
    /// names and whether any file changed.
    pub fn process_namespace(&self, namespace: &str) -> Result<(BTreeSet<String>, bool)> {
        let releases = self.live_releases(namespace)?;
        let mut changed = false;

        for secret in releases.values() {
            match self.write_release(namespace, secret) {
                Ok(c) => changed |= c,
                Err(e) => log::error!(
                    "Error processing Helm release {} in namespace {}: {}",
                    secret.release,
                    namespace,
                    e
                ),
            }
        }

        Ok((releases.into_keys().collect(), changed))
    }

    fn write_release(&self, namespace: &str, secret: &HelmReleaseSecret) -> Result<bool> {
        let document = match self.decode(secret) {
            Ok(document) => document,
            Err(e) => {
                log::warn!(
                    "Failed to decode Helm release {} ({}): {}",
                    secret.release,
                    secret.secret_name,
                    e
                );
                serde_json::Value::Object(serde_json::Map::new())
            }
        };

        let values = extract_values(&document);
        let info = HelmReleaseInfo::from_release(&document, secret, namespace, &self.locator);

        let layout = self.writer.layout();
        let values_changed = self
            .writer
            .write_yaml(&layout.values_file(namespace, &secret.release), &values)
            .map_err(AuditError::from)?
            .changed();
        let info_changed = self
            .writer
            .write_yaml(&layout.deployment_info_file(namespace, &secret.release), &info)
            .map_err(AuditError::from)?
            .changed();

        if values_changed || info_changed {
            log::info!(
                "Saved Helm data for release {} (version {}) in {}",
                secret.release,
                secret.version,
                namespace
            );
        }
        Ok(values_changed || info_changed)
    }

    fn decode(&self, secret: &HelmReleaseSecret) -> std::result::Result<serde_json::Value, DecodeError> {
        let payload = secret
            .payload
            .as_deref()
            .ok_or_else(|| DecodeError::MissingPayload(secret.secret_name.clone()))?;
        decode_release(payload)
    }
}
