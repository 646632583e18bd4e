//! Re-deriving the audit tree from the live cluster.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::archive::ArchiveReport;
use crate::cluster::RESOURCE_KINDS;
use crate::error::Result;
use crate::pipeline::AuditContext;
use crate::resource::Classification;
use crate::storage::ChangeRecord;

/// Totals for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub namespaces: usize,
    pub resources_written: usize,
    pub resources_skipped: usize,
    pub errors: usize,
}

pub struct Reconciler {
    context: Arc<AuditContext>,
}

impl Reconciler {
    pub fn new(context: Arc<AuditContext>) -> Self {
        Self { context }
    }

    /// Pull, write every live namespace, archive what is gone, commit and push.
    pub fn initial_sync(&self) -> Result<SyncReport> {
        let span = tracing::info_span!("initial_sync");
        let _enter = span.enter();
        log::info!("Starting initial sync...");

        let _tree = self.context.lock_tree();
        self.pull();

        let result = self.sync_all().and_then(|report| {
            self.cleanup()?;
            Ok(report)
        });
        self.flush();

        if let Ok(report) = &result {
            log::info!(
                "Initial sync completed: {} namespaces, {} resources written, {} errors",
                report.namespaces,
                report.resources_written,
                report.errors
            );
        }
        result
    }

    /// Pull, archive what is gone, commit and push.
    pub fn cleanup_pass(&self) -> Result<ArchiveReport> {
        let span = tracing::info_span!("cleanup_pass");
        let _enter = span.enter();

        let _tree = self.context.lock_tree();
        self.pull();
        let result = self.cleanup();
        self.flush();
        result
    }

    /// Like [`initial_sync`](Self::initial_sync), for the optional periodic resync.
    pub fn full_sync_pass(&self) -> Result<SyncReport> {
        let span = tracing::info_span!("full_sync_pass");
        let _enter = span.enter();

        let _tree = self.context.lock_tree();
        self.pull();
        let result = self.sync_all().and_then(|report| {
            self.cleanup()?;
            Ok(report)
        });
        self.flush();
        result
    }

    /// Writes the current state of every live, non-excluded namespace.
    ///
    /// Fails only if namespaces cannot be listed.
    fn sync_all(&self) -> Result<SyncReport> {
        let ctx = &*self.context;
        let namespaces = ctx.cluster.list_namespaces()?;
        log::info!("Found {} active namespaces", namespaces.len());

        let mut report = SyncReport::default();
        for namespace in namespaces {
            if ctx.classifier.is_excluded(&namespace) {
                log::debug!("Skipping excluded namespace: {}", namespace);
                continue;
            }
            self.sync_namespace(&namespace, &mut report);
            report.namespaces += 1;
        }
        Ok(report)
    }

    fn sync_namespace(&self, namespace: &str, report: &mut SyncReport) {
        let ctx = &*self.context;
        log::info!("Processing namespace: {}", namespace);
        let mut changed = false;

        if ctx.config.helm_tracking {
            match ctx.helm.process_namespace(namespace) {
                Ok((_, helm_changed)) => changed |= helm_changed,
                Err(e) => {
                    log::warn!("Failed to process Helm releases in {}: {}", namespace, e);
                    report.errors += 1;
                }
            }
        }

        for kind in RESOURCE_KINDS {
            let items = match ctx.cluster.list_resources(namespace, kind) {
                Ok(items) => items,
                Err(e) => {
                    log::warn!("Failed to list {} in {}: {}", kind.plural, namespace, e);
                    report.errors += 1;
                    continue;
                }
            };

            for mut item in items {
                backfill_kind(&mut item, kind.kind);
                let record = match ctx.classifier.classify(&item) {
                    Classification::Keep(record) => record,
                    Classification::Skip(reason) => {
                        log::debug!("Skipping {} in {}: {}", kind.kind, namespace, reason);
                        report.resources_skipped += 1;
                        continue;
                    }
                };

                match ctx.writer.write_resource(&record, &item) {
                    Ok(outcome) => {
                        changed |= outcome.changed();
                        report.resources_written += 1;
                    }
                    Err(e) => {
                        log::error!(
                            "Error saving {} {} in {}: {}",
                            record.kind,
                            record.name,
                            namespace,
                            e
                        );
                        report.errors += 1;
                    }
                }
            }
        }

        // Only touch the record when the namespace changed or has none yet
        if changed || ctx.writer.read_change(namespace).is_none() {
            if let Err(e) = ctx.writer.write_change(&ChangeRecord::initial_sync(namespace)) {
                log::error!("Failed to update latest changes for {}: {}", namespace, e);
                report.errors += 1;
            }
        }
    }

    /// Archives namespaces and releases that are no longer live.
    fn cleanup(&self) -> Result<ArchiveReport> {
        let ctx = &*self.context;
        log::info!("Starting cleanup...");

        let live_namespaces: BTreeSet<String> = ctx.cluster.list_namespaces()?.into_iter().collect();

        let mut live_releases: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for namespace in &live_namespaces {
            if ctx.classifier.is_excluded(namespace) {
                continue;
            }
            match ctx.helm.live_releases(namespace) {
                Ok(releases) => {
                    live_releases.insert(namespace.clone(), releases.into_keys().collect());
                }
                Err(e) => log::warn!(
                    "Failed to list Helm releases in {}, keeping its stored releases: {}",
                    namespace,
                    e
                ),
            }
        }

        let report = ctx.archive.archive_missing(&live_namespaces, &live_releases)?;
        log::info!(
            "Cleanup completed: {} namespaces and {} releases archived",
            report.namespaces.len(),
            report.releases.len()
        );
        Ok(report)
    }

    fn pull(&self) {
        if let Err(e) = self.context.git.pull_latest() {
            log::warn!("Failed to pull latest changes: {}", e);
        }
    }

    fn flush(&self) {
        if let Err(e) = self.context.git.commit_and_push() {
            log::error!("Failed to commit changes: {}", e);
        }
    }
}

/// Listed objects often omit `kind`; fill it from the type they were listed as.
fn backfill_kind(item: &mut Value, kind: &str) {
    if let Value::Object(map) = item {
        let missing = map
            .get("kind")
            .and_then(Value::as_str)
            .map_or(true, str::is_empty);
        if missing {
            map.insert("kind".to_string(), Value::String(kind.to_string()));
        }
    }
}
