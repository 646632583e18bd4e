//! Moving deleted resources, namespaces and releases out of the active tree.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::resource::{strip_volatile_fields, ResourceRecord};
use crate::storage::{move_tree, ChangeOperation, StorageWriter, ARCHIVE_DIR};

/// Millisecond resolution; same-millisecond deletes get a counter suffix.
const ARCHIVE_TIMESTAMP: &str = "%Y%m%d-%H%M%S-%3f";

/// Result of archiving a single deleted resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedResource {
    /// Archive file, relative to the storage root.
    pub path: PathBuf,
    /// Whether a live file existed and was removed.
    pub removed_live: bool,
}

/// What one `archive_missing` pass moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub namespaces: Vec<String>,
    pub releases: Vec<(String, String)>,
    pub failures: usize,
}

impl ArchiveReport {
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.releases.is_empty()
    }
}

pub struct ArchiveManager {
    writer: StorageWriter,
    excluded: BTreeSet<String>,
}

impl ArchiveManager {
    pub fn new(writer: StorageWriter, excluded: BTreeSet<String>) -> Self {
        Self { writer, excluded }
    }

    /// Writes a timestamped copy of a deleted resource under `archived/` and
    /// removes its live file if there is one.
    pub fn archive_resource(
        &self,
        obj: &Value,
        record: &ResourceRecord,
        user: &str,
    ) -> Result<ArchivedResource, StorageError> {
        let now = Utc::now();
        let layout = self.writer.layout();
        let stamp = now.format(ARCHIVE_TIMESTAMP).to_string();
        let relative = unique_archive_path(record, &stamp, |p| layout.resolve(p).exists());

        let mut archived = obj.clone();
        strip_volatile_fields(&mut archived);
        if let Value::Object(map) = &mut archived {
            map.insert(
                "_archived".to_string(),
                json!({
                    "timestamp": now.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "operation": ChangeOperation::Delete.to_string(),
                    "user": user,
                    "original_path": record.path.to_string_lossy(),
                }),
            );
        }

        self.writer.write_yaml(&layout.resolve(&relative), &archived)?;

        let live = layout.resolve(&record.path);
        let removed_live = remove_if_exists(&live)?;
        if removed_live {
            log::info!("Removed from active storage: {}", record.path.display());
            if let Some(parent) = live.parent() {
                prune_if_empty(parent);
            }
        }

        Ok(ArchivedResource {
            path: relative,
            removed_live,
        })
    }

    /// Archives stored namespaces and releases the cluster no longer has.
    ///
    /// `live_releases` only needs entries for namespaces whose releases were
    /// listed successfully; namespaces missing from it keep their releases.
    pub fn archive_missing(
        &self,
        live_namespaces: &BTreeSet<String>,
        live_releases: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<ArchiveReport, StorageError> {
        let layout = self.writer.layout();
        let archive_root = layout.archive_root();
        let mut report = ArchiveReport::default();

        for namespace in layout.stored_namespaces()? {
            if live_namespaces.contains(&namespace) || self.excluded.contains(&namespace) {
                continue;
            }

            log::info!("Archiving missing namespace: {}", namespace);
            match move_tree(&layout.namespace_dir(&namespace), &archive_root.join(&namespace)) {
                Ok(moved) => {
                    log::info!(
                        "Archived namespace {} ({} files{})",
                        namespace,
                        moved.files,
                        if moved.merged { ", merged" } else { "" }
                    );
                    report.namespaces.push(namespace);
                }
                Err(e) => {
                    log::error!("Failed to archive namespace {}: {}", namespace, e);
                    report.failures += 1;
                }
            }
        }

        for (namespace, live) in live_releases {
            if self.excluded.contains(namespace) {
                continue;
            }
            for release in layout.stored_releases(namespace)? {
                if live.contains(&release) {
                    continue;
                }

                log::info!("Archiving missing release: {} in {}", release, namespace);
                let target = archive_root.join(namespace).join(&release);
                match move_tree(&layout.release_dir(namespace, &release), &target) {
                    Ok(_) => report.releases.push((namespace.clone(), release)),
                    Err(e) => {
                        log::error!(
                            "Failed to archive release {} in {}: {}",
                            release,
                            namespace,
                            e
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}

/// `archived/<record dir>/<kind>-<name>-<timestamp>.yaml`
fn archive_path(record: &ResourceRecord, timestamp: &str) -> PathBuf {
    let file_name = record.file_name();
    let stem = file_name.strip_suffix(".yaml").unwrap_or(&file_name);

    let mut path = PathBuf::from(ARCHIVE_DIR);
    if let Some(parent) = record.path.parent() {
        path.push(parent);
    }
    path.push(format!("{}-{}.yaml", stem, timestamp));
    path
}

fn unique_archive_path<F>(record: &ResourceRecord, timestamp: &str, exists: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let path = archive_path(record, timestamp);
    if !exists(&path) {
        return path;
    }
    (1..)
        .map(|n| archive_path(record, &format!("{}-{}", timestamp, n)))
        .find(|candidate| !exists(candidate))
        .unwrap_or(path)
}

fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn prune_if_empty(dir: &Path) {
    let empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        if let Err(e) = std::fs::remove_dir(dir) {
            log::debug!("Could not remove empty directory {}: {}", dir.display(), e);
        }
    }
}
