use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::change::{ChangeOperation, ChangeRecord};
use super::layout::StorageLayout;
use super::tree::ensure_directory;
use crate::error::StorageError;
use crate::resource::{strip_volatile_fields, ResourceRecord};

const GIT_DIR: &str = ".git";
const STAGING_DIR: &str = "kubetrail-tmp";

/// What a write did to the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        self != WriteOutcome::Unchanged
    }
}

/// Serializes resources and change records into the audit tree.
///
/// Files are only rewritten when their bytes differ, so writing the same
/// state twice leaves the working tree untouched.
#[derive(Debug, Clone)]
pub struct StorageWriter {
    layout: StorageLayout,
}

impl StorageWriter {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Writes a cleaned copy of `obj` at the record's path.
    pub fn write_resource(
        &self,
        record: &ResourceRecord,
        obj: &Value,
    ) -> Result<WriteOutcome, StorageError> {
        let mut cleaned = obj.clone();
        strip_volatile_fields(&mut cleaned);
        let path = self.layout.resolve(&record.path);
        let outcome = self.write_yaml(&path, &cleaned)?;
        if outcome.changed() {
            log::info!("Wrote {} {} to {}", record.kind, record.name, record.path.display());
        }
        Ok(outcome)
    }

    pub fn write_yaml<T: Serialize>(&self, path: &Path, value: &T) -> Result<WriteOutcome, StorageError> {
        let yaml = serde_yaml::to_string(value).map_err(|e| StorageError::Serialize {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.write_bytes(path, yaml.as_bytes())
    }

    /// Writes `content` to `path` unless the file already holds exactly it.
    pub fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<WriteOutcome, StorageError> {
        let existed = match std::fs::read(path) {
            Ok(existing) if existing == content => return Ok(WriteOutcome::Unchanged),
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(StorageError::ReadFile {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let staging = self.staging_dir(path)?;
        write_atomic(path, &staging, content)?;

        Ok(if existed {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }

    /// Where temporary files are written before being renamed into place.
    ///
    /// Inside a repository this is under `.git/`, so a file left behind by a
    /// crash is never picked up by `git add -A`.
    fn staging_dir(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let git_dir = self.layout.root().join(GIT_DIR);
        if git_dir.is_dir() {
            let staging = git_dir.join(STAGING_DIR);
            ensure_directory(&staging)?;
            return Ok(staging);
        }
        Ok(path.parent().map(Path::to_path_buf).unwrap_or_default())
    }

    /// Reads a namespace's current change record, if any.
    pub fn read_change(&self, namespace: &str) -> Option<ChangeRecord> {
        let path = self.layout.latest_changes(namespace);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Overwrites `<namespace>/latest-changes.json` with `record`.
    pub fn write_change(&self, record: &ChangeRecord) -> Result<WriteOutcome, StorageError> {
        let path = self.layout.latest_changes(&record.namespace);
        let mut json = serde_json::to_string_pretty(record).map_err(|e| StorageError::Serialize {
            path: path.clone(),
            message: e.to_string(),
        })?;
        json.push('\n');

        let outcome = self.write_bytes(&path, json.as_bytes())?;
        log::info!(
            "Updated latest changes for namespace {}: {} {} {}",
            record.namespace,
            record.operation,
            record.resource_kind,
            record.resource_name
        );
        Ok(outcome)
    }

    /// Writes a change record unless it would only refresh the timestamp.
    ///
    /// DELETE records are always written. Other records are written when
    /// `tree_changed` is set or the stored record describes a different change.
    pub fn record_change(
        &self,
        record: &ChangeRecord,
        tree_changed: bool,
    ) -> Result<WriteOutcome, StorageError> {
        if record.operation != ChangeOperation::Delete && !tree_changed {
            if let Some(existing) = self.read_change(&record.namespace) {
                if existing.same_identity(record) {
                    return Ok(WriteOutcome::Unchanged);
                }
            }
        }
        self.write_change(record)
    }
}

fn write_atomic(path: &Path, staging: &Path, content: &[u8]) -> Result<(), StorageError> {
    let tmp = staging.join(temp_name(path));
    let write_err = |e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
    file.write_all(content).map_err(write_err)?;
    drop(file);

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    Ok(())
}

fn temp_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{}.{}.tmp", name, Uuid::new_v4().simple())
}
