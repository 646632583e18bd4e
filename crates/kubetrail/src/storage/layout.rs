use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::resource::{CLUSTER_SCOPE_DIR, RESOURCES_DIR, STANDALONE_DIR};
use crate::sanitize::path_segment;

pub const ARCHIVE_DIR: &str = "archived";
pub const LATEST_CHANGES_FILE: &str = "latest-changes.json";
pub const VALUES_FILE: &str = "values.yaml";
pub const DEPLOYMENT_INFO_FILE: &str = "deployment-info.yaml";

/// Path arithmetic over the audit tree.
///
/// ```text
/// <root>/<namespace>/latest-changes.json
/// <root>/<namespace>/standalone-resources/<kind>-<name>.yaml
/// <root>/<namespace>/<release>/values.yaml
/// <root>/<namespace>/<release>/deployment-info.yaml
/// <root>/<namespace>/<release>/resources/<kind>-<name>.yaml
/// <root>/archived/...
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.root.join(relative)
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(path_segment(namespace))
    }

    pub fn latest_changes(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join(LATEST_CHANGES_FILE)
    }

    pub fn release_dir(&self, namespace: &str, release: &str) -> PathBuf {
        self.namespace_dir(namespace).join(path_segment(release))
    }

    pub fn values_file(&self, namespace: &str, release: &str) -> PathBuf {
        self.release_dir(namespace, release).join(VALUES_FILE)
    }

    pub fn deployment_info_file(&self, namespace: &str, release: &str) -> PathBuf {
        self.release_dir(namespace, release).join(DEPLOYMENT_INFO_FILE)
    }

    pub fn archive_root(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    /// Names at the top level that never denote a namespace.
    pub fn is_reserved(name: &str) -> bool {
        name == ARCHIVE_DIR || name == CLUSTER_SCOPE_DIR || name.starts_with('.')
    }

    /// Namespaces that currently have content in the active tree.
    pub fn stored_namespaces(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut namespaces = BTreeSet::new();
        for (name, path) in list_dirs(&self.root)? {
            if Self::is_reserved(&name) {
                continue;
            }
            let has_standalone = path.join(STANDALONE_DIR).is_dir();
            let has_changes = path.join(LATEST_CHANGES_FILE).is_file();
            if has_standalone || has_changes || !self.stored_groups(&name)?.is_empty() {
                namespaces.insert(name);
            }
        }
        Ok(namespaces)
    }

    /// Helm releases stored under a namespace: subdirectories holding
    /// `values.yaml`.
    ///
    /// Directories with only `resources/` are label groups and may not be
    /// Helm releases at all.
    pub fn stored_releases(&self, namespace: &str) -> Result<BTreeSet<String>, StorageError> {
        self.group_dirs(namespace, |path| path.join(VALUES_FILE).is_file())
    }

    /// Every release-style group under a namespace, Helm-backed or not.
    pub fn stored_groups(&self, namespace: &str) -> Result<BTreeSet<String>, StorageError> {
        self.group_dirs(namespace, |path| {
            path.join(VALUES_FILE).is_file() || path.join(RESOURCES_DIR).is_dir()
        })
    }

    fn group_dirs<F>(&self, namespace: &str, keep: F) -> Result<BTreeSet<String>, StorageError>
    where
        F: Fn(&Path) -> bool,
    {
        let ns_dir = self.namespace_dir(namespace);
        if !ns_dir.is_dir() {
            return Ok(BTreeSet::new());
        }

        Ok(list_dirs(&ns_dir)?
            .into_iter()
            .filter(|(name, _)| name != STANDALONE_DIR && !name.starts_with('.'))
            .filter(|(_, path)| keep(path))
            .map(|(name, _)| name)
            .collect())
    }

    /// Walks the active tree and reports entries that break the layout.
    pub fn verify(&self) -> Result<Vec<LayoutViolation>, StorageError> {
        let mut violations = Vec::new();

        for (name, ns_path) in list_dirs(&self.root)? {
            if Self::is_reserved(&name) {
                continue;
            }

            if !ns_path.join(LATEST_CHANGES_FILE).is_file() {
                violations.push(LayoutViolation::MissingLatestChanges(ns_path.clone()));
            }

            for entry in read_dir(&ns_path)? {
                let path = entry.path();
                let file_name = entry.file_name().to_string_lossy().into_owned();

                if path.is_file() {
                    if file_name != LATEST_CHANGES_FILE {
                        violations.push(LayoutViolation::UnexpectedFile(path));
                    }
                    continue;
                }

                if file_name == STANDALONE_DIR {
                    check_yaml_only(&path, &mut violations)?;
                    continue;
                }

                // Label-only groups have resources but no values.
                let resources = path.join(RESOURCES_DIR);
                if resources.is_dir() {
                    check_yaml_only(&resources, &mut violations)?;
                } else if !path.join(VALUES_FILE).is_file() {
                    violations.push(LayoutViolation::MissingValues(path.clone()));
                }
            }
        }

        Ok(violations)
    }
}

/// A deviation from the expected tree shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutViolation {
    MissingLatestChanges(PathBuf),
    UnexpectedFile(PathBuf),
    MissingValues(PathBuf),
    NonYamlResource(PathBuf),
}

impl fmt::Display for LayoutViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutViolation::MissingLatestChanges(p) => {
                write!(f, "namespace '{}' has no {}", p.display(), LATEST_CHANGES_FILE)
            }
            LayoutViolation::UnexpectedFile(p) => {
                write!(f, "unexpected file '{}' at namespace root", p.display())
            }
            LayoutViolation::MissingValues(p) => {
                write!(f, "release '{}' has no {}", p.display(), VALUES_FILE)
            }
            LayoutViolation::NonYamlResource(p) => {
                write!(f, "'{}' is not a YAML resource file", p.display())
            }
        }
    }
}

fn check_yaml_only(dir: &Path, violations: &mut Vec<LayoutViolation>) -> Result<(), StorageError> {
    for entry in read_dir(dir)? {
        let path = entry.path();
        let is_yaml = path.extension().is_some_and(|ext| ext == "yaml");
        if !path.is_file() || !is_yaml {
            violations.push(LayoutViolation::NonYamlResource(path));
        }
    }
    Ok(())
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, StorageError> {
    let map_err = |e| StorageError::ReadFile {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn list_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(read_dir(dir)?
        .into_iter()
        .filter(|e| e.path().is_dir())
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
        .collect())
}
