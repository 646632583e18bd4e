use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::archive::ArchiveManager;
use crate::cluster::ClusterClient;
use crate::config::AuditConfig;
use crate::git::GitStore;
use crate::helm::{HelmResolver, RepositoryLocator};
use crate::resource::ResourceClassifier;
use crate::storage::{StorageLayout, StorageWriter};

/// Every component of the audit pipeline, built once at startup and shared
/// by the event consumer and the reconciliation scheduler.
pub struct AuditContext {
    pub config: AuditConfig,
    pub classifier: ResourceClassifier,
    pub writer: StorageWriter,
    pub helm: HelmResolver,
    pub archive: ArchiveManager,
    pub git: GitStore,
    pub cluster: Arc<dyn ClusterClient>,
    tree_lock: Mutex<()>,
    ready: AtomicBool,
    sync_complete: AtomicBool,
}

impl AuditContext {
    pub fn new(config: AuditConfig, cluster: Arc<dyn ClusterClient>, locator: RepositoryLocator) -> Self {
        let writer = StorageWriter::new(StorageLayout::new(&config.storage_path));
        Self {
            classifier: ResourceClassifier::new(&config),
            helm: HelmResolver::new(Arc::clone(&cluster), writer.clone(), locator),
            archive: ArchiveManager::new(writer.clone(), config.excluded_namespaces.clone()),
            git: GitStore::new(&config.storage_path, config.git.clone()),
            writer,
            cluster,
            config,
            tree_lock: Mutex::new(()),
            ready: AtomicBool::new(false),
            sync_complete: AtomicBool::new(false),
        }
    }

    /// Builds the context with a chart locator derived from the Helm settings.
    ///
    /// Must be called outside any Tokio runtime.
    pub fn from_config(config: AuditConfig, cluster: Arc<dyn ClusterClient>) -> Self {
        let locator = RepositoryLocator::from_settings(&config.helm);
        Self::new(config, cluster, locator)
    }

    /// Prepares the Git repository and opens the pipeline to events.
    pub fn bootstrap(&self) -> crate::Result<()> {
        self.git.bootstrap()?;
        self.mark_ready();
        Ok(())
    }

    /// Serializes every mutation of the working tree.
    ///
    /// Taken before the Git mutex whenever both are needed.
    pub fn lock_tree(&self) -> MutexGuard<'_, ()> {
        self.tree_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn mark_sync_complete(&self) {
        self.sync_complete.store(true, Ordering::SeqCst);
    }

    pub fn is_sync_complete(&self) -> bool {
        self.sync_complete.load(Ordering::SeqCst)
    }
}
