use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{ClusterClient, ClusterError, ResourceKind};

#[derive(Debug, Default, Clone)]
struct NamespaceState {
    helm_secrets: Vec<Value>,
    resources: BTreeMap<&'static str, Vec<Value>>,
}

/// A cluster held in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    namespaces: RwLock<BTreeMap<String, NamespaceState>>,
    unavailable: AtomicBool,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.write()
            .entry(namespace.to_string())
            .or_default();
    }

    pub fn remove_namespace(&self, namespace: &str) {
        self.write().remove(namespace);
    }

    /// Adds an object under a registry kind, creating the namespace if needed.
    pub fn add_resource(&self, namespace: &str, kind: &ResourceKind, obj: Value) {
        self.write()
            .entry(namespace.to_string())
            .or_default()
            .resources
            .entry(kind.plural)
            .or_default()
            .push(obj);
    }

    pub fn add_helm_secret(&self, namespace: &str, secret: Value) {
        self.write()
            .entry(namespace.to_string())
            .or_default()
            .helm_secrets
            .push(secret);
    }

    pub fn clear_helm_secrets(&self, namespace: &str) {
        if let Some(state) = self.write().get_mut(namespace) {
            state.helm_secrets.clear();
        }
    }

    /// Makes every call fail until reset, simulating an unreachable API server.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ClusterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClusterError::Unavailable("API server unreachable".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, NamespaceState>> {
        self.namespaces.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, NamespaceState>> {
        self.namespaces.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClusterClient for InMemoryCluster {
    fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        self.check_available()?;
        Ok(self.read().keys().cloned().collect())
    }

    fn list_helm_secrets(&self, namespace: &str) -> Result<Vec<Value>, ClusterError> {
        self.check_available()?;
        Ok(self
            .read()
            .get(namespace)
            .map(|state| state.helm_secrets.clone())
            .unwrap_or_default())
    }

    fn list_resources(&self, namespace: &str, kind: &ResourceKind) -> Result<Vec<Value>, ClusterError> {
        self.check_available()?;
        Ok(self
            .read()
            .get(namespace)
            .and_then(|state| state.resources.get(kind.plural))
            .cloned()
            .unwrap_or_default())
    }
}
