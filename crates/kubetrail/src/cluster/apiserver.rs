use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::core::TypeMeta;
use kube::Client;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Runtime;

use super::{ClusterClient, ClusterError, ResourceKind};
use crate::helm::secrets::is_release_secret_name;

const HELM_OWNER_SELECTOR: &str = "owner=helm";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster access through the Kubernetes API.
///
/// Credentials come from the in-cluster service account when running as a
/// pod and from the local kubeconfig otherwise. The client owns a small
/// runtime of its own, so calls block and must not be made from inside
/// another Tokio runtime.
pub struct KubeClusterClient {
    client: Client,
    runtime: Runtime,
    request_timeout: Duration,
}

impl KubeClusterClient {
    /// Connects using the inferred configuration.
    pub fn connect() -> Result<Self, ClusterError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("kube-client")
            .enable_all()
            .build()
            .map_err(ClusterError::Runtime)?;

        let client = runtime
            .block_on(Client::try_default())
            .map_err(ClusterError::Client)?;

        Ok(Self {
            client,
            runtime,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn call<T, F>(&self, request: String, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        let timeout = self.request_timeout;
        let result = self
            .runtime
            .block_on(async move { tokio::time::timeout(timeout, fut).await });

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ClusterError::Api { request, source }),
            Err(_) => Err(ClusterError::Timeout {
                request,
                secs: timeout.as_secs(),
            }),
        }
    }
}

impl ClusterClient for KubeClusterClient {
    fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = self.call("list namespaces".to_string(), async move {
            api.list(&ListParams::default()).await
        })?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    fn list_helm_secrets(&self, namespace: &str) -> Result<Vec<Value>, ClusterError> {
        let request = format!("list secrets -n {} -l {}", namespace, HELM_OWNER_SELECTOR);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = self.call(request.clone(), async move {
            api.list(&ListParams::default().labels(HELM_OWNER_SELECTOR)).await
        })?;

        list.items
            .into_iter()
            .filter(|s| s.metadata.name.as_deref().is_some_and(is_release_secret_name))
            .map(|s| to_value(&request, &s))
            .collect()
    }

    fn list_resources(&self, namespace: &str, kind: &ResourceKind) -> Result<Vec<Value>, ClusterError> {
        let request = format!("list {} -n {}", kind.plural, namespace);
        let resource = api_resource(kind);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);
        let list = self.call(request.clone(), async move {
            api.list(&ListParams::default()).await
        })?;

        list.items
            .into_iter()
            .map(|obj| to_value(&request, &with_type_meta(obj, &resource)))
            .collect()
    }
}

fn api_resource(kind: &ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
    ApiResource::from_gvk_with_plural(&gvk, kind.plural)
}

/// List items come back without `apiVersion` and `kind`; fill them in.
fn with_type_meta(mut obj: DynamicObject, resource: &ApiResource) -> DynamicObject {
    let missing = obj.types.as_ref().map_or(true, |t| t.kind.is_empty());
    if missing {
        obj.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
    }
    obj
}

fn to_value<T: Serialize>(request: &str, obj: &T) -> Result<Value, ClusterError> {
    serde_json::to_value(obj).map_err(|source| ClusterError::Encode {
        request: request.to_string(),
        source,
    })
}
