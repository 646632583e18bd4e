//! Initial sync and cleanup against an in-memory cluster.

mod common;

use serde_json::json;

use common::{release_document, release_secret, ReviewBuilder, TestHarness};
use kubetrail::cluster::RESOURCE_KINDS;
use kubetrail::{AuditError, ChangeOperation, StorageLayout};

fn kind(name: &str) -> &'static kubetrail::cluster::ResourceKind {
    RESOURCE_KINDS
        .iter()
        .find(|k| k.kind == name)
        .unwrap_or_else(|| panic!("unknown kind {}", name))
}

#[test]
fn test_initial_sync_builds_tree() {
    let harness = TestHarness::new();
    let cluster = &harness.cluster;
    let document = release_document("nginx", "15.0.0", json!({"replicaCount": 2}));
    cluster.add_helm_secret("shop", release_secret("shop", "frontend", 1, &document));
    cluster.add_resource(
        "shop",
        kind("Deployment"),
        json!({"metadata": {"name": "frontend-nginx", "namespace": "shop", "labels": {"app.kubernetes.io/instance": "frontend"}}}),
    );
    cluster.add_resource(
        "shop",
        kind("ConfigMap"),
        json!({"metadata": {"name": "feature-flags", "namespace": "shop"}}),
    );
    cluster.add_resource(
        "shop",
        kind("ConfigMap"),
        json!({"metadata": {"name": "kube-root-ca.crt", "namespace": "shop"}}),
    );
    cluster.add_resource(
        "kube-system",
        kind("Pod"),
        json!({"metadata": {"name": "etcd", "namespace": "kube-system"}}),
    );

    let report = harness.reconciler().initial_sync().unwrap();
    assert_eq!(report.namespaces, 1);
    assert_eq!(report.resources_written, 2);
    assert_eq!(report.errors, 0);

    assert!(harness.exists("shop/frontend/resources/deployment-frontend-nginx.yaml"));
    assert!(harness.exists("shop/frontend/values.yaml"));
    assert!(harness.exists("shop/frontend/deployment-info.yaml"));
    assert!(harness.exists("shop/standalone-resources/configmap-feature-flags.yaml"));
    assert!(!harness.exists("shop/standalone-resources/configmap-kube-root-ca.crt.yaml"));
    assert!(!harness.exists("kube-system"));

    let deployment = harness.read_yaml("shop/frontend/resources/deployment-frontend-nginx.yaml");
    assert_eq!(deployment["kind"], "Deployment");

    let change = harness.change("shop");
    assert_eq!(change.operation, ChangeOperation::InitialSync);
    assert_eq!(change.user, "audit-logger");
    assert_eq!(change.resource_kind, "Namespace");

    assert!(harness.is_clean());
    assert!(StorageLayout::new(&harness.storage).verify().unwrap().is_empty());
}

#[test]
fn test_cleanup_archives_deleted_namespace() {
    let harness = TestHarness::new();
    harness.cluster.add_namespace("ns1");
    harness.process(&ReviewBuilder::create("ConfigMap", "a").namespace("ns1").build());
    harness.process(&ReviewBuilder::create("ConfigMap", "b").namespace("ns2").build());

    let report = harness.reconciler().cleanup_pass().unwrap();
    assert_eq!(report.namespaces, vec!["ns2"]);

    assert!(harness.exists("ns1/standalone-resources/configmap-a.yaml"));
    assert!(!harness.exists("ns2"));
    assert!(harness.exists("archived/ns2/standalone-resources/configmap-b.yaml"));
    assert!(harness.exists("archived/ns2/latest-changes.json"));
    assert!(harness.is_clean());

    let commits = harness.commit_count();
    assert!(harness.reconciler().cleanup_pass().unwrap().is_empty());
    assert_eq!(harness.commit_count(), commits);
}

#[test]
fn test_cleanup_archives_uninstalled_release() {
    let harness = TestHarness::new();
    let document = release_document("redis", "17.0.0", json!({}));
    harness
        .cluster
        .add_helm_secret("ns1", release_secret("ns1", "cache", 1, &document));
    harness.cluster.add_resource(
        "ns1",
        kind("StatefulSet"),
        json!({"metadata": {"name": "cache-redis", "namespace": "ns1", "labels": {"release": "cache"}}}),
    );
    harness.reconciler().initial_sync().unwrap();
    assert!(harness.exists("ns1/cache/values.yaml"));

    harness.cluster.clear_helm_secrets("ns1");
    let report = harness.reconciler().cleanup_pass().unwrap();

    assert_eq!(report.releases, vec![("ns1".to_string(), "cache".to_string())]);
    assert!(!harness.exists("ns1/cache"));
    assert!(harness.exists("archived/ns1/cache/values.yaml"));
    assert!(harness.exists("archived/ns1/cache/resources/statefulset-cache-redis.yaml"));
    assert!(harness.exists("ns1/latest-changes.json"));
}

#[test]
fn test_label_only_group_survives_cleanup() {
    let harness = TestHarness::new();
    harness.cluster.add_resource(
        "ns1",
        kind("Deployment"),
        json!({"metadata": {"name": "api", "namespace": "ns1", "labels": {"app.kubernetes.io/instance": "argo-app"}}}),
    );

    harness.reconciler().initial_sync().unwrap();
    assert!(harness.exists("ns1/argo-app/resources/deployment-api.yaml"));
    assert!(!harness.exists("ns1/argo-app/values.yaml"));
    assert!(!harness.exists("archived"));

    let commits = harness.commit_count();
    let report = harness.reconciler().cleanup_pass().unwrap();
    assert!(report.is_empty());
    assert!(harness.exists("ns1/argo-app/resources/deployment-api.yaml"));
    assert!(harness.archived_files("deployment-api").is_empty());

    harness.reconciler().full_sync_pass().unwrap();
    assert!(harness.exists("ns1/argo-app/resources/deployment-api.yaml"));
    assert_eq!(harness.commit_count(), commits);
    assert!(StorageLayout::new(&harness.storage).verify().unwrap().is_empty());
}

#[test]
fn test_excluded_namespace_never_archived() {
    let harness = TestHarness::with_config(|config| {
        config.excluded_namespaces.insert("monitoring".to_string());
    });
    std::fs::create_dir_all(harness.path("monitoring/standalone-resources")).unwrap();
    std::fs::write(harness.path("monitoring/standalone-resources/configmap-x.yaml"), "a: 1\n").unwrap();

    let report = harness.reconciler().cleanup_pass().unwrap();
    assert!(report.is_empty());
    assert!(harness.exists("monitoring/standalone-resources/configmap-x.yaml"));
}

#[test]
fn test_unreachable_cluster_archives_nothing() {
    let harness = TestHarness::new();
    harness.process(&ReviewBuilder::create("ConfigMap", "a").namespace("ns1").build());
    harness.cluster.set_unavailable(true);

    assert!(matches!(
        harness.reconciler().cleanup_pass(),
        Err(AuditError::Cluster(_))
    ));
    assert!(harness.exists("ns1/standalone-resources/configmap-a.yaml"));
    assert!(!harness.exists("archived"));
}

#[test]
fn test_resync_is_idempotent() {
    let harness = TestHarness::new();
    harness.cluster.add_resource(
        "ns1",
        kind("Service"),
        json!({"metadata": {"name": "api", "namespace": "ns1", "resourceVersion": "12"}}),
    );
    harness.reconciler().initial_sync().unwrap();
    let commits = harness.commit_count();

    harness.reconciler().full_sync_pass().unwrap();
    assert_eq!(harness.commit_count(), commits);
    assert!(harness.is_clean());
}
