//! Integration tests for the OperandConfig reconciler

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use common::*;
use operand_lifecycle_operator::crd::{CsvPhase, OperatorPhase, ServicePhase};
use operand_lifecycle_operator::reconcilers::config as config_reconciler;
use operand_lifecycle_operator::Error;

// ============================================================================
// Test Helpers
// ============================================================================

const ETCD_NS: &str = "etcd-operator";

fn etcd_examples() -> Value {
    json!([{
        "apiVersion": "etcd.database.coreos.com/v1beta2",
        "kind": "EtcdCluster",
        "metadata": {"name": "example"},
        "spec": {"size": 3}
    }])
}

fn live_etcd_cluster() -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "etcd.database.coreos.com/v1beta2",
        "kind": "EtcdCluster",
        "metadata": {"name": "example", "namespace": ETCD_NS},
        "spec": {"size": 3}
    }))
    .unwrap()
}

fn setup(reported: OperatorPhase) -> FakeCluster {
    let cluster = FakeCluster::new();
    cluster.put_registry(reported_registry(vec![operator("etcd", ETCD_NS)], reported));
    cluster.put_config(config(vec![("etcd", json!({"etcdCluster": {"size": 1}}))]));
    install_operator(
        &cluster,
        "etcd",
        ETCD_NS,
        "etcdoperator.v0.9.4",
        CsvPhase::Succeeded,
        etcd_examples(),
    );
    cluster
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn operand_not_reported_until_operator_installed() {
    let cluster = setup(OperatorPhase::Installing);
    cluster.put_resource(live_etcd_cluster());

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    let action = assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);

    let status = cluster.config(REGISTRY, REGISTRY_NS).status.unwrap();
    assert!(status.service_status.is_empty());
    assert_eq!(status.phase, ServicePhase::Init);
    assert_eq!(action, Action::await_change());
}

#[tokio::test]
async fn live_resource_reported_running_once_installed() {
    let cluster = setup(OperatorPhase::Ready);
    cluster.put_resource(live_etcd_cluster());

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    let action = assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);

    let status = cluster.config(REGISTRY, REGISTRY_NS).status.unwrap();
    assert_eq!(
        status.service_status["etcd"],
        BTreeMap::from([("EtcdCluster".to_string(), ServicePhase::Running)])
    );
    assert_eq!(status.phase, ServicePhase::Running);
    assert_eq!(action, Action::await_change());
}

#[tokio::test]
async fn updating_operator_still_counts_as_installed() {
    let cluster = setup(OperatorPhase::Updating);
    cluster.put_resource(live_etcd_cluster());

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);

    let status = cluster.config(REGISTRY, REGISTRY_NS).status.unwrap();
    assert_eq!(status.phase, ServicePhase::Running);
}

#[tokio::test]
async fn absent_resource_records_no_kind() {
    let cluster = setup(OperatorPhase::Ready);

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);

    let status = cluster.config(REGISTRY, REGISTRY_NS).status.unwrap();
    assert!(status.service_status["etcd"].is_empty());
    assert_eq!(status.phase, ServicePhase::Init);
}

#[tokio::test]
async fn config_never_writes_managed_resources() {
    let cluster = setup(OperatorPhase::Ready);

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);

    assert_eq!(FakeCluster::count(&cluster.creates), 0);
    assert_eq!(FakeCluster::count(&cluster.replaces), 0);
    assert_eq!(FakeCluster::count(&cluster.deletes), 0);
}

#[tokio::test]
async fn missing_registry_requeues_with_event() {
    let cluster = FakeCluster::new();
    cluster.put_config(config(vec![("etcd", json!({"etcdCluster": {}}))]));

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    let action = assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);

    assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    assert_eq!(FakeCluster::count(&cluster.status_patches), 0);
    let events = cluster.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "NotFound");
}

#[tokio::test]
async fn malformed_examples_are_aggregated() {
    let cluster = setup(OperatorPhase::Ready);
    install_operator(
        &cluster,
        "etcd",
        ETCD_NS,
        "etcdoperator.v0.9.4",
        CsvPhase::Succeeded,
        json!({"not": "a list"}),
    );

    let catalog = cluster.config(REGISTRY, REGISTRY_NS);
    let err = assert_err!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);
    match err {
        Error::Aggregate(errors) => assert!(matches!(errors.errors()[0], Error::TemplateError(_))),
        other => panic!("expected aggregate error, got {:?}", other),
    }
}

#[tokio::test]
async fn repeated_reconcile_patches_once() {
    let cluster = setup(OperatorPhase::Ready);
    cluster.put_resource(live_etcd_cluster());

    for _ in 0..2 {
        let catalog = cluster.config(REGISTRY, REGISTRY_NS);
        assert_ok!(config_reconciler::reconcile(&catalog, &cluster, &test_config()).await);
    }

    assert_eq!(FakeCluster::count(&cluster.status_patches), 1);
}
