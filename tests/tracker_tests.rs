//! Tests for operand reference tracking

mod common;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use common::{request, REGISTRY, REGISTRY_NS};
use operand_lifecycle_operator::crd::RegistryKey;
use operand_lifecycle_operator::reconcilers::tracker;

fn shared_key() -> RegistryKey {
    RegistryKey::new(REGISTRY, REGISTRY_NS)
}

#[test]
fn referents_found_across_namespaces() {
    let requests = vec![
        request("a", "ns-a", &["jenkins"]),
        request("b", "ns-b", &["jenkins", "etcd"]),
        request("c", "ns-c", &["etcd"]),
    ];

    let found: Vec<(String, String)> = tracker::referents(&requests, "jenkins")
        .into_iter()
        .map(|r| (r.request, r.namespace))
        .collect();
    assert_eq!(
        found,
        vec![
            ("a".to_string(), "ns-a".to_string()),
            ("b".to_string(), "ns-b".to_string()),
        ]
    );
}

#[test]
fn deleting_requests_are_not_referents() {
    let mut leaving = request("a", "ns-a", &["jenkins"]);
    leaving.metadata.deletion_timestamp = Some(Time(Utc::now()));
    let requests = vec![leaving, request("b", "ns-b", &["jenkins"])];

    let found = tracker::referents(&requests, "jenkins");
    assert_eq!(found.len(), 1);
    assert_eq!(found.iter().next().unwrap().namespace, "ns-b");
}

#[test]
fn registry_namespace_defaults_to_request_namespace() {
    let mut req = request("a", "ns-a", &["jenkins"]);
    req.spec.requests[0].registry_namespace = None;
    let requests = vec![req];

    assert!(tracker::referents_via(&requests, "jenkins", &shared_key()).is_empty());
    let local = RegistryKey::new(REGISTRY, "ns-a");
    assert_eq!(tracker::referents_via(&requests, "jenkins", &local).len(), 1);
}

#[test]
fn remaining_referents_exclude_the_trigger() {
    let requests = vec![
        request("a", "ns-a", &["jenkins"]),
        request("b", "ns-b", &["jenkins"]),
    ];

    let remaining = tracker::remaining_referents(&requests, "jenkins", &requests[0]);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.iter().next().unwrap().request, "b");

    let alone = vec![request("a", "ns-a", &["jenkins"])];
    assert!(tracker::remaining_referents(&alone, "jenkins", &alone[0]).is_empty());
}

#[test]
fn same_name_in_another_namespace_is_a_different_referent() {
    let requests = vec![
        request("shared", "ns-a", &["jenkins"]),
        request("shared", "ns-b", &["jenkins"]),
    ];

    let remaining = tracker::remaining_referents(&requests, "jenkins", &requests[0]);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.iter().next().unwrap().namespace, "ns-b");
}

#[test]
fn remaining_referents_span_registries() {
    let mut other = request("b", "ns-b", &["jenkins"]);
    other.spec.requests[0].registry = "team-b-registry".to_string();
    other.spec.requests[0].registry_namespace = Some("team-b".to_string());
    let requests = vec![request("a", "ns-a", &["jenkins"]), other];

    let remaining = tracker::remaining_referents(&requests, "jenkins", &requests[0]);
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        remaining.iter().next().unwrap().registry,
        RegistryKey::new("team-b-registry", "team-b")
    );
}
