//! Shared fixtures for the reconciler integration tests
//!
//! `FakeCluster` is an in-memory object store behind the `ClusterClient`
//! trait. It counts writes so tests can assert that an idempotent reconcile
//! does not touch the cluster.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::DynamicObject;
use kube::runtime::events::Event;
use kube::ResourceExt;
use serde_json::Value;

use operand_lifecycle_operator::adapters::{ClusterClient, CreateOutcome, ResourceRef};
use operand_lifecycle_operator::config::OperatorConfig;
use operand_lifecycle_operator::crd::{
    ClusterServiceVersion, ClusterServiceVersionSpec, ClusterServiceVersionStatus, ConfigService,
    CsvPhase, Operand, OperandBindInfo, OperandBindInfoStatus, OperandConfig, OperandConfigSpec,
    OperandConfigStatus, OperandRegistry, OperandRegistrySpec, OperandRegistryStatus,
    OperandRequest, OperandRequestSpec, OperandRequestStatus, Operator, OperatorPhase,
    OperatorStatus, Request, ServicePhase, Subscription, SubscriptionSpec, SubscriptionStatus,
    ALM_EXAMPLES_ANNOTATION,
};
use operand_lifecycle_operator::{Error, Result};

// ============================================================================
// Fake cluster
// ============================================================================

type Key = (String, String);
type ResourceKey = (String, String, String, String);

/// Event captured by the fake
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub object: String,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
struct State {
    registries: BTreeMap<Key, OperandRegistry>,
    configs: BTreeMap<Key, OperandConfig>,
    requests: BTreeMap<Key, OperandRequest>,
    bind_infos: BTreeMap<Key, OperandBindInfo>,
    subscriptions: BTreeMap<Key, Subscription>,
    csvs: BTreeMap<Key, ClusterServiceVersion>,
    resources: BTreeMap<ResourceKey, DynamicObject>,
    secrets: BTreeMap<Key, Secret>,
    config_maps: BTreeMap<Key, ConfigMap>,
    events: Vec<RecordedEvent>,
    unserved: BTreeSet<(String, String)>,
    next_uid: u64,
}

impl State {
    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }

    fn serves(&self, api_version: &str, kind: &str) -> bool {
        !self
            .unserved
            .contains(&(api_version.to_string(), kind.to_string()))
    }

    fn require_served(&self, target: &ResourceRef) -> Result<()> {
        if self.serves(&target.api_version, &target.kind) {
            Ok(())
        } else {
            Err(Error::MissingDependency(format!(
                "kind {} ({}) is not served by the cluster",
                target.kind, target.api_version
            )))
        }
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    pub status_patches: AtomicUsize,
    pub creates: AtomicUsize,
    pub replaces: AtomicUsize,
    pub deletes: AtomicUsize,
    sticky_deletes: AtomicBool,
    recreate_on_delete: AtomicBool,
}

fn key_of<K: ResourceExt>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn key(name: &str, namespace: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn resource_key(target: &ResourceRef) -> ResourceKey {
    (
        target.api_version.clone(),
        target.kind.clone(),
        target.namespace.clone(),
        target.name.clone(),
    )
}

fn not_found(kind: &str, name: &str, namespace: &str) -> Error {
    Error::KubeError(format!("{} {}/{} not found", kind, namespace, name))
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes are accepted but objects never go away
    pub fn make_deletes_sticky(&self) {
        self.sticky_deletes.store(true, Ordering::SeqCst);
    }

    /// Deleted objects are immediately recreated under a new UID
    pub fn recreate_deleted_objects(&self) {
        self.recreate_on_delete.store(true, Ordering::SeqCst);
    }

    /// The API server stops serving a kind, as when its CRD is removed
    pub fn stop_serving(&self, api_version: &str, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .unserved
            .insert((api_version.to_string(), kind.to_string()));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn put_registry(&self, registry: OperandRegistry) {
        let mut state = self.state.lock().unwrap();
        state.registries.insert(key_of(&registry), registry);
    }

    pub fn put_config(&self, config: OperandConfig) {
        let mut state = self.state.lock().unwrap();
        state.configs.insert(key_of(&config), config);
    }

    /// Store a request, assigning a UID on first insert
    pub fn put_request(&self, mut request: OperandRequest) {
        let mut state = self.state.lock().unwrap();
        let k = key_of(&request);
        if request.metadata.uid.is_none() {
            let existing = state.requests.get(&k).and_then(|r| r.metadata.uid.clone());
            request.metadata.uid = match existing {
                Some(uid) => Some(uid),
                None => Some(state.uid()),
            };
        }
        state.requests.insert(k, request);
    }

    pub fn put_bind_info(&self, bind_info: OperandBindInfo) {
        let mut state = self.state.lock().unwrap();
        state.bind_infos.insert(key_of(&bind_info), bind_info);
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.insert(key_of(&subscription), subscription);
    }

    pub fn put_csv(&self, csv: ClusterServiceVersion) {
        let mut state = self.state.lock().unwrap();
        state.csvs.insert(key_of(&csv), csv);
    }

    pub fn put_secret(&self, mut secret: Secret) {
        let mut state = self.state.lock().unwrap();
        if secret.metadata.uid.is_none() {
            secret.metadata.uid = Some(state.uid());
        }
        state.secrets.insert(key_of(&secret), secret);
    }

    pub fn put_config_map(&self, mut config_map: ConfigMap) {
        let mut state = self.state.lock().unwrap();
        if config_map.metadata.uid.is_none() {
            config_map.metadata.uid = Some(state.uid());
        }
        state.config_maps.insert(key_of(&config_map), config_map);
    }

    pub fn put_resource(&self, mut obj: DynamicObject) {
        let mut state = self.state.lock().unwrap();
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(state.uid());
        }
        obj.metadata.resource_version.get_or_insert_with(|| "1".to_string());
        let target = ResourceRef::from_object(&obj).unwrap();
        state.resources.insert(resource_key(&target), obj);
    }

    pub fn remove_request(&self, name: &str, namespace: &str) {
        self.state.lock().unwrap().requests.remove(&key(name, namespace));
    }

    /// Mark a request as being deleted, as the API server does while a
    /// finalizer is pending
    pub fn mark_request_deleting(&self, name: &str, namespace: &str) -> OperandRequest {
        let mut state = self.state.lock().unwrap();
        let request = state.requests.get_mut(&key(name, namespace)).unwrap();
        request.metadata.deletion_timestamp = Some(Time(Utc::now()));
        request.clone()
    }

    pub fn request(&self, name: &str, namespace: &str) -> OperandRequest {
        self.state.lock().unwrap().requests[&key(name, namespace)].clone()
    }

    pub fn registry(&self, name: &str, namespace: &str) -> OperandRegistry {
        self.state.lock().unwrap().registries[&key(name, namespace)].clone()
    }

    pub fn config(&self, name: &str, namespace: &str) -> OperandConfig {
        self.state.lock().unwrap().configs[&key(name, namespace)].clone()
    }

    pub fn bind_info(&self, name: &str, namespace: &str) -> OperandBindInfo {
        self.state.lock().unwrap().bind_infos[&key(name, namespace)].clone()
    }

    pub fn resource(&self, target: &ResourceRef) -> Option<DynamicObject> {
        self.state.lock().unwrap().resources.get(&resource_key(target)).cloned()
    }

    pub fn secret(&self, name: &str, namespace: &str) -> Option<Secret> {
        self.state.lock().unwrap().secrets.get(&key(name, namespace)).cloned()
    }

    pub fn config_map(&self, name: &str, namespace: &str) -> Option<ConfigMap> {
        self.state.lock().unwrap().config_maps.get(&key(name, namespace)).cloned()
    }

    pub fn secret_names(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().secrets.keys().cloned().collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<Option<OperandRegistry>> {
        Ok(self.state.lock().unwrap().registries.get(&key(name, namespace)).cloned())
    }

    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<OperandConfig>> {
        Ok(self.state.lock().unwrap().configs.get(&key(name, namespace)).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<OperandRequest>> {
        Ok(self.state.lock().unwrap().requests.values().cloned().collect())
    }

    async fn patch_registry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandRegistryStatus,
    ) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let obj = state
            .registries
            .get_mut(&key(name, namespace))
            .ok_or_else(|| not_found("OperandRegistry", name, namespace))?;
        obj.status = Some(status.clone());
        Ok(())
    }

    async fn patch_config_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandConfigStatus,
    ) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let obj = state
            .configs
            .get_mut(&key(name, namespace))
            .ok_or_else(|| not_found("OperandConfig", name, namespace))?;
        obj.status = Some(status.clone());
        Ok(())
    }

    async fn patch_request_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandRequestStatus,
    ) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let obj = state
            .requests
            .get_mut(&key(name, namespace))
            .ok_or_else(|| not_found("OperandRequest", name, namespace))?;
        obj.status = Some(status.clone());
        Ok(())
    }

    async fn patch_bind_info_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandBindInfoStatus,
    ) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let obj = state
            .bind_infos
            .get_mut(&key(name, namespace))
            .ok_or_else(|| not_found("OperandBindInfo", name, namespace))?;
        obj.status = Some(status.clone());
        Ok(())
    }

    async fn get_subscription(&self, name: &str, namespace: &str) -> Result<Option<Subscription>> {
        Ok(self.state.lock().unwrap().subscriptions.get(&key(name, namespace)).cloned())
    }

    async fn get_cluster_service_version(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ClusterServiceVersion>> {
        Ok(self.state.lock().unwrap().csvs.get(&key(name, namespace)).cloned())
    }

    async fn get_resource(&self, target: &ResourceRef) -> Result<Option<DynamicObject>> {
        let state = self.state.lock().unwrap();
        if !state.serves(&target.api_version, &target.kind) {
            return Ok(None);
        }
        Ok(state.resources.get(&resource_key(target)).cloned())
    }

    async fn create_resource(&self, obj: &DynamicObject) -> Result<CreateOutcome> {
        let target = ResourceRef::from_object(obj)?;
        let mut state = self.state.lock().unwrap();
        state.require_served(&target)?;
        let k = resource_key(&target);
        if state.resources.contains_key(&k) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let mut created = obj.clone();
        created.metadata.uid = Some(state.uid());
        created.metadata.resource_version = Some("1".to_string());
        state.resources.insert(k, created);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn replace_resource(&self, obj: &DynamicObject) -> Result<()> {
        let target = ResourceRef::from_object(obj)?;
        let mut state = self.state.lock().unwrap();
        state.require_served(&target)?;
        let stored = state
            .resources
            .get_mut(&resource_key(&target))
            .ok_or_else(|| not_found(&target.kind, &target.name, &target.namespace))?;
        if stored.metadata.resource_version != obj.metadata.resource_version {
            return Err(Error::KubeError(format!("conflict on {}", target)));
        }
        let version: u64 = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut updated = obj.clone();
        updated.metadata.resource_version = Some((version + 1).to_string());
        *stored = updated;
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_resources(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        label_selector: &str,
    ) -> Result<()> {
        if !self.state.lock().unwrap().serves(api_version, kind) {
            return Ok(());
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.sticky_deletes.load(Ordering::SeqCst) {
            return Ok(());
        }
        let recreate = self.recreate_on_delete.load(Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let doomed: Vec<ResourceKey> = state
            .resources
            .iter()
            .filter(|((av, k, ns, _), obj)| {
                av == api_version
                    && k == kind
                    && ns == namespace
                    && matches_selector(&obj.metadata.labels.clone().unwrap_or_default(), label_selector)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            if recreate {
                let uid = state.uid();
                if let Some(obj) = state.resources.get_mut(&k) {
                    obj.metadata.uid = Some(uid);
                }
            } else {
                state.resources.remove(&k);
            }
        }
        Ok(())
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>> {
        Ok(self.secret(name, namespace))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<CreateOutcome> {
        let mut state = self.state.lock().unwrap();
        let k = key_of(secret);
        if state.secrets.contains_key(&k) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let mut created = secret.clone();
        created.metadata.uid = Some(state.uid());
        state.secrets.insert(k, created);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let k = key_of(secret);
        if !state.secrets.contains_key(&k) {
            return Err(not_found("Secret", &k.1, &k.0));
        }
        state.secrets.insert(k, secret.clone());
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(name, namespace))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<CreateOutcome> {
        let mut state = self.state.lock().unwrap();
        let k = key_of(config_map);
        if state.config_maps.contains_key(&k) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let mut created = config_map.clone();
        created.metadata.uid = Some(state.uid());
        state.config_maps.insert(k, created);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let k = key_of(config_map);
        if !state.config_maps.contains_key(&k) {
            return Err(not_found("ConfigMap", &k.1, &k.0));
        }
        state.config_maps.insert(k, config_map.clone());
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_event(&self, reference: &ObjectReference, event: Event) -> Result<()> {
        self.state.lock().unwrap().events.push(RecordedEvent {
            object: format!(
                "{}/{}",
                reference.namespace.clone().unwrap_or_default(),
                reference.name.clone().unwrap_or_default()
            ),
            reason: event.reason,
            note: event.note.unwrap_or_default(),
        });
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const REGISTRY: &str = "common-service";
pub const REGISTRY_NS: &str = "ibm-common-services";

/// Operator config with short poll bounds so deletion tests run fast
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        requeue_interval_secs: 1,
        delete_poll_interval_ms: 5,
        delete_poll_timeout_ms: 50,
        ..OperatorConfig::default()
    }
}

pub fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Operator descriptor installed into its own namespace
pub fn operator(name: &str, namespace: &str) -> Operator {
    Operator {
        name: name.to_string(),
        namespace: namespace.to_string(),
        source_name: "community-operators".to_string(),
        source_namespace: "openshift-marketplace".to_string(),
        package_name: name.to_string(),
        channel: "stable".to_string(),
        ..Default::default()
    }
}

pub fn registry(operators: Vec<Operator>) -> OperandRegistry {
    OperandRegistry {
        metadata: meta(REGISTRY, REGISTRY_NS),
        spec: OperandRegistrySpec { operators },
        status: None,
    }
}

/// Registry whose status already reports every operator with `phase`
pub fn reported_registry(operators: Vec<Operator>, phase: OperatorPhase) -> OperandRegistry {
    let operators_status = operators
        .iter()
        .map(|op| {
            (
                op.name.clone(),
                OperatorStatus {
                    phase,
                    reconcile_requests: Vec::new(),
                },
            )
        })
        .collect();
    let mut registry = registry(operators);
    registry.status = Some(OperandRegistryStatus {
        phase: ServicePhase::Running,
        operators_status,
    });
    registry
}

/// Config with one service per `(operand, {kind: spec})` pair
pub fn config(services: Vec<(&str, Value)>) -> OperandConfig {
    let services = services
        .into_iter()
        .map(|(name, specs)| ConfigService {
            name: name.to_string(),
            spec: serde_json::from_value(specs).unwrap(),
        })
        .collect();
    OperandConfig {
        metadata: meta(REGISTRY, REGISTRY_NS),
        spec: OperandConfigSpec { services },
        status: None,
    }
}

/// Request for `operands` from the shared registry
pub fn request(name: &str, namespace: &str, operands: &[&str]) -> OperandRequest {
    OperandRequest {
        metadata: meta(name, namespace),
        spec: OperandRequestSpec {
            requests: vec![Request {
                registry: REGISTRY.to_string(),
                registry_namespace: Some(REGISTRY_NS.to_string()),
                operands: operands
                    .iter()
                    .map(|op| Operand {
                        name: op.to_string(),
                        bindings: BTreeMap::new(),
                    })
                    .collect(),
                description: None,
            }],
        },
        status: None,
    }
}

pub fn subscription(name: &str, namespace: &str, installed_csv: Option<&str>) -> Subscription {
    Subscription {
        metadata: meta(name, namespace),
        spec: SubscriptionSpec {
            channel: Some("stable".to_string()),
            name: name.to_string(),
            source: "community-operators".to_string(),
            source_namespace: "openshift-marketplace".to_string(),
        },
        status: Some(SubscriptionStatus {
            current_csv: installed_csv.map(str::to_string),
            installed_csv: installed_csv.map(str::to_string),
            state: Some("AtLatestKnown".to_string()),
        }),
    }
}

pub fn csv(name: &str, namespace: &str, phase: CsvPhase, examples: Value) -> ClusterServiceVersion {
    let mut metadata = meta(name, namespace);
    metadata.annotations = Some(BTreeMap::from([(
        ALM_EXAMPLES_ANNOTATION.to_string(),
        examples.to_string(),
    )]));
    ClusterServiceVersion {
        metadata,
        spec: ClusterServiceVersionSpec::default(),
        status: Some(ClusterServiceVersionStatus {
            phase,
            reason: None,
            message: None,
        }),
    }
}

/// Operator `name` subscribed in `namespace` with a CSV in `phase`
pub fn install_operator(
    cluster: &FakeCluster,
    name: &str,
    namespace: &str,
    csv_name: &str,
    phase: CsvPhase,
    examples: Value,
) {
    cluster.put_subscription(subscription(name, namespace, Some(csv_name)));
    cluster.put_csv(csv(csv_name, namespace, phase, examples));
}
