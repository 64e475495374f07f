//! Access to the cluster object store
//!
//! Reconcilers talk to the cluster only through [`ClusterClient`], so they can
//! be driven against an in-memory store in tests. [`KubeClusterClient`] is the
//! production implementation on top of `kube::Api`.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret};
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::{ApiResource, Discovery};
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::adapters::templates::group_version_kind;
use crate::crd::{
    ClusterServiceVersion, ManagedResource, OperandBindInfo, OperandBindInfoStatus, OperandConfig,
    OperandConfigStatus, OperandRegistry, OperandRegistryStatus, OperandRequest,
    OperandRequestStatus, Subscription,
};
use crate::{Error, Result};

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Address of a schema-less managed resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Address of a rendered object; fails when type or identity is missing
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| Error::TemplateError("object has no apiVersion/kind".to_string()))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::TemplateError(format!("{} has no name", types.kind)))?;
        Ok(Self::new(
            types.api_version.clone(),
            types.kind.clone(),
            name,
            obj.metadata.namespace.clone().unwrap_or_default(),
        ))
    }
}

impl From<&ManagedResource> for ResourceRef {
    fn from(resource: &ManagedResource) -> Self {
        Self::new(
            resource.api_version.clone(),
            resource.kind.clone(),
            resource.name.clone(),
            resource.namespace.clone(),
        )
    }
}

impl From<&ResourceRef> for ManagedResource {
    fn from(target: &ResourceRef) -> Self {
        Self {
            api_version: target.api_version.clone(),
            kind: target.kind.clone(),
            name: target.name.clone(),
            namespace: target.namespace.clone(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Cluster operations used by the reconcilers.
///
/// Getters return `Ok(None)` on not-found; every other API failure is an
/// error. Status patches replace the whole status section. A managed resource
/// whose kind the cluster does not serve reads as absent, and writing one is a
/// `MissingDependency` error.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<Option<OperandRegistry>>;

    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<OperandConfig>>;

    /// All OperandRequests in the cluster
    async fn list_requests(&self) -> Result<Vec<OperandRequest>>;

    async fn patch_registry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandRegistryStatus,
    ) -> Result<()>;

    async fn patch_config_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandConfigStatus,
    ) -> Result<()>;

    async fn patch_request_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandRequestStatus,
    ) -> Result<()>;

    async fn patch_bind_info_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandBindInfoStatus,
    ) -> Result<()>;

    async fn get_subscription(&self, name: &str, namespace: &str) -> Result<Option<Subscription>>;

    async fn get_cluster_service_version(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ClusterServiceVersion>>;

    async fn get_resource(&self, target: &ResourceRef) -> Result<Option<DynamicObject>>;

    async fn create_resource(&self, obj: &DynamicObject) -> Result<CreateOutcome>;

    /// Conditional update; `obj` must carry the resourceVersion it was read at
    async fn replace_resource(&self, obj: &DynamicObject) -> Result<()>;

    /// Delete every object of a kind in a namespace matching a label selector
    async fn delete_resources(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        label_selector: &str,
    ) -> Result<()>;

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<CreateOutcome>;

    async fn replace_secret(&self, secret: &Secret) -> Result<()>;

    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<CreateOutcome>;

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Record a cluster event on the referenced object
    async fn publish_event(&self, reference: &ObjectReference, event: Event) -> Result<()>;
}

/// [`ClusterClient`] backed by the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
    reporter: Reporter,
    field_manager: String,
    /// ApiResources resolved through discovery, keyed by (apiVersion, kind)
    kinds: RwLock<HashMap<(String, String), ApiResource>>,
}

impl KubeClusterClient {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: field_manager.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
            field_manager: field_manager.to_string(),
            kinds: RwLock::new(HashMap::new()),
        }
    }

    async fn get_opt<K>(&self, api: Api<K>, name: &str) -> Result<Option<K>>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create<K>(&self, api: Api<K>, obj: &K) -> Result<CreateOutcome>
    where
        K: Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    {
        match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace<K>(&self, api: Api<K>, name: &str, obj: &K) -> Result<()>
    where
        K: Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    {
        api.replace(name, &PostParams::default(), obj).await?;
        Ok(())
    }

    /// Server-side apply of a status section, forced so that entries dropped
    /// from a rebuilt status are removed
    async fn apply_status<K, S>(&self, namespace: &str, name: &str, status: &S) -> Result<()>
    where
        K: Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        S: Serialize + Sync,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "status": status,
        });
        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager).force(),
            &Patch::Apply(&patch),
        )
        .await?;
        debug!("Patched {} status {}/{}", K::kind(&()), namespace, name);
        Ok(())
    }

    /// Look up the served ApiResource of a kind, which carries the real
    /// plural. Misses are not cached so a CRD installed later is picked up.
    async fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<Option<ApiResource>> {
        let cache_key = (api_version.to_string(), kind.to_string());
        if let Some(ar) = self.kinds.read().await.get(&cache_key) {
            return Ok(Some(ar.clone()));
        }

        let gvk = group_version_kind(api_version, kind);
        let discovery = Discovery::new(self.client.clone())
            .filter(&[gvk.group.as_str()])
            .run()
            .await?;
        match discovery.resolve_gvk(&gvk) {
            Some((ar, _caps)) => {
                debug!("Resolved {} {} to plural {}", api_version, kind, ar.plural);
                self.kinds.write().await.insert(cache_key, ar.clone());
                Ok(Some(ar))
            }
            None => {
                debug!("{} {} is not served by the cluster", api_version, kind);
                Ok(None)
            }
        }
    }

    async fn dynamic_api(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Option<Api<DynamicObject>>> {
        Ok(self
            .resolve_kind(api_version, kind)
            .await?
            .map(|ar| Api::namespaced_with(self.client.clone(), namespace, &ar)))
    }

    async fn served_api(&self, target: &ResourceRef) -> Result<Api<DynamicObject>> {
        self.dynamic_api(&target.api_version, &target.kind, &target.namespace)
            .await?
            .ok_or_else(|| {
                Error::MissingDependency(format!(
                    "kind {} ({}) is not served by the cluster",
                    target.kind, target.api_version
                ))
            })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<Option<OperandRegistry>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<OperandConfig>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn list_requests(&self) -> Result<Vec<OperandRequest>> {
        let api: Api<OperandRequest> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_registry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandRegistryStatus,
    ) -> Result<()> {
        self.apply_status::<OperandRegistry, _>(namespace, name, status)
            .await
    }

    async fn patch_config_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandConfigStatus,
    ) -> Result<()> {
        self.apply_status::<OperandConfig, _>(namespace, name, status)
            .await
    }

    async fn patch_request_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandRequestStatus,
    ) -> Result<()> {
        self.apply_status::<OperandRequest, _>(namespace, name, status)
            .await
    }

    async fn patch_bind_info_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OperandBindInfoStatus,
    ) -> Result<()> {
        self.apply_status::<OperandBindInfo, _>(namespace, name, status)
            .await
    }

    async fn get_subscription(&self, name: &str, namespace: &str) -> Result<Option<Subscription>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn get_cluster_service_version(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ClusterServiceVersion>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn get_resource(&self, target: &ResourceRef) -> Result<Option<DynamicObject>> {
        match self
            .dynamic_api(&target.api_version, &target.kind, &target.namespace)
            .await?
        {
            Some(api) => self.get_opt(api, &target.name).await,
            None => Ok(None),
        }
    }

    async fn create_resource(&self, obj: &DynamicObject) -> Result<CreateOutcome> {
        let target = ResourceRef::from_object(obj)?;
        let api = self.served_api(&target).await?;
        self.create(api, obj).await
    }

    async fn replace_resource(&self, obj: &DynamicObject) -> Result<()> {
        let target = ResourceRef::from_object(obj)?;
        let api = self.served_api(&target).await?;
        self.replace(api, &target.name, obj).await
    }

    async fn delete_resources(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        label_selector: &str,
    ) -> Result<()> {
        let Some(api) = self.dynamic_api(api_version, kind, namespace).await? else {
            return Ok(());
        };
        api.delete_collection(
            &DeleteParams::background(),
            &ListParams::default().labels(label_selector),
        )
        .await?;
        Ok(())
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<CreateOutcome> {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        self.create(Api::namespaced(self.client.clone(), &namespace), secret)
            .await
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<()> {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.replace(Api::namespaced(self.client.clone(), &namespace), &name, secret)
            .await
    }

    async fn get_config_map(&self, name: &str, namespace: &str) -> Result<Option<ConfigMap>> {
        self.get_opt(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<CreateOutcome> {
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        self.create(Api::namespaced(self.client.clone(), &namespace), config_map)
            .await
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.replace(
            Api::namespaced(self.client.clone(), &namespace),
            &name,
            config_map,
        )
        .await
    }

    async fn publish_event(&self, reference: &ObjectReference, event: Event) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference.clone());
        recorder.publish(event).await?;
        Ok(())
    }
}
