//! Cluster events attached to the objects being reconciled

use kube::runtime::events::{Event, EventType};
use kube::Resource;
use tracing::warn;

use crate::adapters::cluster::ClusterClient;

/// Event reasons
pub mod reasons {
    pub const NOT_FOUND: &str = "NotFound";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const DELETE_FAILED: &str = "DeleteFailed";
    pub const COPY_FAILED: &str = "CopyFailed";
}

/// Event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const DELETE: &str = "Delete";
    pub const COPY: &str = "Copy";
}

pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Event {
    Event {
        type_: EventType::Warning,
        reason: reason.to_string(),
        note: Some(note.into()),
        action: action.to_string(),
        secondary: None,
    }
}

/// Publish an event on `obj`. Publishing problems are logged, never returned:
/// an event is a side channel and must not fail the reconcile.
pub async fn publish<K>(client: &dyn ClusterClient, obj: &K, event: Event)
where
    K: Resource<DynamicType = ()>,
{
    let reference = obj.object_ref(&());
    if let Err(e) = client.publish_event(&reference, event).await {
        warn!(
            "Failed to publish event on {}/{}: {}",
            reference.namespace.unwrap_or_default(),
            reference.name.unwrap_or_default(),
            e
        );
    }
}
