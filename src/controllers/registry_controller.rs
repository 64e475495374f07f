//! Controller for OperandRegistry resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        reflector::{ObjectRef, Store},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::controllers::{backoff, Context};
use crate::crd::{OperandRegistry, OperandRequest, Subscription};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::registry;
use crate::Error;

/// Run the registry controller
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let registries: Api<OperandRegistry> = Api::all(client.clone());
    let requests: Api<OperandRequest> = Api::all(client.clone());
    let subscriptions: Api<Subscription> = Api::all(client.clone());

    info!("Starting OperandRegistry controller");

    let controller = Controller::new(registries, Config::default().any_semantic());
    let store = controller.store();

    controller
        .watches(requests, Config::default(), |request| {
            request
                .declared_operands()
                .map(|(key, _)| ObjectRef::new(&key.name).within(&key.namespace))
                .collect::<Vec<_>>()
        })
        .watches(subscriptions, Config::default(), move |sub| {
            registries_installing(&store, &sub)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("OperandRegistry controller stopped");
}

/// Registries declaring the operator a subscription installs
fn registries_installing(
    store: &Store<OperandRegistry>,
    sub: &Subscription,
) -> Vec<ObjectRef<OperandRegistry>> {
    let name = sub.name_any();
    store
        .state()
        .iter()
        .filter(|registry| {
            registry
                .spec
                .operators
                .iter()
                .any(|op| op.name == name || op.package_name == sub.spec.name)
        })
        .map(|registry| ObjectRef::from_obj(registry.as_ref()))
        .collect()
}

/// Reconcile an OperandRegistry resource
#[instrument(skip(registry, ctx), fields(name = %registry.name_any(), namespace = registry.namespace().unwrap_or_default()))]
async fn reconcile(registry: Arc<OperandRegistry>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = registry.namespace().unwrap_or_default();
    let name = registry.name_any();

    RECONCILIATIONS.with_label_values(&["OperandRegistry"]).inc();

    let result = registry::reconcile(&registry, ctx.cluster.as_ref(), &ctx.config).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["OperandRegistry"])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&["OperandRegistry"])
                .inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    result
}

/// Error policy for the controller
fn error_policy(registry: Arc<OperandRegistry>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for {}/{}: {:?}",
        registry.namespace().unwrap_or_default(),
        registry.name_any(),
        err
    );
    backoff(err)
}
