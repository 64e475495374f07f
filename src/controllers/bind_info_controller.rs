//! Controller for OperandBindInfo resources

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
use crate::crd::{OperandBindInfo, OperandRegistry, OperandRequest, RegistryKey};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::bind_info;
use crate::Error;

/// Run the bindinfo controller
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let bind_infos: Api<OperandBindInfo> = Api::all(client.clone());
    let requests: Api<OperandRequest> = Api::all(client.clone());
    let registries: Api<OperandRegistry> = Api::all(client.clone());

    info!("Starting OperandBindInfo controller");

    let controller = Controller::new(bind_infos, Config::default().any_semantic());
    let by_request = controller.store();
    let by_registry = by_request.clone();

    controller
        .watches(requests, Config::default(), move |request| {
            request
                .declared_operands()
                .flat_map(|(key, op)| bind_infos_for(&by_request, &key, Some(op.name.as_str())))
                .collect::<Vec<_>>()
        })
        .watches(registries, Config::default(), move |registry| {
            let key = RegistryKey::new(registry.name_any(), registry.namespace().unwrap_or_default());
            bind_infos_for(&by_registry, &key, None)
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

    info!("OperandBindInfo controller stopped");
}

/// Bindinfos resolving through `key`, optionally limited to one operand
fn bind_infos_for(
    store: &Store<OperandBindInfo>,
    key: &RegistryKey,
    operand: Option<&str>,
) -> Vec<ObjectRef<OperandBindInfo>> {
    store
        .state()
        .iter()
        .filter(|bi| &bi.registry_key() == key)
        .filter(|bi| operand.map_or(true, |op| bi.spec.operand == op))
        .map(|bi| ObjectRef::from_obj(bi.as_ref()))
        .collect()
}

/// Reconcile an OperandBindInfo resource
#[instrument(skip(bi, ctx), fields(name = %bi.name_any(), namespace = bi.namespace().unwrap_or_default()))]
async fn reconcile(bi: Arc<OperandBindInfo>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = bi.namespace().unwrap_or_default();
    let name = bi.name_any();

    RECONCILIATIONS.with_label_values(&["OperandBindInfo"]).inc();

    let result = bind_info::reconcile(&bi, ctx.cluster.as_ref(), &ctx.config).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["OperandBindInfo"])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&["OperandBindInfo"])
                .inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    result
}

/// Error policy for the controller
fn error_policy(bi: Arc<OperandBindInfo>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for {}/{}: {:?}",
        bi.namespace().unwrap_or_default(),
        bi.name_any(),
        err
    );
    backoff(err)
}
