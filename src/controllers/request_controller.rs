//! Controller for OperandRequest resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        reflector::{ObjectRef, Store},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::controllers::{backoff, Context};
use crate::crd::{OperandConfig, OperandRegistry, OperandRequest, RegistryKey};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::request;
use crate::Error;

/// Finalizer guarding the teardown of a request's operands
pub const FINALIZER: &str = "operator.oso.sh/operandrequest-finalizer";

/// Run the request controller
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let requests: Api<OperandRequest> = Api::all(client.clone());
    let configs: Api<OperandConfig> = Api::all(client.clone());
    let registries: Api<OperandRegistry> = Api::all(client.clone());

    info!("Starting OperandRequest controller");

    let controller = Controller::new(requests, Config::default().any_semantic());
    let by_config = controller.store();
    let by_registry = by_config.clone();

    controller
        .watches(configs, Config::default(), move |catalog| {
            let key = RegistryKey::new(catalog.name_any(), catalog.namespace().unwrap_or_default());
            requests_using(&by_config, &key)
        })
        .watches(registries, Config::default(), move |registry| {
            let key = RegistryKey::new(registry.name_any(), registry.namespace().unwrap_or_default());
            requests_using(&by_registry, &key)
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

    info!("OperandRequest controller stopped");
}

/// Requests with at least one entry pointing at `key`
fn requests_using(store: &Store<OperandRequest>, key: &RegistryKey) -> Vec<ObjectRef<OperandRequest>> {
    store
        .state()
        .iter()
        .filter(|r| r.declared_operands().any(|(k, _)| &k == key))
        .map(|r| ObjectRef::from_obj(r.as_ref()))
        .collect()
}

/// Reconcile an OperandRequest resource
#[instrument(skip(operand_request, ctx), fields(name = %operand_request.name_any(), namespace = operand_request.namespace().unwrap_or_default()))]
async fn reconcile(operand_request: Arc<OperandRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = operand_request.namespace().unwrap_or_default();
    let name = operand_request.name_any();

    RECONCILIATIONS.with_label_values(&["OperandRequest"]).inc();

    let api: Api<OperandRequest> = Api::namespaced(ctx.client.clone(), &ns);

    let result = finalizer(&api, FINALIZER, operand_request, |event| async {
        match event {
            Event::Apply(r) => request::reconcile(&r, ctx.cluster.as_ref(), &ctx.config).await,
            Event::Cleanup(r) => request::cleanup(&r, ctx.cluster.as_ref(), &ctx.config).await,
        }
    })
    .await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["OperandRequest"])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&["OperandRequest"])
                .inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    Ok(result?)
}

/// Error policy for the controller
fn error_policy(operand_request: Arc<OperandRequest>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for {}/{}: {:?}",
        operand_request.namespace().unwrap_or_default(),
        operand_request.name_any(),
        err
    );
    backoff(err)
}
