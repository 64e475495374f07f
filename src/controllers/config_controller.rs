//! Controller for OperandConfig resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::controllers::{backoff, Context};
use crate::crd::{OperandConfig, OperandRegistry, OperandRequest};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::config;
use crate::Error;

/// Run the config controller
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let configs: Api<OperandConfig> = Api::all(client.clone());
    let registries: Api<OperandRegistry> = Api::all(client.clone());
    let requests: Api<OperandRequest> = Api::all(client.clone());

    info!("Starting OperandConfig controller");

    // A config is paired with the registry of the same name and namespace
    Controller::new(configs, Config::default().any_semantic())
        .watches(registries, Config::default(), |registry| {
            Some(ObjectRef::new(&registry.name_any()).within(&registry.namespace().unwrap_or_default()))
        })
        .watches(requests, Config::default(), |request| {
            request
                .declared_operands()
                .map(|(key, _)| ObjectRef::new(&key.name).within(&key.namespace))
                .collect::<Vec<_>>()
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

    info!("OperandConfig controller stopped");
}

/// Reconcile an OperandConfig resource
#[instrument(skip(catalog, ctx), fields(name = %catalog.name_any(), namespace = catalog.namespace().unwrap_or_default()))]
async fn reconcile(catalog: Arc<OperandConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = catalog.namespace().unwrap_or_default();
    let name = catalog.name_any();

    RECONCILIATIONS.with_label_values(&["OperandConfig"]).inc();

    let result = config::reconcile(&catalog, ctx.cluster.as_ref(), &ctx.config).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["OperandConfig"])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&["OperandConfig"])
                .inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    result
}

/// Error policy for the controller
fn error_policy(catalog: Arc<OperandConfig>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        "Reconciliation error for {}/{}: {:?}",
        catalog.namespace().unwrap_or_default(),
        catalog.name_any(),
        err
    );
    backoff(err)
}
