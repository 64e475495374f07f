//! Operand Lifecycle Operator
//!
//! Main entry point for the operator. Loads the operator config, sets up the
//! Kubernetes client and runs the four reconciliation loops.

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use operand_lifecycle_operator::{
    config::OperatorConfig,
    controllers::{
        bind_info_controller, config_controller, registry_controller, request_controller, Context,
    },
    metrics::{self, OPERATOR_HEALTH},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Operand Lifecycle Operator");

    let config = OperatorConfig::load()?;
    info!(
        "Loaded operator config: requeue={}s delete poll={}ms/{}ms",
        config.requeue_interval_secs, config.delete_poll_interval_ms, config.delete_poll_timeout_ms
    );
    let metrics_port = config.metrics_port;

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Create shared context
    let context = Context::new(client, config);

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let registry_handle = tokio::spawn(registry_controller::run(context.clone()));
    let config_handle = tokio::spawn(config_controller::run(context.clone()));
    let request_handle = tokio::spawn(request_controller::run(context.clone()));
    let bind_info_handle = tokio::spawn(bind_info_controller::run(context));
    OPERATOR_HEALTH.set(1.0);

    // Handle graceful shutdown
    tokio::select! {
        _ = registry_handle => {
            error!("OperandRegistry controller exited unexpectedly");
        }
        _ = config_handle => {
            error!("OperandConfig controller exited unexpectedly");
        }
        _ = request_handle => {
            error!("OperandRequest controller exited unexpectedly");
        }
        _ = bind_info_handle => {
            error!("OperandBindInfo controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    OPERATOR_HEALTH.set(0.0);
    info!("Operand Lifecycle Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,operand_lifecycle_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
