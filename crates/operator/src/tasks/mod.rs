use crate::crds::PrometheusRule;
use futures::StreamExt;
use kube::runtime::controller::{self, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument};

pub mod absence;
pub mod cleanup;
pub mod clock;
pub mod companion;
pub mod config;
pub mod metrics;
pub mod reconcile;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use reconcile::{error_policy, reconcile_key, reconcile_prometheus_rule};
pub use store::{KubeRuleStore, RuleStore};
pub use types::{Context, Error, Result};

/// Main entry point for the `PrometheusRule` controller
#[instrument(skip(client, context), fields(namespace = ?context.config.watch_namespace))]
pub async fn run_task_controller(client: Client, context: Arc<Context>) -> Result<()> {
    let api: Api<PrometheusRule> = match &context.config.watch_namespace {
        Some(namespace) => {
            info!("Starting PrometheusRule controller in namespace: {}", namespace);
            Api::namespaced(client, namespace)
        }
        None => {
            info!("Starting PrometheusRule controller for all namespaces");
            Api::all(client)
        }
    };
    let watcher_config = Config::default().any_semantic();

    Controller::new(api, watcher_config)
        .run(reconcile_prometheus_rule, error_policy, context.clone())
        .for_each(|reconciliation_result| {
            let context = context.clone();
            let span = tracing::info_span!("prometheusrule_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((object_ref, action)) => {
                        debug!(
                            resource = %object_ref,
                            ?action,
                            "PrometheusRule reconciliation successful"
                        );
                    }
                    // Deleted objects are no longer in the cache, so the
                    // reconciler never sees them
                    Err(controller::Error::ObjectNotFound(object_ref)) => {
                        let namespace = object_ref.namespace.clone().unwrap_or_default();
                        let pass = reconcile::reconcile_key(&context, &namespace, &object_ref.name);
                        match reconcile::with_timeout(&context, pass).await {
                            Ok(_) => info!(
                                resource = %object_ref,
                                "cleaned up after deleted PrometheusRule"
                            ),
                            Err(e) => error!(
                                error = ?e,
                                resource = %object_ref,
                                "clean up after deleted PrometheusRule failed"
                            ),
                        }
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "PrometheusRule reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("PrometheusRule controller shutting down");
    Ok(())
}
