//! Service and Node watchers.
//!
//! Drive [`reconcile`] and [`reconcile_node`] through `kube_runtime::Controller`,
//! which handles reconnection, requeueing and per-object serialization.

use crate::error::ControllerError;
use crate::nodes::{node_error_policy, reconcile_node, NodeReconciler};
use crate::reconciler::{error_policy, reconcile, Reconciler};
use futures::StreamExt;
use iaas_client::IaasClientTrait;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::Api;
use kube_runtime::{controller::Config as ControllerConfig, watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watch Services and reconcile them until the stream ends
pub async fn watch_services<C>(api: Api<Service>, reconciler: Arc<Reconciler<C>>) -> Result<(), ControllerError>
where
    C: IaasClientTrait + Clone + 'static,
{
    info!("Starting Service watcher");

    // Debounce batches bursts of events; concurrency bounds parallel appliance operations
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => debug!("Reconciled Service {}/{}", obj.namespace.unwrap_or_default(), obj.name),
                Err(e) => error!("Controller error for Service: {}", e),
            }
        })
        .await;

    info!("Service watcher stopped");
    Ok(())
}

/// Watch Nodes and follow their servers until the stream ends
pub async fn watch_nodes<C>(api: Api<Node>, reconciler: Arc<NodeReconciler<C>>) -> Result<(), ControllerError>
where
    C: IaasClientTrait + Clone + 'static,
{
    info!("Starting Node watcher");

    // Debounce coalesces kubelet status updates
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(2);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile_node, node_error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => debug!("Reconciled Node {}", obj.name),
                Err(e) => error!("Controller error for Node: {}", e),
            }
        })
        .await;

    info!("Node watcher stopped");
    Ok(())
}
