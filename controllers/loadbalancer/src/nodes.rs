//! Node lifecycle.
//!
//! Initializes Nodes backed by SAKURA Cloud servers (provider ID, instance
//! type and zone labels, addresses), keeps their addresses and the shutdown
//! taint current, and deletes Nodes whose server no longer exists.

use crate::error::ControllerError;
use crate::instances::{self, Instances, PROVIDER_NAME};
use crate::metrics::Metrics;
use crate::zones::{self, Zone};
use iaas_client::{IaasClient, IaasClientTrait};
use k8s_openapi::api::core::v1::{Node, NodeAddress, Taint};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const LABEL_INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
pub const LABEL_REGION: &str = "topology.kubernetes.io/region";
pub const LABEL_ZONE: &str = "topology.kubernetes.io/zone";

/// Taint carried by Nodes whose server is powered down
pub const SHUTDOWN_TAINT: &str = "node.cloudprovider.kubernetes.io/shutdown";

/// Interval between checks of a Node's server
pub const NODE_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state of the Node reconcile loop
pub struct NodeReconciler<C = IaasClient> {
    client: Client,
    instances: Instances<C>,
    metrics: Metrics,
}

fn node_provider_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .filter(|id| !id.is_empty())
}

fn node_label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata.labels.as_ref()?.get(key).map(String::as_str)
}

/// Labels to set so the Node carries `instance_type` and `zone`; empty when current
pub fn missing_labels(node: &Node, instance_type: &str, zone: &Zone) -> Map<String, Value> {
    let mut labels = Map::new();
    let wanted = [
        (LABEL_INSTANCE_TYPE, instance_type),
        (LABEL_REGION, zone.region.as_str()),
        (LABEL_ZONE, zone.region.as_str()),
    ];
    for (key, value) in wanted {
        if !value.is_empty() && node_label(node, key) != Some(value) {
            labels.insert(key.to_string(), Value::from(value));
        }
    }
    labels
}

/// Taint list with the shutdown taint added or removed; `None` when unchanged
pub fn shutdown_taints(node: &Node, shutdown: bool) -> Option<Vec<Taint>> {
    let current = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.clone())
        .unwrap_or_default();
    let tainted = current.iter().any(|t| t.key == SHUTDOWN_TAINT);
    if tainted == shutdown {
        return None;
    }
    let mut taints: Vec<Taint> = current.into_iter().filter(|t| t.key != SHUTDOWN_TAINT).collect();
    if shutdown {
        taints.push(Taint {
            key: SHUTDOWN_TAINT.to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        });
    }
    Some(taints)
}

/// Status patch replacing the server-derived addresses of the Node.
///
/// Hostname entries reported by the kubelet are kept. `None` when nothing
/// changes or the server has no usable address.
pub fn addresses_patch(node: &Node, addresses: &[NodeAddress]) -> Option<Value> {
    if addresses.is_empty() {
        return None;
    }
    let current = node
        .status
        .as_ref()
        .and_then(|status| status.addresses.clone())
        .unwrap_or_default();
    let mut desired = addresses.to_vec();
    desired.extend(current.iter().filter(|a| a.type_ == "Hostname").cloned());
    if desired == current {
        return None;
    }
    Some(json!({ "status": { "addresses": desired } }))
}

impl<C> NodeReconciler<C>
where
    C: IaasClientTrait + Clone + 'static,
{
    pub fn new(client: Client, instances: Instances<C>, metrics: Metrics) -> Self {
        Self {
            client,
            instances,
            metrics,
        }
    }

    /// Node without a provider ID: look its server up by name
    async fn initialize(&self, api: &Api<Node>, node: &Node) -> Result<Action, ControllerError> {
        let name = node.name_any();
        let id = match self.instances.instance_id(&name).await {
            Ok(id) => id,
            Err(ControllerError::InstanceNotFound(_)) => {
                debug!("No server named {}, not initializing the node", name);
                return Ok(Action::requeue(NODE_RESYNC_INTERVAL));
            }
            Err(e) => return Err(e),
        };
        let instance_type = self.instances.instance_type(&name).await?;
        let zone = zones::zone_by_node_name(&self.instances, &name).await?;
        let addresses = self.instances.node_addresses(&name).await?;

        let patch = json!({
            "metadata": { "labels": missing_labels(node, &instance_type, &zone) },
            "spec": { "providerID": instances::provider_id(&id) },
        });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        if let Some(status) = addresses_patch(node, &addresses) {
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
                .await?;
        }
        info!("Initialized node {} on server {} ({})", name, id, zone.region);
        Ok(Action::requeue(NODE_RESYNC_INTERVAL))
    }

    /// Node with a provider ID: follow its server
    async fn refresh(&self, api: &Api<Node>, node: &Node, provider_id: &str) -> Result<Action, ControllerError> {
        let name = node.name_any();
        if !self.instances.exists_by_provider_id(provider_id).await? {
            warn!("Server {} of node {} no longer exists, deleting the node", provider_id, name);
            api.delete(&name, &DeleteParams::default()).await?;
            return Ok(Action::await_change());
        }

        let shutdown = self.instances.is_shutdown_by_provider_id(provider_id).await?;
        if let Some(taints) = shutdown_taints(node, shutdown) {
            info!(
                "Server of node {} is {}, {} the shutdown taint",
                name,
                if shutdown { "down" } else { "up" },
                if shutdown { "adding" } else { "removing" }
            );
            let patch = json!({ "spec": { "taints": taints } });
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        }

        let addresses = self.instances.node_addresses_by_provider_id(provider_id).await?;
        if let Some(status) = addresses_patch(node, &addresses) {
            debug!("Updating addresses of node {}", name);
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
                .await?;
        }

        if node_label(node, LABEL_INSTANCE_TYPE).is_none() || node_label(node, LABEL_ZONE).is_none() {
            let instance_type = self.instances.instance_type_by_provider_id(provider_id).await?;
            let zone = zones::zone_by_provider_id(&self.instances, provider_id).await?;
            let labels = missing_labels(node, &instance_type, &zone);
            if !labels.is_empty() {
                let patch = json!({ "metadata": { "labels": labels } });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
            }
        }

        Ok(Action::requeue(NODE_RESYNC_INTERVAL))
    }
}

/// Reconcile one Node
pub async fn reconcile_node<C>(node: Arc<Node>, ctx: Arc<NodeReconciler<C>>) -> Result<Action, ControllerError>
where
    C: IaasClientTrait + Clone + 'static,
{
    let _timer = ctx.metrics.measure("node");
    ctx.metrics.reconciliation("node");
    let api: Api<Node> = Api::all(ctx.client.clone());

    match node_provider_id(&node) {
        None => ctx.initialize(&api, &node).await,
        Some(provider_id) if provider_id.starts_with(&format!("{}://", PROVIDER_NAME)) => {
            ctx.refresh(&api, &node, provider_id).await
        }
        Some(provider_id) => {
            debug!("Node {} belongs to another provider ({})", node.name_any(), provider_id);
            Ok(Action::await_change())
        }
    }
}

/// Log the failure and retry at the resync interval
pub fn node_error_policy<C>(node: Arc<Node>, err: &ControllerError, ctx: Arc<NodeReconciler<C>>) -> Action
where
    C: IaasClientTrait + Clone + 'static,
{
    ctx.metrics.reconcile_failure("node");
    error!("Reconciliation of node {} failed: {}", node.name_any(), err);
    Action::requeue(NODE_RESYNC_INTERVAL)
}
