//! Main controller implementation.
//!
//! Builds the SAKURA Cloud and Kubernetes clients, then runs the Service and
//! Node watchers next to the probe server until one of them exits.

use crate::config::{CloudConfig, ControllerSettings};
use crate::error::ControllerError;
use crate::instances::Instances;
use crate::loadbalancers::LoadBalancers;
use crate::metrics::Metrics;
use crate::nodes::NodeReconciler;
use crate::reconciler::Reconciler;
use crate::server::{self, ProbeState};
use crate::watcher::{watch_nodes, watch_services};
use iaas_client::{IaasClient, IaasClientTrait};
use k8s_openapi::api::core::v1::{Node, Service};
use kube::{Api, Client};
use lb_provisioner::LoadBalancerProvisioner;
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for SAKURA Cloud load balancers
pub struct Controller {
    service_watcher: Option<JoinHandle<Result<(), ControllerError>>>,
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: CloudConfig, settings: ControllerSettings) -> Result<Self, ControllerError> {
        info!("Initializing load balancer controller");

        let iaas_client = IaasClient::new(config.client_config())?;

        // Validate credentials before watching anything
        info!("Validating SAKURA Cloud credentials for zone {}...", config.zone);
        let auth = iaas_client.auth_status().await.map_err(|e| {
            error!("Failed to validate SAKURA Cloud credentials: {}", e);
            error!("Please ensure SAKURACLOUD_ACCESS_TOKEN and SAKURACLOUD_ACCESS_TOKEN_SECRET are set correctly");
            e
        })?;
        info!(
            "SAKURA Cloud credentials validated (permission: {})",
            auth.permission.as_deref().unwrap_or("unknown")
        );

        let kube_client = Client::try_default().await?;

        let registry = Registry::new();
        let metrics = Metrics::new()?.register(&registry)?;
        let probe_state = ProbeState::new(registry);

        let node_watcher = {
            let instances = Instances::new(iaas_client.clone());
            let reconciler = Arc::new(NodeReconciler::new(kube_client.clone(), instances, metrics.clone()));
            tokio::spawn(watch_nodes(Api::<Node>::all(kube_client.clone()), reconciler))
        };

        let service_watcher = if config.disable_load_balancer {
            info!("Load balancer provisioning is disabled, not watching Services");
            None
        } else {
            let provisioner = Arc::new(LoadBalancerProvisioner::new(iaas_client));
            let load_balancers = LoadBalancers::new(provisioner, config.cluster_id.clone());
            let reconciler = Arc::new(Reconciler::new(kube_client.clone(), load_balancers, metrics));

            let services: Api<Service> = match settings.namespace.as_deref() {
                Some(ns) => Api::namespaced(kube_client.clone(), ns),
                None => Api::all(kube_client.clone()),
            };
            Some(tokio::spawn(watch_services(services, reconciler)))
        };

        let probe_server = {
            let state = probe_state.clone();
            let addr = settings.probe_addr;
            tokio::spawn(async move { server::serve(addr, state).await })
        };

        probe_state.set_ready(true);

        Ok(Self {
            service_watcher,
            node_watcher,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Load balancer controller running");

        match self.service_watcher.as_mut() {
            Some(service_watcher) => {
                tokio::select! {
                    result = service_watcher => {
                        result
                            .map_err(|e| ControllerError::Watch(format!("Service watcher panicked: {}", e)))??;
                        info!("Service watcher exited");
                    }
                    result = &mut self.node_watcher => {
                        result
                            .map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {}", e)))??;
                        info!("Node watcher exited");
                    }
                    result = &mut self.probe_server => {
                        result
                            .map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
                        error!("Probe server exited unexpectedly");
                    }
                }
            }
            None => {
                tokio::select! {
                    result = &mut self.node_watcher => {
                        result
                            .map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {}", e)))??;
                        info!("Node watcher exited");
                    }
                    result = &mut self.probe_server => {
                        result
                            .map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
                        error!("Probe server exited unexpectedly");
                    }
                }
            }
        }

        Ok(())
    }
}
