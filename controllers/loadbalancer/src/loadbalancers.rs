//! Load balancer operations for one Service.
//!
//! Wraps the provisioner with Service translation: get, ensure (create or
//! update), update and ensure-deleted, keyed by the Service-derived name.

use crate::error::ControllerError;
use crate::service;
use iaas_client::IaasClientTrait;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::ResourceExt;
use lb_provisioner::LoadBalancerProvisioner;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wait for a new or migrating appliance to come up
pub const DEFAULT_BOOT_WAIT: Duration = Duration::from_secs(10 * 60);
/// Wait for an appliance to shut down before deleting it
pub const DEFAULT_SHUTDOWN_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct LoadBalancers<C> {
    provisioner: Arc<LoadBalancerProvisioner<C>>,
    cluster_id: String,
    boot_wait: Duration,
    shutdown_wait: Duration,
}

impl<C> LoadBalancers<C>
where
    C: IaasClientTrait + Clone + 'static,
{
    pub fn new(provisioner: Arc<LoadBalancerProvisioner<C>>, cluster_id: impl Into<String>) -> Self {
        Self {
            provisioner,
            cluster_id: cluster_id.into(),
            boot_wait: DEFAULT_BOOT_WAIT,
            shutdown_wait: DEFAULT_SHUTDOWN_WAIT,
        }
    }

    /// VIPs of the Service's load balancer; `None` when there is none with a VIP
    pub async fn get(&self, svc: &Service) -> Result<Option<Vec<String>>, ControllerError> {
        let name = service::load_balancer_name(svc)?;
        Ok(self.provisioner.status(&name, self.boot_wait).await?)
    }

    /// Create the load balancer when absent, otherwise bring its settings in
    /// line with the Service and `nodes`. Returns the VIPs.
    pub async fn ensure(&self, svc: &Service, nodes: &[Node]) -> Result<Vec<String>, ControllerError> {
        let name = service::load_balancer_name(svc)?;
        let lb_type = service::load_balancer_type(svc)?;

        // waits for an appliance that is still migrating
        self.provisioner.status(&name, self.boot_wait).await?;

        if self.provisioner.find_by_name(&name).await?.is_some() {
            self.update(svc, nodes).await?;
            return Ok(self.get(svc).await?.unwrap_or_default());
        }

        let param = service::load_balancer_param(svc, &self.cluster_id, lb_type)?;
        let vip_param = service::vip_param(svc, nodes, lb_type)?;
        info!(
            "Creating {} load balancer {} for Service {}/{}",
            lb_type,
            name,
            svc.namespace().unwrap_or_default(),
            svc.name_any()
        );
        Ok(self.provisioner.provision_create(&param, &vip_param, self.boot_wait).await?)
    }

    /// Replace the settings of the Service's existing load balancer
    pub async fn update(&self, svc: &Service, nodes: &[Node]) -> Result<Vec<String>, ControllerError> {
        let name = service::load_balancer_name(svc)?;
        let current = self
            .provisioner
            .find_by_name(&name)
            .await?
            .ok_or_else(|| ControllerError::LoadBalancerNotFound(name.clone()))?;
        let lb_type = service::load_balancer_type(svc)?;
        let param = service::load_balancer_param(svc, &self.cluster_id, lb_type)?;
        let vip_param = service::vip_param(svc, nodes, lb_type)?;
        Ok(self.provisioner.provision_update(&current, &param, &vip_param).await?)
    }

    /// Delete the Service's load balancer if there is one
    pub async fn ensure_deleted(&self, svc: &Service) -> Result<bool, ControllerError> {
        let name = service::load_balancer_name(svc)?;
        let deleted = self.provisioner.ensure_deleted(&name, self.shutdown_wait).await?;
        if deleted {
            info!(
                "Deleted load balancer {} of Service {}/{}",
                name,
                svc.namespace().unwrap_or_default(),
                svc.name_any()
            );
        }
        Ok(deleted)
    }
}
