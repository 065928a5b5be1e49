//! Load balancer provisioning
//!
//! Drives an appliance through create (allocate, create, copy wait, boot
//! wait, apply), update (settings replace, apply) and delete (stop, down
//! wait, delete). Nothing is rolled back on failure; the next reconcile sees
//! whatever state the appliance was left in.

use crate::collector::DEFAULT_COLLECT_TIMEOUT;
use crate::error::ProvisionError;
use crate::param::{LoadBalancerIps, LoadBalancerParam, VipParam};
use crate::resolver::{find_lb_switch, resolve_pool, INTERNAL_POOL_LIMIT};
use crate::selector::{choose_addresses, ensure_same_network, select_vrid};
use iaas_client::{
    CreateLoadBalancerRequest, HealthCheck, IaasClientTrait, LoadBalancer, LoadBalancerServer, LoadBalancerSetting,
    ResourceId, UpdateLoadBalancerRequest,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Build one VIP setting per port, each listing every backend node
pub fn build_settings(vip: &str, vip_param: &VipParam) -> Vec<LoadBalancerSetting> {
    vip_param
        .ports
        .iter()
        .map(|port| {
            let hc = &port.health_check;
            let health_check = HealthCheck {
                protocol: hc.protocol.clone(),
                path: hc.is_http().then(|| hc.path.clone()),
                status: hc.is_http().then(|| hc.status_code.to_string()),
            };
            LoadBalancerSetting {
                virtual_ip_address: vip.to_string(),
                port: port.port.to_string(),
                delay_loop: hc.delay_loop.to_string(),
                sorry_server: None,
                servers: vip_param
                    .node_ips
                    .iter()
                    .map(|ip| LoadBalancerServer {
                        ip_address: ip.clone(),
                        port: hc.port.to_string(),
                        health_check: health_check.clone(),
                        enabled: "True".to_string(),
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Build the create request from the allocated addresses
pub fn build_create_request(
    param: &LoadBalancerParam,
    vip_param: &VipParam,
    ips: &LoadBalancerIps,
) -> CreateLoadBalancerRequest {
    CreateLoadBalancerRequest {
        name: param.name.clone(),
        description: param.description.clone(),
        tags: param.tags.clone(),
        plan: param.plan(),
        switch_id: ips.switch_id,
        vrid: ips.vrid,
        ip_address1: ips.ip1.clone(),
        ip_address2: ips.ip2.clone(),
        network_mask_len: ips.mask_len,
        default_route: ips.gateway.clone(),
        settings: build_settings(&ips.vip, vip_param),
    }
}

/// VIPs of an appliance in settings order, without repeats
pub fn distinct_vips(lb: &LoadBalancer) -> Vec<String> {
    let mut vips: Vec<String> = Vec::new();
    for vip in lb.vips() {
        if !vips.iter().any(|v| v == vip) {
            vips.push(vip.to_string());
        }
    }
    vips
}

/// Provisioning engine bound to one API client
#[derive(Debug)]
pub struct LoadBalancerProvisioner<C> {
    client: C,
    allocation_guard: Mutex<()>,
    collect_timeout: Duration,
}

impl<C> LoadBalancerProvisioner<C>
where
    C: IaasClientTrait + Clone + 'static,
{
    pub fn new(client: C) -> Self {
        Self {
            client,
            allocation_guard: Mutex::new(()),
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
        }
    }

    /// Override the consumed-address collection deadline
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Choose the switch, VRID and addresses for a new load balancer.
    ///
    /// Every call re-derives state from a live scan; nothing is reserved.
    pub async fn allocate(&self, param: &LoadBalancerParam) -> Result<LoadBalancerIps, ProvisionError> {
        let switch = find_lb_switch(&self.client, param).await?;
        let vrid = select_vrid(&self.client, &param.cluster_selector, switch.id).await?;
        let info = resolve_pool(
            &self.client,
            param,
            &switch,
            self.collect_timeout,
            Some(INTERNAL_POOL_LIMIT),
        )
        .await?;

        let selection = choose_addresses(&info.pool, &info.consumed, param.use_ha, param.explicit_vip())?;
        ensure_same_network(&selection.ip1, &selection.vip, info.mask_len)?;

        debug!(
            "allocated switch={} vrid={} ip1={} ip2={:?} vip={}",
            switch.id, vrid, selection.ip1, selection.ip2, selection.vip
        );
        Ok(LoadBalancerIps {
            switch_id: switch.id,
            vrid,
            vip: selection.vip,
            ip1: selection.ip1,
            ip2: selection.ip2,
            mask_len: info.mask_len,
            gateway: info.gateway,
        })
    }

    /// Allocate and create a load balancer, wait for it to boot and apply
    /// its configuration. Returns the VIP.
    pub async fn provision_create(
        &self,
        param: &LoadBalancerParam,
        vip_param: &VipParam,
        timeout: Duration,
    ) -> Result<Vec<String>, ProvisionError> {
        let (ips, lb) = {
            let _allocating = self.allocation_guard.lock().await;
            let ips = self.allocate(param).await?;
            let request = build_create_request(param, vip_param, &ips);
            let lb = self.client.create_load_balancer(&request).await?;
            (ips, lb)
        };
        info!("Created load balancer {} ({}), VIP {}", lb.name, lb.id, ips.vip);

        self.client.wait_until_copy_done(lb.id, timeout).await?;
        self.client.wait_until_active(lb.id, timeout).await?;
        self.client.apply_load_balancer_config(lb.id).await?;
        info!("Load balancer {} is up", lb.id);

        Ok(vec![ips.vip])
    }

    /// Replace the VIP settings of an existing appliance and re-apply them.
    ///
    /// A VIP different from the current one must be free on the appliance's
    /// switch. Without an explicit VIP the current one is kept.
    pub async fn provision_update(
        &self,
        current: &LoadBalancer,
        param: &LoadBalancerParam,
        vip_param: &VipParam,
    ) -> Result<Vec<String>, ProvisionError> {
        let current_vip = current.vips().next().map(str::to_string);

        let vip = match (param.explicit_vip(), current_vip) {
            (Some(requested), Some(current_vip)) if current_vip == requested => current_vip,
            (Some(requested), _) => {
                self.ensure_vip_assignable(current, param, requested).await?;
                requested.to_string()
            }
            (None, Some(current_vip)) => current_vip,
            (None, None) => return Err(ProvisionError::NoVip(current.id)),
        };

        let request = UpdateLoadBalancerRequest {
            settings: build_settings(&vip, vip_param),
        };
        self.client.update_load_balancer(current.id, &request).await?;
        self.client.apply_load_balancer_config(current.id).await?;
        info!("Updated load balancer {} ({} ports, VIP {})", current.id, vip_param.ports.len(), vip);

        Ok(vec![vip])
    }

    async fn ensure_vip_assignable(
        &self,
        current: &LoadBalancer,
        param: &LoadBalancerParam,
        requested: &str,
    ) -> Result<(), ProvisionError> {
        let switch_id = current.switch_id().ok_or_else(|| {
            ProvisionError::InvalidParam(format!("load balancer {} is not attached to a switch", current.id))
        })?;
        let switch = self.client.read_switch(switch_id).await?;
        let info = resolve_pool(&self.client, param, &switch, self.collect_timeout, None).await?;
        if info.pool.iter().any(|ip| ip == requested) {
            Ok(())
        } else {
            Err(ProvisionError::VipNotAssignable(requested.to_string()))
        }
    }

    /// Stop the appliance, wait for it to go down, then delete it.
    ///
    /// The delete is not attempted when stopping fails.
    pub async fn provision_delete(&self, id: ResourceId, timeout: Duration) -> Result<(), ProvisionError> {
        self.client.stop_load_balancer(id).await?;
        self.client.wait_until_down(id, timeout).await?;
        self.client.delete_load_balancer(id).await?;
        info!("Deleted load balancer {}", id);
        Ok(())
    }

    /// First appliance named `name` that has not failed
    pub async fn find_by_name(&self, name: &str) -> Result<Option<LoadBalancer>, ProvisionError> {
        let lbs = self.client.find_load_balancers(&[]).await?;
        Ok(lbs.into_iter().find(|lb| !lb.is_failed() && lb.name == name))
    }

    /// VIPs of the appliance named `name`.
    ///
    /// Waits for a still-migrating appliance to come up first. `None` when the
    /// appliance is absent or has no VIP configured.
    pub async fn status(&self, name: &str, boot_wait: Duration) -> Result<Option<Vec<String>>, ProvisionError> {
        let Some(mut lb) = self.find_by_name(name).await? else {
            return Ok(None);
        };
        if lb.is_migrating() {
            debug!("Load balancer {} is still migrating", lb.id);
            self.client.wait_until_copy_done(lb.id, boot_wait).await?;
            lb = self.client.wait_until_active(lb.id, boot_wait).await?;
        }
        let vips = distinct_vips(&lb);
        Ok((!vips.is_empty()).then_some(vips))
    }

    /// Delete the appliance named `name` if present. Returns whether one was deleted.
    pub async fn ensure_deleted(&self, name: &str, timeout: Duration) -> Result<bool, ProvisionError> {
        match self.find_by_name(name).await? {
            None => Ok(false),
            Some(lb) => {
                self.provision_delete(lb.id, timeout).await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{HealthCheckParam, VipPort};
    use iaas_client::mock::helpers;

    fn vip_param(ports: &[(u16, &str)], nodes: &[&str]) -> VipParam {
        VipParam {
            ports: ports
                .iter()
                .map(|(port, protocol)| VipPort {
                    port: *port,
                    health_check: HealthCheckParam {
                        protocol: (*protocol).to_string(),
                        port: *port,
                        ..Default::default()
                    },
                })
                .collect(),
            node_ips: nodes.iter().map(|n| (*n).to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_settings_health_checks() {
        let settings = build_settings(
            "203.0.113.10",
            &vip_param(&[(80, "http"), (5432, "ping")], &["198.51.100.1", "198.51.100.2"]),
        );
        assert_eq!(settings.len(), 2);

        let http = &settings[0];
        assert_eq!(http.virtual_ip_address, "203.0.113.10");
        assert_eq!(http.port, "80");
        assert_eq!(http.delay_loop, "10");
        assert_eq!(http.servers.len(), 2);
        assert_eq!(http.servers[0].health_check.path.as_deref(), Some("/"));
        assert_eq!(http.servers[0].health_check.status.as_deref(), Some("200"));
        assert!(http.servers.iter().all(|s| s.enabled == "True"));

        let ping = &settings[1];
        assert_eq!(ping.servers[1].ip_address, "198.51.100.2");
        assert_eq!(ping.servers[1].port, "5432");
        assert_eq!(ping.servers[1].health_check.path, None);
        assert_eq!(ping.servers[1].health_check.status, None);
    }

    #[test]
    fn test_distinct_vips_keeps_settings_order() {
        let mut lb = helpers::load_balancer(1, "lb", 100, 1, &[], &["203.0.113.10", "203.0.113.11"]);
        if let Some(settings) = lb.settings.as_mut() {
            settings
                .load_balancer
                .push(helpers::vip_setting("203.0.113.10", 443, &[]));
        }
        assert_eq!(distinct_vips(&lb), vec!["203.0.113.10", "203.0.113.11"]);
    }
}
