//! Address-space resolution
//!
//! Turns a switch plus the consumed-address scan into an ordered pool of
//! candidate addresses, along with the mask length and gateway to configure.

use crate::collector::{collect_consumed_addresses, ConsumedAddressSet};
use crate::error::ProvisionError;
use crate::param::{LoadBalancerParam, LoadBalancerType};
use iaas_client::{IaasClientTrait, Switch};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// Free addresses taken out of a switch-type range when creating
pub const INTERNAL_POOL_LIMIT: usize = 3;

/// Pool of candidate addresses for one allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignableIpInfo {
    /// Free addresses, in discovery order
    pub pool: Vec<String>,
    pub consumed: ConsumedAddressSet,
    pub mask_len: u8,
    pub gateway: String,
}

/// Pool of a router-attached switch: the first subnet with a free global
/// address wins; subnets are not merged.
pub fn external_pool(switch: &Switch, consumed: ConsumedAddressSet) -> Result<AssignableIpInfo, ProvisionError> {
    for subnet in &switch.subnets {
        let pool: Vec<String> = subnet
            .global_addresses()?
            .into_iter()
            .filter(|ip| !consumed.contains(ip))
            .collect();
        if pool.is_empty() {
            continue;
        }
        return Ok(AssignableIpInfo {
            pool,
            consumed,
            mask_len: subnet.network_mask_len,
            gateway: subnet.default_route.clone().unwrap_or_default(),
        });
    }
    Err(ProvisionError::GlobalAddressExhausted { switch_id: switch.id })
}

/// Pool of a plain switch, walked upward from one past the base of the
/// assignment range.
///
/// Only the low octet is walked, so ranges wider than a /24 are treated as
/// their first /24. Neither the broadcast address nor the default gateway
/// (when it falls inside the range) is ever offered.
/// `limit` stops the walk once that many free addresses are found.
pub fn internal_pool(
    param: &LoadBalancerParam,
    consumed: ConsumedAddressSet,
    limit: Option<usize>,
) -> Result<AssignableIpInfo, ProvisionError> {
    let (base, assign_mask) = param.assign_addresses()?;
    let mask_len = param.nw_mask_len()?;
    let gateway = param.gateway()?.to_string();

    let span: u32 = if assign_mask >= 24 { 1 << (32 - u32::from(assign_mask)) } else { 256 };
    let base = u32::from(base);
    let limit = limit.unwrap_or(usize::MAX);

    let mut pool = Vec::new();
    for offset in 1..span.saturating_sub(1) {
        if pool.len() >= limit {
            break;
        }
        let candidate = Ipv4Addr::from(base + offset).to_string();
        if candidate == gateway || consumed.contains(&candidate) {
            continue;
        }
        pool.push(candidate);
    }

    Ok(AssignableIpInfo {
        pool,
        consumed,
        mask_len,
        gateway,
    })
}

/// Find the switch the load balancer attaches to.
///
/// Internet type: the switch of the first router matching the selector tags,
/// falling back to the first matching switch. Switch type: the first matching
/// switch.
pub async fn find_lb_switch<C: IaasClientTrait>(client: &C, param: &LoadBalancerParam) -> Result<Switch, ProvisionError> {
    if param.lb_type == LoadBalancerType::Internet {
        let routers = client.find_routers(&param.router_tags).await?;
        if let Some(switch) = routers.first().and_then(|router| router.switch) {
            debug!("router {} hands its subnet to switch {}", routers[0].id, switch.id);
            return Ok(client.read_switch(switch.id).await?);
        }
    }

    client
        .find_switches(&param.router_tags)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ProvisionError::ResourceNotFound {
            kind: "switch",
            tags: param.router_tags.clone(),
        })
}

/// Scan the switch and derive the candidate pool for the parameter's type
pub async fn resolve_pool<C>(
    client: &C,
    param: &LoadBalancerParam,
    switch: &Switch,
    deadline: Duration,
    limit: Option<usize>,
) -> Result<AssignableIpInfo, ProvisionError>
where
    C: IaasClientTrait + Clone + 'static,
{
    let consumed = collect_consumed_addresses(client, switch.id, deadline).await?;
    debug!("{} addresses consumed on switch {}", consumed.len(), switch.id);
    match param.lb_type {
        LoadBalancerType::Internet => external_pool(switch, consumed),
        LoadBalancerType::Switch => internal_pool(param, consumed, limit),
    }
}
