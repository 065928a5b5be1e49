//! Allocation selection
//!
//! Picks the appliance addresses and the VIP out of a resolved pool, and a
//! VRID unique among the load balancers sharing the switch.

use crate::collector::ConsumedAddressSet;
use crate::error::ProvisionError;
use iaas_client::{IaasClientTrait, LoadBalancer, ResourceId};
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Highest VRID handed out
pub const MAX_VRID: u32 = 255;

/// Addresses picked for one load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub ip1: String,
    pub ip2: Option<String>,
    pub vip: String,
}

/// Number of pool addresses an allocation needs
pub fn required_pool_size(use_ha: bool, explicit_vip: bool) -> usize {
    match (use_ha, explicit_vip) {
        (true, false) => 3,
        (true, true) | (false, false) => 2,
        (false, true) => 1,
    }
}

/// Pick ip1, ip2 (HA only) and the VIP, in pool order.
///
/// An explicit VIP must not be consumed and is never handed out as an
/// appliance address.
pub fn choose_addresses(
    pool: &[String],
    consumed: &ConsumedAddressSet,
    use_ha: bool,
    explicit_vip: Option<&str>,
) -> Result<Selection, ProvisionError> {
    if let Some(vip) = explicit_vip {
        if consumed.contains(vip) {
            return Err(ProvisionError::VipInUse(vip.to_string()));
        }
    }

    let candidates: Vec<&String> = pool
        .iter()
        .filter(|ip| !consumed.contains(*ip) && Some(ip.as_str()) != explicit_vip)
        .collect();

    let needed = required_pool_size(use_ha, explicit_vip.is_some());
    if candidates.len() < needed {
        return Err(ProvisionError::AddressExhausted {
            needed,
            available: candidates.len(),
        });
    }

    let ip1 = candidates[0].clone();
    let ip2 = use_ha.then(|| candidates[1].clone());
    let vip = match explicit_vip {
        Some(vip) => vip.to_string(),
        None => candidates[needed - 1].clone(),
    };
    Ok(Selection { ip1, ip2, vip })
}

fn parse_ip(ip: &str) -> Result<Ipv4Addr, ProvisionError> {
    ip.parse()
        .map_err(|e| ProvisionError::InvalidParam(format!("invalid address {:?}: {}", ip, e)))
}

/// Require the VIP to lie in the `mask_len` network of ip1
pub fn ensure_same_network(ip1: &str, vip: &str, mask_len: u8) -> Result<(), ProvisionError> {
    let network = Ipv4Net::new(parse_ip(ip1)?, mask_len)
        .map_err(|e| ProvisionError::InvalidParam(format!("invalid mask length {}: {}", mask_len, e)))?
        .trunc();
    if network.contains(&parse_ip(vip)?) {
        Ok(())
    } else {
        Err(ProvisionError::VipOutOfNetwork {
            vip: vip.to_string(),
            network: network.to_string(),
        })
    }
}

/// VRIDs of the load balancers attached to `switch_id`
pub fn vrids_on_switch(lbs: &[LoadBalancer], switch_id: ResourceId) -> BTreeSet<u32> {
    lbs.iter()
        .filter(|lb| lb.switch_id() == Some(switch_id))
        .filter_map(LoadBalancer::vrid)
        .collect()
}

/// Smallest VRID in `1..=MAX_VRID` not in `used`
pub fn first_free_vrid(used: &BTreeSet<u32>) -> Option<u32> {
    (1..=MAX_VRID).find(|vrid| !used.contains(vrid))
}

/// Select a VRID unique among the cluster's load balancers on `switch_id`
pub async fn select_vrid<C: IaasClientTrait>(
    client: &C,
    cluster_selector: &[String],
    switch_id: ResourceId,
) -> Result<u32, ProvisionError> {
    let lbs = client.find_load_balancers(cluster_selector).await?;
    let used = vrids_on_switch(&lbs, switch_id);
    first_free_vrid(&used).ok_or(ProvisionError::VridExhausted {
        switch_id,
        max: MAX_VRID,
    })
}
