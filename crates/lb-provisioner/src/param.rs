//! Allocation requests and results

use crate::error::ProvisionError;
use iaas_client::{LoadBalancerPlan, ResourceId};
use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Where the load balancer attaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerType {
    /// Switch behind an upstream router; addresses come from its global block
    #[default]
    Internet,
    /// Plain switch; addresses come from a configured CIDR
    Switch,
}

impl LoadBalancerType {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadBalancerType::Internet => "internet",
            LoadBalancerType::Switch => "switch",
        }
    }
}

impl fmt::Display for LoadBalancerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancerType {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internet" => Ok(LoadBalancerType::Internet),
            "switch" => Ok(LoadBalancerType::Switch),
            other => Err(ProvisionError::InvalidType(other.to_string())),
        }
    }
}

/// Parse a CIDR and return its network base address and mask length.
///
/// `192.2.0.1/24` gives `(192.2.0.0, 24)`; input without a mask is rejected.
pub fn resolve_assign_address(cidr: &str) -> Result<(Ipv4Addr, u8), ProvisionError> {
    let net: Ipv4Net = cidr
        .trim()
        .parse()
        .map_err(|e| ProvisionError::InvalidParam(format!("invalid CIDR {:?}: {}", cidr, e)))?;
    Ok((net.network(), net.prefix_len()))
}

/// Declarative intent for one load balancer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerParam {
    /// Tags identifying load balancers of the same cluster (VRID scope)
    pub cluster_selector: Vec<String>,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Tags selecting the upstream router or the switch
    pub router_tags: Vec<String>,
    pub use_ha: bool,
    pub use_high_spec_plan: bool,
    pub vip: Option<String>,
    /// Network of the switch, e.g. `192.168.11.0/24` (switch type only)
    pub ip_address_range: Option<String>,
    /// Range to hand addresses out of, e.g. `192.168.11.128/28` (switch type only)
    pub assign_ip_address_range: Option<String>,
    pub default_gateway: Option<String>,
    pub lb_type: LoadBalancerType,
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, ProvisionError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProvisionError::InvalidParam(format!("{} is required for switch type load balancers", what)))
}

impl LoadBalancerParam {
    /// Explicit VIP, ignoring an empty string
    pub fn explicit_vip(&self) -> Option<&str> {
        self.vip.as_deref().filter(|v| !v.is_empty())
    }

    /// Base address and mask of the assignment range
    pub fn assign_addresses(&self) -> Result<(Ipv4Addr, u8), ProvisionError> {
        resolve_assign_address(required(&self.assign_ip_address_range, "assign ip address range")?)
    }

    /// Mask length of the switch network
    pub fn nw_mask_len(&self) -> Result<u8, ProvisionError> {
        resolve_assign_address(required(&self.ip_address_range, "ip address range")?).map(|(_, mask)| mask)
    }

    pub fn gateway(&self) -> Result<&str, ProvisionError> {
        required(&self.default_gateway, "default gateway")
    }

    pub fn plan(&self) -> LoadBalancerPlan {
        if self.use_high_spec_plan {
            LoadBalancerPlan::Premium
        } else {
            LoadBalancerPlan::Standard
        }
    }
}

/// Health check applied to every backend of a VIP port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckParam {
    pub protocol: String,
    /// Seconds between checks
    pub delay_loop: u32,
    /// Only sent for http/https
    pub path: String,
    /// Only sent for http/https
    pub status_code: u16,
    /// Backend port
    pub port: u16,
}

impl Default for HealthCheckParam {
    fn default() -> Self {
        Self {
            protocol: "ping".to_string(),
            delay_loop: 10,
            path: "/".to_string(),
            status_code: 200,
            port: 0,
        }
    }
}

impl HealthCheckParam {
    pub fn is_http(&self) -> bool {
        self.protocol == "http" || self.protocol == "https"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VipPort {
    pub port: u16,
    pub health_check: HealthCheckParam,
}

/// VIP ports and the backend node addresses registered behind each of them.
///
/// The VIP itself comes from [`LoadBalancerParam::vip`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VipParam {
    pub ports: Vec<VipPort>,
    pub node_ips: Vec<String>,
}

/// Addresses chosen for a new load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerIps {
    pub switch_id: ResourceId,
    pub vrid: u32,
    pub vip: String,
    pub ip1: String,
    /// Set in HA mode only
    pub ip2: Option<String>,
    pub mask_len: u8,
    pub gateway: String,
}
