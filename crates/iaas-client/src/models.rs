//! SAKURA Cloud API models
//!
//! These models follow the IaaS API 1.1 JSON shapes: PascalCase keys,
//! identifiers encoded as strings, and `null` wherever a list is empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::IaasError;

/// Resource identifier.
///
/// The API encodes identifiers as JSON strings; numbers are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceId(pub i64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ResourceId)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(i64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(ResourceId(n)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Treats an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Reference to another resource (`{"ID": "..."}`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceRef {
    #[serde(rename = "ID")]
    pub id: ResourceId,
}

impl From<ResourceId> for ResourceRef {
    fn from(id: ResourceId) -> Self {
        Self { id }
    }
}

/// Power state of a server or appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Up,
    Down,
    Cleaning,
    #[serde(other)]
    Unknown,
}

/// Instance block carrying the power state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    #[serde(default)]
    pub status: Option<InstanceStatus>,
}

/// Lifecycle status of an appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Migrating,
    Uploading,
    Failed,
    Discontinued,
    #[serde(other)]
    Unknown,
}

/// Result of the auth-status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct AuthStatus {
    #[serde(default)]
    pub account: Option<ResourceRef>,
    #[serde(default)]
    pub permission: Option<String>,
}

/// Zone a resource lives in (`{"ID": "...", "Name": "is1b"}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneRef {
    #[serde(rename = "ID", default)]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
}

/// Plan of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ServerPlan {
    #[serde(rename = "ID", default)]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "CPU", default)]
    pub cpu: Option<u32>,
    #[serde(rename = "MemoryMB", default)]
    pub memory_mb: Option<u32>,
    /// Billing class, e.g. `cloud/plan/core/2core-4gb`
    #[serde(default)]
    pub service_class: String,
}

/// Server model (`/server`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Server {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    /// Matched against the Kubernetes node name
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    /// NICs in slot order; the first one carries the node address
    #[serde(default, deserialize_with = "nullable")]
    pub interfaces: Vec<ServerInterface>,
    #[serde(default)]
    pub instance: Option<Instance>,
    #[serde(default)]
    pub server_plan: Option<ServerPlan>,
    #[serde(default)]
    pub zone: Option<ZoneRef>,
}

impl Server {
    pub fn instance_status(&self) -> Option<InstanceStatus> {
        self.instance.as_ref().and_then(|i| i.status)
    }

    /// Plan service class with `/` replaced by `-`, usable as a label value
    pub fn instance_type(&self) -> Option<String> {
        self.server_plan
            .as_ref()
            .map(|plan| plan.service_class.as_str())
            .filter(|class| !class.is_empty())
            .map(|class| class.replace('/', "-"))
    }

    /// Name of the zone the server runs in
    pub fn zone_name(&self) -> Option<&str> {
        self.zone.as_ref().map(|z| z.name.as_str()).filter(|n| !n.is_empty())
    }

    /// Address of the first NIC: the platform address on a shared segment,
    /// the declared one on a user switch.
    pub fn primary_address(&self) -> Option<&str> {
        let nic = self.interfaces.first()?;
        let address = match nic.switch?.scope? {
            SwitchScope::Shared => nic.ip_address.as_deref(),
            SwitchScope::User => nic.user_ip_address.as_deref(),
            SwitchScope::Unknown => None,
        };
        address.filter(|a| !a.is_empty())
    }
}

/// Scope of the switch a server NIC is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchScope {
    /// Shared segment provided by the platform
    Shared,
    /// Switch created by the user
    User,
    #[serde(other)]
    Unknown,
}

/// Switch reference embedded in a server NIC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceSwitch {
    #[serde(rename = "ID", default)]
    pub id: ResourceId,
    #[serde(default)]
    pub scope: Option<SwitchScope>,
}

/// Network interface of a server
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInterface {
    #[serde(rename = "ID", default)]
    pub id: ResourceId,
    /// Address assigned by the platform on shared segments
    #[serde(rename = "IPAddress", default)]
    pub ip_address: Option<String>,
    /// Address the user declared for the interface
    #[serde(rename = "UserIPAddress", default)]
    pub user_ip_address: Option<String>,
    /// Unset for a disconnected NIC
    #[serde(default)]
    pub switch: Option<InterfaceSwitch>,
}

/// Switch model (`/switch`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Switch {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub subnets: Vec<Subnet>,
    /// Upstream router, set when the switch is router-attached
    #[serde(default)]
    pub internet: Option<ResourceRef>,
}

/// Subnet attached to a switch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    #[serde(rename = "ID", default)]
    pub id: ResourceId,
    /// Gateway of the subnet
    #[serde(default)]
    pub default_route: Option<String>,
    #[serde(default)]
    pub next_hop: Option<String>,
    /// Dotted network address, e.g. `192.0.2.0`
    #[serde(default)]
    pub network_address: String,
    #[serde(default)]
    pub network_mask_len: u8,
    /// Global addresses routed to this subnet, present on router-attached switches
    #[serde(rename = "IPAddresses", default)]
    pub ip_addresses: Option<IpAddressRange>,
}

/// Inclusive range of assignable global addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct IpAddressRange {
    /// Lowest address, inclusive
    pub min: String,
    /// Highest address, inclusive
    pub max: String,
}

impl Subnet {
    /// Enumerates every global address of the subnet in ascending order.
    ///
    /// Returns an empty list when the subnet carries no global range.
    pub fn global_addresses(&self) -> Result<Vec<String>, IaasError> {
        let Some(range) = &self.ip_addresses else {
            return Ok(Vec::new());
        };
        let parse = |s: &str| {
            s.parse::<Ipv4Addr>()
                .map(u32::from)
                .map_err(|e| IaasError::InvalidResponse(format!("subnet {} address {:?}: {}", self.id, s, e)))
        };
        let min = parse(&range.min)?;
        let max = parse(&range.max)?;
        Ok((min..=max).map(|n| Ipv4Addr::from(n).to_string()).collect())
    }
}

/// Router model (`/internet`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Router {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    /// Switch the router hands its global subnet to
    #[serde(default)]
    pub switch: Option<ResourceRef>,
    #[serde(default)]
    pub band_width_mbps: Option<u32>,
}

/// Interface of an appliance (load balancer, VPC router, database)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ApplianceInterface {
    /// Unset on interfaces that carry no address (e.g. the HA peer slot)
    #[serde(rename = "IPAddress", default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub switch: Option<ResourceRef>,
}

/// Backend server entry stored in an appliance remark.
///
/// Remarks are loosely typed upstream; entries that do not decode to this
/// shape are dropped rather than failing the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RemarkServer {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: Option<String>,
}

fn remark_servers<'de, D>(deserializer: D) -> Result<Vec<RemarkServer>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RemarkServer>(v).ok())
        .collect())
}

fn remark_addresses(servers: &[RemarkServer]) -> impl Iterator<Item = &str> {
    servers
        .iter()
        .filter_map(|s| s.ip_address.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// VRRP block of a load balancer remark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Vrrp {
    /// 0 when the record carries no usable VRID
    #[serde(rename = "VRID", default, deserialize_with = "nullable")]
    pub vrid: u32,
}

/// Network block of a load balancer remark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RemarkNetwork {
    #[serde(default, deserialize_with = "nullable")]
    pub network_mask_len: u8,
    /// Gateway handed to the appliance
    #[serde(default, deserialize_with = "nullable")]
    pub default_route: String,
}

/// Remark of a load balancer appliance
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerRemark {
    #[serde(rename = "VRRP", default)]
    pub vrrp: Option<Vrrp>,
    /// Switch the appliance was created on
    #[serde(default)]
    pub switch: Option<ResourceRef>,
    #[serde(default)]
    pub network: Option<RemarkNetwork>,
    /// Appliance interface addresses, one per node of the appliance
    #[serde(default, deserialize_with = "remark_servers")]
    pub servers: Vec<RemarkServer>,
    #[serde(default)]
    pub plan: Option<ResourceRef>,
}

/// Health check rule of a backend server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    /// `tcp`, `http`, `https` or `ping`
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Backend server behind a VIP port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerServer {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    /// Decimal port, the API encodes numbers as strings here
    pub port: String,
    pub health_check: HealthCheck,
    /// `"True"` or `"False"`
    pub enabled: String,
}

/// One VIP/port setting of a load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerSetting {
    #[serde(rename = "VirtualIPAddress")]
    pub virtual_ip_address: String,
    pub port: String,
    /// Health check interval in seconds
    #[serde(default)]
    pub delay_loop: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorry_server: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub servers: Vec<LoadBalancerServer>,
}

/// Settings block of a load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerSettings {
    #[serde(default, deserialize_with = "nullable")]
    pub load_balancer: Vec<LoadBalancerSetting>,
}

/// Load balancer appliance (`/appliance`, class `loadbalancer`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancer {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub availability: Option<Availability>,
    #[serde(default)]
    pub instance: Option<Instance>,
    #[serde(default)]
    pub switch: Option<ResourceRef>,
    #[serde(default, deserialize_with = "nullable")]
    pub interfaces: Vec<ApplianceInterface>,
    /// Creation-time parameters; `null` decodes as an empty remark
    #[serde(default, deserialize_with = "nullable")]
    pub remark: LoadBalancerRemark,
    #[serde(default)]
    pub settings: Option<LoadBalancerSettings>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl LoadBalancer {
    /// Switch the appliance is attached to
    pub fn switch_id(&self) -> Option<ResourceId> {
        self.switch
            .or_else(|| self.interfaces.first().and_then(|nic| nic.switch))
            .or(self.remark.switch)
            .map(|r| r.id)
    }

    /// VRID recorded in the VRRP remark
    pub fn vrid(&self) -> Option<u32> {
        self.remark.vrrp.map(|v| v.vrid)
    }

    /// VIP/port settings, empty when none are configured
    pub fn vip_settings(&self) -> &[LoadBalancerSetting] {
        self.settings
            .as_ref()
            .map(|s| s.load_balancer.as_slice())
            .unwrap_or_default()
    }

    /// Every configured VIP, in settings order (may repeat across ports)
    pub fn vips(&self) -> impl Iterator<Item = &str> {
        self.vip_settings()
            .iter()
            .map(|s| s.virtual_ip_address.as_str())
    }

    /// Appliance interface addresses recorded in the remark
    pub fn remark_addresses(&self) -> impl Iterator<Item = &str> {
        remark_addresses(&self.remark.servers)
    }

    pub fn is_failed(&self) -> bool {
        self.availability == Some(Availability::Failed)
    }

    pub fn is_migrating(&self) -> bool {
        self.availability == Some(Availability::Migrating)
    }

    pub fn is_available(&self) -> bool {
        self.availability == Some(Availability::Available)
    }

    pub fn instance_status(&self) -> Option<InstanceStatus> {
        self.instance.as_ref().and_then(|i| i.status)
    }
}

/// Router interface configured inside a VPC router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct VpcRouterInterface {
    /// Real addresses, two on the redundant variant
    #[serde(rename = "IPAddress", default, deserialize_with = "nullable")]
    pub ip_address: Vec<String>,
    #[serde(rename = "IPAliases", default, deserialize_with = "nullable")]
    pub ip_aliases: Vec<String>,
    /// Shared address of the redundant variant
    #[serde(rename = "VirtualIPAddress", default)]
    pub virtual_ip_address: Option<String>,
    #[serde(default)]
    pub network_mask_len: Option<u8>,
}

/// Router block of the VPC router settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct VpcRouterSetting {
    /// Slot-indexed; unused slots come back as `null`
    #[serde(default, deserialize_with = "nullable")]
    pub interfaces: Vec<Option<VpcRouterInterface>>,
}

/// Settings block of a VPC router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct VpcRouterSettings {
    #[serde(default)]
    pub router: Option<VpcRouterSetting>,
}

/// VPC router appliance (`/appliance`, class `vpcrouter`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct VpcRouter {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub interfaces: Vec<ApplianceInterface>,
    #[serde(default)]
    pub settings: Option<VpcRouterSettings>,
}

impl VpcRouter {
    /// Switch of the first (public side) interface
    pub fn switch_id(&self) -> Option<ResourceId> {
        self.interfaces.first().and_then(|nic| nic.switch).map(|r| r.id)
    }

    /// Router interface configured for the first slot
    pub fn primary_interface(&self) -> Option<&VpcRouterInterface> {
        self.settings
            .as_ref()
            .and_then(|s| s.router.as_ref())
            .and_then(|r| r.interfaces.first())
            .and_then(Option::as_ref)
    }
}

/// Remark of a database appliance
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseRemark {
    #[serde(default, deserialize_with = "remark_servers")]
    pub servers: Vec<RemarkServer>,
    #[serde(default)]
    pub switch: Option<ResourceRef>,
}

/// Database appliance (`/appliance`, class `database`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Database {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub switch: Option<ResourceRef>,
    #[serde(default, deserialize_with = "nullable")]
    pub interfaces: Vec<ApplianceInterface>,
    #[serde(default, deserialize_with = "nullable")]
    pub remark: DatabaseRemark,
}

impl Database {
    /// Switch the database is attached to
    pub fn switch_id(&self) -> Option<ResourceId> {
        self.switch
            .or_else(|| self.interfaces.first().and_then(|nic| nic.switch))
            .or(self.remark.switch)
            .map(|r| r.id)
    }

    /// Server addresses recorded in the remark
    pub fn remark_addresses(&self) -> impl Iterator<Item = &str> {
        remark_addresses(&self.remark.servers)
    }
}

/// Billing plan of a load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerPlan {
    #[default]
    Standard,
    Premium,
}

impl LoadBalancerPlan {
    /// Plan identifier used by the API
    pub fn id(self) -> ResourceId {
        match self {
            LoadBalancerPlan::Standard => ResourceId(1),
            LoadBalancerPlan::Premium => ResourceId(2),
        }
    }
}

/// Request body for creating a load balancer.
///
/// `ip_address2` is set for the redundant (HA) variant only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub plan: LoadBalancerPlan,
    pub switch_id: ResourceId,
    pub vrid: u32,
    pub ip_address1: String,
    pub ip_address2: Option<String>,
    pub network_mask_len: u8,
    pub default_route: String,
    pub settings: Vec<LoadBalancerSetting>,
}

impl CreateLoadBalancerRequest {
    /// True for the redundant two-appliance variant
    pub fn is_ha(&self) -> bool {
        self.ip_address2.is_some()
    }

    /// Builds the `Appliance` body expected by `POST /appliance`
    pub fn to_body(&self) -> serde_json::Value {
        let mut servers = vec![serde_json::json!({ "IPAddress": self.ip_address1 })];
        if let Some(ip2) = &self.ip_address2 {
            servers.push(serde_json::json!({ "IPAddress": ip2 }));
        }
        let plan = serde_json::json!({ "ID": self.plan.id() });
        serde_json::json!({
            "Appliance": {
                "Class": "loadbalancer",
                "Name": self.name,
                "Description": self.description,
                "Tags": self.tags,
                "Plan": plan,
                "Remark": {
                    "Switch": { "ID": self.switch_id },
                    "VRRP": { "VRID": self.vrid },
                    "Network": {
                        "NetworkMaskLen": self.network_mask_len,
                        "DefaultRoute": self.default_route,
                    },
                    "Servers": servers,
                    "Plan": plan,
                },
                "Settings": { "LoadBalancer": self.settings },
            }
        })
    }
}

/// Request body for replacing the VIP settings of a load balancer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateLoadBalancerRequest {
    pub settings: Vec<LoadBalancerSetting>,
}

impl UpdateLoadBalancerRequest {
    /// Builds the `Appliance` body expected by `PUT /appliance/{id}`
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "Appliance": {
                "Settings": { "LoadBalancer": self.settings },
            }
        })
    }
}
