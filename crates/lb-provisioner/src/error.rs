//! Provisioning errors

use crate::collector::AddressSource;
use iaas_client::{IaasError, ResourceId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while allocating addresses or driving an appliance
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Malformed caller input (CIDR, gateway, address)
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid LoadBalancer type {0:?} is specified")]
    InvalidType(String),

    /// A tag selector matched nothing
    #[error("{kind} resource (with tags {tags:?}) is not found")]
    ResourceNotFound { kind: &'static str, tags: Vec<String> },

    #[error("usable ip-address not found: {needed} required, {available} available")]
    AddressExhausted { needed: usize, available: usize },

    #[error("usable global-ip-address not found on switch {switch_id}")]
    GlobalAddressExhausted { switch_id: ResourceId },

    #[error("no unused VRID in 1..={max} on switch {switch_id}")]
    VridExhausted { switch_id: ResourceId, max: u32 },

    #[error("VIP {0:?} is already used")]
    VipInUse(String),

    #[error("VIP {vip:?} must be in same LB network {network:?}")]
    VipOutOfNetwork { vip: String, network: String },

    #[error("can't use specified VIP {0:?}")]
    VipNotAssignable(String),

    #[error("load balancer {0} has no VIP configured")]
    NoVip(ResourceId),

    /// The five-way consumed-address scan ran past its deadline
    #[error("extracting consumed addresses on switch {switch_id} timed out after {timeout:?}")]
    CollectTimeout { switch_id: ResourceId, timeout: Duration },

    /// One consumed-address scan failed
    #[error("scanning {kind} for consumed addresses failed: {error}")]
    Scan {
        kind: AddressSource,
        #[source]
        error: IaasError,
    },

    #[error("consumed address scan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Iaas(#[from] IaasError),
}

impl ProvisionError {
    /// True for the collection deadline and the remote wait timeouts
    pub fn is_timeout(&self) -> bool {
        match self {
            ProvisionError::CollectTimeout { .. } => true,
            ProvisionError::Iaas(e) | ProvisionError::Scan { error: e, .. } => e.is_timeout(),
            _ => false,
        }
    }
}
