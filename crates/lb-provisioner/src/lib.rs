//! Load balancer address allocation and provisioning
//!
//! Allocates the appliance addresses, VIP and VRID for a SAKURA Cloud load
//! balancer from a live scan of the target switch, and drives the appliance
//! through its create, update and delete lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use iaas_client::{ClientConfig, IaasClient};
//! use lb_provisioner::{LoadBalancerParam, LoadBalancerProvisioner, VipParam};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IaasClient::new(ClientConfig::new("token", "secret", "is1b"))?;
//! let provisioner = LoadBalancerProvisioner::new(client);
//!
//! let param = LoadBalancerParam {
//!     name: "a0f1e2d3".to_string(),
//!     router_tags: vec!["@k8s".to_string()],
//!     ..Default::default()
//! };
//! let vips = provisioner
//!     .provision_create(&param, &VipParam::default(), Duration::from_secs(600))
//!     .await?;
//! println!("VIP: {:?}", vips);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod error;
pub mod param;
pub mod provisioner;
pub mod resolver;
pub mod selector;

#[cfg(test)]
mod provisioner_test;

pub use collector::{collect_consumed_addresses, AddressSource, ConsumedAddressSet, DEFAULT_COLLECT_TIMEOUT};
pub use error::ProvisionError;
pub use param::{
    resolve_assign_address, HealthCheckParam, LoadBalancerIps, LoadBalancerParam, LoadBalancerType, VipParam, VipPort,
};
pub use provisioner::{build_create_request, build_settings, LoadBalancerProvisioner};
pub use resolver::{AssignableIpInfo, INTERNAL_POOL_LIMIT};
pub use selector::{Selection, MAX_VRID};
