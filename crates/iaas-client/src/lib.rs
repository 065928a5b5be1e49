//! SAKURA Cloud IaaS API Client
//!
//! A Rust client library for the subset of the SAKURA Cloud IaaS API that the
//! load balancer controller needs: servers (lookup and power), switches, routers, load balancer
//! appliances, VPC routers and databases.
//!
//! # Example
//!
//! ```no_run
//! use iaas_client::{ClientConfig, IaasClient, IaasClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IaasClient::new(ClientConfig::new("token", "secret", "is1b"))?;
//!
//! // Find load balancers belonging to a cluster
//! let lbs = client
//!     .find_load_balancers(&["@k8s".to_string()])
//!     .await?;
//!
//! // Read the switch the first one is attached to
//! if let Some(switch_id) = lbs.first().and_then(|lb| lb.switch_id()) {
//!     let sw = client.read_switch(switch_id).await?;
//!     println!("{} has {} subnets", sw.name, sw.subnets.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Typed finds**: Fixed page-size finds with tag and class filters
//! - **Appliance lifecycle**: Create, update, apply, stop, delete
//! - **Wait helpers**: Poll an appliance until it is copied, up or down
//! - **Server power**: Graceful shutdown with a forced-stop fallback
//! - **Retry Logic**: Transport-level retry of throttled requests
//! - **Mocking**: In-memory `MockIaasClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod iaas_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{ClientConfig, IaasClient, WaitTarget, DEFAULT_API_ROOT_URL, DEFAULT_SERVER_SHUTDOWN_WAIT};
pub use common::HttpClient;
pub use error::IaasError;
pub use models::*;
pub use iaas_trait::IaasClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockIaasClient, MockOperation};
