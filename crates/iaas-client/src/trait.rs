//! IaasClient trait for mocking
//!
//! This trait abstracts the IaasClient to enable mocking in unit tests.
//! The concrete IaasClient implements this trait, and tests can use `MockIaasClient`.

use crate::error::IaasError;
use crate::models::*;
use std::time::Duration;
use tracing::warn;

/// Trait for SAKURA Cloud API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Finds return one page of at most 100 records; absence is an empty list.
#[async_trait::async_trait]
pub trait IaasClientTrait: Send + Sync {
    /// Zone the client is bound to
    fn zone(&self) -> &str;

    /// Check the credentials against the auth-status endpoint
    async fn auth_status(&self) -> Result<AuthStatus, IaasError>;

    // Network resources
    async fn find_servers(&self) -> Result<Vec<Server>, IaasError>;
    async fn read_server(&self, id: ResourceId) -> Result<Server, IaasError>;
    async fn find_switches(&self, tags: &[String]) -> Result<Vec<Switch>, IaasError>;
    async fn read_switch(&self, id: ResourceId) -> Result<Switch, IaasError>;
    async fn find_routers(&self, tags: &[String]) -> Result<Vec<Router>, IaasError>;

    // Server power
    /// Ask the guest OS to shut down (ACPI)
    async fn shutdown_server(&self, id: ResourceId) -> Result<(), IaasError>;
    /// Cut the power of a server
    async fn stop_server(&self, id: ResourceId) -> Result<(), IaasError>;
    /// Block until the server instance reports `down`
    async fn wait_until_server_down(&self, id: ResourceId, timeout: Duration) -> Result<Server, IaasError>;

    /// Graceful shutdown, falling back to a forced stop when the server is
    /// not down within `wait`. Each phase waits at most `wait`.
    async fn shutdown_server_by_id(&self, id: ResourceId, wait: Duration) -> Result<(), IaasError> {
        self.shutdown_server(id).await?;
        match self.wait_until_server_down(id, wait).await {
            Ok(_) => return Ok(()),
            Err(e) => warn!("Server {} did not shut down gracefully ({}), forcing stop", id, e),
        }
        self.stop_server(id).await?;
        self.wait_until_server_down(id, wait).await?;
        Ok(())
    }

    // Appliances
    async fn find_load_balancers(&self, tags: &[String]) -> Result<Vec<LoadBalancer>, IaasError>;
    async fn read_load_balancer(&self, id: ResourceId) -> Result<LoadBalancer, IaasError>;
    async fn find_vpc_routers(&self) -> Result<Vec<VpcRouter>, IaasError>;
    async fn find_databases(&self) -> Result<Vec<Database>, IaasError>;

    // Load balancer lifecycle
    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<LoadBalancer, IaasError>;
    async fn update_load_balancer(
        &self,
        id: ResourceId,
        request: &UpdateLoadBalancerRequest,
    ) -> Result<LoadBalancer, IaasError>;
    async fn apply_load_balancer_config(&self, id: ResourceId) -> Result<(), IaasError>;
    async fn stop_load_balancer(&self, id: ResourceId) -> Result<(), IaasError>;
    async fn delete_load_balancer(&self, id: ResourceId) -> Result<(), IaasError>;

    // Waits
    /// Block until the appliance has finished copying (availability `available`)
    async fn wait_until_copy_done(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError>;
    /// Block until the appliance instance reports `up`
    async fn wait_until_active(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError>;
    /// Block until the appliance instance reports `down`
    async fn wait_until_down(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError>;
}
