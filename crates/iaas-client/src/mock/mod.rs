//! Mock IaasClient for unit testing
//!
//! This module provides a mock implementation of IaasClientTrait that can be used
//! in unit tests without reaching the SAKURA Cloud API.
//!
//! The mock is organized into domain-specific modules:
//! - `network.rs` - servers (including power), switches and routers
//! - `appliance.rs` - load balancer lifecycle, VPC routers and databases
//! - `helpers.rs` - fixture builders for test setup
//!
//! Besides the in-memory stores the mock can inject a failure or a delay per
//! operation and records every call in order.

mod appliance;
pub mod helpers;
mod network;

use crate::error::IaasError;
use crate::iaas_trait::IaasClientTrait;
use crate::models::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation names used for failure injection, delays and the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    AuthStatus,
    FindServers,
    ReadServer,
    ShutdownServer,
    StopServer,
    WaitUntilServerDown,
    FindSwitches,
    ReadSwitch,
    FindRouters,
    FindLoadBalancers,
    ReadLoadBalancer,
    FindVpcRouters,
    FindDatabases,
    CreateLoadBalancer,
    UpdateLoadBalancer,
    ApplyLoadBalancerConfig,
    StopLoadBalancer,
    DeleteLoadBalancer,
    WaitUntilCopyDone,
    WaitUntilActive,
    WaitUntilDown,
}

/// Mock IaasClient for testing
///
/// Stores are keyed by id, so finds return records in ascending id order.
#[derive(Debug, Clone)]
pub struct MockIaasClient {
    pub(crate) zone: String,
    pub(crate) servers: Arc<Mutex<BTreeMap<ResourceId, Server>>>,
    pub(crate) switches: Arc<Mutex<BTreeMap<ResourceId, Switch>>>,
    pub(crate) routers: Arc<Mutex<BTreeMap<ResourceId, Router>>>,
    pub(crate) load_balancers: Arc<Mutex<BTreeMap<ResourceId, LoadBalancer>>>,
    pub(crate) vpc_routers: Arc<Mutex<BTreeMap<ResourceId, VpcRouter>>>,
    pub(crate) databases: Arc<Mutex<BTreeMap<ResourceId, Database>>>,
    /// Servers whose guest ignores a graceful shutdown
    pub(crate) unresponsive: Arc<Mutex<BTreeSet<ResourceId>>>,
    failures: Arc<Mutex<HashMap<MockOperation, String>>>,
    delays: Arc<Mutex<HashMap<MockOperation, Duration>>>,
    calls: Arc<Mutex<Vec<MockOperation>>>,
    next_id: Arc<Mutex<i64>>,
}

impl Default for MockIaasClient {
    fn default() -> Self {
        Self::new("is1b")
    }
}

impl MockIaasClient {
    /// Create a new mock client
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            servers: Arc::new(Mutex::new(BTreeMap::new())),
            switches: Arc::new(Mutex::new(BTreeMap::new())),
            routers: Arc::new(Mutex::new(BTreeMap::new())),
            load_balancers: Arc::new(Mutex::new(BTreeMap::new())),
            vpc_routers: Arc::new(Mutex::new(BTreeMap::new())),
            databases: Arc::new(Mutex::new(BTreeMap::new())),
            unresponsive: Arc::new(Mutex::new(BTreeSet::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(113_000_000_001)),
        }
    }

    /// Add a server to the mock store (for test setup)
    pub fn add_server(&self, server: Server) {
        self.servers.lock().unwrap().insert(server.id, server);
    }

    /// Force the power state of a stored server
    pub fn set_server_status(&self, id: ResourceId, status: InstanceStatus) {
        if let Some(server) = self.servers.lock().unwrap().get_mut(&id) {
            server.instance = Some(Instance { status: Some(status) });
        }
    }

    /// Make graceful shutdowns of `id` leave the server running
    pub fn ignore_shutdown(&self, id: ResourceId) {
        self.unresponsive.lock().unwrap().insert(id);
    }

    /// Snapshot of a stored server
    pub fn server(&self, id: ResourceId) -> Option<Server> {
        self.servers.lock().unwrap().get(&id).cloned()
    }

    /// Add a switch to the mock store (for test setup)
    pub fn add_switch(&self, switch: Switch) {
        self.switches.lock().unwrap().insert(switch.id, switch);
    }

    /// Add a router to the mock store (for test setup)
    pub fn add_router(&self, router: Router) {
        self.routers.lock().unwrap().insert(router.id, router);
    }

    /// Add a load balancer to the mock store (for test setup)
    pub fn add_load_balancer(&self, lb: LoadBalancer) {
        self.load_balancers.lock().unwrap().insert(lb.id, lb);
    }

    /// Add a VPC router to the mock store (for test setup)
    pub fn add_vpc_router(&self, vpc: VpcRouter) {
        self.vpc_routers.lock().unwrap().insert(vpc.id, vpc);
    }

    /// Add a database to the mock store (for test setup)
    pub fn add_database(&self, db: Database) {
        self.databases.lock().unwrap().insert(db.id, db);
    }

    /// Snapshot of the stored load balancers
    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.load_balancers.lock().unwrap().values().cloned().collect()
    }

    /// Force the availability of a stored load balancer
    pub fn set_availability(&self, id: ResourceId, availability: Availability) {
        if let Some(lb) = self.load_balancers.lock().unwrap().get_mut(&id) {
            lb.availability = Some(availability);
        }
    }

    /// Make every later call of `op` fail with an API error carrying `message`
    pub fn fail_on(&self, op: MockOperation, message: impl Into<String>) {
        self.failures.lock().unwrap().insert(op, message.into());
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, op: MockOperation) {
        self.failures.lock().unwrap().remove(&op);
    }

    /// Delay every later call of `op`
    pub fn delay(&self, op: MockOperation, duration: Duration) {
        self.delays.lock().unwrap().insert(op, duration);
    }

    /// Operations called so far, in call order
    pub fn calls(&self) -> Vec<MockOperation> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls of `op` so far
    pub fn call_count(&self, op: MockOperation) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> ResourceId {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        ResourceId(current)
    }

    /// Record the call, apply the configured delay and the injected failure
    pub(crate) async fn enter(&self, op: MockOperation) -> Result<(), IaasError> {
        self.calls.lock().unwrap().push(op);
        let delay = self.delays.lock().unwrap().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().get(&op).cloned();
        match failure {
            Some(message) => Err(IaasError::Api(message)),
            None => Ok(()),
        }
    }
}

/// True when `resource_tags` carries every tag of `wanted`
pub(crate) fn has_tags(resource_tags: &[String], wanted: &[String]) -> bool {
    wanted.iter().all(|t| resource_tags.contains(t))
}

#[async_trait::async_trait]
impl IaasClientTrait for MockIaasClient {
    fn zone(&self) -> &str {
        &self.zone
    }

    async fn auth_status(&self) -> Result<AuthStatus, IaasError> {
        self.enter(MockOperation::AuthStatus).await?;
        Ok(AuthStatus {
            account: Some(ResourceRef::from(ResourceId(1))),
            permission: Some("create".to_string()),
        })
    }

    // Network resources - delegated to network module
    async fn find_servers(&self) -> Result<Vec<Server>, IaasError> {
        network::find_servers(self).await
    }

    async fn read_server(&self, id: ResourceId) -> Result<Server, IaasError> {
        network::read_server(self, id).await
    }

    async fn shutdown_server(&self, id: ResourceId) -> Result<(), IaasError> {
        network::shutdown_server(self, id).await
    }

    async fn stop_server(&self, id: ResourceId) -> Result<(), IaasError> {
        network::stop_server(self, id).await
    }

    async fn wait_until_server_down(&self, id: ResourceId, timeout: Duration) -> Result<Server, IaasError> {
        network::wait_until_server_down(self, id, timeout).await
    }

    async fn find_switches(&self, tags: &[String]) -> Result<Vec<Switch>, IaasError> {
        network::find_switches(self, tags).await
    }

    async fn read_switch(&self, id: ResourceId) -> Result<Switch, IaasError> {
        network::read_switch(self, id).await
    }

    async fn find_routers(&self, tags: &[String]) -> Result<Vec<Router>, IaasError> {
        network::find_routers(self, tags).await
    }

    // Appliances - delegated to appliance module
    async fn find_load_balancers(&self, tags: &[String]) -> Result<Vec<LoadBalancer>, IaasError> {
        appliance::find_load_balancers(self, tags).await
    }

    async fn read_load_balancer(&self, id: ResourceId) -> Result<LoadBalancer, IaasError> {
        appliance::read_load_balancer(self, id).await
    }

    async fn find_vpc_routers(&self) -> Result<Vec<VpcRouter>, IaasError> {
        appliance::find_vpc_routers(self).await
    }

    async fn find_databases(&self) -> Result<Vec<Database>, IaasError> {
        appliance::find_databases(self).await
    }

    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<LoadBalancer, IaasError> {
        appliance::create_load_balancer(self, request).await
    }

    async fn update_load_balancer(
        &self,
        id: ResourceId,
        request: &UpdateLoadBalancerRequest,
    ) -> Result<LoadBalancer, IaasError> {
        appliance::update_load_balancer(self, id, request).await
    }

    async fn apply_load_balancer_config(&self, id: ResourceId) -> Result<(), IaasError> {
        appliance::apply_load_balancer_config(self, id).await
    }

    async fn stop_load_balancer(&self, id: ResourceId) -> Result<(), IaasError> {
        appliance::stop_load_balancer(self, id).await
    }

    async fn delete_load_balancer(&self, id: ResourceId) -> Result<(), IaasError> {
        appliance::delete_load_balancer(self, id).await
    }

    async fn wait_until_copy_done(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError> {
        appliance::wait_until(self, MockOperation::WaitUntilCopyDone, id, timeout).await
    }

    async fn wait_until_active(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError> {
        appliance::wait_until(self, MockOperation::WaitUntilActive, id, timeout).await
    }

    async fn wait_until_down(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError> {
        appliance::wait_until(self, MockOperation::WaitUntilDown, id, timeout).await
    }
}
