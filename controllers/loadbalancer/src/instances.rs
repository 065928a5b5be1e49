//! Node to server mapping.
//!
//! Nodes are matched to SAKURA Cloud servers by provider ID
//! (`sakuracloud://<server id>`) or, before a provider ID is set, by name.

use crate::error::ControllerError;
use iaas_client::{IaasClientTrait, InstanceStatus, ResourceId, Server};
use k8s_openapi::api::core::v1::NodeAddress;

pub const PROVIDER_NAME: &str = "sakuracloud";

/// Provider ID of the node running on server `id`
pub fn provider_id(id: impl std::fmt::Display) -> String {
    format!("{}://{}", PROVIDER_NAME, id)
}

/// Server id named by a provider ID of the form `sakuracloud://12345`
pub fn server_id_from_provider_id(provider_id: &str) -> Result<ResourceId, ControllerError> {
    let invalid = || ControllerError::InvalidProviderId(provider_id.to_string());
    let parts: Vec<&str> = provider_id.split('/').collect();
    let [scheme, "", id] = parts.as_slice() else {
        return Err(invalid());
    };
    if scheme.trim_end_matches(':') != PROVIDER_NAME {
        return Err(invalid());
    }
    id.parse().map_err(|_| invalid())
}

/// Addresses of the node on `server`, reported as both external and internal
pub fn node_addresses(server: &Server) -> Vec<NodeAddress> {
    let Some(address) = server.primary_address() else {
        return Vec::new();
    };
    ["ExternalIP", "InternalIP"]
        .into_iter()
        .map(|type_| NodeAddress {
            address: address.to_string(),
            type_: type_.to_string(),
        })
        .collect()
}

/// Server lookups on behalf of Kubernetes nodes
#[derive(Debug, Clone)]
pub struct Instances<C> {
    client: C,
}

impl<C> Instances<C>
where
    C: IaasClientTrait + Clone + 'static,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Server named `name`, `None` when there is none
    pub async fn node_by_name(&self, name: &str) -> Result<Option<Server>, ControllerError> {
        let servers = self.client.find_servers().await?;
        Ok(servers.into_iter().find(|s| s.name == name))
    }

    /// Server with id `id`, `None` when there is none
    pub async fn node_by_id(&self, id: ResourceId) -> Result<Option<Server>, ControllerError> {
        let servers = self.client.find_servers().await?;
        Ok(servers.into_iter().find(|s| s.id == id))
    }

    async fn require_by_name(&self, name: &str) -> Result<Server, ControllerError> {
        self.node_by_name(name)
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(name.to_string()))
    }

    async fn require_by_provider_id(&self, provider_id: &str) -> Result<Server, ControllerError> {
        let id = server_id_from_provider_id(provider_id)?;
        self.node_by_id(id)
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(provider_id.to_string()))
    }

    pub async fn node_addresses(&self, name: &str) -> Result<Vec<NodeAddress>, ControllerError> {
        Ok(node_addresses(&self.require_by_name(name).await?))
    }

    pub async fn node_addresses_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeAddress>, ControllerError> {
        Ok(node_addresses(&self.require_by_provider_id(provider_id).await?))
    }

    /// Server id of the node, as a string
    pub async fn instance_id(&self, name: &str) -> Result<String, ControllerError> {
        Ok(self.require_by_name(name).await?.id.to_string())
    }

    /// Plan service class of the node's server; empty when the plan is unknown
    pub async fn instance_type(&self, name: &str) -> Result<String, ControllerError> {
        Ok(self.require_by_name(name).await?.instance_type().unwrap_or_default())
    }

    pub async fn instance_type_by_provider_id(&self, provider_id: &str) -> Result<String, ControllerError> {
        Ok(self
            .require_by_provider_id(provider_id)
            .await?
            .instance_type()
            .unwrap_or_default())
    }

    /// False only when the server is gone; lookup failures are errors
    pub async fn exists_by_provider_id(&self, provider_id: &str) -> Result<bool, ControllerError> {
        match self.require_by_provider_id(provider_id).await {
            Ok(_) => Ok(true),
            Err(ControllerError::InstanceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True when the server exists and is powered down
    pub async fn is_shutdown_by_provider_id(&self, provider_id: &str) -> Result<bool, ControllerError> {
        let server = self.require_by_provider_id(provider_id).await?;
        Ok(server.instance_status() == Some(InstanceStatus::Down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iaas_client::mock::helpers;
    use iaas_client::{MockIaasClient, MockOperation};

    fn mock() -> MockIaasClient {
        let mock = MockIaasClient::default();
        mock.add_server(helpers::server(101, 1, "192.168.0.11"));
        mock.add_server(helpers::server(102, 1, "192.168.0.12"));
        mock
    }

    #[test]
    fn test_server_id_from_provider_id() {
        assert_eq!(server_id_from_provider_id("sakuracloud://12345").unwrap(), ResourceId(12345));
        assert_eq!(provider_id(ResourceId(12345)), "sakuracloud://12345");

        for bad in ["", "sakuracloud", "sakuracloud:/12345", "aws://12345", "sakuracloud://a/b", "sakuracloud://node"] {
            assert!(
                matches!(server_id_from_provider_id(bad), Err(ControllerError::InvalidProviderId(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_node_addresses_by_switch_scope() {
        let server = helpers::server(101, 1, "192.168.0.11");
        let addresses = node_addresses(&server);
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].type_, "ExternalIP");
        assert_eq!(addresses[1].type_, "InternalIP");
        assert!(addresses.iter().all(|a| a.address == "192.168.0.11"));

        let mut disconnected = server;
        disconnected.interfaces[0].switch = None;
        assert!(node_addresses(&disconnected).is_empty());
    }

    #[tokio::test]
    async fn test_lookups_by_name_and_provider_id() {
        let instances = Instances::new(mock());

        assert_eq!(instances.instance_id("server-102").await.unwrap(), "102");
        assert_eq!(instances.instance_type("server-101").await.unwrap(), "cloud-plan-core-1core-1gb");
        assert_eq!(
            instances
                .instance_type_by_provider_id("sakuracloud://102")
                .await
                .unwrap(),
            "cloud-plan-core-1core-1gb"
        );
        let addresses = instances.node_addresses_by_provider_id("sakuracloud://102").await.unwrap();
        assert_eq!(addresses[0].address, "192.168.0.12");

        assert!(matches!(
            instances.node_addresses("missing").await,
            Err(ControllerError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_exists_by_provider_id() {
        let client = mock();
        let instances = Instances::new(client.clone());

        assert!(instances.exists_by_provider_id("sakuracloud://101").await.unwrap());
        assert!(!instances.exists_by_provider_id("sakuracloud://999").await.unwrap());
        assert!(instances.exists_by_provider_id("bogus").await.is_err());

        client.fail_on(MockOperation::FindServers, "api down");
        assert!(instances.exists_by_provider_id("sakuracloud://101").await.is_err());
    }

    #[tokio::test]
    async fn test_is_shutdown_only_queries_power_state() {
        let client = mock();
        let instances = Instances::new(client.clone());

        assert!(!instances.is_shutdown_by_provider_id("sakuracloud://101").await.unwrap());
        client.set_server_status(ResourceId(101), InstanceStatus::Down);
        assert!(instances.is_shutdown_by_provider_id("sakuracloud://101").await.unwrap());
        assert!(matches!(
            instances.is_shutdown_by_provider_id("sakuracloud://999").await,
            Err(ControllerError::InstanceNotFound(_))
        ));

        assert_eq!(client.call_count(MockOperation::ShutdownServer), 0);
        assert_eq!(client.call_count(MockOperation::StopServer), 0);
    }
}
