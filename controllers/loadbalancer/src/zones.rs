//! Zone lookups for nodes

use crate::error::ControllerError;
use crate::instances::{server_id_from_provider_id, Instances};
use iaas_client::{IaasClientTrait, Server};

/// Zone of a node. SAKURA Cloud zones are reported as the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub region: String,
}

fn server_zone(server: &Server, fallback: &str) -> Zone {
    Zone {
        region: server.zone_name().unwrap_or(fallback).to_string(),
    }
}

/// Zone the controller's client is bound to
pub fn zone<C: IaasClientTrait>(client: &C) -> Zone {
    Zone {
        region: client.zone().to_string(),
    }
}

pub async fn zone_by_provider_id<C>(instances: &Instances<C>, provider_id: &str) -> Result<Zone, ControllerError>
where
    C: IaasClientTrait + Clone + 'static,
{
    let id = server_id_from_provider_id(provider_id)?;
    let server = instances
        .node_by_id(id)
        .await?
        .ok_or_else(|| ControllerError::InstanceNotFound(provider_id.to_string()))?;
    Ok(server_zone(&server, instances.client().zone()))
}

pub async fn zone_by_node_name<C>(instances: &Instances<C>, name: &str) -> Result<Zone, ControllerError>
where
    C: IaasClientTrait + Clone + 'static,
{
    let server = instances
        .node_by_name(name)
        .await?
        .ok_or_else(|| ControllerError::InstanceNotFound(name.to_string()))?;
    Ok(server_zone(&server, instances.client().zone()))
}
