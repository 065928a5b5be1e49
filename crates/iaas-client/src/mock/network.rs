//! Network operations for MockIaasClient
//!
//! Handles servers, switches and routers. Server power follows a simulated
//! lifecycle: a graceful shutdown brings the server down unless its guest was
//! marked unresponsive, a forced stop always does.

use super::{has_tags, MockIaasClient, MockOperation};
use crate::error::IaasError;
use crate::models::*;
use std::time::Duration;

pub async fn find_servers(client: &MockIaasClient) -> Result<Vec<Server>, IaasError> {
    client.enter(MockOperation::FindServers).await?;
    Ok(client.servers.lock().unwrap().values().cloned().collect())
}

pub async fn read_server(client: &MockIaasClient, id: ResourceId) -> Result<Server, IaasError> {
    client.enter(MockOperation::ReadServer).await?;
    get_server(client, id)
}

fn get_server(client: &MockIaasClient, id: ResourceId) -> Result<Server, IaasError> {
    client
        .servers
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| IaasError::NotFound(format!("Server {} not found", id)))
}

fn power_off(client: &MockIaasClient, id: ResourceId) -> Result<(), IaasError> {
    let mut servers = client.servers.lock().unwrap();
    let server = servers
        .get_mut(&id)
        .ok_or_else(|| IaasError::NotFound(format!("Server {} not found", id)))?;
    server.instance = Some(Instance {
        status: Some(InstanceStatus::Down),
    });
    Ok(())
}

pub async fn shutdown_server(client: &MockIaasClient, id: ResourceId) -> Result<(), IaasError> {
    client.enter(MockOperation::ShutdownServer).await?;
    if client.unresponsive.lock().unwrap().contains(&id) {
        return get_server(client, id).map(|_| ());
    }
    power_off(client, id)
}

pub async fn stop_server(client: &MockIaasClient, id: ResourceId) -> Result<(), IaasError> {
    client.enter(MockOperation::StopServer).await?;
    power_off(client, id)
}

/// A server that is not down sleeps out the whole timeout.
pub async fn wait_until_server_down(
    client: &MockIaasClient,
    id: ResourceId,
    timeout: Duration,
) -> Result<Server, IaasError> {
    let timed_out = || IaasError::WaitTimeout {
        resource: "server",
        id,
        state: "down",
        timeout,
    };
    let waiting = async {
        client.enter(MockOperation::WaitUntilServerDown).await?;
        let server = get_server(client, id)?;
        if server.instance_status() == Some(InstanceStatus::Down) {
            Ok::<_, IaasError>(server)
        } else {
            tokio::time::sleep(timeout).await;
            Err(timed_out())
        }
    };
    match tokio::time::timeout(timeout, waiting).await {
        Ok(result) => result,
        Err(_) => Err(timed_out()),
    }
}

pub async fn find_switches(client: &MockIaasClient, tags: &[String]) -> Result<Vec<Switch>, IaasError> {
    client.enter(MockOperation::FindSwitches).await?;
    Ok(client
        .switches
        .lock()
        .unwrap()
        .values()
        .filter(|sw| has_tags(&sw.tags, tags))
        .cloned()
        .collect())
}

pub async fn read_switch(client: &MockIaasClient, id: ResourceId) -> Result<Switch, IaasError> {
    client.enter(MockOperation::ReadSwitch).await?;
    client
        .switches
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| IaasError::NotFound(format!("Switch {} not found", id)))
}

pub async fn find_routers(client: &MockIaasClient, tags: &[String]) -> Result<Vec<Router>, IaasError> {
    client.enter(MockOperation::FindRouters).await?;
    Ok(client
        .routers
        .lock()
        .unwrap()
        .values()
        .filter(|r| has_tags(&r.tags, tags))
        .cloned()
        .collect())
}
