//! Appliance operations for MockIaasClient
//!
//! Handles load balancers, VPC routers and databases. Load balancers follow
//! a simulated lifecycle: create leaves them `migrating`, the copy wait makes
//! them `available`, the active wait boots them, stop shuts them down and
//! delete (allowed only while down) removes them.

use super::{has_tags, MockIaasClient, MockOperation};
use crate::client::WaitTarget;
use crate::error::IaasError;
use crate::models::*;
use std::time::Duration;

pub async fn find_load_balancers(client: &MockIaasClient, tags: &[String]) -> Result<Vec<LoadBalancer>, IaasError> {
    client.enter(MockOperation::FindLoadBalancers).await?;
    Ok(client
        .load_balancers
        .lock()
        .unwrap()
        .values()
        .filter(|lb| has_tags(&lb.tags, tags))
        .cloned()
        .collect())
}

pub async fn read_load_balancer(client: &MockIaasClient, id: ResourceId) -> Result<LoadBalancer, IaasError> {
    client.enter(MockOperation::ReadLoadBalancer).await?;
    get(client, id)
}

fn get(client: &MockIaasClient, id: ResourceId) -> Result<LoadBalancer, IaasError> {
    client
        .load_balancers
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .ok_or_else(|| IaasError::NotFound(format!("LoadBalancer {} not found", id)))
}

fn modify<F>(client: &MockIaasClient, id: ResourceId, f: F) -> Result<LoadBalancer, IaasError>
where
    F: FnOnce(&mut LoadBalancer) -> Result<(), IaasError>,
{
    let mut stores = client.load_balancers.lock().unwrap();
    let lb = stores
        .get_mut(&id)
        .ok_or_else(|| IaasError::NotFound(format!("LoadBalancer {} not found", id)))?;
    f(lb)?;
    Ok(lb.clone())
}

pub async fn find_vpc_routers(client: &MockIaasClient) -> Result<Vec<VpcRouter>, IaasError> {
    client.enter(MockOperation::FindVpcRouters).await?;
    Ok(client.vpc_routers.lock().unwrap().values().cloned().collect())
}

pub async fn find_databases(client: &MockIaasClient) -> Result<Vec<Database>, IaasError> {
    client.enter(MockOperation::FindDatabases).await?;
    Ok(client.databases.lock().unwrap().values().cloned().collect())
}

pub async fn create_load_balancer(
    client: &MockIaasClient,
    request: &CreateLoadBalancerRequest,
) -> Result<LoadBalancer, IaasError> {
    client.enter(MockOperation::CreateLoadBalancer).await?;

    let switch = Some(ResourceRef::from(request.switch_id));
    let addresses: Vec<String> = std::iter::once(request.ip_address1.clone())
        .chain(request.ip_address2.clone())
        .collect();

    let lb = LoadBalancer {
        id: client.next_id(),
        name: request.name.clone(),
        description: request.description.clone(),
        tags: request.tags.clone(),
        availability: Some(Availability::Migrating),
        instance: Some(Instance {
            status: Some(InstanceStatus::Down),
        }),
        switch,
        interfaces: addresses
            .iter()
            .map(|ip| ApplianceInterface {
                ip_address: Some(ip.clone()),
                switch,
            })
            .collect(),
        remark: LoadBalancerRemark {
            vrrp: Some(Vrrp { vrid: request.vrid }),
            switch,
            network: Some(RemarkNetwork {
                network_mask_len: request.network_mask_len,
                default_route: request.default_route.clone(),
            }),
            servers: addresses
                .into_iter()
                .map(|ip| RemarkServer { ip_address: Some(ip) })
                .collect(),
            plan: Some(ResourceRef::from(request.plan.id())),
        },
        settings: Some(LoadBalancerSettings {
            load_balancer: request.settings.clone(),
        }),
        created_at: None,
    };

    client.load_balancers.lock().unwrap().insert(lb.id, lb.clone());
    Ok(lb)
}

pub async fn update_load_balancer(
    client: &MockIaasClient,
    id: ResourceId,
    request: &UpdateLoadBalancerRequest,
) -> Result<LoadBalancer, IaasError> {
    client.enter(MockOperation::UpdateLoadBalancer).await?;
    modify(client, id, |lb| {
        lb.settings = Some(LoadBalancerSettings {
            load_balancer: request.settings.clone(),
        });
        Ok(())
    })
}

pub async fn apply_load_balancer_config(client: &MockIaasClient, id: ResourceId) -> Result<(), IaasError> {
    client.enter(MockOperation::ApplyLoadBalancerConfig).await?;
    get(client, id).map(|_| ())
}

pub async fn stop_load_balancer(client: &MockIaasClient, id: ResourceId) -> Result<(), IaasError> {
    client.enter(MockOperation::StopLoadBalancer).await?;
    modify(client, id, |lb| {
        lb.instance = Some(Instance {
            status: Some(InstanceStatus::Down),
        });
        Ok(())
    })
    .map(|_| ())
}

pub async fn delete_load_balancer(client: &MockIaasClient, id: ResourceId) -> Result<(), IaasError> {
    client.enter(MockOperation::DeleteLoadBalancer).await?;
    let mut stores = client.load_balancers.lock().unwrap();
    let running = match stores.get(&id) {
        None => return Err(IaasError::NotFound(format!("LoadBalancer {} not found", id))),
        Some(lb) => lb.instance_status() == Some(InstanceStatus::Up),
    };
    if running {
        return Err(IaasError::Api(format!(
            "DELETE /appliance/{} failed: 409 Conflict - appliance is running",
            id
        )));
    }
    stores.remove(&id);
    Ok(())
}

/// Simulated wait: advances the appliance toward the target, then checks it.
///
/// A target that is not reached (e.g. waiting for `down` without a stop)
/// sleeps out the whole timeout, as does a delay longer than the timeout.
pub async fn wait_until(
    client: &MockIaasClient,
    op: MockOperation,
    id: ResourceId,
    timeout: Duration,
) -> Result<LoadBalancer, IaasError> {
    let target = match op {
        MockOperation::WaitUntilCopyDone => WaitTarget::CopyDone,
        MockOperation::WaitUntilActive => WaitTarget::Active,
        _ => WaitTarget::Down,
    };
    let timed_out = || IaasError::WaitTimeout {
        resource: "load balancer",
        id,
        state: target.state_name(),
        timeout,
    };

    let waiting = async {
        client.enter(op).await?;
        let lb = modify(client, id, |lb| {
            match target {
                WaitTarget::CopyDone if !lb.is_failed() => {
                    lb.availability = Some(Availability::Available);
                }
                WaitTarget::Active if lb.is_available() => {
                    lb.instance = Some(Instance {
                        status: Some(InstanceStatus::Up),
                    });
                }
                _ => {}
            }
            Ok(())
        })?;
        if target.reached(&lb)? {
            Ok::<_, IaasError>(lb)
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
