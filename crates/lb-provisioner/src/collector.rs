//! Consumed-address collection
//!
//! Every allocation starts from a live scan of what is already in use on the
//! target switch. Five independent sources are scanned concurrently, each on
//! its own client handle, under one overall deadline. The first failing scan
//! fails the whole collection and discards whatever the others returned.

use crate::error::ProvisionError;
use iaas_client::{Database, IaasClientTrait, IaasError, LoadBalancer, ResourceId, Server, Switch, VpcRouter};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// Ceiling for one complete collection
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Addresses observed in use on one switch at scan time
pub type ConsumedAddressSet = HashSet<String>;

/// Kind of resource an address scan reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSource {
    Servers,
    Routers,
    LoadBalancers,
    VpcRouters,
    Databases,
}

impl AddressSource {
    pub const ALL: [AddressSource; 5] = [
        AddressSource::Servers,
        AddressSource::Routers,
        AddressSource::LoadBalancers,
        AddressSource::VpcRouters,
        AddressSource::Databases,
    ];
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressSource::Servers => "servers",
            AddressSource::Routers => "routers",
            AddressSource::LoadBalancers => "load balancers",
            AddressSource::VpcRouters => "VPC routers",
            AddressSource::Databases => "databases",
        })
    }
}

/// User address of the first NIC of every server on the switch
pub fn server_addresses(servers: &[Server], switch_id: ResourceId) -> Vec<String> {
    servers
        .iter()
        .filter_map(|server| server.interfaces.first())
        .filter(|nic| nic.switch.map(|s| s.id) == Some(switch_id))
        .filter_map(|nic| nic.user_ip_address.clone())
        .filter(|ip| !ip.is_empty())
        .collect()
}

/// Next-hop address of every subnet routed to the switch
pub fn router_addresses(switch: &Switch) -> Vec<String> {
    switch
        .subnets
        .iter()
        .filter_map(|subnet| subnet.next_hop.clone())
        .filter(|hop| !hop.is_empty())
        .collect()
}

/// Remark server addresses and VIPs of every load balancer on the switch
pub fn load_balancer_addresses(lbs: &[LoadBalancer], switch_id: ResourceId) -> Vec<String> {
    lbs.iter()
        .filter(|lb| lb.switch_id() == Some(switch_id))
        .flat_map(|lb| lb.remark_addresses().chain(lb.vips()))
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .collect()
}

/// Two primary addresses and every alias of the first router interface
pub fn vpc_router_addresses(vpcs: &[VpcRouter], switch_id: ResourceId) -> Vec<String> {
    vpcs.iter()
        .filter(|vpc| vpc.switch_id() == Some(switch_id))
        .filter_map(VpcRouter::primary_interface)
        .flat_map(|nic| nic.ip_address.iter().take(2).chain(nic.ip_aliases.iter()))
        .filter(|ip| !ip.is_empty())
        .cloned()
        .collect()
}

/// Remark server addresses of every database on the switch
pub fn database_addresses(dbs: &[Database], switch_id: ResourceId) -> Vec<String> {
    dbs.iter()
        .filter(|db| db.switch_id() == Some(switch_id))
        .flat_map(Database::remark_addresses)
        .map(str::to_string)
        .collect()
}

async fn scan<C: IaasClientTrait>(
    client: &C,
    source: AddressSource,
    switch_id: ResourceId,
) -> Result<Vec<String>, IaasError> {
    Ok(match source {
        AddressSource::Servers => server_addresses(&client.find_servers().await?, switch_id),
        AddressSource::Routers => router_addresses(&client.read_switch(switch_id).await?),
        AddressSource::LoadBalancers => load_balancer_addresses(&client.find_load_balancers(&[]).await?, switch_id),
        AddressSource::VpcRouters => vpc_router_addresses(&client.find_vpc_routers().await?, switch_id),
        AddressSource::Databases => database_addresses(&client.find_databases().await?, switch_id),
    })
}

/// Collect every address in use on `switch_id`.
///
/// Fails with the first scan error, or with `CollectTimeout` when the scans
/// do not all finish within `deadline`. Unfinished scans are aborted.
pub async fn collect_consumed_addresses<C>(
    client: &C,
    switch_id: ResourceId,
    deadline: Duration,
) -> Result<ConsumedAddressSet, ProvisionError>
where
    C: IaasClientTrait + Clone + 'static,
{
    let mut tasks = JoinSet::new();
    for source in AddressSource::ALL {
        let client = client.clone();
        tasks.spawn(async move { (source, scan(&client, source, switch_id).await) });
    }

    let gather = async {
        let mut consumed = ConsumedAddressSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (source, result) = joined?;
            let addresses = result.map_err(|error| ProvisionError::Scan { kind: source, error })?;
            debug!("{} hold {} addresses on switch {}", source, addresses.len(), switch_id);
            consumed.extend(addresses);
        }
        Ok::<_, ProvisionError>(consumed)
    };

    match tokio::time::timeout(deadline, gather).await {
        Ok(result) => result,
        Err(_) => Err(ProvisionError::CollectTimeout {
            switch_id,
            timeout: deadline,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iaas_client::mock::helpers;
    use iaas_client::{MockIaasClient, MockOperation};

    const SW: i64 = 100;
    const OTHER: i64 = 200;

    fn populated() -> MockIaasClient {
        let mock = MockIaasClient::default();

        mock.add_server(helpers::server(1, SW, "192.0.2.21"));
        mock.add_server(helpers::server(2, OTHER, "198.51.100.21"));

        let mut sw = helpers::routed_switch(SW, "192.0.2.0", 24, "192.0.2.1", "192.0.2.16", "192.0.2.31");
        sw.subnets[0].next_hop = Some("192.0.2.5".to_string());
        mock.add_switch(sw);

        mock.add_load_balancer(helpers::load_balancer(10, "lb-a", SW, 1, &["192.0.2.22", "192.0.2.23"], &["192.0.2.24"]));
        mock.add_load_balancer(helpers::load_balancer(11, "lb-b", OTHER, 1, &["198.51.100.22"], &["198.51.100.24"]));

        mock.add_vpc_router(helpers::vpc_router(20, SW, &["192.0.2.25", "192.0.2.26", "192.0.2.99"], &["192.0.2.27"]));
        mock.add_database(helpers::database(30, SW, &["192.0.2.28"]));
        mock
    }

    #[test]
    fn test_extractors_filter_by_switch() {
        let switch_id = ResourceId(SW);
        let servers = vec![helpers::server(1, SW, "192.0.2.21"), helpers::server(2, OTHER, "198.51.100.21")];
        assert_eq!(server_addresses(&servers, switch_id), vec!["192.0.2.21"]);

        let lbs = vec![
            helpers::load_balancer(10, "lb-a", SW, 1, &["192.0.2.22"], &["192.0.2.24", "192.0.2.24"]),
            helpers::load_balancer(11, "lb-b", OTHER, 1, &["198.51.100.22"], &[]),
        ];
        assert_eq!(load_balancer_addresses(&lbs, switch_id), vec!["192.0.2.22", "192.0.2.24", "192.0.2.24"]);

        let vpcs = vec![helpers::vpc_router(20, SW, &["192.0.2.25", "192.0.2.26", "192.0.2.99"], &["192.0.2.27"])];
        assert_eq!(vpc_router_addresses(&vpcs, switch_id), vec!["192.0.2.25", "192.0.2.26", "192.0.2.27"]);

        let dbs = vec![helpers::database(30, OTHER, &["198.51.100.28"])];
        assert!(database_addresses(&dbs, switch_id).is_empty());
    }

    #[test]
    fn test_vpc_router_without_settings_contributes_nothing() {
        let mut vpc = helpers::vpc_router(20, SW, &["192.0.2.25"], &[]);
        vpc.settings = None;
        assert!(vpc_router_addresses(&[vpc], ResourceId(SW)).is_empty());
    }

    #[tokio::test]
    async fn test_collect_merges_all_sources() {
        let mock = populated();
        let consumed = collect_consumed_addresses(&mock, ResourceId(SW), DEFAULT_COLLECT_TIMEOUT)
            .await
            .unwrap();

        let expected: ConsumedAddressSet = [
            "192.0.2.21", "192.0.2.5", "192.0.2.22", "192.0.2.23", "192.0.2.24", "192.0.2.25", "192.0.2.26",
            "192.0.2.27", "192.0.2.28",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
        assert_eq!(consumed, expected);
        for op in [
            MockOperation::FindServers,
            MockOperation::ReadSwitch,
            MockOperation::FindLoadBalancers,
            MockOperation::FindVpcRouters,
            MockOperation::FindDatabases,
        ] {
            assert_eq!(mock.call_count(op), 1, "{:?}", op);
        }
    }

    #[tokio::test]
    async fn test_first_error_wins_and_discards_partial_results() {
        let mock = populated();
        mock.fail_on(MockOperation::FindDatabases, "database listing unavailable");

        let err = collect_consumed_addresses(&mock, ResourceId(SW), DEFAULT_COLLECT_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            ProvisionError::Scan { kind, error } => {
                assert_eq!(kind, AddressSource::Databases);
                assert!(error.to_string().contains("database listing unavailable"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_surfaced_before_slow_scans_finish() {
        let mock = populated();
        mock.delay(MockOperation::FindServers, Duration::from_secs(50));
        mock.fail_on(MockOperation::FindVpcRouters, "boom");

        let started = tokio::time::Instant::now();
        let err = collect_consumed_addresses(&mock, ResourceId(SW), DEFAULT_COLLECT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Scan { kind: AddressSource::VpcRouters, .. }));
        assert!(started.elapsed() < Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collection_times_out() {
        let mock = populated();
        mock.delay(MockOperation::FindLoadBalancers, Duration::from_secs(120));

        let err = collect_consumed_addresses(&mock, ResourceId(SW), DEFAULT_COLLECT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, ProvisionError::CollectTimeout { .. }));
    }
}
