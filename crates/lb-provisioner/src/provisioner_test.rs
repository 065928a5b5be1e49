//! Unit tests for the provisioning state machine

#[cfg(test)]
mod tests {
    use crate::error::ProvisionError;
    use crate::param::{HealthCheckParam, LoadBalancerParam, LoadBalancerType, VipParam, VipPort};
    use crate::provisioner::LoadBalancerProvisioner;
    use iaas_client::mock::helpers;
    use iaas_client::{Availability, InstanceStatus, MockIaasClient, MockOperation, ResourceId};
    use std::time::Duration;

    const BOOT: Duration = Duration::from_secs(600);
    const SHUTDOWN: Duration = Duration::from_secs(60);
    const SW: i64 = 100;

    fn cluster() -> Vec<String> {
        vec!["@k8s".to_string(), "@k8s.ClusterID=c1".to_string()]
    }

    /// Router-attached switch routing the global range 203.0.113.4..=`last`
    fn internet_mock(last: &str) -> MockIaasClient {
        let mock = MockIaasClient::default();
        mock.add_router(helpers::router(1, SW, &["@k8s"]));
        mock.add_switch(helpers::routed_switch(SW, "203.0.113.0", 28, "203.0.113.1", "203.0.113.4", last));
        mock
    }

    fn param(name: &str) -> LoadBalancerParam {
        let mut tags = cluster();
        tags.push(format!("@k8s.Service={}", name));
        LoadBalancerParam {
            cluster_selector: cluster(),
            name: name.to_string(),
            description: "default/web".to_string(),
            tags,
            router_tags: vec!["@k8s".to_string()],
            ..Default::default()
        }
    }

    fn vip_param(port: u16) -> VipParam {
        VipParam {
            ports: vec![VipPort {
                port,
                health_check: HealthCheckParam {
                    port,
                    ..Default::default()
                },
            }],
            node_ips: vec!["198.51.100.11".to_string(), "198.51.100.12".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_create_then_delete() {
        let mock = internet_mock("203.0.113.5");
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let vips = provisioner
            .provision_create(&param("a01"), &vip_param(80), BOOT)
            .await
            .unwrap();
        assert_eq!(vips, vec!["203.0.113.5"]);

        let lbs = mock.load_balancers();
        assert_eq!(lbs.len(), 1);
        let lb = &lbs[0];
        assert_eq!(lb.remark_addresses().collect::<Vec<_>>(), vec!["203.0.113.4"]);
        assert_eq!(lb.vrid(), Some(1));
        assert_eq!(lb.instance_status(), Some(InstanceStatus::Up));
        assert_eq!(lb.vip_settings()[0].servers.len(), 2);
        assert_eq!(mock.call_count(MockOperation::ApplyLoadBalancerConfig), 1);

        assert!(provisioner.ensure_deleted("a01", SHUTDOWN).await.unwrap());
        let tail: Vec<MockOperation> = mock.calls().into_iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![
                MockOperation::DeleteLoadBalancer,
                MockOperation::WaitUntilDown,
                MockOperation::StopLoadBalancer
            ]
        );
        assert!(provisioner.find_by_name("a01").await.unwrap().is_none());
        assert!(!provisioner.ensure_deleted("a01", SHUTDOWN).await.unwrap());
    }

    #[tokio::test]
    async fn test_ha_create_takes_next_free_vrid() {
        let mock = internet_mock("203.0.113.6");
        let mut existing = helpers::load_balancer(50, "other", SW, 1, &[], &[]);
        existing.tags = cluster();
        mock.add_load_balancer(existing);
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let param = LoadBalancerParam {
            use_ha: true,
            use_high_spec_plan: true,
            ..param("a02")
        };
        let vips = provisioner.provision_create(&param, &vip_param(443), BOOT).await.unwrap();
        assert_eq!(vips, vec!["203.0.113.6"]);

        let created = provisioner.find_by_name("a02").await.unwrap().unwrap();
        assert_eq!(
            created.remark_addresses().collect::<Vec<_>>(),
            vec!["203.0.113.4", "203.0.113.5"]
        );
        assert_eq!(created.vrid(), Some(2));
        assert_eq!(created.remark.plan.map(|p| p.id), Some(ResourceId(2)));
    }

    #[tokio::test]
    async fn test_allocate_is_repeatable_and_reserves_nothing() {
        let mock = internet_mock("203.0.113.9");
        mock.add_server(helpers::server(7, SW, "203.0.113.4"));
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let first = provisioner.allocate(&param("a03")).await.unwrap();
        let second = provisioner.allocate(&param("a03")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ip1, "203.0.113.5");
        assert_eq!(first.vip, "203.0.113.6");
        assert_eq!(first.switch_id, ResourceId(SW));
        assert_eq!(first.mask_len, 28);
        assert_eq!(first.gateway, "203.0.113.1");
        assert_eq!(mock.call_count(MockOperation::CreateLoadBalancer), 0);
    }

    #[tokio::test]
    async fn test_switch_type_allocation() {
        let mock = MockIaasClient::default();
        let mut sw = helpers::switch(SW, "192.168.11.0", 24, "192.168.11.1");
        sw.tags = vec!["@k8s".to_string(), "@k8s.role=lb".to_string()];
        mock.add_switch(sw);
        mock.add_server(helpers::server(7, SW, "192.168.11.2"));
        let provisioner = LoadBalancerProvisioner::new(mock);

        let param = LoadBalancerParam {
            lb_type: LoadBalancerType::Switch,
            router_tags: vec!["@k8s".to_string(), "@k8s.role=lb".to_string()],
            ip_address_range: Some("192.168.11.0/24".to_string()),
            assign_ip_address_range: Some("192.168.11.0/24".to_string()),
            default_gateway: Some("192.168.11.1".to_string()),
            ..param("a04")
        };
        let ips = provisioner.allocate(&param).await.unwrap();
        assert_eq!(ips.ip1, "192.168.11.3");
        assert_eq!(ips.vip, "192.168.11.4");
        assert_eq!(ips.ip2, None);

        let outside = LoadBalancerParam {
            vip: Some("192.168.12.10".to_string()),
            ..param
        };
        let err = provisioner.allocate(&outside).await.unwrap_err();
        assert!(matches!(err, ProvisionError::VipOutOfNetwork { .. }));
    }

    #[tokio::test]
    async fn test_explicit_vip_in_use() {
        let mock = internet_mock("203.0.113.9");
        mock.add_server(helpers::server(7, SW, "203.0.113.8"));
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let param = LoadBalancerParam {
            vip: Some("203.0.113.8".to_string()),
            ..param("a05")
        };
        let err = provisioner.provision_create(&param, &vip_param(80), BOOT).await.unwrap_err();
        assert!(matches!(err, ProvisionError::VipInUse(ref vip) if vip == "203.0.113.8"));
        assert_eq!(mock.call_count(MockOperation::CreateLoadBalancer), 0);
    }

    #[tokio::test]
    async fn test_update_keeps_current_vip_and_replaces_settings() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(60, "a06", SW, 1, &["203.0.113.4"], &["203.0.113.5"]));
        let provisioner = LoadBalancerProvisioner::new(mock.clone());
        let current = provisioner.find_by_name("a06").await.unwrap().unwrap();

        let mut ports = vip_param(80);
        ports.ports.push(VipPort {
            port: 443,
            health_check: HealthCheckParam {
                protocol: "https".to_string(),
                port: 8443,
                ..Default::default()
            },
        });
        let vips = provisioner.provision_update(&current, &param("a06"), &ports).await.unwrap();
        assert_eq!(vips, vec!["203.0.113.5"]);

        let updated = provisioner.find_by_name("a06").await.unwrap().unwrap();
        let settings = updated.vip_settings();
        assert_eq!(settings.len(), 2);
        assert!(settings.iter().all(|s| s.virtual_ip_address == "203.0.113.5"));
        assert_eq!(settings[1].servers[0].port, "8443");
        assert_eq!(settings[1].servers[0].health_check.status.as_deref(), Some("200"));
        assert_eq!(mock.call_count(MockOperation::ApplyLoadBalancerConfig), 1);
        // no rescan when the VIP is unchanged
        assert_eq!(mock.call_count(MockOperation::FindServers), 0);
    }

    #[tokio::test]
    async fn test_update_to_new_vip_checks_pool() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(60, "a07", SW, 1, &["203.0.113.4"], &["203.0.113.5"]));
        let provisioner = LoadBalancerProvisioner::new(mock.clone());
        let current = provisioner.find_by_name("a07").await.unwrap().unwrap();

        let taken = LoadBalancerParam {
            vip: Some("203.0.113.4".to_string()),
            ..param("a07")
        };
        let err = provisioner.provision_update(&current, &taken, &vip_param(80)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::VipNotAssignable(ref vip) if vip == "203.0.113.4"));
        assert_eq!(mock.call_count(MockOperation::UpdateLoadBalancer), 0);

        let free = LoadBalancerParam {
            vip: Some("203.0.113.7".to_string()),
            ..param("a07")
        };
        let vips = provisioner.provision_update(&current, &free, &vip_param(80)).await.unwrap();
        assert_eq!(vips, vec!["203.0.113.7"]);
        let updated = provisioner.find_by_name("a07").await.unwrap().unwrap();
        assert!(updated.vips().all(|vip| vip == "203.0.113.7"));
    }

    #[tokio::test]
    async fn test_update_without_any_vip() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(61, "a08", SW, 1, &["203.0.113.4"], &[]));
        let provisioner = LoadBalancerProvisioner::new(mock);
        let current = provisioner.find_by_name("a08").await.unwrap().unwrap();

        let err = provisioner
            .provision_update(&current, &param("a08"), &vip_param(80))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NoVip(id) if id == ResourceId(61)));
    }

    #[tokio::test]
    async fn test_failed_stop_skips_delete() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(62, "a09", SW, 1, &["203.0.113.4"], &["203.0.113.5"]));
        mock.fail_on(MockOperation::StopLoadBalancer, "shutdown refused");
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let err = provisioner.provision_delete(ResourceId(62), SHUTDOWN).await.unwrap_err();
        assert!(err.to_string().contains("shutdown refused"));
        assert_eq!(mock.call_count(MockOperation::WaitUntilDown), 0);
        assert_eq!(mock.call_count(MockOperation::DeleteLoadBalancer), 0);
        assert_eq!(mock.load_balancers().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_down_wait_skips_delete() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(63, "a14", SW, 1, &["203.0.113.4"], &["203.0.113.5"]));
        mock.fail_on(MockOperation::WaitUntilDown, "still running");
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let err = provisioner.provision_delete(ResourceId(63), SHUTDOWN).await.unwrap_err();
        assert!(err.to_string().contains("still running"));
        assert_eq!(mock.call_count(MockOperation::StopLoadBalancer), 1);
        assert_eq!(mock.call_count(MockOperation::DeleteLoadBalancer), 0);
        assert_eq!(mock.load_balancers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_wait_timeout_skips_delete() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(64, "a15", SW, 1, &["203.0.113.4"], &["203.0.113.5"]));
        mock.delay(MockOperation::WaitUntilDown, Duration::from_secs(120));
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let err = provisioner.provision_delete(ResourceId(64), SHUTDOWN).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(mock.call_count(MockOperation::DeleteLoadBalancer), 0);
        assert_eq!(mock.load_balancers().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_boot_leaves_appliance_in_place() {
        let mock = internet_mock("203.0.113.9");
        mock.fail_on(MockOperation::WaitUntilActive, "boot failed");
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        assert!(provisioner.provision_create(&param("a10"), &vip_param(80), BOOT).await.is_err());
        assert_eq!(mock.call_count(MockOperation::ApplyLoadBalancerConfig), 0);
        assert_eq!(mock.load_balancers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_scan_times_out_allocation() {
        let mock = internet_mock("203.0.113.9");
        mock.delay(MockOperation::FindDatabases, Duration::from_secs(120));
        let provisioner = LoadBalancerProvisioner::new(mock.clone()).with_collect_timeout(Duration::from_secs(5));

        let err = provisioner.allocate(&param("a11")).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, ProvisionError::CollectTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allocation_guard_is_released_before_boot_wait() {
        let mock = internet_mock("203.0.113.7");
        mock.delay(MockOperation::WaitUntilActive, Duration::from_secs(100));
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let started = tokio::time::Instant::now();
        let first_param = param("a12");
        let second_param = param("a13");
        let ports = vip_param(80);
        let (first, second) = tokio::join!(
            provisioner.provision_create(&first_param, &ports, BOOT),
            provisioner.provision_create(&second_param, &ports, BOOT),
        );
        assert!(started.elapsed() < Duration::from_secs(200));

        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first, second);

        let a = provisioner.find_by_name("a12").await.unwrap().unwrap();
        let b = provisioner.find_by_name("a13").await.unwrap().unwrap();
        assert_ne!(a.vrid(), b.vrid());
    }

    #[tokio::test]
    async fn test_status_waits_for_migrating_and_dedupes() {
        let mock = internet_mock("203.0.113.9");
        let mut lb = helpers::load_balancer(63, "a14", SW, 1, &["203.0.113.4"], &["203.0.113.5", "203.0.113.5", "203.0.113.6"]);
        lb.availability = Some(Availability::Migrating);
        mock.add_load_balancer(lb);
        let provisioner = LoadBalancerProvisioner::new(mock.clone());

        let vips = provisioner.status("a14", BOOT).await.unwrap();
        assert_eq!(vips, Some(vec!["203.0.113.5".to_string(), "203.0.113.6".to_string()]));
        assert_eq!(mock.call_count(MockOperation::WaitUntilCopyDone), 1);
        assert_eq!(mock.call_count(MockOperation::WaitUntilActive), 1);

        assert_eq!(provisioner.status("missing", BOOT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_by_name_skips_failed_appliances() {
        let mock = internet_mock("203.0.113.9");
        mock.add_load_balancer(helpers::load_balancer(64, "a15", SW, 1, &[], &[]));
        mock.add_load_balancer(helpers::load_balancer(65, "a15", SW, 2, &[], &["203.0.113.9"]));
        mock.set_availability(ResourceId(64), Availability::Failed);
        let provisioner = LoadBalancerProvisioner::new(mock);

        let found = provisioner.find_by_name("a15").await.unwrap().unwrap();
        assert_eq!(found.id, ResourceId(65));
        assert_eq!(provisioner.status("a15", BOOT).await.unwrap(), Some(vec!["203.0.113.9".to_string()]));
    }
}
