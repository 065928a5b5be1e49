//! Fixture builders for MockIaasClient test setup

use crate::models::*;

fn on_switch(switch_id: i64) -> Option<ResourceRef> {
    Some(ResourceRef::from(ResourceId(switch_id)))
}

/// Running server whose first NIC carries `user_ip` on the user switch `switch_id`
pub fn server(id: i64, switch_id: i64, user_ip: &str) -> Server {
    Server {
        id: ResourceId(id),
        name: format!("server-{}", id),
        tags: Vec::new(),
        interfaces: vec![ServerInterface {
            id: ResourceId(id * 10),
            ip_address: None,
            user_ip_address: Some(user_ip.to_string()),
            switch: Some(InterfaceSwitch {
                id: ResourceId(switch_id),
                scope: Some(SwitchScope::User),
            }),
        }],
        instance: Some(Instance {
            status: Some(InstanceStatus::Up),
        }),
        server_plan: Some(ServerPlan {
            id: ResourceId(100_001_001),
            name: "1Core-1GB".to_string(),
            cpu: Some(1),
            memory_mb: Some(1024),
            service_class: "cloud/plan/core/1core-1gb".to_string(),
        }),
        zone: Some(ZoneRef {
            id: ResourceId(31002),
            name: "is1b".to_string(),
        }),
    }
}

/// Switch with one locally managed subnet
pub fn switch(id: i64, network: &str, mask_len: u8, gateway: &str) -> Switch {
    Switch {
        id: ResourceId(id),
        name: format!("switch-{}", id),
        subnets: vec![Subnet {
            id: ResourceId(id * 10),
            default_route: Some(gateway.to_string()),
            next_hop: None,
            network_address: network.to_string(),
            network_mask_len: mask_len,
            ip_addresses: None,
        }],
        ..Default::default()
    }
}

/// Router-attached switch whose subnet routes the global range `min..=max`
pub fn routed_switch(id: i64, network: &str, mask_len: u8, gateway: &str, min: &str, max: &str) -> Switch {
    let mut sw = switch(id, network, mask_len, gateway);
    sw.internet = on_switch(id * 100);
    for subnet in &mut sw.subnets {
        subnet.ip_addresses = Some(IpAddressRange {
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    sw
}

/// Router handing its global subnet to `switch_id`
pub fn router(id: i64, switch_id: i64, tags: &[&str]) -> Router {
    Router {
        id: ResourceId(id),
        name: format!("router-{}", id),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        switch: on_switch(switch_id),
        band_width_mbps: Some(100),
    }
}

/// One VIP/port setting with TCP health checks on each backend
pub fn vip_setting(vip: &str, port: u16, servers: &[&str]) -> LoadBalancerSetting {
    LoadBalancerSetting {
        virtual_ip_address: vip.to_string(),
        port: port.to_string(),
        delay_loop: "10".to_string(),
        sorry_server: None,
        servers: servers
            .iter()
            .map(|ip| LoadBalancerServer {
                ip_address: (*ip).to_string(),
                port: port.to_string(),
                health_check: HealthCheck {
                    protocol: "tcp".to_string(),
                    path: None,
                    status: None,
                },
                enabled: "True".to_string(),
            })
            .collect(),
    }
}

/// Running load balancer on `switch_id` with the given remark addresses and VIPs
pub fn load_balancer(id: i64, name: &str, switch_id: i64, vrid: u32, remark_ips: &[&str], vips: &[&str]) -> LoadBalancer {
    LoadBalancer {
        id: ResourceId(id),
        name: name.to_string(),
        availability: Some(Availability::Available),
        instance: Some(Instance {
            status: Some(InstanceStatus::Up),
        }),
        switch: on_switch(switch_id),
        interfaces: remark_ips
            .iter()
            .map(|ip| ApplianceInterface {
                ip_address: Some((*ip).to_string()),
                switch: on_switch(switch_id),
            })
            .collect(),
        remark: LoadBalancerRemark {
            vrrp: Some(Vrrp { vrid }),
            switch: on_switch(switch_id),
            network: None,
            servers: remark_ips
                .iter()
                .map(|ip| RemarkServer {
                    ip_address: Some((*ip).to_string()),
                })
                .collect(),
            plan: Some(ResourceRef::from(LoadBalancerPlan::Standard.id())),
        },
        settings: Some(LoadBalancerSettings {
            load_balancer: vips.iter().map(|vip| vip_setting(vip, 80, &[])).collect(),
        }),
        ..Default::default()
    }
}

/// VPC router whose first interface sits on `switch_id`
pub fn vpc_router(id: i64, switch_id: i64, addresses: &[&str], aliases: &[&str]) -> VpcRouter {
    VpcRouter {
        id: ResourceId(id),
        name: format!("vpc-{}", id),
        interfaces: vec![ApplianceInterface {
            ip_address: None,
            switch: on_switch(switch_id),
        }],
        settings: Some(VpcRouterSettings {
            router: Some(VpcRouterSetting {
                interfaces: vec![Some(VpcRouterInterface {
                    ip_address: addresses.iter().map(|a| (*a).to_string()).collect(),
                    ip_aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
                    virtual_ip_address: None,
                    network_mask_len: None,
                })],
            }),
        }),
    }
}

/// Database on `switch_id` with its server addresses in the remark
pub fn database(id: i64, switch_id: i64, addresses: &[&str]) -> Database {
    Database {
        id: ResourceId(id),
        name: format!("db-{}", id),
        switch: on_switch(switch_id),
        interfaces: Vec::new(),
        remark: DatabaseRemark {
            servers: addresses
                .iter()
                .map(|ip| RemarkServer {
                    ip_address: Some((*ip).to_string()),
                })
                .collect(),
            switch: on_switch(switch_id),
        },
    }
}
