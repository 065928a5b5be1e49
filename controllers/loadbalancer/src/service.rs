//! Translation of Kubernetes Services into provisioning requests.
//!
//! Annotations under `k8s.usacloud.jp/` select the load balancer type, the
//! upstream router or switch, HA mode, plan and health check interval.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service};
use kube::ResourceExt;
use lb_provisioner::{HealthCheckParam, LoadBalancerParam, LoadBalancerType, VipParam, VipPort};

pub const ANNOTATION_LOAD_BALANCER_TYPE: &str = "k8s.usacloud.jp/load-balancer-type";
pub const ANNOTATION_ROUTER_SELECTOR: &str = "k8s.usacloud.jp/router-selector";
pub const ANNOTATION_SWITCH_SELECTOR: &str = "k8s.usacloud.jp/switch-selector";
pub const ANNOTATION_HA: &str = "k8s.usacloud.jp/load-balancer-ha";
pub const ANNOTATION_PLAN: &str = "k8s.usacloud.jp/load-balancer-plan";
pub const ANNOTATION_HEALTHZ_INTERVAL: &str = "k8s.usacloud.jp/load-balancer-healthz-interval";
pub const ANNOTATION_IP_RANGE: &str = "k8s.usacloud.jp/load-balancer-ip-range";
pub const ANNOTATION_ASSIGN_IP_RANGE: &str = "k8s.usacloud.jp/load-balancer-assign-ip-range";
pub const ANNOTATION_ASSIGN_DEFAULT_GATEWAY: &str = "k8s.usacloud.jp/load-balancer-assign-default-gateway";

/// Marker tag carried by every resource the cluster owns
pub const TAG_KUBERNETES: &str = "@k8s";
pub const TAG_CLUSTER_ID: &str = "@k8s.ClusterID";
pub const TAG_SERVICE: &str = "@k8s.Service";

const MAX_NAME_LEN: usize = 32;
const MAX_SERVICE_TAG_LEN: usize = 18;

/// Non-empty annotation value
fn annotation<'a>(svc: &'a Service, key: &str) -> Option<&'a str> {
    svc.annotations().get(key).map(String::as_str).filter(|v| !v.is_empty())
}

pub fn is_load_balancer(svc: &Service) -> bool {
    svc.spec.as_ref().and_then(|spec| spec.type_.as_deref()) == Some("LoadBalancer")
}

/// `a` followed by the Service UID without dashes, at most 32 characters
pub fn load_balancer_name(svc: &Service) -> Result<String, ControllerError> {
    let uid = svc
        .uid()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| ControllerError::InvalidService(format!("Service {} has no uid", svc.name_any())))?;
    let mut name = format!("a{}", uid.replace('-', ""));
    name.truncate(MAX_NAME_LEN);
    Ok(name)
}

pub fn load_balancer_type(svc: &Service) -> Result<LoadBalancerType, ControllerError> {
    match annotation(svc, ANNOTATION_LOAD_BALANCER_TYPE) {
        None => Ok(LoadBalancerType::default()),
        Some(value) => value.parse().map_err(|e: lb_provisioner::ProvisionError| ControllerError::Annotation {
            key: ANNOTATION_LOAD_BALANCER_TYPE,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn is_enabled(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "false" | "0" | "no")
}

/// Build the load balancer intent for `svc`
pub fn load_balancer_param(
    svc: &Service,
    cluster_id: &str,
    lb_type: LoadBalancerType,
) -> Result<LoadBalancerParam, ControllerError> {
    let mut tags = vec![TAG_KUBERNETES.to_string()];
    let mut cluster_selector = Vec::new();
    if !cluster_id.is_empty() {
        tags.push(format!("{}={}", TAG_CLUSTER_ID, cluster_id));
        cluster_selector = tags.clone();
    }
    let service_name: String = svc.name_any().chars().take(MAX_SERVICE_TAG_LEN).collect();
    tags.push(format!("{}={}", TAG_SERVICE, service_name));

    let mut param = LoadBalancerParam {
        cluster_selector,
        name: load_balancer_name(svc)?,
        description: format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any()),
        tags,
        router_tags: vec![TAG_KUBERNETES.to_string()],
        use_ha: annotation(svc, ANNOTATION_HA).is_some_and(is_enabled),
        use_high_spec_plan: annotation(svc, ANNOTATION_PLAN) == Some("premium"),
        vip: explicit_vip(svc),
        lb_type,
        ..Default::default()
    };

    let selector = match lb_type {
        LoadBalancerType::Internet => ANNOTATION_ROUTER_SELECTOR,
        LoadBalancerType::Switch => {
            param.ip_address_range = annotation(svc, ANNOTATION_IP_RANGE).map(str::to_string);
            param.assign_ip_address_range = annotation(svc, ANNOTATION_ASSIGN_IP_RANGE).map(str::to_string);
            param.default_gateway = annotation(svc, ANNOTATION_ASSIGN_DEFAULT_GATEWAY).map(str::to_string);
            ANNOTATION_SWITCH_SELECTOR
        }
    };
    if let Some(tag) = annotation(svc, selector) {
        param.router_tags.push(tag.to_string());
    }
    Ok(param)
}

/// `spec.loadBalancerIP`, when set
pub fn explicit_vip(svc: &Service) -> Option<String> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.load_balancer_ip.clone())
        .filter(|ip| !ip.is_empty())
}

fn health_check_interval(svc: &Service) -> Result<Option<u32>, ControllerError> {
    let Some(value) = annotation(svc, ANNOTATION_HEALTHZ_INTERVAL) else {
        return Ok(None);
    };
    match value.parse::<u32>() {
        Ok(seconds) if seconds > 0 => Ok(Some(seconds)),
        Ok(_) => Err(ControllerError::Annotation {
            key: ANNOTATION_HEALTHZ_INTERVAL,
            value: value.to_string(),
            reason: "interval must be at least one second".to_string(),
        }),
        Err(e) => Err(ControllerError::Annotation {
            key: ANNOTATION_HEALTHZ_INTERVAL,
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Addresses of `nodes` to register as backends: external addresses for
/// internet type, internal ones for switch type.
pub fn node_ips(nodes: &[Node], lb_type: LoadBalancerType) -> Vec<String> {
    let wanted = match lb_type {
        LoadBalancerType::Internet => "ExternalIP",
        LoadBalancerType::Switch => "InternalIP",
    };
    nodes
        .iter()
        .filter_map(|node| node.status.as_ref()?.addresses.as_ref())
        .flatten()
        .filter(|addr| addr.type_ == wanted)
        .map(|addr| addr.address.clone())
        .collect()
}

/// Nodes whose `Ready` condition is `True`
pub fn ready_nodes(nodes: Vec<Node>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| {
            node.status
                .as_ref()
                .and_then(|status| status.conditions.as_ref())
                .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        })
        .collect()
}

/// One VIP port per Service port, with a ping health check on the same port
pub fn vip_param(svc: &Service, nodes: &[Node], lb_type: LoadBalancerType) -> Result<VipParam, ControllerError> {
    let interval = health_check_interval(svc)?;
    let service_ports = svc.spec.as_ref().and_then(|spec| spec.ports.as_ref());

    let mut ports = Vec::new();
    for service_port in service_ports.into_iter().flatten() {
        let port = u16::try_from(service_port.port).map_err(|_| {
            ControllerError::InvalidService(format!("port {} of Service {} is out of range", service_port.port, svc.name_any()))
        })?;
        let mut health_check = HealthCheckParam {
            port,
            ..Default::default()
        };
        if let Some(seconds) = interval {
            health_check.delay_loop = seconds;
        }
        ports.push(VipPort { port, health_check });
    }

    Ok(VipParam {
        ports,
        node_ips: node_ips(nodes, lb_type),
    })
}

/// `status.loadBalancer` listing each VIP as an ingress address
pub fn ingress_status(vips: &[String]) -> LoadBalancerStatus {
    LoadBalancerStatus {
        ingress: Some(
            vips.iter()
                .map(|vip| LoadBalancerIngress {
                    ip: Some(vip.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
    }
}

/// Ingress addresses currently published on the Service
pub fn published_ingress(svc: &Service) -> Vec<String> {
    svc.status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| ingress.iter().filter_map(|i| i.ip.clone()).collect())
        .unwrap_or_default()
}
