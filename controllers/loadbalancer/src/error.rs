//! Controller-specific error types.
//!
//! This module defines error types specific to the load balancer controller
//! that are not covered by upstream library errors.

use iaas_client::IaasError;
use kube::Error as KubeError;
use kube::runtime::finalizer;
use lb_provisioner::ProvisionError;
use thiserror::Error;

/// Errors that can occur in the load balancer controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Address allocation or appliance lifecycle error
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// SAKURA Cloud API error outside of provisioning
    #[error("SAKURA Cloud API error: {0}")]
    Iaas(#[from] IaasError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Service annotation that cannot be used
    #[error("invalid value {value:?} for annotation {key:?}: {reason}")]
    Annotation {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Service missing a field the controller needs
    #[error("Invalid Service: {0}")]
    InvalidService(String),

    /// No server backs the node
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Node provider ID that does not name a SAKURA Cloud server
    #[error("invalid provider ID {0:?}, format should be sakuracloud://12345")]
    InvalidProviderId(String),

    /// No load balancer exists for a Service that should have one
    #[error("load balancer {0:?} not found")]
    LoadBalancerNotFound(String),

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
