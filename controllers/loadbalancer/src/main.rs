//! Load Balancer Controller
//!
//! Provisions SAKURA Cloud load balancer appliances for Kubernetes Services
//! of type `LoadBalancer`:
//! - allocates a free VRID and VIPs on the switch behind a tagged router
//!   (internet type) or on a tagged switch (switch type)
//! - registers the Service ports and ready nodes as VIP settings
//! - publishes the VIPs in the Service status
//! - deletes the appliance when the Service goes away
//! - initializes Nodes from their servers (provider ID, instance type, zone,
//!   addresses), taints Nodes whose server is down and deletes Nodes whose
//!   server is gone

mod backoff;
mod config;
mod controller;
mod error;
mod instances;
mod loadbalancers;
mod metrics;
mod nodes;
mod reconciler;
mod server;
mod service;
mod watcher;
mod zones;

use anyhow::Context;
use config::{CloudConfig, ControllerSettings};
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CloudConfig::load().context("failed to load cloud config")?;

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.trace_mode {
        filter = filter.add_directive("iaas_client=trace".parse().context("invalid trace directive")?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Load Balancer Controller");

    config.validate().context("invalid cloud config")?;
    let settings = ControllerSettings::from_env().context("invalid controller settings")?;

    info!("Configuration:");
    info!("  Zone: {}", config.zone);
    info!(
        "  Cluster ID: {}",
        if config.cluster_id.is_empty() { "(none)" } else { config.cluster_id.as_str() }
    );
    info!("  Namespace: {}", settings.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Probe address: {}", settings.probe_addr);

    let controller = Controller::new(config, settings)
        .await
        .context("failed to initialize controller")?;
    controller.run().await?;

    Ok(())
}
