//! Service reconciliation.
//!
//! A LoadBalancer Service gets a finalizer, a SAKURA Cloud load balancer and
//! its VIPs published in `status.loadBalancer`. Removing the Service, or
//! switching it to another type, deletes the appliance before the finalizer
//! is released.

use crate::backoff::BackoffStates;
use crate::error::ControllerError;
use crate::loadbalancers::LoadBalancers;
use crate::metrics::Metrics;
use crate::service;
use iaas_client::{IaasClient, IaasClientTrait};
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::finalizer::{finalizer, Event};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const SERVICE_FINALIZER: &str = "k8s.usacloud.jp/load-balancer-cleanup";

/// Resync period for Services that reconciled cleanly
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Shared state of the Service reconcile loop
pub struct Reconciler<C = IaasClient> {
    client: Client,
    load_balancers: LoadBalancers<C>,
    metrics: Metrics,
    backoff: BackoffStates,
    published: PublishedSet,
}

/// Keys of the Services whose VIPs are currently published
#[derive(Debug, Default)]
pub struct PublishedSet {
    keys: Mutex<HashSet<String>>,
}

impl PublishedSet {
    /// Record `key` as published or withdrawn and return the new size.
    ///
    /// Recovers a lock poisoned by a panicking reconcile.
    pub fn mark(&self, key: &str, published: bool) -> usize {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if published {
            keys.insert(key.to_string());
        } else {
            keys.remove(key);
        }
        keys.len()
    }
}

impl<C> Reconciler<C>
where
    C: IaasClientTrait + Clone + 'static,
{
    pub fn new(client: Client, load_balancers: LoadBalancers<C>, metrics: Metrics) -> Self {
        Self {
            client,
            load_balancers,
            metrics,
            backoff: BackoffStates::default(),
            published: PublishedSet::default(),
        }
    }

    async fn apply(&self, api: &Api<Service>, svc: &Service) -> Result<Action, ControllerError> {
        let key = service_key(svc);
        let _timer = self.metrics.measure("apply");
        self.metrics.reconciliation("apply");

        let nodes = Api::<Node>::all(self.client.clone()).list(&ListParams::default()).await?;
        let nodes = service::ready_nodes(nodes.items);
        if nodes.is_empty() {
            warn!("No ready nodes to register behind Service {}", key);
        }

        let vips = self.load_balancers.ensure(svc, &nodes).await?;
        if vips.is_empty() {
            return Err(ControllerError::InvalidService(format!(
                "load balancer of Service {} has no VIP",
                key
            )));
        }

        if service::published_ingress(svc) != vips {
            info!("Publishing VIPs {:?} on Service {}", vips, key);
            let patch = status_patch(&vips);
            api.patch_status(&svc.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        } else {
            debug!("Service {} already publishes {:?}", key, vips);
        }

        self.mark_published(&key, true);
        self.backoff.reset(&key);
        Ok(Action::requeue(RESYNC_INTERVAL))
    }

    async fn cleanup(&self, svc: &Service) -> Result<Action, ControllerError> {
        let key = service_key(svc);
        let _timer = self.metrics.measure("cleanup");
        self.metrics.reconciliation("cleanup");

        if !self.load_balancers.ensure_deleted(svc).await? {
            debug!("Service {} has no load balancer to delete", key);
        }
        self.mark_published(&key, false);
        self.backoff.reset(&key);
        Ok(Action::await_change())
    }

    /// Service switched away from type LoadBalancer while still holding the finalizer
    async fn release(&self, api: &Api<Service>, svc: &Service) -> Result<Action, ControllerError> {
        info!(
            "Service {} is no longer a LoadBalancer, releasing its load balancer",
            service_key(svc)
        );
        self.cleanup(svc).await?;

        let remaining: Vec<String> = svc
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != SERVICE_FINALIZER)
            .cloned()
            .collect();
        let patch = json!({ "metadata": { "finalizers": remaining } });
        api.patch(&svc.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(Action::await_change())
    }

    fn mark_published(&self, key: &str, published: bool) {
        let count = self.published.mark(key, published);
        self.metrics.published_load_balancers.set(count as i64);
    }
}

/// Reconcile one Service
pub async fn reconcile<C>(svc: Arc<Service>, ctx: Arc<Reconciler<C>>) -> Result<Action, ControllerError>
where
    C: IaasClientTrait + Clone + 'static,
{
    let ns = svc.namespace().unwrap_or_default();
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);

    if !service::is_load_balancer(&svc) {
        if has_finalizer(&svc) {
            return ctx.release(&api, &svc).await;
        }
        return Ok(Action::await_change());
    }

    finalizer(&api, SERVICE_FINALIZER, svc, |event| async {
        match event {
            Event::Apply(svc) => ctx.apply(&api, &svc).await,
            Event::Cleanup(svc) => ctx.cleanup(&svc).await,
        }
    })
    .await
    .map_err(|e| ControllerError::Finalizer(Box::new(e)))
}

/// Log the failure and requeue with the Service's backoff delay
pub fn error_policy<C>(svc: Arc<Service>, err: &ControllerError, ctx: Arc<Reconciler<C>>) -> Action
where
    C: IaasClientTrait + Clone + 'static,
{
    let key = service_key(&svc);
    let operation = if svc.metadata.deletion_timestamp.is_some() {
        "cleanup"
    } else {
        "apply"
    };
    ctx.metrics.reconcile_failure(operation);
    let delay = ctx.backoff.next_backoff(&key);
    error!("Reconciliation of Service {} failed: {}, retrying in {:?}", key, err, delay);
    Action::requeue(delay)
}

fn has_finalizer(svc: &Service) -> bool {
    svc.finalizers().iter().any(|f| f == SERVICE_FINALIZER)
}

fn service_key(svc: &Service) -> String {
    format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any())
}

fn status_patch(vips: &[String]) -> serde_json::Value {
    json!({ "status": { "loadBalancer": service::ingress_status(vips) } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures::service;

    #[test]
    fn test_has_finalizer() {
        let mut svc = service("web", &[], &[80]);
        assert!(!has_finalizer(&svc));

        svc.metadata.finalizers = Some(vec!["other/finalizer".to_string()]);
        assert!(!has_finalizer(&svc));

        svc.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(SERVICE_FINALIZER.to_string());
        assert!(has_finalizer(&svc));
    }

    #[test]
    fn test_published_set_counts_keys() {
        let published = PublishedSet::default();
        assert_eq!(published.mark("default/web", true), 1);
        assert_eq!(published.mark("default/web", true), 1);
        assert_eq!(published.mark("default/api", true), 2);
        assert_eq!(published.mark("default/web", false), 1);
        assert_eq!(published.mark("default/missing", false), 1);
    }

    #[test]
    fn test_published_set_survives_poisoned_lock() {
        let published = Arc::new(PublishedSet::default());
        published.mark("default/web", true);

        let holder = published.clone();
        let result = std::thread::spawn(move || {
            let _keys = holder.keys.lock().unwrap();
            panic!("reconcile panicked while holding the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(published.keys.is_poisoned());

        assert_eq!(published.mark("default/api", true), 2);
        assert_eq!(published.mark("default/web", false), 1);
    }

    #[test]
    fn test_service_key() {
        let svc = service("web", &[], &[80]);
        assert_eq!(service_key(&svc), "default/web");
    }

    #[test]
    fn test_status_patch() {
        let patch = status_patch(&["203.0.113.5".to_string(), "203.0.113.6".to_string()]);
        assert_eq!(
            patch,
            json!({
                "status": {
                    "loadBalancer": {
                        "ingress": [
                            { "ip": "203.0.113.5" },
                            { "ip": "203.0.113.6" }
                        ]
                    }
                }
            })
        );
    }
}
