//! Prometheus metrics for Service reconciliation

use prometheus::{histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub published_load_balancers: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "sakura_lb_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.1, 0.5, 1., 5., 15., 60., 300., 900.]),
            &["operation"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "sakura_lb_controller_reconciliation_errors_total",
                "Total count of reconciliation errors",
            ),
            &["operation"],
        )?;
        let reconciliations = IntCounterVec::new(
            opts!(
                "sakura_lb_controller_reconciliation_total",
                "Total count of reconciliations",
            ),
            &["operation"],
        )?;
        let published_load_balancers = IntGauge::with_opts(opts!(
            "sakura_lb_controller_published_load_balancers",
            "Number of Services whose load balancer VIPs were last published",
        ))?;

        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            published_load_balancers,
        })
    }

    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.published_load_balancers.clone()))?;
        Ok(self)
    }

    pub fn reconciliation(&self, operation: &str) {
        self.reconciliations.with_label_values(&[operation]).inc();
    }

    pub fn reconcile_failure(&self, operation: &str) {
        self.failures.with_label_values(&[operation]).inc();
    }

    /// Start timing one reconcile of `operation`
    pub fn measure(&self, operation: &str) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            operation: operation.to_string(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Records the elapsed time into the histogram when dropped
#[derive(Debug)]
pub struct ReconcileMeasurer {
    start: Instant,
    operation: String,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric
            .with_label_values(&[self.operation.as_str()])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// Render every metric in `registry` in the text exposition format
pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        metrics.reconciliation("apply");
        metrics.reconciliation("apply");
        metrics.reconcile_failure("cleanup");
        metrics.published_load_balancers.set(3);
        drop(metrics.measure("apply"));

        let text = encode(&registry).unwrap();
        assert!(text.contains("sakura_lb_controller_reconciliation_total{operation=\"apply\"} 2"));
        assert!(text.contains("sakura_lb_controller_reconciliation_errors_total{operation=\"cleanup\"} 1"));
        assert!(text.contains("sakura_lb_controller_published_load_balancers 3"));
        assert!(text.contains("sakura_lb_controller_reconcile_duration_seconds_count{operation=\"apply\"} 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
