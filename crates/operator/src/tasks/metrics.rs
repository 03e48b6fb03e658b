//! Prometheus metrics exported by the operator

use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::{GaugeVec, Opts, Registry};

pub const SUCCESSFUL_RECONCILE_TIME: &str = "absent_metrics_operator_successful_reconcile_time";

pub struct Metrics {
    successful_reconcile_time: GaugeVec,
}

impl Metrics {
    /// Create the operator metrics and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let successful_reconcile_time = GaugeVec::new(
            Opts::new(
                SUCCESSFUL_RECONCILE_TIME,
                "The time at which a specific PrometheusRule was successfully reconciled by the operator.",
            ),
            &["namespace", "name"],
        )?;
        registry.register(Box::new(successful_reconcile_time.clone()))?;
        Ok(Self {
            successful_reconcile_time,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_success(&self, namespace: &str, name: &str, at: DateTime<Utc>) {
        self.successful_reconcile_time
            .with_label_values(&[namespace, name])
            .set(at.timestamp() as f64);
    }

    /// Drop the series of a `PrometheusRule` that no longer exists.
    pub fn forget(&self, namespace: &str, name: &str) {
        // Removing a series that was never recorded is not an error worth surfacing.
        let _ = self
            .successful_reconcile_time
            .remove_label_values(&[namespace, name]);
    }

    /// Last recorded success as a UNIX timestamp, if any.
    #[must_use]
    pub fn last_success(&self, namespace: &str, name: &str) -> Option<f64> {
        let families = self.successful_reconcile_time.collect();
        families
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let labels = metric.get_label();
                labels.iter().any(|l| l.get_name() == "namespace" && l.get_value() == namespace)
                    && labels.iter().any(|l| l.get_name() == "name" && l.get_value() == name)
            })
            .map(|metric| metric.get_gauge().get_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_forgets_reconcile_time() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        metrics.record_success("swift", "openstack-swift.alerts", at);
        assert_eq!(
            metrics.last_success("swift", "openstack-swift.alerts"),
            Some(1_700_000_000.0)
        );

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), SUCCESSFUL_RECONCILE_TIME);

        metrics.forget("swift", "openstack-swift.alerts");
        assert!(registry.gather().is_empty());
    }
}
