use super::clock::Clock;
use super::config::ControllerConfig;
use super::metrics::Metrics;
use super::store::RuleStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Label identifying resources created and managed by this operator
pub const LABEL_MANAGED_BY: &str = "absent-metrics-operator/managed-by";
/// Label on a `PrometheusRule` that opts the whole resource out of absence alerts
pub const LABEL_DISABLE: &str = "absent-metrics-operator/disable";
/// Label on an individual alert rule that opts it out of absence alerts.
/// Rule labels must be valid Prometheus label names, hence the different key.
pub const LABEL_NO_ALERT_ON_ABSENCE: &str = "no_alert_on_absence";
/// Label naming the Prometheus server a resource is destined for
pub const LABEL_PROMETHEUS_SERVER: &str = "prometheus";
/// Resource type label set on every generated resource
pub const LABEL_TYPE: &str = "type";
pub const TYPE_ALERTING_RULES: &str = "alerting-rules";

/// Annotation recording the last successful write (RFC3339, UTC)
pub const ANNOTATION_UPDATED_AT: &str = "absent-metrics-operator/updated-at";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Object is missing a name or namespace")]
    MissingObjectKey,

    #[error("could not find the AbsencePrometheusRule holding absence alerts for {namespace}/{source_name}")]
    MissingCorrespondingCompanion { namespace: String, source_name: String },

    #[error("reconciliation cancelled before writing")]
    Cancelled,

    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Whether re-running the same pass may succeed. Client errors other than
    /// conflicts and throttling will fail again on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(response)) => {
                !(400..500).contains(&response.code) || matches!(response.code, 409 | 429)
            }
            Error::KubeError(_) | Error::Cancelled | Error::Timeout(_) => true,
            Error::ConfigError(_)
            | Error::MissingObjectKey
            | Error::MissingCorrespondingCompanion { .. } => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every reconciliation pass
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn RuleStore>,
    pub config: Arc<ControllerConfig>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    /// Cancelled on shutdown; checked before every write
    pub cancel: CancellationToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        }))
    }

    #[test]
    fn transient_api_errors_are_retryable() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(503).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!api_error(422).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!Error::MissingCorrespondingCompanion {
            namespace: "swift".to_string(),
            source_name: "openstack-swift.alerts".to_string(),
        }
        .is_retryable());
    }
}
