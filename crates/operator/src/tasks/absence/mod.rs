//! Absence alert generation: everything that turns user-authored
//! `PrometheusRule`s into the groups stored on a companion resource, without
//! talking to the API server.

use crate::crds::PrometheusRule;
use crate::tasks::types::{LABEL_DISABLE, LABEL_MANAGED_BY, LABEL_PROMETHEUS_SERVER};
use kube::ResourceExt;

pub mod defaults;
pub mod merge;
pub mod naming;
pub mod rules;

pub use defaults::{resolve_defaults, resolve_scope_defaults, LabelDefaults, LabelScheme};
pub use merge::{decide, decide_replacement, merge_rule_groups, Decision};
pub use naming::{alert_name, companion_name, group_name, source_of_group};
pub use rules::{absence_rule_groups, absence_rules_for, RuleOutcome, SkipReason, SynthesisReport};

/// Whether the resource is a companion created by this operator.
#[must_use]
pub fn is_managed(resource: &PrometheusRule) -> bool {
    resource.labels().contains_key(LABEL_MANAGED_BY)
}

/// Whether the resource opted out of absence alerts altogether.
#[must_use]
pub fn is_disabled(resource: &PrometheusRule) -> bool {
    resource
        .labels()
        .get(LABEL_DISABLE)
        .is_some_and(|v| v == "true")
}

/// The Prometheus server a resource is evaluated by.
#[must_use]
pub fn prometheus_server_of<'a>(resource: &'a PrometheusRule, fallback: &'a str) -> &'a str {
    resource
        .labels()
        .get(LABEL_PROMETHEUS_SERVER)
        .map(String::as_str)
        .filter(|server| !server.is_empty())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::PrometheusRuleSpec;

    fn labelled(labels: &[(&str, &str)]) -> PrometheusRule {
        let mut pr = PrometheusRule::new("r", PrometheusRuleSpec::default());
        pr.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        pr
    }

    #[test]
    fn classifies_resources_by_label() {
        assert!(is_managed(&labelled(&[(LABEL_MANAGED_BY, "true")])));
        assert!(!is_managed(&labelled(&[])));

        assert!(is_disabled(&labelled(&[(LABEL_DISABLE, "true")])));
        assert!(!is_disabled(&labelled(&[(LABEL_DISABLE, "false")])));
    }

    #[test]
    fn missing_server_label_uses_fallback() {
        assert_eq!(
            prometheus_server_of(&labelled(&[("prometheus", "openstack")]), "kubernetes"),
            "openstack"
        );
        assert_eq!(prometheus_server_of(&labelled(&[]), "kubernetes"), "kubernetes");
        assert_eq!(
            prometheus_server_of(&labelled(&[("prometheus", "")]), "kubernetes"),
            "kubernetes"
        );
    }
}
