//! `PrometheusRule` Custom Resource Definition (prometheus-operator schema)
//!
//! Only the fields this operator reads or writes are modelled. The same kind
//! holds both user-authored alert rules and the generated absence alert rules;
//! the latter are told apart by the management labels in
//! [`crate::tasks::types`].

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "PrometheusRule",
    plural = "prometheusrules"
)]
#[kube(namespaced)]
pub struct PrometheusRuleSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<RuleGroup>,
}

/// A named, ordered list of rules evaluated together
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A single alerting or recording rule
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Rule {
    /// Name of the time series to output to (recording rules only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,

    /// Name of the alert (alerting rules only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,

    /// PromQL expression to evaluate
    pub expr: IntOrString,

    /// Alerts are considered firing once they have been returned for this long
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Rule {
    /// The rule expression as text. Integer expressions are valid PromQL
    /// number literals.
    #[must_use]
    pub fn expr_string(&self) -> String {
        match &self.expr {
            IntOrString::Int(value) => value.to_string(),
            IntOrString::String(value) => value.clone(),
        }
    }

    #[must_use]
    pub fn is_alerting(&self) -> bool {
        self.alert.as_deref().is_some_and(|alert| !alert.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_prometheus_operator_yaml() {
        let yaml = r#"
apiVersion: monitoring.coreos.com/v1
kind: PrometheusRule
metadata:
  name: kubernetes-keppel.alerts
  namespace: resmgmt
  labels:
    prometheus: kubernetes
spec:
  groups:
    - name: keppel.alerts
      rules:
        - alert: KeppelPodSchedulingInsufficientMemory
          expr: sum(rate(kube_pod_failed_scheduling_memory_total{namespace="keppel"}[30m])) by (pod_name) > 0
          for: 15m
          labels:
            tier: os
            service: keppel
            severity: info
          annotations:
            summary: Scheduling failed due to insufficient memory
        - record: keppel:up:sum
          expr: 1
"#;
        let rule: PrometheusRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.spec.groups.len(), 1);

        let rules = &rule.spec.groups[0].rules;
        assert!(rules[0].is_alerting());
        assert_eq!(rules[0].for_.as_deref(), Some("15m"));
        assert_eq!(rules[0].labels.get("tier").map(String::as_str), Some("os"));
        assert!(!rules[1].is_alerting());
        assert_eq!(rules[1].expr_string(), "1");
    }

    #[test]
    fn serializes_for_field_with_its_wire_name() {
        let rule = Rule {
            record: None,
            alert: Some("AbsentFoo".to_string()),
            expr: IntOrString::String("absent(foo)".to_string()),
            for_: Some("10m".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        };
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["for"], "10m");
        assert!(value.get("labels").is_none());
        assert!(value.get("record").is_none());
    }
}
