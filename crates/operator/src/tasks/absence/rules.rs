//! Synthesis of absence alert rules from user-authored alert rules.

use super::defaults::{is_literal, LabelDefaults};
use super::naming::{alert_name, group_name};
use crate::crds::{Rule, RuleGroup};
use crate::tasks::types::LABEL_NO_ALERT_ON_ABSENCE;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use promql::ParseError;
use std::collections::BTreeMap;

/// `for` duration of every generated alert
pub const ABSENCE_ALERT_FOR: &str = "10m";
pub const LABEL_SEVERITY: &str = "severity";
pub const SEVERITY_INFO: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RecordingRule,
    /// `no_alert_on_absence: "true"` on the rule
    OptedOut,
    /// Every referenced metric is excluded, or none is referenced at all
    NoMetrics,
}

/// What happened to one source rule during synthesis
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Generated(Vec<Rule>),
    Skipped(SkipReason),
    ParseError(ParseError),
}

/// A source rule whose expression could not be parsed
#[derive(Debug, Clone, PartialEq)]
pub struct RuleParseFailure {
    pub group: String,
    pub alert: String,
    pub error: ParseError,
}

/// Result of synthesizing the absence alerts of one `PrometheusRule`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisReport {
    /// Generated groups in source order. Groups without rules are omitted.
    pub groups: Vec<RuleGroup>,
    pub generated_rules: usize,
    pub skipped_rules: usize,
    pub parse_errors: Vec<RuleParseFailure>,
}

/// Absence alerts for a single source rule.
pub fn absence_rules_for(rule: &Rule, defaults: &LabelDefaults) -> RuleOutcome {
    if !rule.is_alerting() {
        return RuleOutcome::Skipped(SkipReason::RecordingRule);
    }
    if rule
        .labels
        .get(LABEL_NO_ALERT_ON_ABSENCE)
        .is_some_and(|v| v == "true")
    {
        return RuleOutcome::Skipped(SkipReason::OptedOut);
    }

    let metrics = match promql::metric_names(&rule.expr_string()) {
        Ok(metrics) => metrics,
        Err(e) => return RuleOutcome::ParseError(e),
    };
    if metrics.is_empty() {
        return RuleOutcome::Skipped(SkipReason::NoMetrics);
    }

    let mut labels: BTreeMap<String, String> = defaults
        .scheme
        .keys()
        .iter()
        .map(|key| {
            let value = rule
                .labels
                .get(*key)
                .filter(|v| is_literal(v))
                .map_or_else(|| defaults.get(key).to_string(), String::clone);
            ((*key).to_string(), value)
        })
        .collect();

    let (key_a, key_b) = defaults.scheme.naming_keys();
    let classification_a = labels.get(key_a).cloned().unwrap_or_default();
    let classification_b = labels.get(key_b).cloned().unwrap_or_default();
    labels.insert(LABEL_SEVERITY.to_string(), SEVERITY_INFO.to_string());

    let rules = metrics
        .iter()
        .map(|metric| Rule {
            record: None,
            alert: Some(alert_name(&classification_a, &classification_b, metric)),
            expr: IntOrString::String(format!("absent({metric})")),
            for_: Some(ABSENCE_ALERT_FOR.to_string()),
            labels: labels.clone(),
            annotations: BTreeMap::from([
                ("summary".to_string(), format!("missing {metric}")),
                (
                    "description".to_string(),
                    format!("The metric '{metric}' is missing"),
                ),
            ]),
        })
        .collect();

    RuleOutcome::Generated(rules)
}

/// Absence alert groups for every group of the `PrometheusRule` named
/// `source_name`.
///
/// A rule that fails to parse is recorded in the report and skipped; the
/// remaining rules are still processed.
pub fn absence_rule_groups(
    source_name: &str,
    groups: &[RuleGroup],
    defaults: &LabelDefaults,
) -> SynthesisReport {
    let mut report = SynthesisReport::default();

    for group in groups {
        let mut rules = Vec::new();
        for rule in &group.rules {
            match absence_rules_for(rule, defaults) {
                RuleOutcome::Generated(generated) => {
                    report.generated_rules += generated.len();
                    rules.extend(generated);
                }
                RuleOutcome::Skipped(_) => report.skipped_rules += 1,
                RuleOutcome::ParseError(error) => report.parse_errors.push(RuleParseFailure {
                    group: group.name.clone(),
                    alert: rule.alert.clone().unwrap_or_default(),
                    error,
                }),
            }
        }

        if !rules.is_empty() {
            report.groups.push(RuleGroup {
                name: group_name(source_name, &group.name),
                interval: None,
                rules,
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::absence::defaults::{resolve_defaults, LabelScheme};

    fn alert(name: &str, expr: &str, labels: &[(&str, &str)]) -> Rule {
        Rule {
            record: None,
            alert: Some(name.to_string()),
            expr: IntOrString::String(expr.to_string()),
            for_: Some("5m".to_string()),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            annotations: BTreeMap::new(),
        }
    }

    fn defaults(scheme: LabelScheme, tier: &str, service: &str) -> LabelDefaults {
        resolve_defaults(
            scheme,
            &[alert(
                "Seed",
                "1",
                &[("tier", tier), ("support_group", tier), ("service", service)],
            )],
        )
    }

    #[test]
    fn generates_one_rule_per_metric() {
        let rule = alert(
            "HighErrorRate",
            "rate(http_errors_total[5m]) / rate(http_requests_total[5m]) > 0.1",
            &[("tier", "net"), ("service", "x")],
        );
        let RuleOutcome::Generated(rules) =
            absence_rules_for(&rule, &defaults(LabelScheme::Legacy, "os", "y"))
        else {
            panic!("expected generated rules");
        };

        let names: Vec<_> = rules.iter().filter_map(|r| r.alert.as_deref()).collect();
        assert_eq!(
            names,
            vec!["AbsentNetXHttpErrorsTotal", "AbsentNetXHttpRequestsTotal"]
        );

        let first = &rules[0];
        assert_eq!(first.expr_string(), "absent(http_errors_total)");
        assert_eq!(first.for_.as_deref(), Some("10m"));
        assert_eq!(
            first.labels,
            BTreeMap::from([
                ("service".to_string(), "x".to_string()),
                ("severity".to_string(), "info".to_string()),
                ("tier".to_string(), "net".to_string()),
            ])
        );
        assert_eq!(first.annotations["summary"], "missing http_errors_total");
        assert_eq!(
            first.annotations["description"],
            "The metric 'http_errors_total' is missing"
        );
    }

    #[test]
    fn templated_labels_fall_back_to_defaults() {
        let literal = alert("A", "foo_bar > 0", &[("tier", "storage"), ("service", "$labels.service")]);
        let RuleOutcome::Generated(rules) =
            absence_rules_for(&literal, &defaults(LabelScheme::Legacy, "os", "swift"))
        else {
            panic!("expected generated rules");
        };
        assert_eq!(rules[0].labels["tier"], "storage");
        assert_eq!(rules[0].labels["service"], "swift");
        assert_eq!(rules[0].alert.as_deref(), Some("AbsentStorageSwiftFooBar"));
    }

    #[test]
    fn new_scheme_names_with_support_group() {
        let rule = alert("A", "foo_bar > 0", &[("support_group", "compute"), ("service", "nova")]);
        let RuleOutcome::Generated(rules) =
            absence_rules_for(&rule, &defaults(LabelScheme::New, "containers", "x"))
        else {
            panic!("expected generated rules");
        };
        assert_eq!(rules[0].alert.as_deref(), Some("AbsentComputeNovaFooBar"));
        assert!(!rules[0].labels.contains_key("tier"));
    }

    #[test]
    fn skips_are_reported_with_a_reason() {
        let d = defaults(LabelScheme::Legacy, "os", "x");

        let mut recording = alert("", "sum(foo)", &[]);
        recording.alert = None;
        recording.record = Some("foo:sum".to_string());
        assert_eq!(
            absence_rules_for(&recording, &d),
            RuleOutcome::Skipped(SkipReason::RecordingRule)
        );

        let opted_out = alert("A", "foo > 0", &[("no_alert_on_absence", "true")]);
        assert_eq!(
            absence_rules_for(&opted_out, &d),
            RuleOutcome::Skipped(SkipReason::OptedOut)
        );

        let guarded = alert("A", "absent(foo_bar) or foo_bar > 0", &[]);
        assert_eq!(
            absence_rules_for(&guarded, &d),
            RuleOutcome::Skipped(SkipReason::NoMetrics)
        );

        assert!(matches!(
            absence_rules_for(&alert("A", "foo >", &[]), &d),
            RuleOutcome::ParseError(_)
        ));
    }

    #[test]
    fn parse_errors_do_not_stop_other_rules() {
        let groups = vec![
            RuleGroup {
                name: "broken".to_string(),
                interval: None,
                rules: vec![alert("Broken", "sum(foo", &[]), alert("Fine", "bar_total > 0", &[])],
            },
            RuleGroup {
                name: "empty".to_string(),
                interval: Some("1m".to_string()),
                rules: vec![alert("Up", "up == 0", &[])],
            },
        ];
        let report =
            absence_rule_groups("src", &groups, &defaults(LabelScheme::Legacy, "os", "x"));

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].name, "src/broken");
        assert_eq!(report.groups[0].rules.len(), 1);
        assert_eq!(report.generated_rules, 1);
        assert_eq!(report.skipped_rules, 1);
        assert_eq!(report.parse_errors.len(), 1);
        assert_eq!(report.parse_errors[0].alert, "Broken");
    }

    #[test]
    fn explicit_empty_label_is_inherited_over_default() {
        let d = defaults(LabelScheme::Legacy, "os", "swift");
        let rule = alert("A", "foo_bar > 0", &[("tier", ""), ("service", "$labels.service")]);
        let RuleOutcome::Generated(rules) = absence_rules_for(&rule, &d) else {
            panic!("expected generated rules");
        };
        assert_eq!(rules[0].labels["tier"], "");
        assert_eq!(rules[0].labels["service"], "swift");
    }

    #[test]
    fn missing_defaults_become_empty_strings() {
        let d = resolve_defaults(LabelScheme::Legacy, std::iter::empty::<&Rule>());
        let RuleOutcome::Generated(rules) = absence_rules_for(&alert("A", "foo_bar > 0", &[]), &d)
        else {
            panic!("expected generated rules");
        };
        assert_eq!(rules[0].labels["tier"], "");
        assert_eq!(rules[0].alert.as_deref(), Some("AbsentFooBar"));
    }
}
