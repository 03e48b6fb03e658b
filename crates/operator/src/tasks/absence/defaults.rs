//! Classification label defaults for one (namespace, Prometheus server) scope.

use crate::crds::{PrometheusRule, Rule};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LABEL_TIER: &str = "tier";
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_SUPPORT_GROUP: &str = "support_group";

/// Label values containing this marker are resolved by Prometheus at alert
/// time and cannot be carried over literally.
pub const TEMPLATE_MARKER: &str = "$labels";

/// Which classification labels are written onto generated alert rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelScheme {
    /// `tier` and `service`
    #[default]
    Legacy,
    /// `support_group` and `service`
    New,
    /// All three keys, for migrating from the legacy pair to the new one
    Both,
}

impl LabelScheme {
    /// Label keys carried onto generated rules and resolved as defaults, sorted.
    #[must_use]
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            LabelScheme::Legacy => &[LABEL_SERVICE, LABEL_TIER],
            LabelScheme::New => &[LABEL_SERVICE, LABEL_SUPPORT_GROUP],
            LabelScheme::Both => &[LABEL_SERVICE, LABEL_SUPPORT_GROUP, LABEL_TIER],
        }
    }

    /// The pair of keys whose values go into generated alert names.
    /// `Both` keeps the legacy pair so alert names survive the migration.
    #[must_use]
    pub fn naming_keys(self) -> (&'static str, &'static str) {
        match self {
            LabelScheme::Legacy | LabelScheme::Both => (LABEL_TIER, LABEL_SERVICE),
            LabelScheme::New => (LABEL_SUPPORT_GROUP, LABEL_SERVICE),
        }
    }
}

/// Whether a label value can be copied verbatim onto a generated rule.
/// An explicit empty value is copied as is.
#[must_use]
pub fn is_literal(value: &str) -> bool {
    !value.contains(TEMPLATE_MARKER)
}

/// Whether a label value can serve as a default for other rules.
#[must_use]
pub fn is_vote(value: &str) -> bool {
    !value.is_empty() && is_literal(value)
}

/// Resolved fallback values for the classification labels of a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDefaults {
    pub scheme: LabelScheme,
    /// One entry per key of the scheme. Unresolved keys map to `""`.
    pub values: BTreeMap<String, String>,
    /// Keys for which no literal value exists anywhere in scope
    pub missing: Vec<String>,
}

impl LabelDefaults {
    fn from_values(scheme: LabelScheme, mut values: BTreeMap<String, String>) -> Self {
        let mut missing = Vec::new();
        for key in scheme.keys() {
            let value = values.entry((*key).to_string()).or_default();
            if value.is_empty() {
                missing.push((*key).to_string());
            }
        }
        Self {
            scheme,
            values,
            missing,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map_or("", String::as_str)
    }

    #[must_use]
    pub fn classification_a(&self) -> &str {
        self.get(self.scheme.naming_keys().0)
    }

    #[must_use]
    pub fn classification_b(&self) -> &str {
        self.get(self.scheme.naming_keys().1)
    }

    /// Defaults taken from the metadata labels of a `PrometheusRule`, if it
    /// carries a literal value for every key of the scheme.
    #[must_use]
    pub fn from_resource_labels(
        scheme: LabelScheme,
        labels: &BTreeMap<String, String>,
    ) -> Option<Self> {
        let mut values = BTreeMap::new();
        for key in scheme.keys() {
            let value = labels.get(*key).filter(|v| is_vote(v))?;
            values.insert((*key).to_string(), value.clone());
        }
        Some(Self::from_values(scheme, values))
    }
}

/// Plurality vote over the literal classification values of `rules`.
///
/// Only alerting rules take part. Per key, the most frequent literal value
/// wins and ties go to the value encountered first.
pub fn resolve_defaults<'a>(
    scheme: LabelScheme,
    rules: impl IntoIterator<Item = &'a Rule>,
) -> LabelDefaults {
    // Vec instead of a map so that tallies remember first-seen order
    let mut tallies: BTreeMap<&str, Vec<(&'a str, usize)>> = BTreeMap::new();

    for rule in rules.into_iter().filter(|rule| rule.is_alerting()) {
        for key in scheme.keys() {
            let Some(value) = rule.labels.get(*key).filter(|v| is_vote(v)) else {
                continue;
            };
            let tally = tallies.entry(*key).or_default();
            match tally.iter_mut().find(|(seen, _)| *seen == value.as_str()) {
                Some((_, count)) => *count += 1,
                None => tally.push((value.as_str(), 1)),
            }
        }
    }

    let values = tallies
        .into_iter()
        .filter_map(|(key, tally)| {
            let mut winner: Option<(&str, usize)> = None;
            for (value, count) in tally {
                if winner.map_or(true, |(_, best)| count > best) {
                    winner = Some((value, count));
                }
            }
            winner.map(|(value, _)| (key.to_string(), value.to_string()))
        })
        .collect();

    LabelDefaults::from_values(scheme, values)
}

/// Defaults for the scope of `source`.
///
/// The labels of the source resource itself win when complete. Otherwise the
/// vote runs over every rule of the user-authored `PrometheusRule`s in
/// `namespace_resources` that belong to the same Prometheus server.
pub fn resolve_scope_defaults(
    scheme: LabelScheme,
    source: &PrometheusRule,
    namespace_resources: &[PrometheusRule],
    prometheus_server: &str,
    fallback_prometheus_server: &str,
) -> LabelDefaults {
    if let Some(defaults) = LabelDefaults::from_resource_labels(scheme, source.labels()) {
        return defaults;
    }

    let rules = namespace_resources
        .iter()
        .filter(|resource| !super::is_managed(resource))
        .filter(|resource| {
            super::prometheus_server_of(resource, fallback_prometheus_server) == prometheus_server
        })
        .flat_map(|resource| resource.spec.groups.iter())
        .flat_map(|group| group.rules.iter());

    resolve_defaults(scheme, rules)
}
