//! Companion `PrometheusRule` construction and writes.
//!
//! Every write replaces the whole object, so a pass that is dropped before it
//! reaches one of these functions leaves the store untouched.

use super::absence::{companion_name, LabelDefaults};
use super::clock::rfc3339;
use super::types::{
    Context, Error, Result, ANNOTATION_UPDATED_AT, LABEL_MANAGED_BY, LABEL_PROMETHEUS_SERVER,
    LABEL_TYPE, TYPE_ALERTING_RULES,
};
use crate::crds::{PrometheusRule, PrometheusRuleSpec, RuleGroup};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::info;

/// A companion that does not exist yet, carrying the management labels.
#[must_use]
pub fn new_companion(
    namespace: &str,
    prometheus_server: &str,
    groups: Vec<RuleGroup>,
) -> PrometheusRule {
    PrometheusRule {
        metadata: ObjectMeta {
            name: Some(companion_name(prometheus_server)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_MANAGED_BY.to_string(), "true".to_string()),
                (
                    LABEL_PROMETHEUS_SERVER.to_string(),
                    prometheus_server.to_string(),
                ),
                (LABEL_TYPE.to_string(), TYPE_ALERTING_RULES.to_string()),
            ])),
            ..ObjectMeta::default()
        },
        spec: PrometheusRuleSpec { groups },
    }
}

/// Reflect the resolved classification defaults onto the companion labels.
pub fn apply_label_defaults(companion: &mut PrometheusRule, defaults: &LabelDefaults) {
    let labels = companion.labels_mut();
    for (key, value) in &defaults.values {
        labels.insert(key.clone(), value.clone());
    }
}

/// Write issued by a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

fn stamp(ctx: &Context, companion: &mut PrometheusRule) {
    companion
        .annotations_mut()
        .insert(ANNOTATION_UPDATED_AT.to_string(), rfc3339(ctx.clock.now()));
}

fn ensure_not_cancelled(ctx: &Context) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

pub async fn create_companion(ctx: &Context, mut companion: PrometheusRule) -> Result<()> {
    ensure_not_cancelled(ctx)?;
    stamp(ctx, &mut companion);
    ctx.store.create(&companion).await?;
    info!(
        namespace = %companion.namespace().unwrap_or_default(),
        name = %companion.name_any(),
        groups = companion.spec.groups.len(),
        "successfully created AbsencePrometheusRule"
    );
    Ok(())
}

pub async fn update_companion(ctx: &Context, mut companion: PrometheusRule) -> Result<()> {
    ensure_not_cancelled(ctx)?;
    stamp(ctx, &mut companion);
    ctx.store.replace(&companion).await?;
    info!(
        namespace = %companion.namespace().unwrap_or_default(),
        name = %companion.name_any(),
        groups = companion.spec.groups.len(),
        "successfully updated AbsencePrometheusRule"
    );
    Ok(())
}

pub async fn delete_companion(ctx: &Context, companion: &PrometheusRule) -> Result<()> {
    ensure_not_cancelled(ctx)?;
    let namespace = companion.namespace().ok_or(Error::MissingObjectKey)?;
    ctx.store.delete(&namespace, &companion.name_any()).await?;
    info!(
        namespace = %namespace,
        name = %companion.name_any(),
        "successfully deleted AbsencePrometheusRule"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::Rule;
    use crate::tasks::absence::{resolve_defaults, LabelScheme};

    #[test]
    fn new_companion_has_management_labels() {
        let companion = new_companion("swift", "openstack", Vec::new());
        assert_eq!(
            companion.metadata.name.as_deref(),
            Some("openstack-absent-metric-alert-rules")
        );
        assert_eq!(companion.metadata.namespace.as_deref(), Some("swift"));

        let labels = companion.labels();
        assert_eq!(labels[LABEL_MANAGED_BY], "true");
        assert_eq!(labels[LABEL_PROMETHEUS_SERVER], "openstack");
        assert_eq!(labels[LABEL_TYPE], "alerting-rules");
    }

    #[test]
    fn label_defaults_are_written_including_empty_ones() {
        let mut companion = new_companion("swift", "openstack", Vec::new());
        let defaults = resolve_defaults(LabelScheme::Both, std::iter::empty::<&Rule>());
        apply_label_defaults(&mut companion, &defaults);

        let labels = companion.labels();
        assert_eq!(labels["tier"], "");
        assert_eq!(labels["support_group"], "");
        assert_eq!(labels["service"], "");
    }
}
