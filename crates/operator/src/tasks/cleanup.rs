//! Removal of orphaned absence alert groups.
//!
//! Two entry points: by source identity, for a `PrometheusRule` that was
//! deleted or disabled, and by existence sweep over one companion, which
//! catches deletions the identity path never saw.

use super::absence::merge::{holds_source, with_existing_sources, without_source};
use super::absence::{companion_name, decide_replacement, Decision};
use super::companion::{delete_companion, update_companion, WriteOutcome};
use super::types::{Context, Error, Result, LABEL_MANAGED_BY};
use crate::crds::{PrometheusRule, RuleGroup};
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Drop every group generated for the `PrometheusRule` `namespace/source`.
///
/// With a known Prometheus server the companion is fetched by name; without
/// one, every companion in the namespace is scanned for groups of `source`.
#[instrument(skip(ctx))]
pub async fn clean_up_source(
    ctx: &Context,
    namespace: &str,
    source: &str,
    prometheus_server: Option<&str>,
) -> Result<WriteOutcome> {
    let companion = match prometheus_server {
        Some(server) => ctx.store.get(namespace, &companion_name(server)).await?,
        None => ctx
            .store
            .list(namespace, Some(LABEL_MANAGED_BY))
            .await?
            .into_iter()
            .find(|companion| holds_source(&companion.spec.groups, source)),
    };

    let Some(companion) = companion else {
        return Err(Error::MissingCorrespondingCompanion {
            namespace: namespace.to_string(),
            source_name: source.to_string(),
        });
    };

    let remaining = without_source(&companion.spec.groups, source);
    replace_groups(ctx, companion, remaining).await
}

/// Drop the groups of a companion whose source `PrometheusRule` no longer
/// exists in its namespace.
#[instrument(skip(ctx, companion), fields(namespace = ?companion.namespace(), name = %companion.name_any()))]
pub async fn sweep_companion(ctx: &Context, companion: PrometheusRule) -> Result<WriteOutcome> {
    let namespace = companion.namespace().ok_or(Error::MissingObjectKey)?;
    let existing: BTreeSet<String> = ctx
        .store
        .list(&namespace, None)
        .await?
        .iter()
        .map(ResourceExt::name_any)
        .collect();

    let remaining = with_existing_sources(&companion.spec.groups, &existing);
    replace_groups(ctx, companion, remaining).await
}

async fn replace_groups(
    ctx: &Context,
    mut companion: PrometheusRule,
    groups: Vec<RuleGroup>,
) -> Result<WriteOutcome> {
    match decide_replacement(&companion.spec.groups, groups) {
        Decision::Delete => {
            delete_companion(ctx, &companion).await?;
            Ok(WriteOutcome::Deleted)
        }
        Decision::Patch(groups) => {
            companion.spec.groups = groups;
            update_companion(ctx, companion).await?;
            Ok(WriteOutcome::Updated)
        }
        _ => {
            debug!("no orphaned absence alert rules found");
            Ok(WriteOutcome::Unchanged)
        }
    }
}
