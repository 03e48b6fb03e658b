//! Reconciliation of a single `PrometheusRule`.

use super::absence::{
    absence_rule_groups, companion_name, decide, is_disabled, is_managed, prometheus_server_of,
    resolve_scope_defaults, Decision, LabelDefaults,
};
use super::cleanup::{clean_up_source, sweep_companion};
use super::companion::{
    apply_label_defaults, create_companion, delete_companion, new_companion, update_companion,
    WriteOutcome,
};
use super::types::{Context, Error, Result};
use crate::crds::PrometheusRule;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Generate the absence alerts of a user-authored `PrometheusRule` and store
/// them on its companion.
#[instrument(skip(ctx, source), fields(namespace = ?source.namespace(), name = %source.name_any()))]
pub async fn update_absence_rules(ctx: &Context, source: &PrometheusRule) -> Result<WriteOutcome> {
    let namespace = source.namespace().ok_or(Error::MissingObjectKey)?;
    let name = source.name_any();
    let fallback = ctx.config.fallback_prometheus_server.as_str();
    let prometheus_server = prometheus_server_of(source, fallback);

    let existing = ctx
        .store
        .get(&namespace, &companion_name(prometheus_server))
        .await?;

    // Defaults are resolved on every pass; source rules change between passes
    let scheme = ctx.config.label_scheme;
    let defaults = match LabelDefaults::from_resource_labels(scheme, source.labels()) {
        Some(defaults) => defaults,
        None => {
            let resources = ctx.store.list(&namespace, None).await?;
            resolve_scope_defaults(scheme, source, &resources, prometheus_server, fallback)
        }
    };

    let report = absence_rule_groups(&name, &source.spec.groups, &defaults);
    for failure in &report.parse_errors {
        warn!(
            group = %failure.group,
            alert = %failure.alert,
            error = %failure.error,
            "could not parse rule expression, skipping rule"
        );
    }
    debug!(
        groups = report.groups.len(),
        generated = report.generated_rules,
        skipped = report.skipped_rules,
        parse_errors = report.parse_errors.len(),
        "synthesized absence alert rules"
    );

    let decision = decide(
        existing.as_ref().map(|companion| companion.spec.groups.as_slice()),
        report.groups,
    );

    match (decision, existing) {
        (Decision::NoOp, _) => {
            debug!("absence alert rules are up to date");
            Ok(WriteOutcome::Unchanged)
        }
        (Decision::CleanupSource, _) => {
            tolerate_missing_companion(
                clean_up_source(ctx, &namespace, &name, Some(prometheus_server)).await,
            )
        }
        (Decision::Create(groups), _) => {
            report_missing_defaults(&defaults, &namespace, prometheus_server);
            let mut companion = new_companion(&namespace, prometheus_server, groups);
            apply_label_defaults(&mut companion, &defaults);
            create_companion(ctx, companion).await?;
            Ok(WriteOutcome::Created)
        }
        (Decision::Patch(groups), Some(mut companion)) => {
            report_missing_defaults(&defaults, &namespace, prometheus_server);
            apply_label_defaults(&mut companion, &defaults);
            companion.spec.groups = groups;
            update_companion(ctx, companion).await?;
            Ok(WriteOutcome::Updated)
        }
        (Decision::Delete, Some(companion)) => {
            delete_companion(ctx, &companion).await?;
            Ok(WriteOutcome::Deleted)
        }
        // decide() only patches or deletes a companion that exists
        (Decision::Patch(_) | Decision::Delete, None) => Ok(WriteOutcome::Unchanged),
    }
}

fn report_missing_defaults(defaults: &LabelDefaults, namespace: &str, prometheus_server: &str) {
    for key in &defaults.missing {
        warn!(
            namespace = %namespace,
            prometheus = %prometheus_server,
            label = %key,
            "could not find a default value for '{}' label",
            key
        );
    }
}

/// Reconcile a `PrometheusRule` that exists.
#[instrument(skip(ctx, rule), fields(namespace = ?rule.namespace(), name = %rule.name_any()))]
pub async fn reconcile_object(ctx: &Context, rule: &PrometheusRule) -> Result<Action> {
    let namespace = rule.namespace().ok_or(Error::MissingObjectKey)?;
    let name = rule.name_any();

    if is_managed(rule) {
        sweep_companion(ctx, rule.clone()).await?;
        return Ok(Action::requeue(ctx.config.resync_interval()));
    }

    if is_disabled(rule) {
        let prometheus_server = prometheus_server_of(rule, &ctx.config.fallback_prometheus_server);
        tolerate_missing_companion(
            clean_up_source(ctx, &namespace, &name, Some(prometheus_server)).await,
        )?;
        ctx.metrics.forget(&namespace, &name);
        return Ok(Action::await_change());
    }

    update_absence_rules(ctx, rule).await?;
    ctx.metrics.record_success(&namespace, &name, ctx.clock.now());
    Ok(Action::requeue(ctx.config.resync_interval()))
}

/// Reconcile a `PrometheusRule` by key, treating "not found" as a deletion.
#[instrument(skip(ctx))]
pub async fn reconcile_key(ctx: &Context, namespace: &str, name: &str) -> Result<Action> {
    match ctx.store.get(namespace, name).await? {
        Some(rule) => reconcile_object(ctx, &rule).await,
        None => {
            handle_deleted(ctx, namespace, name).await?;
            Ok(Action::await_change())
        }
    }
}

/// Remove the absence alerts of a `PrometheusRule` that was deleted.
///
/// The Prometheus server of a deleted resource is unknown, so every companion
/// in the namespace is considered.
pub async fn handle_deleted(ctx: &Context, namespace: &str, name: &str) -> Result<()> {
    ctx.metrics.forget(namespace, name);
    if name.ends_with(super::absence::naming::COMPANION_NAME_SUFFIX) {
        // A deleted companion is recreated by the next pass over its sources
        return Ok(());
    }
    tolerate_missing_companion(clean_up_source(ctx, namespace, name, None).await)?;
    Ok(())
}

fn tolerate_missing_companion(result: Result<WriteOutcome>) -> Result<WriteOutcome> {
    match result {
        Err(e @ Error::MissingCorrespondingCompanion { .. }) => {
            warn!(error = %e, "skipping clean up of orphaned absence alert rules");
            Ok(WriteOutcome::Unchanged)
        }
        other => other,
    }
}

/// Run one pass, bounded by the configured reconcile timeout.
pub async fn with_timeout<T>(ctx: &Context, pass: impl Future<Output = Result<T>>) -> Result<T> {
    let limit = ctx.config.reconcile_timeout();
    tokio::time::timeout(limit, pass)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

/// kube-runtime reconciler for `PrometheusRule`
pub async fn reconcile_prometheus_rule(
    rule: Arc<PrometheusRule>,
    ctx: Arc<Context>,
) -> Result<Action> {
    with_timeout(&ctx, reconcile_object(&ctx, &rule)).await
}

/// Transient failures are retried after `errorRequeueSeconds`; anything else
/// waits for the next change of the object.
pub fn error_policy(rule: Arc<PrometheusRule>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_retryable() {
        warn!(
            error = %err,
            namespace = ?rule.namespace(),
            name = %rule.name_any(),
            "PrometheusRule reconciliation failed, requeueing"
        );
        Action::requeue(ctx.config.error_requeue())
    } else {
        error!(
            error = %err,
            namespace = ?rule.namespace(),
            name = %rule.name_any(),
            "PrometheusRule reconciliation failed"
        );
        Action::await_change()
    }
}
