//! Merging generated groups into a companion resource and deciding the write.

use super::naming::source_of_group;
use crate::crds::RuleGroup;
use std::collections::BTreeSet;

/// Write to issue against the companion resource
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No companion exists yet; create one holding these groups
    Create(Vec<RuleGroup>),
    /// Replace the groups of the existing companion
    Patch(Vec<RuleGroup>),
    /// The companion would be empty
    Delete,
    NoOp,
    /// Nothing was generated for the source but a companion exists; drop
    /// whatever it still holds for that source
    CleanupSource,
}

/// Merge freshly generated groups into the existing ones.
///
/// Existing groups with the name of a generated group are replaced wholesale,
/// the others are carried over unchanged. Generated groups without a
/// counterpart are appended in the order they were generated.
#[must_use]
pub fn merge_rule_groups(existing: &[RuleGroup], generated: Vec<RuleGroup>) -> Vec<RuleGroup> {
    let mut pending: Vec<Option<RuleGroup>> = generated.into_iter().map(Some).collect();

    let mut merged: Vec<RuleGroup> = existing
        .iter()
        .map(|old| {
            pending
                .iter_mut()
                .find(|new| matches!(new, Some(new) if new.name == old.name))
                .and_then(Option::take)
                .unwrap_or_else(|| old.clone())
        })
        .collect();

    merged.extend(pending.into_iter().flatten());
    merged
}

/// Sort groups by name so stored output is deterministic.
pub fn sort_rule_groups(groups: &mut [RuleGroup]) {
    groups.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Groups not generated for the `PrometheusRule` named `source`.
#[must_use]
pub fn without_source(groups: &[RuleGroup], source: &str) -> Vec<RuleGroup> {
    groups
        .iter()
        .filter(|group| source_of_group(&group.name) != source)
        .cloned()
        .collect()
}

/// Groups whose source `PrometheusRule` is among `sources`.
#[must_use]
pub fn with_existing_sources(groups: &[RuleGroup], sources: &BTreeSet<String>) -> Vec<RuleGroup> {
    groups
        .iter()
        .filter(|group| sources.contains(source_of_group(&group.name)))
        .cloned()
        .collect()
}

/// Whether any group was generated for the `PrometheusRule` named `source`.
#[must_use]
pub fn holds_source(groups: &[RuleGroup], source: &str) -> bool {
    groups
        .iter()
        .any(|group| source_of_group(&group.name) == source)
}

/// Decide the write for one reconciliation of a source resource.
///
/// `existing` is `None` when the companion does not exist.
#[must_use]
pub fn decide(existing: Option<&[RuleGroup]>, generated: Vec<RuleGroup>) -> Decision {
    match existing {
        None if generated.is_empty() => Decision::NoOp,
        Some(_) if generated.is_empty() => Decision::CleanupSource,
        None => {
            let mut groups = generated;
            sort_rule_groups(&mut groups);
            Decision::Create(groups)
        }
        Some(existing) => decide_replacement(existing, merge_rule_groups(existing, generated)),
    }
}

/// Decide the write that replaces the groups of an existing companion with
/// `groups`.
#[must_use]
pub fn decide_replacement(existing: &[RuleGroup], mut groups: Vec<RuleGroup>) -> Decision {
    if groups.as_slice() == existing {
        return Decision::NoOp;
    }
    if groups.is_empty() {
        return Decision::Delete;
    }
    sort_rule_groups(&mut groups);
    Decision::Patch(groups)
}
