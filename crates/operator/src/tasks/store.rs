//! Object store seam for `PrometheusRule` resources.
//!
//! The reconciliation engine only talks to [`RuleStore`]; the Kubernetes
//! implementation lives in [`KubeRuleStore`]. "Not found" is part of the
//! normal control flow and is reported as `None`, never as an error.

use super::types::Result;
use crate::crds::PrometheusRule;
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, instrument};

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<PrometheusRule>>;

    /// List resources in a namespace, optionally filtered by a label selector
    /// (e.g. `absent-metrics-operator/managed-by` to match on key presence).
    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PrometheusRule>>;

    async fn create(&self, rule: &PrometheusRule) -> Result<PrometheusRule>;

    /// Replace the whole object. The object's resource version is sent along
    /// so a concurrent modification fails with a conflict instead of being
    /// overwritten.
    async fn replace(&self, rule: &PrometheusRule) -> Result<PrometheusRule>;

    /// Delete an object. Deleting an object that is already gone succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`RuleStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeRuleStore {
    client: Client,
}

impl KubeRuleStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<PrometheusRule> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl RuleStore for KubeRuleStore {
    #[instrument(skip(self))]
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<PrometheusRule>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PrometheusRule>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self.api(namespace).list(&params).await?;
        debug!("Listed {} PrometheusRule(s)", list.items.len());
        Ok(list.items)
    }

    #[instrument(skip(self, rule), fields(name = %rule.name_any()))]
    async fn create(&self, rule: &PrometheusRule) -> Result<PrometheusRule> {
        let namespace = rule.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .create(&PostParams::default(), rule)
            .await?)
    }

    #[instrument(skip(self, rule), fields(name = %rule.name_any()))]
    async fn replace(&self, rule: &PrometheusRule) -> Result<PrometheusRule> {
        let namespace = rule.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .replace(&rule.name_any(), &PostParams::default(), rule)
            .await?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!("PrometheusRule {}/{} already deleted", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
