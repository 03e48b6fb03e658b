//! Operator Configuration
//!
//! Loaded from a mounted `ConfigMap` file. Every field has a default so an
//! empty file (or no file at all) yields a working configuration.

use super::absence::defaults::LabelScheme;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default location of the mounted configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Main operator configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ControllerConfig {
    /// Which classification label pair is written onto generated rules
    #[serde(default, rename = "labelScheme")]
    pub label_scheme: LabelScheme,

    /// Backend identifier used for `PrometheusRule`s without a `prometheus` label
    #[serde(
        default = "default_fallback_prometheus_server",
        rename = "fallbackPrometheusServer"
    )]
    pub fallback_prometheus_server: String,

    /// Restrict the watch to a single namespace (`None` watches all namespaces)
    #[serde(default, rename = "watchNamespace")]
    pub watch_namespace: Option<String>,

    #[serde(
        default = "default_resync_interval_seconds",
        rename = "resyncIntervalSeconds"
    )]
    pub resync_interval_seconds: u64,

    #[serde(
        default = "default_error_requeue_seconds",
        rename = "errorRequeueSeconds"
    )]
    pub error_requeue_seconds: u64,

    #[serde(
        default = "default_reconcile_timeout_seconds",
        rename = "reconcileTimeoutSeconds"
    )]
    pub reconcile_timeout_seconds: u64,

    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP endpoint configuration (health probes and metrics)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address", rename = "bindAddress")]
    pub bind_address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_fallback_prometheus_server() -> String {
    "kubernetes".to_string()
}

fn default_resync_interval_seconds() -> u64 {
    300 // 5 minutes
}

fn default_error_requeue_seconds() -> u64 {
    30
}

fn default_reconcile_timeout_seconds() -> u64 {
    30
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl ControllerConfig {
    /// Validate that configuration values are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.fallback_prometheus_server.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "fallbackPrometheusServer must not be empty."
            ));
        }

        for (field, value) in [
            ("resyncIntervalSeconds", self.resync_interval_seconds),
            ("errorRequeueSeconds", self.error_requeue_seconds),
            ("reconcileTimeoutSeconds", self.reconcile_timeout_seconds),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{field} must be greater than zero."));
            }
        }

        if let Some(namespace) = &self.watch_namespace {
            if namespace.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "watchNamespace must be omitted or a namespace name, not an empty string."
                ));
            }
        }

        self.bind_address()?;
        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        // An empty document deserializes to unit, not to an empty mapping
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    pub fn bind_address(&self) -> Result<SocketAddr, anyhow::Error> {
        self.http.bind_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "http.bindAddress '{}' is not a valid socket address: {e}",
                self.http.bind_address
            )
        })
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    #[must_use]
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }

    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_seconds)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            label_scheme: LabelScheme::default(),
            fallback_prometheus_server: default_fallback_prometheus_server(),
            watch_namespace: None,
            resync_interval_seconds: default_resync_interval_seconds(),
            error_requeue_seconds: default_error_requeue_seconds(),
            reconcile_timeout_seconds: default_reconcile_timeout_seconds(),
            http: HttpConfig::default(),
        }
    }
}
