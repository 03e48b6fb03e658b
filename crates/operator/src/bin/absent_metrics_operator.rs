/*
 * 5D Labs Agent Platform - Absent Metrics Operator
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Absent Metrics Operator - Kubernetes controller for `PrometheusRule` resources
//!
//! This service:
//! - Watches `PrometheusRule` custom resources
//! - Maintains companion resources with `absent()` alerts for referenced metrics
//! - Provides health and Prometheus metrics endpoints

use absent_metrics_operator::tasks::{
    clock::SystemClock,
    config::{ControllerConfig, DEFAULT_CONFIG_PATH},
    metrics::Metrics,
    run_task_controller,
    store::KubeRuleStore,
    types::Context as TaskContext,
};
use anyhow::Context as _;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    registry: Registry,
    cancel: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        "Starting Absent Metrics Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let controller_config = load_controller_config()?;
    let bind_address = controller_config.bind_address()?;

    // Initialize Kubernetes client and controller
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let registry = Registry::new();
    let metrics = Metrics::new(&registry).context("Failed to register operator metrics")?;
    let cancel = CancellationToken::new();

    let task_context = Arc::new(TaskContext {
        store: Arc::new(KubeRuleStore::new(client.clone())),
        config: Arc::new(controller_config),
        clock: Arc::new(SystemClock),
        metrics: Arc::new(metrics),
        cancel: cancel.clone(),
    });

    // Start the controller in the background
    let controller_handle = {
        let client = client.clone();
        let task_context = task_context.clone();
        tokio::spawn(async move {
            if let Err(e) = run_task_controller(client, task_context).await {
                error!("Controller error: {}", e);
            }
        })
    };

    let state = AppState {
        registry,
        cancel: cancel.clone(),
    };

    // Build the HTTP router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!("HTTP server listening on {}", bind_address);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let cancel = cancel.clone();
            async move {
                shutdown_signal().await;
                // In-flight passes stop before their write
                cancel.cancel();
            }
        })
        .await?;

    controller_handle.abort();
    info!("Absent Metrics Operator stopped");

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,absent_metrics_operator=debug".into());

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_controller_config() -> anyhow::Result<ControllerConfig> {
    let override_path = std::env::var("CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

    let config = if Path::new(config_path).exists() {
        let cfg = ControllerConfig::from_mounted_file(config_path)?;
        info!("Loaded controller configuration from {}", config_path);
        cfg
    } else {
        warn!(
            "Configuration file {} not found. Using defaults.",
            config_path
        );
        ControllerConfig::default()
    };

    config
        .validate()
        .context("Configuration validation failed")?;
    info!(
        label_scheme = ?config.label_scheme,
        fallback_prometheus_server = %config.fallback_prometheus_server,
        "Configuration validation passed"
    );
    Ok(config)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "absent-metrics-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if state.cancel.is_cancelled() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "absent-metrics-operator",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&state.registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
