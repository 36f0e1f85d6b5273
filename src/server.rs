//! HTTP endpoints
//!
//! `/` landing page, `/metrics` runs one collection cycle per request,
//! `POST /-/reload` re-reads the configuration file.

use crate::collector::Exporter;
use crate::metrics::{self, CONTENT_TYPE};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;

const LANDING_PAGE: &str = r#"<html>
<head><title>Azure Exporter</title></head>
<body>
<h1>Azure Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#;

pub fn router(exporter: Arc<Exporter>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/metrics", get(metrics_handler))
        .route("/-/reload", post(reload_handler))
        .with_state(exporter)
}

/// Serve until the process is stopped. SIGHUP triggers a reload.
pub async fn run_server(exporter: Arc<Exporter>, addr: SocketAddr) -> anyhow::Result<()> {
    spawn_reload_on_sighup(exporter.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, router(exporter)).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> Response {
    let samples = exporter.collect().await;
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        metrics::render(&samples),
    )
        .into_response()
}

async fn reload_handler(State(exporter): State<Arc<Exporter>>) -> Response {
    match exporter.reload().await {
        Ok(()) => (StatusCode::OK, "configuration reloaded\n").into_response(),
        Err(e) => {
            tracing::error!("Configuration reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to reload configuration: {}\n", e),
            )
                .into_response()
        }
    }
}

#[cfg(unix)]
fn spawn_reload_on_sighup(exporter: Arc<Exporter>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("SIGHUP handler not installed: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading configuration");
            if let Err(e) = exporter.reload().await {
                tracing::error!("Configuration reload failed: {}", e);
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_exporter: Arc<Exporter>) {}
