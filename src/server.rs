// Server module - HTTP scrape endpoint
//
// Every GET /metrics runs one gather over the registry and answers with the
// Prometheus text format. Concurrent scrapes are safe: the collectors share
// the throttled cache, which keeps the data source at one fetch at a time.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::exposition;
use crate::registry::MetricRegistry;

const INDEX_PAGE: &str = "<html>\n\
<head><title>Slurm Metrics Collector</title></head>\n\
<body>\n\
<h1>Slurm Metrics Collector</h1>\n\
<p><a href=\"/metrics\">Metrics</a></p>\n\
</body>\n\
</html>\n";

/// Builds the HTTP routes around a fully registered registry.
pub fn router(registry: Arc<MetricRegistry>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .with_state(registry)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn metrics(State(registry): State<Arc<MetricRegistry>>) -> Response {
    let samples = registry.gather().await;
    match exposition::render(registry.descriptors(), &samples) {
        Ok(body) => {
            debug!("Serving {} sample(s), {} bytes", samples.len(), body.len());
            ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serves the scrape endpoint until Ctrl+C is received.
pub async fn serve(addr: SocketAddr, registry: Arc<MetricRegistry>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}/metrics", listener.local_addr()?);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Scrape endpoint stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
