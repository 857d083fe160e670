//! Metric ingestion HTTP server.
//!
//! The traffic-splitting proxy POSTs sample batches to `/push`; the handler
//! applies them to the stage's [`MetricAggregator`] under its lock.
//!
//! ## Endpoints
//!
//! - `POST /push` — JSON `{"program": <string>, "metrics": [{"metric_name",
//!   "value"}, ...]}`; 200 on success, 400 on a malformed body, 500 when
//!   the body cannot be read.
//!
//! ## Lifecycle
//!
//! The server is started before stage deployment and stopped through a
//! one-shot shutdown channel; in-flight requests get a bounded drain window
//! before the server is forced down.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::{MetricAggregator, MetricPayload};
use crate::AgentError;

/// How long in-flight requests may drain after the shutdown signal.
pub const SHUTDOWN_DRAIN: std::time::Duration = std::time::Duration::from_secs(5);

/// Build the ingestion router around one aggregator.
pub fn build_router(aggregator: Arc<MetricAggregator>) -> Router {
    Router::new()
        .route("/push", post(push_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(aggregator)
}

/// Handler for `POST /push`.
async fn push_handler(
    State(aggregator): State<Arc<MetricAggregator>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(_) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error reading request body")
                .into_response()
        }
    };

    let payload: MetricPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Error parsing JSON payload").into_response()
        }
    };

    debug!(
        program = %payload.program,
        samples = payload.metrics.len(),
        "new metric set"
    );
    aggregator.apply(&payload);

    (StatusCode::OK, "Metrics updated successfully").into_response()
}

/// Serve the ingestion endpoint until the shutdown channel fires.
///
/// The shutdown channel is one-shot: sending on it, or dropping the sender,
/// both stop the server. After the signal, in-flight requests get
/// [`SHUTDOWN_DRAIN`] to finish before the server is forced down.
pub async fn serve(
    aggregator: Arc<MetricAggregator>,
    listener: TcpListener,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), AgentError> {
    let addr = listener
        .local_addr()
        .map_err(|e| AgentError::MetricServer(e.to_string()))?;
    info!(%addr, "starting metric server");

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let graceful = axum::serve(listener, build_router(aggregator))
        .with_graceful_shutdown(async move {
            // Fires on send or on sender drop, matching close-channel
            // semantics.
            let _ = shutdown.await;
            let _ = signalled_tx.send(());
        })
        .into_future();
    tokio::pin!(graceful);

    tokio::select! {
        result = &mut graceful => {
            return result.map_err(|e| AgentError::MetricServer(e.to_string()));
        }
        _ = signalled_rx => {
            info!("shutting down the metric server");
        }
    }

    match tokio::time::timeout(SHUTDOWN_DRAIN, graceful).await {
        Ok(result) => {
            info!("metric server exiting");
            result.map_err(|e| AgentError::MetricServer(e.to_string()))
        }
        Err(_) => {
            warn!("metric server forced to shut down after drain deadline");
            Ok(())
        }
    }
}
