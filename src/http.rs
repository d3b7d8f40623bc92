//! HTTP control surface for the harness.
//!
//! | Method | Path                         | Body                  | Reply                |
//! |--------|------------------------------|-----------------------|----------------------|
//! | POST   | `/test/load/config`          | [`LoadConfigRequest`] | 200, or 400          |
//! | POST   | `/test/load/response/start`  |                       | `true`, or 409 `false` |
//! | POST   | `/test/load/response/stop`   |                       | `true`               |
//! | GET    | `/test/metrics`              |                       | [`MetricsSnapshot`]  |

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::harness::{LoadConfigRequest, LoadHarness};
use crate::metrics::MetricsSnapshot;

/// Router exposing the configuration, control and metrics endpoints.
pub fn router(harness: Arc<LoadHarness>) -> Router {
    Router::new()
        .route("/test/load/config", post(configure))
        .route("/test/load/response/start", post(start))
        .route("/test/load/response/stop", post(stop))
        .route("/test/metrics", get(metrics))
        .with_state(harness)
}

/// Serve [`router`] on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// [`crate::Error::Io`] if the server fails.
pub async fn serve_http(
    harness: Arc<LoadHarness>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP endpoints listening");
    }
    axum::serve(listener, router(harness))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn configure(
    State(harness): State<Arc<LoadHarness>>,
    Json(request): Json<LoadConfigRequest>,
) -> StatusCode {
    match harness.configure(request) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "configuration rejected");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn start(State(harness): State<Arc<LoadHarness>>) -> (StatusCode, Json<bool>) {
    if harness.start_broadcast() {
        (StatusCode::OK, Json(true))
    } else {
        (StatusCode::CONFLICT, Json(false))
    }
}

async fn stop(State(harness): State<Arc<LoadHarness>>) -> Json<bool> {
    Json(harness.stop_broadcast())
}

async fn metrics(State(harness): State<Arc<LoadHarness>>) -> Json<MetricsSnapshot> {
    Json(harness.metrics())
}
