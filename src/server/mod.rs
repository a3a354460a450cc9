//! HTTP trigger surface: `GET`/`POST /` runs one cycle.

use std::future::Future;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use crate::cycle::{AppContext, CycleError};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::server";

use crate::{log_info, log_warn};

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(trigger_cycle).post(trigger_cycle))
        .route("/healthz", get(healthz))
        .with_state(ctx)
}

async fn trigger_cycle(State(ctx): State<AppContext>) -> Response {
    match ctx.run_cycle().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(CycleError::Busy) => {
            log_warn!("Trigger rejected, a cycle is already running");
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": CycleError::Busy.to_string() })),
            )
                .into_response()
        }
        Err(CycleError::NothingPersisted(summary)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "no readings could be stored",
                "summary": *summary,
            })),
        )
            .into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serves until `shutdown` resolves, letting in-flight requests finish.
pub async fn serve(
    bind: &str,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    log_info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")
}
