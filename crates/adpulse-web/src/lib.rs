//! Axum trigger endpoints for manual sync, backfill, and settings.
//!
//! Handlers are thin: they translate request bodies into engine calls on an
//! injected [`SyncService`] and render run summaries as JSON. Partial
//! failures live inside the summary; only setup-level failures map to 500.

use std::sync::Arc;

use adpulse_sync::{HourlyOptions, HourlyStrategy, SyncReport, SyncService};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "adpulse-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn SyncService>,
}

impl AppState {
    pub fn new(service: Arc<dyn SyncService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize, Default)]
struct HourlyBody {
    days: Option<u32>,
    business_id: Option<Uuid>,
    strategy: Option<HourlyStrategy>,
}

#[derive(Debug, Deserialize, Default)]
struct BackfillBody {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SettingsBody {
    auto_sync_enabled: bool,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    report: SyncReport,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/sync", post(sync_handler))
        .route("/sync/hourly", post(hourly_handler))
        .route("/backfill", post(backfill_handler))
        .route("/businesses/{id}/backfill", post(business_backfill_handler))
        .route("/settings", get(settings_get_handler).post(settings_post_handler))
        .with_state(state)
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("ADPULSE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn sync_handler(State(state): State<AppState>) -> Response {
    match state.service.run_daily().await {
        Ok(report) => Json(RunResponse {
            success: true,
            message: "Sync completed successfully".to_string(),
            report,
        })
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn hourly_handler(
    State(state): State<AppState>,
    body: Option<Json<HourlyBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let opts = HourlyOptions {
        days_back: body.days.unwrap_or(1),
        business_id: body.business_id,
        strategy: body.strategy.unwrap_or(HourlyStrategy::PresetBatch),
    };
    match state.service.run_hourly(opts).await {
        Ok(summary) => Json(serde_json::json!({
            "success": true,
            "message": "Hourly sync complete",
            "synced": summary.report.synced,
            "failed": summary.report.failed,
            "skipped": summary.report.skipped,
            "total_records": summary.total_records,
            "details": summary.details,
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn backfill_handler(
    State(state): State<AppState>,
    body: Option<Json<BackfillBody>>,
) -> Response {
    let days = body.and_then(|Json(b)| b.days).unwrap_or(7);
    match state.service.run_backfill(days).await {
        Ok(report) => Json(RunResponse {
            success: true,
            message: "Backfill completed successfully".to_string(),
            report,
        })
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn business_backfill_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<BackfillBody>>,
) -> Response {
    let days = body.and_then(|Json(b)| b.days).unwrap_or(30);
    match state.service.run_business_backfill(id, days).await {
        Ok(result) => Json(serde_json::json!({
            "success": true,
            "message": format!(
                "Backfilled {} days for {}",
                result.report.synced, result.business_name
            ),
            "business_name": result.business_name,
            "synced": result.report.synced,
            "failed": result.report.failed,
            "skipped": result.report.skipped,
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn settings_get_handler(State(state): State<AppState>) -> Response {
    match state.service.auto_sync_enabled().await {
        Ok(enabled) => Json(serde_json::json!({"auto_sync_enabled": enabled})).into_response(),
        Err(err) => server_error(err),
    }
}

async fn settings_post_handler(
    State(state): State<AppState>,
    Json(body): Json<SettingsBody>,
) -> Response {
    match state.service.set_auto_sync(body.auto_sync_enabled).await {
        Ok(()) => Json(serde_json::json!({
            "success": true,
            "auto_sync_enabled": body.auto_sync_enabled,
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "trigger request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        })),
    )
        .into_response()
}
