use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencySnapshot;
use crate::error::AppError;
use crate::scan::{run_due_scans, ScanEngine, ScanSummary, ShopScanResult};
use crate::types::{CanonicalInsight, ScanRunRecord, ScanTrigger, Severity};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ScanEngine>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/shops/:id/scan", post(post_shop_scan))
        .route("/shops/:id/insights", get(get_shop_insights))
        .route("/shops/:id/scan-run", get(get_shop_scan_run))
        .route("/scans/due", post(post_due_scans))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct InsightsQuery {
    /// `low`, `medium` or `high`; unknown values are ignored.
    pub min_severity: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_sweep_shops: u64,
    pub last_sweep_failures: u64,
    pub sweeps_total: u64,
}

#[derive(Debug, Serialize)]
pub struct ScanRunResponse {
    #[serde(flatten)]
    pub record: ScanRunRecord,
    pub scanning: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        last_sweep_at: state.health.last_sweep_at(),
        last_sweep_shops: state.health.last_sweep_shops(),
        last_sweep_failures: state.health.last_sweep_failures(),
        sweeps_total: state.health.sweeps_total(),
    })
}

async fn post_shop_scan(
    State(state): State<ApiState>,
    Path(shop_id): Path<String>,
) -> Result<Json<ScanSummary>, AppError> {
    let shop = state
        .engine
        .store()
        .get_shop(&shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("shop {shop_id}")))?;
    if shop.access_token.is_empty() {
        return Err(AppError::Conflict(format!("shop {shop_id} has no access token")));
    }
    let summary = state.engine.run_exclusive(&shop, ScanTrigger::Manual, Utc::now()).await?;
    Ok(Json(summary))
}

async fn post_due_scans(State(state): State<ApiState>) -> Result<Json<Vec<ShopScanResult>>, AppError> {
    let now = Utc::now();
    let results = run_due_scans(&state.engine, now).await?;
    let failed = results.iter().filter(|r| !r.ok).count();
    state.health.record_sweep(now, results.len(), failed);
    Ok(Json(results))
}

async fn get_shop_insights(
    State(state): State<ApiState>,
    Path(shop_id): Path<String>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<Vec<CanonicalInsight>>, AppError> {
    let min = params.min_severity.as_deref().and_then(Severity::parse);
    let insights = state
        .engine
        .store()
        .list_insights(&shop_id)
        .await?
        .into_iter()
        .filter(|i| min.map_or(true, |m| i.severity >= m))
        .collect();
    Ok(Json(insights))
}

async fn get_shop_scan_run(
    State(state): State<ApiState>,
    Path(shop_id): Path<String>,
) -> Result<Json<ScanRunResponse>, AppError> {
    let record = state
        .engine
        .store()
        .get_scan_run(&shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no scan run for shop {shop_id}")))?;
    Ok(Json(ScanRunResponse {
        scanning: state.engine.is_scanning(&shop_id),
        record,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.engine.latency().snapshot())
}
