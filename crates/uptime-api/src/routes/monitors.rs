use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use uptime_core::{
    parse_import, AlertDecision, AlertState, Monitor, MonitorExport, MonitorRun, MonitorSettings, RunOutcome,
};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_RUN_LIMIT: usize = 50;
const MAX_RUN_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitorRequest {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(flatten)]
    pub settings: MonitorSettings,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDetail {
    #[serde(flatten)]
    pub monitor: Monitor,
    pub alert_state: AlertState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run: MonitorRun,
    pub decision: AlertDecision,
    pub alert_state: AlertState,
}

impl From<RunOutcome> for RunResponse {
    fn from(o: RunOutcome) -> Self {
        Self {
            run: o.run,
            decision: o.decision,
            alert_state: o.alert_state,
        }
    }
}

#[derive(Serialize)]
pub struct DeleteMonitorResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub ids: Vec<Uuid>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/monitors", post(create_monitor).get(list_monitors))
        .route("/monitors/export", get(export_monitors))
        .route("/monitors/import", post(import_monitors))
        .route(
            "/monitors/{id}",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/monitors/{id}/pause", post(pause_monitor))
        .route("/monitors/{id}/resume", post(resume_monitor))
        .route("/monitors/{id}/run", post(run_monitor))
        .route("/monitors/{id}/runs", get(list_runs))
        .route("/monitors/{id}/alert-state", get(get_alert_state))
}

fn parse_monitor_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid monitor ID: {}", id)))
}

async fn load_monitor(state: &AppState, id: Uuid) -> Result<Monitor, ApiError> {
    state
        .store
        .get_monitor(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Monitor {} not found", id)))
}

/// POST /api/v1/monitors
async fn create_monitor(
    State(state): State<AppState>,
    Json(body): Json<CreateMonitorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = body.settings.normalized();
    settings.validate(&state.config)?;

    let owner = body
        .owner_id
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| state.default_owner.clone());
    let monitor = state.store.insert_monitor(Monitor::new(owner, settings, Utc::now())).await?;
    tracing::info!(monitor_id = %monitor.id, url = %monitor.settings.url, "Monitor created");

    Ok((StatusCode::CREATED, Json(monitor)))
}

/// GET /api/v1/monitors
async fn list_monitors(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Monitor>>, ApiError> {
    let monitors = state
        .store
        .list_monitors()
        .await?
        .into_iter()
        .filter(|m| query.owner.as_deref().is_none_or(|o| m.owner_id == o))
        .collect();
    Ok(Json(monitors))
}

/// GET /api/v1/monitors/:id
async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MonitorDetail>, ApiError> {
    let id = parse_monitor_id(&id)?;
    let monitor = load_monitor(&state, id).await?;
    let alert_state = state.store.alert_state(id).await?;
    Ok(Json(MonitorDetail { monitor, alert_state }))
}

/// PUT /api/v1/monitors/:id
async fn update_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(settings): Json<MonitorSettings>,
) -> Result<Json<Monitor>, ApiError> {
    let id = parse_monitor_id(&id)?;
    let settings = settings.normalized();
    settings.validate(&state.config)?;
    let monitor = state.store.update_monitor(id, settings, Utc::now()).await?;
    Ok(Json(monitor))
}

/// DELETE /api/v1/monitors/:id
async fn delete_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteMonitorResponse>, ApiError> {
    let id = parse_monitor_id(&id)?;
    if !state.store.delete_monitor(id).await? {
        return Err(ApiError::NotFound(format!("Monitor {} not found", id)));
    }
    tracing::info!(monitor_id = %id, "Monitor deleted");

    Ok(Json(DeleteMonitorResponse {
        message: "Monitor and its run history deleted".into(),
        id,
    }))
}

/// POST /api/v1/monitors/:id/pause
async fn pause_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Monitor>, ApiError> {
    let id = parse_monitor_id(&id)?;
    Ok(Json(state.store.set_paused(id, true, Utc::now()).await?))
}

/// POST /api/v1/monitors/:id/resume
async fn resume_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Monitor>, ApiError> {
    let id = parse_monitor_id(&id)?;
    Ok(Json(state.store.set_paused(id, false, Utc::now()).await?))
}

/// POST /api/v1/monitors/:id/run
async fn run_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let id = parse_monitor_id(&id)?;
    let outcome = state.scheduler.run_now(id).await?;
    Ok(Json(outcome.into()))
}

/// GET /api/v1/monitors/:id/runs
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<MonitorRun>>, ApiError> {
    let id = parse_monitor_id(&id)?;
    load_monitor(&state, id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    Ok(Json(state.store.list_runs(id, limit).await?))
}

/// GET /api/v1/monitors/:id/alert-state
async fn get_alert_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlertState>, ApiError> {
    let id = parse_monitor_id(&id)?;
    load_monitor(&state, id).await?;
    Ok(Json(state.store.alert_state(id).await?))
}

/// GET /api/v1/monitors/export
async fn export_monitors(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<MonitorExport>, ApiError> {
    let monitors = state.store.list_monitors().await?;
    let selected = monitors
        .iter()
        .filter(|m| query.owner.as_deref().is_none_or(|o| m.owner_id == o));
    Ok(Json(MonitorExport::from_monitors(selected, Utc::now())))
}

/// POST /api/v1/monitors/import
///
/// Accepts an export envelope or a bare array. Nothing is stored unless
/// every entry is valid.
async fn import_monitors(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let entries = parse_import(&body, &state.config)?;
    let owner = query.owner.unwrap_or_else(|| state.default_owner.clone());

    let now = Utc::now();
    let mut ids = Vec::with_capacity(entries.len());
    for settings in entries {
        let monitor = state.store.insert_monitor(Monitor::new(owner.clone(), settings, now)).await?;
        ids.push(monitor.id);
    }
    tracing::info!(owner = %owner, count = ids.len(), "Monitors imported");

    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            imported: ids.len(),
            ids,
        }),
    ))
}
