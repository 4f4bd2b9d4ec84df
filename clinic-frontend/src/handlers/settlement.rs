use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{Encounter, OutstandingSummary, SettlementMethod};
use crate::services::session_store::{SessionBoard, SessionEntry, SessionView};
use crate::settlement::{SettlementError, SettlementProgress};
use crate::AppState;

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Aggregation(_) => AppError::BadGateway(err.to_string()),
            SettlementError::NoReferences => AppError::BadRequest(anyhow::Error::new(err)),
            SettlementError::AlreadyInFlight | SettlementError::Closed => {
                AppError::Conflict(anyhow::Error::new(err))
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedSettlement {
    pub session_id: Uuid,
    pub summary: OutstandingSummary,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub method: SettlementMethod,
}

#[derive(Debug, Deserialize)]
pub struct PrintCompleteRequest {
    #[serde(default)]
    pub printed: bool,
}

fn lookup(state: &AppState, id: Uuid) -> Result<SessionEntry, AppError> {
    state
        .sessions
        .get(&id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("settlement session {} not found", id)))
}

#[tracing::instrument(skip(state, encounter), fields(encounter_id = %encounter.id))]
pub async fn open_settlement(
    State(state): State<AppState>,
    Json(encounter): Json<Encounter>,
) -> Result<(StatusCode, Json<OpenedSettlement>), AppError> {
    let board = SessionBoard::new();
    let session = state
        .settlements
        .open_settlement(encounter, board.hooks())
        .await
        .inspect_err(|e| tracing::warn!(error = ?e, "Failed to open settlement dialog"))?;

    let summary = session.summary();
    let session_id = state.sessions.insert(SessionEntry::new(session, board));

    Ok((
        StatusCode::CREATED,
        Json(OpenedSettlement {
            session_id,
            summary,
        }),
    ))
}

pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let entry = lookup(&state, id)?;
    Ok(Json(entry.view(id)))
}

pub async fn refresh_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutstandingSummary>, AppError> {
    let entry = lookup(&state, id)?;
    let summary = entry.session.refresh().await?;
    Ok(Json(summary))
}

#[tracing::instrument(skip(state, request), fields(method = %request.method))]
pub async fn settle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SettleRequest>,
) -> Result<Json<SettlementProgress>, AppError> {
    let entry = lookup(&state, id)?;
    let progress = entry.session.settle(request.method).await?;
    Ok(Json(progress))
}

pub async fn print_complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PrintCompleteRequest>,
) -> Result<Json<SessionView>, AppError> {
    let entry = lookup(&state, id)?;
    if !entry.board.finish_print(request.printed) {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "no prescription print is pending"
        )));
    }
    Ok(Json(entry.view(id)))
}

pub async fn close_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("settlement session {} not found", id)))?;
    Ok(StatusCode::NO_CONTENT)
}
