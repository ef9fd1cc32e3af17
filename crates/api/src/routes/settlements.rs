//! Settlement, history, and reversal endpoints.
//!
//! Every mutating route has a `preview` twin that returns the would-be effect
//! without committing anything.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{SettlementId, UserId};
use custody::{ReversalSummary, SettlementPreview};
use ledger_store::{LedgerStore, Settlement, SettlementKind, SettlementQuery};
use serde::Deserialize;

use super::{AppState, parse_id};
use crate::actor::Actor;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub kind: Option<String>,
    pub performed_by: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// POST /settlements/interim/preview: what an Interim settlement would take.
#[tracing::instrument(skip(state))]
pub async fn preview_interim<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
) -> Result<Json<SettlementPreview>, ApiError> {
    let preview = state.service.preview_interim_settlement(&actor).await?;
    Ok(Json(preview))
}

/// POST /settlements/interim: hand the caller's pending cash to the
/// supervisor.
#[tracing::instrument(skip(state))]
pub async fn create_interim<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
) -> Result<(StatusCode, Json<Settlement>), ApiError> {
    let settlement = state.service.request_interim_settlement(&actor).await?;
    Ok((StatusCode::CREATED, Json(settlement)))
}

/// POST /settlements/final/preview
#[tracing::instrument(skip(state))]
pub async fn preview_final<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
) -> Result<Json<SettlementPreview>, ApiError> {
    let preview = state.service.preview_final_settlement(&actor).await?;
    Ok(Json(preview))
}

/// POST /settlements/final: deliver the supervisor's cash to the owner and
/// award commissions.
#[tracing::instrument(skip(state))]
pub async fn create_final<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
) -> Result<(StatusCode, Json<Settlement>), ApiError> {
    let settlement = state.service.request_final_settlement(&actor).await?;
    Ok((StatusCode::CREATED, Json(settlement)))
}

/// GET /settlements: history, newest first. Final settlements are listed
/// for the owner only.
#[tracing::instrument(skip(state))]
pub async fn list<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Settlement>>, ApiError> {
    let kind = params
        .kind
        .as_deref()
        .map(str::parse::<SettlementKind>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let query = SettlementQuery {
        kind,
        performed_by: params.performed_by.map(UserId::new),
        limit: params.limit,
        offset: params.offset,
    };

    let settlements = state.service.settlement_history(query, &actor).await?;
    Ok(Json(settlements))
}

/// GET /settlements/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Settlement>, ApiError> {
    let id: SettlementId = parse_id(&id)?;
    let settlement = state.service.settlement(id).await?;
    Ok(Json(settlement))
}

/// POST /settlements/{id}/reverse/preview
#[tracing::instrument(skip(state))]
pub async fn preview_reversal<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
) -> Result<Json<ReversalSummary>, ApiError> {
    let id: SettlementId = parse_id(&id)?;
    let summary = state.service.preview_reversal(id, &actor).await?;
    Ok(Json(summary))
}

/// DELETE /settlements/{id}: reverse the settlement.
#[tracing::instrument(skip(state))]
pub async fn reverse<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
) -> Result<Json<ReversalSummary>, ApiError> {
    let id: SettlementId = parse_id(&id)?;
    let summary = state.service.reverse_settlement(id, &actor).await?;
    Ok(Json(summary))
}
