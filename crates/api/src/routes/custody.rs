//! Custody summary endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::UserId;
use custody::CustodySummary;
use ledger_store::LedgerStore;

use super::AppState;
use crate::error::ApiError;

/// GET /custody/{user_id}: cash the identity currently answers for.
#[tracing::instrument(skip(state))]
pub async fn held_by<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<CustodySummary>, ApiError> {
    let summary = state.service.custody_held_by(&UserId::new(user_id)).await?;
    Ok(Json(summary))
}
