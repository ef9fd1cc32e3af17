//! Payment correction endpoints.
//!
//! Only a payment still `pending` in its collector's hands can change.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Money, PaymentId};
use ledger_store::{LedgerStore, Payment};

use super::sales::PaymentRequest;
use super::{AppState, parse_id};
use crate::actor::Actor;
use crate::error::ApiError;

/// PATCH /payments/{id}: change amount or method.
#[tracing::instrument(skip(state))]
pub async fn adjust<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id: PaymentId = parse_id(&id)?;
    let payment = state
        .service
        .adjust_payment(payment_id, Money::from_cents(req.amount_cents), req.method, &actor)
        .await?;
    Ok(Json(payment))
}

/// DELETE /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn remove<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
) -> Result<StatusCode, ApiError> {
    let payment_id: PaymentId = parse_id(&id)?;
    state.service.remove_payment(payment_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}
