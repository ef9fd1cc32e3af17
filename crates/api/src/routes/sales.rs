//! Sale registration and payment collection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ClientRef, ItemRef, Money, SaleId};
use custody::NewSale;
use ledger_store::{LedgerStore, Payment, PaymentMethod, Sale};
use serde::Deserialize;

use super::{AppState, parse_id};
use crate::actor::Actor;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateSaleRequest {
    pub client: String,
    pub item: String,
    pub agreed_price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub method: PaymentMethod,
}

// -- Handlers --

/// POST /sales: register a sale sold by the caller.
#[tracing::instrument(skip(state))]
pub async fn create<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Json(req): Json<CreateSaleRequest>,
) -> Result<(StatusCode, Json<Sale>), ApiError> {
    if req.client.trim().is_empty() {
        return Err(ApiError::BadRequest("client is required".to_string()));
    }
    let sale = NewSale {
        client: ClientRef::new(req.client),
        item: ItemRef::new(req.item),
        agreed_price: Money::from_cents(req.agreed_price_cents),
    };
    let sale = state.service.register_sale(sale, &actor).await?;
    Ok((StatusCode::CREATED, Json(sale)))
}

/// GET /sales/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Sale>, ApiError> {
    let sale_id: SaleId = parse_id(&id)?;
    let sale = state
        .service
        .view()
        .sale(sale_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Sale {id} not found")))?;
    Ok(Json(sale))
}

/// POST /sales/{id}/payments: record a payment the caller collected.
#[tracing::instrument(skip(state))]
pub async fn record_payment<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
    Json(req): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let sale_id: SaleId = parse_id(&id)?;
    let payment = state
        .service
        .record_payment(sale_id, Money::from_cents(req.amount_cents), req.method, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// GET /sales/{id}/payments
#[tracing::instrument(skip(state))]
pub async fn payments<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let sale_id: SaleId = parse_id(&id)?;
    let payments = state.service.view().payments_for_sale(sale_id).await?;
    Ok(Json(payments))
}

/// POST /clients/{client_ref}/payments: one payment spread over the
/// client's open sales, oldest first.
#[tracing::instrument(skip(state))]
pub async fn record_account_payment<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(client): Path<String>,
    Actor(actor): Actor,
    Json(req): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<Vec<Payment>>), ApiError> {
    let payments = state
        .service
        .record_account_payment(
            &ClientRef::new(client),
            Money::from_cents(req.amount_cents),
            req.method,
            &actor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(payments)))
}
