//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use ledger_store::{CustodyState, LedgerStore};

use super::AppState;
use crate::error::ApiError;

/// GET /metrics: refreshes the ledger gauges and returns
/// Prometheus-formatted metrics.
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.service.view();
    let outstanding = view.outstanding_balance().await?;
    metrics::gauge!("ledger_outstanding_balance_cents").set(outstanding.cents() as f64);

    for custody_state in [
        CustodyState::Pending,
        CustodyState::HandedToSupervisor,
        CustodyState::SettledFinal,
    ] {
        let payments = view.payments_in_state(custody_state).await?;
        let total = common::Money::saturating_sum(payments.iter().map(|p| p.amount));
        metrics::gauge!("custody_amount_cents", "state" => custody_state.as_str())
            .set(total.cents() as f64);
    }

    Ok((
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics_handle.render(),
    ))
}
