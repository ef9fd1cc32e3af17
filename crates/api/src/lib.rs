//! HTTP API server for the cash-custody ledger.
//!
//! Exposes settlements, reversals, custody summaries, and payment intake as
//! JSON endpoints, with structured logging (tracing) and Prometheus metrics.
//! The caller identity arrives in the `x-actor-id` header.

pub mod actor;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use custody::{CustodyService, LedgerConfig};
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + Clone + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get::<S>))
        .route("/settlements", get(routes::settlements::list::<S>))
        .route(
            "/settlements/interim",
            post(routes::settlements::create_interim::<S>),
        )
        .route(
            "/settlements/interim/preview",
            post(routes::settlements::preview_interim::<S>),
        )
        .route(
            "/settlements/final",
            post(routes::settlements::create_final::<S>),
        )
        .route(
            "/settlements/final/preview",
            post(routes::settlements::preview_final::<S>),
        )
        .route(
            "/settlements/{id}",
            get(routes::settlements::get::<S>).delete(routes::settlements::reverse::<S>),
        )
        .route(
            "/settlements/{id}/reverse/preview",
            post(routes::settlements::preview_reversal::<S>),
        )
        .route("/custody/{user_id}", get(routes::custody::held_by::<S>))
        .route("/sales", post(routes::sales::create::<S>))
        .route("/sales/{id}", get(routes::sales::get::<S>))
        .route(
            "/sales/{id}/payments",
            post(routes::sales::record_payment::<S>).get(routes::sales::payments::<S>),
        )
        .route(
            "/clients/{client}/payments",
            post(routes::sales::record_account_payment::<S>),
        )
        .route(
            "/payments/{id}",
            patch(routes::payments::adjust::<S>).delete(routes::payments::remove::<S>),
        )
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around a ledger store.
pub fn create_state<S: LedgerStore + Clone + 'static>(
    store: S,
    config: &LedgerConfig,
    metrics_handle: PrometheusHandle,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        service: CustodyService::new(store, config),
        metrics_handle,
    })
}
