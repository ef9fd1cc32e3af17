//! HTTP route handlers and the state they share.

pub mod custody;
pub mod health;
pub mod metrics;
pub mod payments;
pub mod sales;
pub mod settlements;

use ::custody::CustodyService;
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LedgerStore> {
    pub service: CustodyService<S>,
    pub metrics_handle: PrometheusHandle,
}

/// Parses a path segment into one of the uuid-backed identifiers.
pub(crate) fn parse_id<T>(id: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = uuid::Error>,
{
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
