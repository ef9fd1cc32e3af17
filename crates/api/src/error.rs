//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use custody::{IntakeError, SettlementError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// No caller identity on the request.
    Unauthorized(String),
    /// Settlement, reversal, or ledger query error.
    Settlement(SettlementError),
    /// Sale or payment intake error.
    Intake(IntakeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Settlement(err) => settlement_error_to_response(err),
            ApiError::Intake(err) => intake_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn settlement_error_to_response(err: SettlementError) -> (StatusCode, String) {
    let status = match &err {
        SettlementError::EmptyCustody => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
        SettlementError::TransactionConflict { .. } | SettlementError::ReversalBlocked { .. } => {
            StatusCode::CONFLICT
        }
        SettlementError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn intake_error_to_response(err: IntakeError) -> (StatusCode, String) {
    let status = match &err {
        IntakeError::InvalidAmount(_)
        | IntakeError::ExceedsBalance { .. }
        | IntakeError::NothingOwed(_) => StatusCode::BAD_REQUEST,
        IntakeError::SaleNotFound(_) | IntakeError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        IntakeError::NotCollector(_) | IntakeError::AuthorizationDenied(_) => {
            StatusCode::FORBIDDEN
        }
        IntakeError::CustodyLocked { .. } | IntakeError::TransactionConflict { .. } => {
            StatusCode::CONFLICT
        }
        IntakeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError::Settlement(err)
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        ApiError::Intake(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, SettlementId};
    use ledger_store::{CustodyState, LedgerStoreError};

    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn settlement_errors_map_to_statuses() {
        assert_eq!(
            status_of(SettlementError::EmptyCustody),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SettlementError::NotFound(SettlementId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SettlementError::TransactionConflict { attempts: 3 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SettlementError::Store(LedgerStoreError::InvalidChangeSet(
                "empty".into()
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn intake_errors_map_to_statuses() {
        assert_eq!(
            status_of(IntakeError::InvalidAmount(Money::zero())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(IntakeError::CustodyLocked {
                state: CustodyState::SettledFinal
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn missing_actor_is_unauthorized() {
        assert_eq!(
            ApiError::Unauthorized("missing".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
