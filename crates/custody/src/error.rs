//! Custody ledger error types.

use common::{ClientRef, Money, PaymentId, SaleId, SettlementId};
use ledger_store::{CustodyState, LedgerStoreError};
use thiserror::Error;

use crate::policy::AccessDenied;
use crate::retry::Retryable;

/// Errors from settlement, reversal, and ledger queries.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Nothing is eligible to settle. No records were created.
    #[error("Nothing to settle: no payments in the required custody state")]
    EmptyCustody,

    #[error("Settlement not found: {0}")]
    NotFound(SettlementId),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(#[from] AccessDenied),

    /// A concurrent writer changed records this operation read.
    #[error("Transaction conflict after {attempts} attempt(s)")]
    TransactionConflict { attempts: u32 },

    /// An Interim settlement cannot be undone while a later Final settlement
    /// still holds one of its payments.
    #[error("Payment {payment} is held by final settlement {blocking_settlement}")]
    ReversalBlocked {
        payment: PaymentId,
        blocking_settlement: SettlementId,
    },

    #[error("Store error: {0}")]
    Store(LedgerStoreError),
}

impl From<LedgerStoreError> for SettlementError {
    fn from(e: LedgerStoreError) -> Self {
        if e.is_conflict() {
            SettlementError::TransactionConflict { attempts: 1 }
        } else {
            SettlementError::Store(e)
        }
    }
}

impl Retryable for SettlementError {
    fn is_conflict(&self) -> bool {
        matches!(self, SettlementError::TransactionConflict { .. })
    }

    fn exhausted(attempts: u32) -> Self {
        SettlementError::TransactionConflict { attempts }
    }
}

/// Errors from registering sales and recording payments.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Money),

    #[error("Amount {requested} exceeds outstanding balance {balance}")]
    ExceedsBalance { requested: Money, balance: Money },

    /// Only whoever collected a payment may change it.
    #[error("Payment {0} was collected by someone else")]
    NotCollector(PaymentId),

    /// The payment has left the collector's hands.
    #[error("Payment is locked in custody state {state}")]
    CustodyLocked { state: CustodyState },

    #[error("Sale not found: {0}")]
    SaleNotFound(SaleId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Client {0} owes nothing")]
    NothingOwed(ClientRef),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(#[from] AccessDenied),

    #[error("Transaction conflict after {attempts} attempt(s)")]
    TransactionConflict { attempts: u32 },

    #[error("Store error: {0}")]
    Store(LedgerStoreError),
}

impl From<LedgerStoreError> for IntakeError {
    fn from(e: LedgerStoreError) -> Self {
        if e.is_conflict() {
            IntakeError::TransactionConflict { attempts: 1 }
        } else {
            IntakeError::Store(e)
        }
    }
}

impl Retryable for IntakeError {
    fn is_conflict(&self) -> bool {
        matches!(self, IntakeError::TransactionConflict { .. })
    }

    fn exhausted(attempts: u32) -> Self {
        IntakeError::TransactionConflict { attempts }
    }
}

#[cfg(test)]
mod tests {
    use ledger_store::{RecordKey, Version};

    use super::*;

    #[test]
    fn store_conflict_becomes_transaction_conflict() {
        let conflict = LedgerStoreError::ConcurrencyConflict {
            record: RecordKey::Sale(SaleId::new()),
            expected: Version::first(),
            actual: Version::new(2),
        };
        let err = SettlementError::from(conflict);
        assert!(matches!(
            err,
            SettlementError::TransactionConflict { attempts: 1 }
        ));
        assert!(err.is_conflict());
    }

    #[test]
    fn other_store_errors_are_not_retryable() {
        let err = IntakeError::from(LedgerStoreError::InvalidChangeSet("empty".into()));
        assert!(matches!(err, IntakeError::Store(_)));
        assert!(!err.is_conflict());
    }
}
