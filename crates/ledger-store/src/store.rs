use async_trait::async_trait;
use common::{PaymentId, SaleId, SettlementId};

use crate::{
    ChangeSet, Payment, PaymentQuery, Result, Sale, SaleQuery, Settlement, SettlementQuery,
    Versioned,
};

/// Core trait for ledger store implementations.
///
/// Reads return the current committed value of a record with its version.
/// Writes go through [`LedgerStore::commit`] only.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_sale(&self, id: SaleId) -> Result<Option<Versioned<Sale>>>;

    /// Sales matching the query, oldest first.
    async fn query_sales(&self, query: SaleQuery) -> Result<Vec<Versioned<Sale>>>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Versioned<Payment>>>;

    /// Payments matching the query, ordered by collection time.
    async fn query_payments(&self, query: PaymentQuery) -> Result<Vec<Versioned<Payment>>>;

    async fn get_settlement(&self, id: SettlementId) -> Result<Option<Versioned<Settlement>>>;

    /// Settlements matching the query, newest first.
    async fn query_settlements(&self, query: SettlementQuery)
    -> Result<Vec<Versioned<Settlement>>>;

    /// Applies a change set atomically.
    ///
    /// Either every change applies or none does. If any record is not at the
    /// version its change expects, fails with `ConcurrencyConflict` and leaves
    /// the store untouched.
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Loads several payments, skipping ids that no longer exist.
    async fn get_payments(&self, ids: &[PaymentId]) -> Result<Vec<Versioned<Payment>>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(payment) = self.get_payment(*id).await? {
                found.push(payment);
            }
        }
        Ok(found)
    }

    async fn settlement_exists(&self, id: SettlementId) -> Result<bool> {
        Ok(self.get_settlement(id).await?.is_some())
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}
