//! Exact undo of a settlement.

use std::collections::BTreeSet;

use common::{Money, PaymentId, SaleId, SettlementId};
use ledger_store::{
    ChangeSet, CustodyState, LedgerStore, LedgerStoreError, LedgerStoreExt, Payment, Sale,
    Settlement, SettlementKind, Versioned,
};
use serde::Serialize;

use crate::error::SettlementError;

/// What a reversal restores. Returned both by the dry run and by the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversalSummary {
    pub settlement_id: SettlementId,
    pub kind: SettlementKind,
    pub total_amount: Money,
    /// Custody state the restored payments return to.
    pub restored_state: CustodyState,
    pub restored_payment_ids: BTreeSet<PaymentId>,
    /// Listed payments that no longer exist or were already restored.
    pub skipped_payment_ids: BTreeSet<PaymentId>,
    pub sales_unmarked: BTreeSet<SaleId>,
}

struct Plan {
    summary: ReversalSummary,
    changes: ChangeSet,
}

/// Undoes settlements using the ids recorded on them, never by scanning
/// current sale or payment state for matches.
#[derive(Clone)]
pub struct ReversalEngine<S> {
    store: S,
}

impl<S: LedgerStore> ReversalEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn reverse(&self, id: SettlementId) -> Result<ReversalSummary, SettlementError> {
        let Plan { summary, changes } = self.plan(id).await?;
        self.store.commit(changes).await?;

        metrics::counter!("settlements_reversed_total", "kind" => summary.kind.as_str())
            .increment(1);
        tracing::info!(
            settlement_id = %summary.settlement_id,
            kind = %summary.kind,
            total = %summary.total_amount,
            payments = summary.restored_payment_ids.len(),
            sales_unmarked = summary.sales_unmarked.len(),
            "settlement reversed"
        );
        Ok(summary)
    }

    pub async fn preview(&self, id: SettlementId) -> Result<ReversalSummary, SettlementError> {
        Ok(self.plan(id).await?.summary)
    }

    async fn plan(&self, id: SettlementId) -> Result<Plan, SettlementError> {
        let settlement = self
            .store
            .get_settlement(id)
            .await?
            .ok_or(SettlementError::NotFound(id))?;

        let ids: Vec<PaymentId> = settlement
            .record
            .included_payment_ids
            .iter()
            .copied()
            .collect();
        let payments = self.store.get_payments(&ids).await?;

        let mut changes = ChangeSet::new();
        changes.delete_settlement(id, settlement.version);

        let mut summary = ReversalSummary {
            settlement_id: id,
            kind: settlement.record.kind,
            total_amount: settlement.record.total_amount,
            restored_state: match settlement.record.kind {
                SettlementKind::Interim => CustodyState::Pending,
                // The cash never left the supervisor's custody
                SettlementKind::Final => CustodyState::HandedToSupervisor,
            },
            restored_payment_ids: BTreeSet::new(),
            skipped_payment_ids: ids.iter().copied().collect(),
            sales_unmarked: BTreeSet::new(),
        };

        for payment in payments {
            if !Self::restorable(&settlement.record, &payment.record)? {
                continue;
            }
            summary.skipped_payment_ids.remove(&payment.record.id);
            summary.restored_payment_ids.insert(payment.record.id);

            let mut restored = payment.record;
            restored.restore(summary.restored_state);
            changes.put_payment(restored, payment.version);
        }

        for sale in self.marked_sales(&settlement.record).await? {
            summary.sales_unmarked.insert(sale.record.id);
            let mut unmarked = sale.record;
            unmarked.commission_paid = false;
            changes.put_sale(unmarked, sale.version);
        }

        Ok(Plan { summary, changes })
    }

    /// Decides whether a listed payment goes back, or blocks the reversal.
    fn restorable(settlement: &Settlement, payment: &Payment) -> Result<bool, SettlementError> {
        match (settlement.kind, payment.custody_state) {
            (SettlementKind::Interim, CustodyState::HandedToSupervisor) => Ok(true),
            (SettlementKind::Interim, CustodyState::SettledFinal) => {
                let blocking_settlement =
                    payment
                        .settlement_ref
                        .ok_or_else(|| LedgerStoreError::Corrupt {
                            record: format!("payment {}", payment.id),
                            reason: "settled without a settlement".to_string(),
                        })?;
                Err(SettlementError::ReversalBlocked {
                    payment: payment.id,
                    blocking_settlement,
                })
            }
            (SettlementKind::Final, CustodyState::SettledFinal) => {
                Ok(payment.settlement_ref == Some(settlement.id))
            }
            _ => Ok(false),
        }
    }

    async fn marked_sales(
        &self,
        settlement: &Settlement,
    ) -> Result<Vec<Versioned<Sale>>, SettlementError> {
        let mut sales = Vec::with_capacity(settlement.sales_marked_paid.len());
        for sale_id in &settlement.sales_marked_paid {
            if let Some(sale) = self.store.get_sale(*sale_id).await? {
                sales.push(sale);
            }
        }
        Ok(sales)
    }
}

#[cfg(test)]
mod tests {
    use common::{ClientRef, ItemRef, UserId};
    use ledger_store::{InMemoryLedgerStore, PaymentMethod, Version};

    use super::*;
    use crate::config::LedgerConfig;
    use crate::engine::SettlementEngine;

    async fn pending_payment(store: &InMemoryLedgerStore, collector: &str, amount: i64) -> Sale {
        let mut sale = Sale::new(
            ClientRef::new("client"),
            ItemRef::new("item"),
            Money::from_cents(amount),
            UserId::new(collector),
        );
        let payment = Payment::new_pending(
            sale.id,
            Money::from_cents(amount),
            PaymentMethod::Cash,
            UserId::new(collector),
        );
        sale.balance = Money::zero();
        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone()).insert_payment(payment);
        store.commit(changes).await.unwrap();
        sale
    }

    fn engines(
        store: &InMemoryLedgerStore,
    ) -> (
        SettlementEngine<InMemoryLedgerStore>,
        ReversalEngine<InMemoryLedgerStore>,
    ) {
        (
            SettlementEngine::new(store.clone(), &LedgerConfig::default()),
            ReversalEngine::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn unknown_settlement_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let id = SettlementId::new();
        let result = ReversalEngine::new(store).reverse(id).await;
        assert!(matches!(result, Err(SettlementError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn interim_reversal_returns_payments_to_pending() {
        let store = InMemoryLedgerStore::new();
        pending_payment(&store, "ana", 1_000).await;
        let (settle, reverse) = engines(&store);
        let interim = settle.create_interim(&UserId::new("ana")).await.unwrap();

        let summary = reverse.reverse(interim.id).await.unwrap();
        assert_eq!(summary.restored_state, CustodyState::Pending);
        assert_eq!(summary.restored_payment_ids, interim.included_payment_ids);
        assert!(summary.skipped_payment_ids.is_empty());

        for id in &interim.included_payment_ids {
            let p = store.get_payment(*id).await.unwrap().unwrap();
            assert_eq!(p.record.custody_state, CustodyState::Pending);
            assert!(p.record.settlement_ref.is_none());
            assert_eq!(p.version, Version::new(3));
        }
        assert!(!store.settlement_exists(interim.id).await.unwrap());
    }

    #[tokio::test]
    async fn interim_reversal_blocked_by_later_final() {
        let store = InMemoryLedgerStore::new();
        pending_payment(&store, "ana", 1_000).await;
        let (settle, reverse) = engines(&store);
        let interim = settle.create_interim(&UserId::new("ana")).await.unwrap();
        let fin = settle.create_final(&UserId::new("owner")).await.unwrap();

        let result = reverse.reverse(interim.id).await;
        assert!(matches!(
            result,
            Err(SettlementError::ReversalBlocked { blocking_settlement, .. })
                if blocking_settlement == fin.id
        ));
        assert!(store.settlement_exists(interim.id).await.unwrap());
    }

    #[tokio::test]
    async fn final_then_interim_reversal_unwinds_completely() {
        let store = InMemoryLedgerStore::new();
        let sale = pending_payment(&store, "ana", 1_000).await;
        let (settle, reverse) = engines(&store);
        let interim = settle.create_interim(&UserId::new("ana")).await.unwrap();
        let fin = settle.create_final(&UserId::new("owner")).await.unwrap();

        let summary = reverse.reverse(fin.id).await.unwrap();
        assert_eq!(summary.restored_state, CustodyState::HandedToSupervisor);
        assert_eq!(summary.sales_unmarked, BTreeSet::from([sale.id]));
        let stored = store.get_sale(sale.id).await.unwrap().unwrap();
        assert!(!stored.record.commission_paid);

        reverse.reverse(interim.id).await.unwrap();
        for id in &interim.included_payment_ids {
            let p = store.get_payment(*id).await.unwrap().unwrap();
            assert_eq!(p.record.custody_state, CustodyState::Pending);
        }
        assert_eq!(store.record_counts().await, (1, 1, 0));
    }

    #[tokio::test]
    async fn deleted_payment_is_skipped() {
        let store = InMemoryLedgerStore::new();
        pending_payment(&store, "ana", 1_000).await;
        let (settle, reverse) = engines(&store);
        let interim = settle.create_interim(&UserId::new("ana")).await.unwrap();
        let gone = *interim.included_payment_ids.iter().next().unwrap();

        let stored = store.get_payment(gone).await.unwrap().unwrap();
        let mut changes = ChangeSet::new();
        changes.delete_payment(gone, stored.version);
        store.commit(changes).await.unwrap();

        let summary = reverse.reverse(interim.id).await.unwrap();
        assert!(summary.restored_payment_ids.is_empty());
        assert_eq!(summary.skipped_payment_ids, BTreeSet::from([gone]));
        assert!(!store.settlement_exists(interim.id).await.unwrap());
    }

    #[tokio::test]
    async fn preview_leaves_settlement_in_place() {
        let store = InMemoryLedgerStore::new();
        pending_payment(&store, "ana", 1_000).await;
        let (settle, reverse) = engines(&store);
        let interim = settle.create_interim(&UserId::new("ana")).await.unwrap();

        let summary = reverse.preview(interim.id).await.unwrap();
        assert_eq!(summary.restored_payment_ids.len(), 1);
        assert!(store.settlement_exists(interim.id).await.unwrap());
    }
}
