use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{PaymentId, SaleId, SettlementId};
use tokio::sync::RwLock;

use crate::{
    Change, ChangeSet, LedgerStoreError, Payment, PaymentQuery, RecordKey, Result, Sale,
    SaleQuery, Settlement, SettlementQuery, Version, Versioned, store::LedgerStore,
};

#[derive(Default)]
struct Tables {
    sales: HashMap<SaleId, Versioned<Sale>>,
    payments: HashMap<PaymentId, Versioned<Payment>>,
    settlements: HashMap<SettlementId, Versioned<Settlement>>,
}

impl Tables {
    fn version_of(&self, key: RecordKey) -> Version {
        match key {
            RecordKey::Sale(id) => self.sales.get(&id).map(|s| s.version),
            RecordKey::Payment(id) => self.payments.get(&id).map(|p| p.version),
            RecordKey::Settlement(id) => self.settlements.get(&id).map(|s| s.version),
        }
        .unwrap_or_else(Version::initial)
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Guard { .. } => {}
            Change::PutSale { sale, expected } => {
                self.sales
                    .insert(sale.id, Versioned::new(sale, expected.next()));
            }
            Change::PutPayment { payment, expected } => {
                self.payments
                    .insert(payment.id, Versioned::new(payment, expected.next()));
            }
            Change::DeletePayment { id, .. } => {
                self.payments.remove(&id);
            }
            Change::PutSettlement {
                settlement,
                expected,
            } => {
                self.settlements
                    .insert(settlement.id, Versioned::new(settlement, expected.next()));
            }
            Change::DeleteSettlement { id, .. } => {
                self.settlements.remove(&id);
            }
        }
    }
}

/// In-memory ledger store.
///
/// Holds all three tables behind one lock so a commit checks every expected
/// version and applies every change without another writer interleaving.
/// Used by tests and by the API server when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    injected_conflicts: Arc<AtomicUsize>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a concurrency conflict
    /// without touching any table.
    pub fn fail_next_commits(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Returns (sales, payments, settlements) counts.
    pub async fn record_counts(&self) -> (usize, usize, usize) {
        let tables = self.tables.read().await;
        (
            tables.sales.len(),
            tables.payments.len(),
            tables.settlements.len(),
        )
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_sale(&self, id: SaleId) -> Result<Option<Versioned<Sale>>> {
        Ok(self.tables.read().await.sales.get(&id).cloned())
    }

    async fn query_sales(&self, query: SaleQuery) -> Result<Vec<Versioned<Sale>>> {
        let tables = self.tables.read().await;
        let mut sales: Vec<_> = tables
            .sales
            .values()
            .filter(|s| query.matches(&s.record))
            .cloned()
            .collect();
        sales.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then(a.record.id.cmp(&b.record.id))
        });
        Ok(sales)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Versioned<Payment>>> {
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn query_payments(&self, query: PaymentQuery) -> Result<Vec<Versioned<Payment>>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<_> = tables
            .payments
            .values()
            .filter(|p| query.matches(&p.record))
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.record
                .collected_at
                .cmp(&b.record.collected_at)
                .then(a.record.id.cmp(&b.record.id))
        });
        Ok(payments)
    }

    async fn get_settlement(&self, id: SettlementId) -> Result<Option<Versioned<Settlement>>> {
        Ok(self.tables.read().await.settlements.get(&id).cloned())
    }

    async fn query_settlements(
        &self,
        query: SettlementQuery,
    ) -> Result<Vec<Versioned<Settlement>>> {
        let tables = self.tables.read().await;
        let mut settlements: Vec<_> = tables
            .settlements
            .values()
            .filter(|s| query.matches(&s.record))
            .cloned()
            .collect();

        // Newest first
        settlements.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.record.id.cmp(&a.record.id))
        });

        let offset = query.offset.unwrap_or(0);
        let settlements = settlements
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(settlements)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        changes.validate()?;

        let mut tables = self.tables.write().await;

        if self.take_injected_conflict()
            && let Some(first) = changes.changes().first()
        {
            return Err(LedgerStoreError::ConcurrencyConflict {
                record: first.key(),
                expected: first.expected(),
                actual: first.expected().next(),
            });
        }

        for change in changes.changes() {
            let key = change.key();
            let actual = tables.version_of(key);
            if actual != change.expected() {
                tracing::debug!(%key, expected = %change.expected(), %actual, "commit rejected");
                return Err(LedgerStoreError::ConcurrencyConflict {
                    record: key,
                    expected: change.expected(),
                    actual,
                });
            }
        }

        let count = changes.len();
        for change in changes.into_changes() {
            tables.apply(change);
        }
        tracing::debug!(changes = count, "commit applied");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::{Duration, Utc};
    use common::{ClientRef, ItemRef, Money, UserId};

    use super::*;
    use crate::{CustodyState, PaymentMethod, SettlementKind};

    fn test_sale(price: i64) -> Sale {
        Sale::new(
            ClientRef::new("client-1"),
            ItemRef::new("item-1"),
            Money::from_cents(price),
            UserId::new("ana"),
        )
    }

    fn test_payment(sale: &Sale, amount: i64, collector: &str) -> Payment {
        Payment::new_pending(
            sale.id,
            Money::from_cents(amount),
            PaymentMethod::Cash,
            UserId::new(collector),
        )
    }

    fn test_settlement(kind: SettlementKind, performer: &str) -> Settlement {
        Settlement {
            id: SettlementId::new(),
            kind,
            performed_by: UserId::new(performer),
            received_by: UserId::new("supervisor"),
            total_amount: Money::zero(),
            included_payment_ids: BTreeSet::new(),
            commission_total: Money::zero(),
            commission_by_payee: BTreeMap::new(),
            sales_marked_paid: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_read_back_with_first_version() {
        let store = InMemoryLedgerStore::new();
        let sale = test_sale(1_000);
        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone());
        store.commit(changes).await.unwrap();

        let stored = store.get_sale(sale.id).await.unwrap().unwrap();
        assert_eq!(stored.record, sale);
        assert_eq!(stored.version, Version::first());
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemoryLedgerStore::new();
        let sale = test_sale(1_000);
        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone());
        store.commit(changes).await.unwrap();

        let mut updated = sale.clone();
        updated.balance = Money::from_cents(500);
        let mut changes = ChangeSet::new();
        changes.put_sale(updated.clone(), Version::first());
        store.commit(changes).await.unwrap();

        // A second writer still holding version 1
        let mut changes = ChangeSet::new();
        changes.put_sale(updated, Version::first());
        let result = store.commit(changes).await;
        assert!(matches!(
            result,
            Err(LedgerStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(2)
        ));
    }

    #[tokio::test]
    async fn inserting_existing_record_conflicts() {
        let store = InMemoryLedgerStore::new();
        let sale = test_sale(1_000);
        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone());
        store.commit(changes.clone()).await.unwrap();

        let result = store.commit(changes).await;
        assert!(matches!(
            result,
            Err(LedgerStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn failed_guard_applies_nothing() {
        let store = InMemoryLedgerStore::new();
        let sale = test_sale(1_000);
        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone());
        store.commit(changes).await.unwrap();

        let payment = test_payment(&sale, 100, "ana");
        let mut changes = ChangeSet::new();
        changes
            .insert_payment(payment.clone())
            .guard(RecordKey::Sale(sale.id), Version::new(7));
        assert!(store.commit(changes).await.is_err());

        assert!(store.get_payment(payment.id).await.unwrap().is_none());
        assert_eq!(store.record_counts().await, (1, 0, 0));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = InMemoryLedgerStore::new();
        let settlement = test_settlement(SettlementKind::Interim, "ana");
        let mut changes = ChangeSet::new();
        changes.insert_settlement(settlement.clone());
        store.commit(changes).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.delete_settlement(settlement.id, Version::first());
        store.commit(changes).await.unwrap();

        assert!(store.get_settlement(settlement.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_conflict_leaves_tables_untouched() {
        let store = InMemoryLedgerStore::new();
        store.fail_next_commits(1);

        let mut changes = ChangeSet::new();
        changes.insert_sale(test_sale(1_000));
        assert!(matches!(
            store.commit(changes.clone()).await,
            Err(LedgerStoreError::ConcurrencyConflict { .. })
        ));
        assert_eq!(store.record_counts().await, (0, 0, 0));

        store.commit(changes).await.unwrap();
        assert_eq!(store.record_counts().await, (1, 0, 0));
    }

    #[tokio::test]
    async fn query_payments_by_holder_and_state() {
        let store = InMemoryLedgerStore::new();
        let sale = test_sale(1_000);
        let mut changes = ChangeSet::new();
        changes
            .insert_sale(sale.clone())
            .insert_payment(test_payment(&sale, 100, "ana"))
            .insert_payment(test_payment(&sale, 200, "ana"))
            .insert_payment(test_payment(&sale, 300, "beto"));
        store.commit(changes).await.unwrap();

        let ana = store
            .query_payments(PaymentQuery::held_by(UserId::new("ana")).state(CustodyState::Pending))
            .await
            .unwrap();
        assert_eq!(ana.len(), 2);

        let for_sale = store
            .query_payments(PaymentQuery::for_sale(sale.id))
            .await
            .unwrap();
        assert_eq!(for_sale.len(), 3);
    }

    #[tokio::test]
    async fn settlements_newest_first_with_paging() {
        let store = InMemoryLedgerStore::new();
        let mut older = test_settlement(SettlementKind::Interim, "ana");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = test_settlement(SettlementKind::Interim, "ana");
        let other = test_settlement(SettlementKind::Final, "owner");

        let mut changes = ChangeSet::new();
        changes
            .insert_settlement(older.clone())
            .insert_settlement(newer.clone())
            .insert_settlement(other);
        store.commit(changes).await.unwrap();

        let interim = store
            .query_settlements(SettlementQuery::new().kind(SettlementKind::Interim))
            .await
            .unwrap();
        assert_eq!(interim.len(), 2);
        assert_eq!(interim[0].record.id, newer.id);
        assert_eq!(interim[1].record.id, older.id);

        let page = store
            .query_settlements(
                SettlementQuery::new()
                    .performed_by(UserId::new("ana"))
                    .offset(1)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].record.id, older.id);
    }
}
