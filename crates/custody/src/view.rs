//! Read-only queries over the ledger.

use std::collections::BTreeMap;

use common::{ClientRef, Money, PaymentId, SaleId, SettlementId, UserId};
use ledger_store::{
    CustodyState, LedgerStore, Payment, PaymentMethod, PaymentQuery, Sale, SaleQuery, Settlement,
    SettlementQuery,
};
use serde::Serialize;

use crate::config::LedgerConfig;
use crate::error::SettlementError;

/// Cash answerable to one identity, broken down by how it was collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustodySummary {
    pub holder: UserId,
    pub payments: Vec<Payment>,
    pub total_by_method: BTreeMap<PaymentMethod, Money>,
    pub total: Money,
}

impl CustodySummary {
    fn new(holder: UserId, payments: Vec<Payment>) -> Self {
        let mut total_by_method = BTreeMap::new();
        for payment in &payments {
            let subtotal = total_by_method
                .entry(payment.method)
                .or_insert_with(Money::zero);
            *subtotal = Money::saturating_sum([*subtotal, payment.amount]);
        }
        let total = Money::saturating_sum(total_by_method.values().copied());
        Self {
            holder,
            payments,
            total_by_method,
            total,
        }
    }
}

/// Read-through view over the store. Holds no ledger state of its own.
#[derive(Clone)]
pub struct LedgerView<S> {
    store: S,
    supervisor: UserId,
    owner: UserId,
}

impl<S: LedgerStore> LedgerView<S> {
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            supervisor: config.supervisor.clone(),
            owner: config.owner.clone(),
        }
    }

    /// Pending payments collected and still held by `holder`.
    pub async fn payments_held_by(&self, holder: &UserId) -> Result<Vec<Payment>, SettlementError> {
        self.payments(PaymentQuery::held_by(holder.clone()).state(CustodyState::Pending))
            .await
    }

    pub async fn payments_in_state(
        &self,
        state: CustodyState,
    ) -> Result<Vec<Payment>, SettlementError> {
        self.payments(PaymentQuery::in_state(state)).await
    }

    pub async fn payments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Payment>, SettlementError> {
        self.payments(PaymentQuery::for_sale(sale_id)).await
    }

    /// Everything `holder` is answerable for right now.
    ///
    /// The supervisor also answers for cash handed over by Interim
    /// settlements, and the owner for cash delivered by Final settlements.
    pub async fn custody_held_by(&self, holder: &UserId) -> Result<CustodySummary, SettlementError> {
        let mut payments = self.payments_held_by(holder).await?;
        if holder == &self.supervisor {
            payments.extend(self.payments_in_state(CustodyState::HandedToSupervisor).await?);
        }
        if holder == &self.owner {
            payments.extend(self.payments_in_state(CustodyState::SettledFinal).await?);
        }
        Ok(CustodySummary::new(holder.clone(), payments))
    }

    pub async fn sale(&self, id: SaleId) -> Result<Option<Sale>, SettlementError> {
        Ok(self.store.get_sale(id).await?.map(|s| s.record))
    }

    pub async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, SettlementError> {
        Ok(self.store.get_payment(id).await?.map(|p| p.record))
    }

    pub async fn settlement(&self, id: SettlementId) -> Result<Option<Settlement>, SettlementError> {
        Ok(self.store.get_settlement(id).await?.map(|s| s.record))
    }

    /// Sales of a client, oldest first.
    pub async fn sales_for_client(&self, client: &ClientRef) -> Result<Vec<Sale>, SettlementError> {
        let sales = self
            .store
            .query_sales(SaleQuery::for_client(client.clone()))
            .await?;
        Ok(sales.into_iter().map(|s| s.record).collect())
    }

    /// Total still owed across all sales, clamped at the `i64` range.
    pub async fn outstanding_balance(&self) -> Result<Money, SettlementError> {
        let sales = self
            .store
            .query_sales(SaleQuery::new().outstanding_only())
            .await?;
        Ok(Money::saturating_sum(sales.iter().map(|s| s.record.balance)))
    }

    /// Settlements newest first.
    pub async fn settlements(
        &self,
        query: SettlementQuery,
    ) -> Result<Vec<Settlement>, SettlementError> {
        let settlements = self.store.query_settlements(query).await?;
        Ok(settlements.into_iter().map(|s| s.record).collect())
    }

    async fn payments(&self, query: PaymentQuery) -> Result<Vec<Payment>, SettlementError> {
        let payments = self.store.query_payments(query).await?;
        Ok(payments.into_iter().map(|p| p.record).collect())
    }
}

#[cfg(test)]
mod tests {
    use common::ItemRef;
    use ledger_store::{ChangeSet, InMemoryLedgerStore};

    use super::*;
    use crate::engine::SettlementEngine;

    async fn collect(
        store: &InMemoryLedgerStore,
        client: &str,
        collector: &str,
        price: i64,
        amount: i64,
        method: PaymentMethod,
    ) -> Sale {
        let mut sale = Sale::new(
            ClientRef::new(client),
            ItemRef::new("item"),
            Money::from_cents(price),
            UserId::new(collector),
        );
        let payment =
            Payment::new_pending(sale.id, Money::from_cents(amount), method, UserId::new(collector));
        sale.balance -= payment.amount;
        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone()).insert_payment(payment);
        store.commit(changes).await.unwrap();
        sale
    }

    #[tokio::test]
    async fn custody_summary_totals_by_method() {
        let store = InMemoryLedgerStore::new();
        collect(&store, "c1", "ana", 5_000, 1_000, PaymentMethod::Cash).await;
        collect(&store, "c1", "ana", 5_000, 2_000, PaymentMethod::Transfer).await;
        collect(&store, "c1", "ana", 5_000, 500, PaymentMethod::Cash).await;
        collect(&store, "c2", "beto", 5_000, 700, PaymentMethod::Cash).await;
        let view = LedgerView::new(store, &LedgerConfig::default());

        let summary = view.custody_held_by(&UserId::new("ana")).await.unwrap();
        assert_eq!(summary.payments.len(), 3);
        assert_eq!(summary.total_by_method[&PaymentMethod::Cash], Money::from_cents(1_500));
        assert_eq!(summary.total_by_method[&PaymentMethod::Transfer], Money::from_cents(2_000));
        assert_eq!(summary.total, Money::from_cents(3_500));
    }

    #[tokio::test]
    async fn supervisor_answers_for_handed_over_cash() {
        let store = InMemoryLedgerStore::new();
        collect(&store, "c1", "ana", 5_000, 1_000, PaymentMethod::Cash).await;
        let config = LedgerConfig::default();
        SettlementEngine::new(store.clone(), &config)
            .create_interim(&UserId::new("ana"))
            .await
            .unwrap();
        let view = LedgerView::new(store, &config);

        let ana = view.custody_held_by(&UserId::new("ana")).await.unwrap();
        assert!(ana.payments.is_empty());
        assert_eq!(ana.total, Money::zero());

        let supervisor = view.custody_held_by(&config.supervisor).await.unwrap();
        assert_eq!(supervisor.total, Money::from_cents(1_000));
    }

    #[tokio::test]
    async fn outstanding_balance_and_client_sales() {
        let store = InMemoryLedgerStore::new();
        collect(&store, "c1", "ana", 5_000, 1_000, PaymentMethod::Cash).await;
        collect(&store, "c1", "ana", 3_000, 3_000, PaymentMethod::Cash).await;
        collect(&store, "c2", "ana", 2_000, 500, PaymentMethod::Cash).await;
        let view = LedgerView::new(store, &LedgerConfig::default());

        assert_eq!(
            view.outstanding_balance().await.unwrap(),
            Money::from_cents(5_500)
        );
        assert_eq!(
            view.sales_for_client(&ClientRef::new("c1")).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn totals_clamp_instead_of_overflowing() {
        let store = InMemoryLedgerStore::new();
        collect(&store, "c1", "ana", i64::MAX, 1, PaymentMethod::Cash).await;
        collect(&store, "c2", "ana", i64::MAX, i64::MAX, PaymentMethod::Cash).await;
        collect(&store, "c3", "ana", i64::MAX, 1, PaymentMethod::Cash).await;
        let view = LedgerView::new(store, &LedgerConfig::default());

        assert_eq!(
            view.outstanding_balance().await.unwrap(),
            Money::from_cents(i64::MAX)
        );
        let summary = view.custody_held_by(&UserId::new("ana")).await.unwrap();
        assert_eq!(summary.total, Money::from_cents(i64::MAX));
    }
}
