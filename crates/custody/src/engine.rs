//! Interim and Final settlements.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use common::{Money, PaymentId, SaleId, SettlementId, UserId};
use ledger_store::{
    ChangeSet, CustodyState, LedgerStore, LedgerStoreError, Payment, PaymentQuery, Sale,
    Settlement, SettlementKind, Versioned,
};
use serde::Serialize;

use crate::commission::CommissionSchedule;
use crate::config::LedgerConfig;
use crate::error::SettlementError;

/// The effect a settlement would have, computed without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementPreview {
    pub kind: SettlementKind,
    pub performed_by: UserId,
    pub received_by: UserId,
    pub total_amount: Money,
    pub included_payment_ids: BTreeSet<PaymentId>,
    pub commission_total: Money,
    pub commission_by_payee: BTreeMap<UserId, Money>,
    pub sales_marked_paid: BTreeSet<SaleId>,
}

impl From<&Settlement> for SettlementPreview {
    fn from(s: &Settlement) -> Self {
        Self {
            kind: s.kind,
            performed_by: s.performed_by.clone(),
            received_by: s.received_by.clone(),
            total_amount: s.total_amount,
            included_payment_ids: s.included_payment_ids.clone(),
            commission_total: s.commission_total,
            commission_by_payee: s.commission_by_payee.clone(),
            sales_marked_paid: s.sales_marked_paid.clone(),
        }
    }
}

/// A settlement together with the change set that would persist it.
struct Plan {
    settlement: Settlement,
    changes: ChangeSet,
}

/// Moves batches of payments forward through custody.
///
/// Each operation reads current state, builds one change set, and commits it
/// in a single attempt. A lost race surfaces as
/// [`SettlementError::TransactionConflict`]; retrying is the caller's job.
#[derive(Clone)]
pub struct SettlementEngine<S> {
    store: S,
    commission: CommissionSchedule,
    supervisor: UserId,
    owner: UserId,
}

impl<S: LedgerStore> SettlementEngine<S> {
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            commission: CommissionSchedule::new(config.commission_per_sale),
            supervisor: config.supervisor.clone(),
            owner: config.owner.clone(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hands every pending payment held by `actor` to the supervisor.
    pub async fn create_interim(&self, actor: &UserId) -> Result<Settlement, SettlementError> {
        let plan = self.plan_interim(actor).await?;
        self.commit(plan).await
    }

    pub async fn preview_interim(
        &self,
        actor: &UserId,
    ) -> Result<SettlementPreview, SettlementError> {
        let plan = self.plan_interim(actor).await?;
        Ok(SettlementPreview::from(&plan.settlement))
    }

    /// Delivers everything the supervisor holds to the owner and credits
    /// commissions for sales that are now paid off.
    pub async fn create_final(&self, actor: &UserId) -> Result<Settlement, SettlementError> {
        let plan = self.plan_final(actor).await?;
        self.commit(plan).await
    }

    pub async fn preview_final(
        &self,
        actor: &UserId,
    ) -> Result<SettlementPreview, SettlementError> {
        let plan = self.plan_final(actor).await?;
        Ok(SettlementPreview::from(&plan.settlement))
    }

    async fn plan_interim(&self, actor: &UserId) -> Result<Plan, SettlementError> {
        let payments = self
            .store
            .query_payments(PaymentQuery::held_by(actor.clone()).state(CustodyState::Pending))
            .await?;
        if payments.is_empty() {
            return Err(SettlementError::EmptyCustody);
        }

        let settlement = Settlement {
            id: SettlementId::new(),
            kind: SettlementKind::Interim,
            performed_by: actor.clone(),
            received_by: self.supervisor.clone(),
            total_amount: total_of(&payments)?,
            included_payment_ids: payments.iter().map(|p| p.record.id).collect(),
            commission_total: Money::zero(),
            commission_by_payee: BTreeMap::new(),
            sales_marked_paid: BTreeSet::new(),
            created_at: Utc::now(),
        };

        let mut changes = ChangeSet::new();
        changes.insert_settlement(settlement.clone());
        Self::hand_over(&mut changes, payments, CustodyState::HandedToSupervisor, settlement.id);

        Ok(Plan {
            settlement,
            changes,
        })
    }

    async fn plan_final(&self, actor: &UserId) -> Result<Plan, SettlementError> {
        let payments = self
            .store
            .query_payments(PaymentQuery::in_state(CustodyState::HandedToSupervisor))
            .await?;
        if payments.is_empty() {
            return Err(SettlementError::EmptyCustody);
        }

        let sales = self.load_sales(&payments).await?;
        let award = self.commission.award(sales.iter().map(|s| &s.record));

        let settlement = Settlement {
            id: SettlementId::new(),
            kind: SettlementKind::Final,
            performed_by: actor.clone(),
            received_by: self.owner.clone(),
            total_amount: total_of(&payments)?,
            included_payment_ids: payments.iter().map(|p| p.record.id).collect(),
            commission_total: award.total(),
            commission_by_payee: award.by_payee,
            sales_marked_paid: award.sales_marked_paid,
            created_at: Utc::now(),
        };

        let mut changes = ChangeSet::new();
        changes.insert_settlement(settlement.clone());
        Self::hand_over(&mut changes, payments, CustodyState::SettledFinal, settlement.id);

        // Every sale read is either written or guarded, so a concurrent
        // balance change aborts the commit.
        for sale in sales {
            if settlement.sales_marked_paid.contains(&sale.record.id) {
                let mut marked = sale.record;
                marked.commission_paid = true;
                changes.put_sale(marked, sale.version);
            } else {
                changes.guard_sale(&sale);
            }
        }

        Ok(Plan {
            settlement,
            changes,
        })
    }

    /// Loads each distinct sale referenced by `payments`, in id order.
    async fn load_sales(
        &self,
        payments: &[Versioned<Payment>],
    ) -> Result<Vec<Versioned<Sale>>, SettlementError> {
        let mut by_sale: BTreeMap<SaleId, PaymentId> = BTreeMap::new();
        for payment in payments {
            by_sale
                .entry(payment.record.sale_id)
                .or_insert(payment.record.id);
        }

        let mut sales = Vec::with_capacity(by_sale.len());
        for (sale_id, payment_id) in by_sale {
            let sale = self.store.get_sale(sale_id).await?.ok_or_else(|| {
                LedgerStoreError::Corrupt {
                    record: format!("payment {payment_id}"),
                    reason: format!("references missing sale {sale_id}"),
                }
            })?;
            sales.push(sale);
        }
        Ok(sales)
    }

    fn hand_over(
        changes: &mut ChangeSet,
        payments: Vec<Versioned<Payment>>,
        state: CustodyState,
        settlement: SettlementId,
    ) {
        for payment in payments {
            let mut moved = payment.record;
            moved.hand_over(state, settlement);
            changes.put_payment(moved, payment.version);
        }
    }

    async fn commit(&self, plan: Plan) -> Result<Settlement, SettlementError> {
        let Plan {
            settlement,
            changes,
        } = plan;
        self.store.commit(changes).await?;

        metrics::counter!("settlements_created_total", "kind" => settlement.kind.as_str())
            .increment(1);
        if settlement.commission_total.is_positive() {
            metrics::counter!("commission_awarded_cents_total")
                .increment(settlement.commission_total.cents().unsigned_abs());
        }
        tracing::info!(
            settlement_id = %settlement.id,
            kind = %settlement.kind,
            performed_by = %settlement.performed_by,
            total = %settlement.total_amount,
            commission_total = %settlement.commission_total,
            payments = settlement.included_payment_ids.len(),
            "settlement created"
        );

        Ok(settlement)
    }
}

/// Sums payment amounts. Stored amounts that overflow `i64` together cannot
/// have passed intake, so the rows are reported as corrupt.
fn total_of(payments: &[Versioned<Payment>]) -> Result<Money, LedgerStoreError> {
    Money::checked_sum(payments.iter().map(|p| p.record.amount)).ok_or_else(|| {
        LedgerStoreError::Corrupt {
            record: format!("{} payments", payments.len()),
            reason: "total amount overflows".to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use common::{ClientRef, ItemRef};
    use ledger_store::{InMemoryLedgerStore, LedgerStoreExt, PaymentMethod, Version};

    use super::*;

    async fn seed(
        store: &InMemoryLedgerStore,
        seller: &str,
        price: i64,
        paid: &[i64],
        state: CustodyState,
    ) -> (Sale, Vec<Payment>) {
        let mut sale = Sale::new(
            ClientRef::new("client"),
            ItemRef::new("item"),
            Money::from_cents(price),
            UserId::new(seller),
        );
        let mut changes = ChangeSet::new();
        let mut payments = Vec::new();
        let holding = (state != CustodyState::Pending).then(|| Settlement {
            id: SettlementId::new(),
            kind: SettlementKind::Interim,
            performed_by: UserId::new(seller),
            received_by: UserId::new("supervisor"),
            total_amount: Money::zero(),
            included_payment_ids: BTreeSet::new(),
            commission_total: Money::zero(),
            commission_by_payee: BTreeMap::new(),
            sales_marked_paid: BTreeSet::new(),
            created_at: Utc::now(),
        });
        for amount in paid {
            let mut payment = Payment::new_pending(
                sale.id,
                Money::from_cents(*amount),
                PaymentMethod::Cash,
                UserId::new(seller),
            );
            if let Some(ref holder) = holding {
                payment.hand_over(state, holder.id);
            }
            sale.balance -= payment.amount;
            changes.insert_payment(payment.clone());
            payments.push(payment);
        }
        if let Some(holder) = holding {
            changes.insert_settlement(holder);
        }
        changes.insert_sale(sale.clone());
        store.commit(changes).await.unwrap();
        (sale, payments)
    }

    fn engine(store: &InMemoryLedgerStore) -> SettlementEngine<InMemoryLedgerStore> {
        SettlementEngine::new(store.clone(), &LedgerConfig::default())
    }

    #[tokio::test]
    async fn interim_moves_only_the_actors_pending_payments() {
        let store = InMemoryLedgerStore::new();
        let (_, ana) = seed(&store, "ana", 10_000, &[1_000, 2_000], CustodyState::Pending).await;
        let (_, beto) = seed(&store, "beto", 10_000, &[500], CustodyState::Pending).await;

        let settlement = engine(&store)
            .create_interim(&UserId::new("ana"))
            .await
            .unwrap();
        assert_eq!(settlement.total_amount, Money::from_cents(3_000));
        assert_eq!(settlement.received_by, UserId::new("supervisor"));
        assert_eq!(settlement.included_payment_ids.len(), 2);

        for p in &ana {
            let stored = store.get_payment(p.id).await.unwrap().unwrap();
            assert_eq!(stored.record.custody_state, CustodyState::HandedToSupervisor);
            assert_eq!(stored.record.settlement_ref, Some(settlement.id));
            assert_eq!(stored.version, Version::new(2));
        }
        let untouched = store.get_payment(beto[0].id).await.unwrap().unwrap();
        assert_eq!(untouched.record.custody_state, CustodyState::Pending);
    }

    #[tokio::test]
    async fn interim_with_nothing_pending_is_empty_custody() {
        let store = InMemoryLedgerStore::new();
        let result = engine(&store).create_interim(&UserId::new("ana")).await;
        assert!(matches!(result, Err(SettlementError::EmptyCustody)));
        assert_eq!(store.record_counts().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn overflowing_total_is_a_store_error() {
        let store = InMemoryLedgerStore::new();
        let (_, paid) = seed(&store, "ana", i64::MAX, &[i64::MAX, 1], CustodyState::Pending).await;

        let result = engine(&store).create_interim(&UserId::new("ana")).await;
        assert!(matches!(
            result,
            Err(SettlementError::Store(LedgerStoreError::Corrupt { .. }))
        ));
        for p in &paid {
            let stored = store.get_payment(p.id).await.unwrap().unwrap();
            assert_eq!(stored.record.custody_state, CustodyState::Pending);
        }
    }

    #[tokio::test]
    async fn preview_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        seed(&store, "ana", 10_000, &[10_000], CustodyState::HandedToSupervisor).await;
        let before = store.record_counts().await;

        let preview = engine(&store)
            .preview_final(&UserId::new("owner"))
            .await
            .unwrap();
        assert_eq!(preview.commission_total, Money::from_units(300));
        assert_eq!(preview.sales_marked_paid.len(), 1);
        assert_eq!(store.record_counts().await, before);
    }

    #[tokio::test]
    async fn final_settles_everything_and_marks_paid_off_sales() {
        let store = InMemoryLedgerStore::new();
        let (paid, _) =
            seed(&store, "ana", 5_000, &[5_000], CustodyState::HandedToSupervisor).await;
        let (owing, _) =
            seed(&store, "beto", 5_000, &[3_000], CustodyState::HandedToSupervisor).await;

        let settlement = engine(&store)
            .create_final(&UserId::new("owner"))
            .await
            .unwrap();
        assert_eq!(settlement.received_by, UserId::new("owner"));
        assert_eq!(settlement.total_amount, Money::from_cents(8_000));
        assert_eq!(settlement.sales_marked_paid, BTreeSet::from([paid.id]));
        assert_eq!(
            settlement.commission_by_payee,
            BTreeMap::from([(UserId::new("ana"), Money::from_units(300))])
        );

        let paid = store.get_sale(paid.id).await.unwrap().unwrap();
        assert!(paid.record.commission_paid);
        assert_eq!(paid.version, Version::new(2));
        let owing = store.get_sale(owing.id).await.unwrap().unwrap();
        assert!(!owing.record.commission_paid);
        assert_eq!(owing.version, Version::first());
        assert!(store.settlement_exists(settlement.id).await.unwrap());
    }

    #[tokio::test]
    async fn commission_amount_follows_config() {
        let store = InMemoryLedgerStore::new();
        seed(&store, "ana", 5_000, &[5_000], CustodyState::HandedToSupervisor).await;
        let config = LedgerConfig::default().with_commission(Money::from_cents(1_234));

        let settlement = SettlementEngine::new(store.clone(), &config)
            .create_final(&UserId::new("owner"))
            .await
            .unwrap();
        assert_eq!(settlement.commission_total, Money::from_cents(1_234));
    }

    #[tokio::test]
    async fn commit_conflict_surfaces_as_transaction_conflict() {
        let store = InMemoryLedgerStore::new();
        seed(&store, "ana", 5_000, &[1_000], CustodyState::Pending).await;
        store.fail_next_commits(1);

        let result = engine(&store).create_interim(&UserId::new("ana")).await;
        assert!(matches!(
            result,
            Err(SettlementError::TransactionConflict { attempts: 1 })
        ));
        assert_eq!(store.record_counts().await, (1, 1, 0));
    }
}
