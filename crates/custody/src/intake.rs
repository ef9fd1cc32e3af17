//! Sales registration and payment collection.
//!
//! Payments enter the ledger here, always `pending` and held by whoever
//! collected them. Once a settlement has taken a payment it can no longer be
//! edited or removed.

use common::{ClientRef, ItemRef, Money, PaymentId, SaleId, UserId};
use ledger_store::{ChangeSet, LedgerStore, Payment, PaymentMethod, Sale, SaleQuery, Versioned};
use serde::Deserialize;

use crate::error::IntakeError;

/// Details of a sale to register.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSale {
    pub client: ClientRef,
    pub item: ItemRef,
    pub agreed_price: Money,
}

#[derive(Clone)]
pub struct PaymentIntake<S> {
    store: S,
}

impl<S: LedgerStore> PaymentIntake<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn register_sale(&self, sale: NewSale, seller: &UserId) -> Result<Sale, IntakeError> {
        ensure_valid_amount(sale.agreed_price)?;
        let sale = Sale::new(sale.client, sale.item, sale.agreed_price, seller.clone());

        let mut changes = ChangeSet::new();
        changes.insert_sale(sale.clone());
        self.store.commit(changes).await?;

        tracing::info!(sale_id = %sale.id, seller = %sale.seller, price = %sale.agreed_price, "sale registered");
        Ok(sale)
    }

    /// Collects `amount` against one sale.
    pub async fn record_payment(
        &self,
        sale_id: SaleId,
        amount: Money,
        method: PaymentMethod,
        collector: &UserId,
    ) -> Result<Payment, IntakeError> {
        ensure_valid_amount(amount)?;
        let sale = self.load_sale(sale_id).await?;
        if amount > sale.record.balance {
            return Err(IntakeError::ExceedsBalance {
                requested: amount,
                balance: sale.record.balance,
            });
        }

        let payment = Payment::new_pending(sale_id, amount, method, collector.clone());
        let mut updated = sale.record;
        updated.balance -= amount;

        let mut changes = ChangeSet::new();
        changes
            .put_sale(updated, sale.version)
            .insert_payment(payment.clone());
        self.store.commit(changes).await?;

        metrics::counter!("payments_recorded_total").increment(1);
        tracing::info!(payment_id = %payment.id, %sale_id, amount = %amount, collector = %collector, "payment recorded");
        Ok(payment)
    }

    /// Collects `amount` against a client's account, paying down their
    /// outstanding sales oldest first.
    pub async fn record_account_payment(
        &self,
        client: &ClientRef,
        amount: Money,
        method: PaymentMethod,
        collector: &UserId,
    ) -> Result<Vec<Payment>, IntakeError> {
        ensure_valid_amount(amount)?;
        let sales = self
            .store
            .query_sales(SaleQuery::for_client(client.clone()).outstanding_only())
            .await?;
        if sales.is_empty() {
            return Err(IntakeError::NothingOwed(client.clone()));
        }

        // Saturating: a clamped total still compares correctly against any
        // single amount.
        let owed = Money::saturating_sum(sales.iter().map(|s| s.record.balance));
        if amount > owed {
            return Err(IntakeError::ExceedsBalance {
                requested: amount,
                balance: owed,
            });
        }

        let mut remaining = amount;
        let mut payments = Vec::new();
        let mut changes = ChangeSet::new();
        for sale in sales {
            if !remaining.is_positive() {
                break;
            }
            let portion = remaining.min(sale.record.balance);
            remaining -= portion;

            let payment = Payment::new_pending(sale.record.id, portion, method, collector.clone());
            let mut updated = sale.record;
            updated.balance -= portion;
            changes
                .put_sale(updated, sale.version)
                .insert_payment(payment.clone());
            payments.push(payment);
        }
        self.store.commit(changes).await?;

        metrics::counter!("payments_recorded_total").increment(payments.len() as u64);
        tracing::info!(%client, amount = %amount, sales = payments.len(), "account payment recorded");
        Ok(payments)
    }

    /// Changes the amount or method of a payment still in its collector's
    /// hands.
    pub async fn adjust_payment(
        &self,
        payment_id: PaymentId,
        amount: Money,
        method: PaymentMethod,
        actor: &UserId,
    ) -> Result<Payment, IntakeError> {
        ensure_valid_amount(amount)?;
        let payment = self.load_editable(payment_id, actor).await?;
        let sale = self.load_sale(payment.record.sale_id).await?;

        let available = sale.record.balance + payment.record.amount;
        if amount > available {
            return Err(IntakeError::ExceedsBalance {
                requested: amount,
                balance: available,
            });
        }

        let mut updated_sale = sale.record;
        updated_sale.balance = available - amount;
        let mut updated = payment.record;
        updated.amount = amount;
        updated.method = method;

        let mut changes = ChangeSet::new();
        changes
            .put_sale(updated_sale, sale.version)
            .put_payment(updated.clone(), payment.version);
        self.store.commit(changes).await?;

        tracing::info!(%payment_id, amount = %amount, "payment adjusted");
        Ok(updated)
    }

    /// Deletes a payment still in its collector's hands and gives the amount
    /// back to the sale's balance.
    pub async fn remove_payment(
        &self,
        payment_id: PaymentId,
        actor: &UserId,
    ) -> Result<(), IntakeError> {
        let payment = self.load_editable(payment_id, actor).await?;
        let sale = self.load_sale(payment.record.sale_id).await?;

        let mut updated_sale = sale.record;
        updated_sale.balance += payment.record.amount;

        let mut changes = ChangeSet::new();
        changes
            .put_sale(updated_sale, sale.version)
            .delete_payment(payment_id, payment.version);
        self.store.commit(changes).await?;

        tracing::info!(%payment_id, "payment removed");
        Ok(())
    }

    async fn load_sale(&self, id: SaleId) -> Result<Versioned<Sale>, IntakeError> {
        self.store
            .get_sale(id)
            .await?
            .ok_or(IntakeError::SaleNotFound(id))
    }

    async fn load_editable(
        &self,
        id: PaymentId,
        actor: &UserId,
    ) -> Result<Versioned<Payment>, IntakeError> {
        let payment = self
            .store
            .get_payment(id)
            .await?
            .ok_or(IntakeError::PaymentNotFound(id))?;
        if &payment.record.collected_by != actor {
            return Err(IntakeError::NotCollector(id));
        }
        if !payment.record.custody_state.is_pending() {
            return Err(IntakeError::CustodyLocked {
                state: payment.record.custody_state,
            });
        }
        Ok(payment)
    }
}

fn ensure_valid_amount(amount: Money) -> Result<(), IntakeError> {
    if amount.is_positive() && amount <= Money::MAX_PRICE {
        Ok(())
    } else {
        Err(IntakeError::InvalidAmount(amount))
    }
}
