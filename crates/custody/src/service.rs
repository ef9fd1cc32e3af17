//! Custody service providing the ledger's public API.

use std::time::Instant;

use common::{ClientRef, Money, PaymentId, SaleId, SettlementId, UserId};
use ledger_store::{
    LedgerStore, Payment, PaymentMethod, Sale, Settlement, SettlementKind, SettlementQuery,
};

use crate::config::LedgerConfig;
use crate::engine::{SettlementEngine, SettlementPreview};
use crate::error::{IntakeError, SettlementError};
use crate::intake::{NewSale, PaymentIntake};
use crate::policy::{AccessPolicy, Action, RolePolicy};
use crate::retry::RetryPolicy;
use crate::reversal::{ReversalEngine, ReversalSummary};
use crate::view::{CustodySummary, LedgerView};

/// Service for moving cash through custody.
///
/// Every command is authorized before the ledger reads anything it could
/// mutate, then runs under the bounded retry policy.
pub struct CustodyService<S, P = RolePolicy> {
    settlements: SettlementEngine<S>,
    reversals: ReversalEngine<S>,
    intake: PaymentIntake<S>,
    view: LedgerView<S>,
    policy: P,
    retry: RetryPolicy,
}

impl<S: LedgerStore + Clone> CustodyService<S, RolePolicy> {
    /// Creates a service enforcing the supervisor and owner roles from
    /// `config`.
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self::with_policy(store, config, RolePolicy::from_config(config))
    }
}

impl<S: LedgerStore + Clone, P: AccessPolicy> CustodyService<S, P> {
    pub fn with_policy(store: S, config: &LedgerConfig, policy: P) -> Self {
        Self {
            settlements: SettlementEngine::new(store.clone(), config),
            reversals: ReversalEngine::new(store.clone()),
            intake: PaymentIntake::new(store.clone()),
            view: LedgerView::new(store, config),
            policy,
            retry: config.retry,
        }
    }

    /// Returns the read-only ledger view.
    pub fn view(&self) -> &LedgerView<S> {
        &self.view
    }

    /// Hands the actor's pending cash to the supervisor.
    #[tracing::instrument(skip(self))]
    pub async fn request_interim_settlement(
        &self,
        actor: &UserId,
    ) -> Result<Settlement, SettlementError> {
        self.policy.authorize(actor, Action::CreateInterim)?;
        let start = Instant::now();
        let result = self
            .retry
            .run("interim_settlement", || self.settlements.create_interim(actor))
            .await;
        record_duration("interim_settlement", start);
        result
    }

    #[tracing::instrument(skip(self))]
    pub async fn preview_interim_settlement(
        &self,
        actor: &UserId,
    ) -> Result<SettlementPreview, SettlementError> {
        self.policy.authorize(actor, Action::CreateInterim)?;
        self.settlements.preview_interim(actor).await
    }

    /// Delivers all cash held by the supervisor to the owner.
    #[tracing::instrument(skip(self))]
    pub async fn request_final_settlement(
        &self,
        actor: &UserId,
    ) -> Result<Settlement, SettlementError> {
        self.policy.authorize(actor, Action::CreateFinal)?;
        let start = Instant::now();
        let result = self
            .retry
            .run("final_settlement", || self.settlements.create_final(actor))
            .await;
        record_duration("final_settlement", start);
        result
    }

    #[tracing::instrument(skip(self))]
    pub async fn preview_final_settlement(
        &self,
        actor: &UserId,
    ) -> Result<SettlementPreview, SettlementError> {
        self.policy.authorize(actor, Action::CreateFinal)?;
        self.settlements.preview_final(actor).await
    }

    /// Undoes a settlement.
    ///
    /// The settlement record is immutable, so it is read to decide which
    /// rule applies before any payment or sale is touched.
    #[tracing::instrument(skip(self))]
    pub async fn reverse_settlement(
        &self,
        id: SettlementId,
        actor: &UserId,
    ) -> Result<ReversalSummary, SettlementError> {
        self.authorize_reversal(id, actor).await?;
        let start = Instant::now();
        let result = self
            .retry
            .run("reverse_settlement", || self.reversals.reverse(id))
            .await;
        record_duration("reverse_settlement", start);
        result
    }

    #[tracing::instrument(skip(self))]
    pub async fn preview_reversal(
        &self,
        id: SettlementId,
        actor: &UserId,
    ) -> Result<ReversalSummary, SettlementError> {
        self.authorize_reversal(id, actor).await?;
        self.reversals.preview(id).await
    }

    pub async fn custody_held_by(&self, holder: &UserId) -> Result<CustodySummary, SettlementError> {
        self.view.custody_held_by(holder).await
    }

    /// Settlements newest first. Only the owner sees Final settlements:
    /// asking for them is denied to anyone else, and an unfiltered listing
    /// narrows to Interim.
    pub async fn settlement_history(
        &self,
        mut query: SettlementQuery,
        actor: &UserId,
    ) -> Result<Vec<Settlement>, SettlementError> {
        match query.kind {
            Some(SettlementKind::Final) => {
                self.policy.authorize(actor, Action::ViewFinalHistory)?;
            }
            None if !self.policy.is_allowed(actor, &Action::ViewFinalHistory) => {
                query.kind = Some(SettlementKind::Interim);
            }
            _ => {}
        }
        self.view.settlements(query).await
    }

    pub async fn settlement(&self, id: SettlementId) -> Result<Settlement, SettlementError> {
        self.view
            .settlement(id)
            .await?
            .ok_or(SettlementError::NotFound(id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn register_sale(&self, sale: NewSale, seller: &UserId) -> Result<Sale, IntakeError> {
        self.policy.authorize(seller, Action::RecordPayment)?;
        self.retry
            .run("register_sale", || self.intake.register_sale(sale.clone(), seller))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_payment(
        &self,
        sale_id: SaleId,
        amount: Money,
        method: PaymentMethod,
        collector: &UserId,
    ) -> Result<Payment, IntakeError> {
        self.policy.authorize(collector, Action::RecordPayment)?;
        self.retry
            .run("record_payment", || {
                self.intake.record_payment(sale_id, amount, method, collector)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_account_payment(
        &self,
        client: &ClientRef,
        amount: Money,
        method: PaymentMethod,
        collector: &UserId,
    ) -> Result<Vec<Payment>, IntakeError> {
        self.policy.authorize(collector, Action::RecordPayment)?;
        self.retry
            .run("record_account_payment", || {
                self.intake
                    .record_account_payment(client, amount, method, collector)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn adjust_payment(
        &self,
        payment_id: PaymentId,
        amount: Money,
        method: PaymentMethod,
        actor: &UserId,
    ) -> Result<Payment, IntakeError> {
        self.policy.authorize(actor, Action::EditPayment)?;
        self.retry
            .run("adjust_payment", || {
                self.intake.adjust_payment(payment_id, amount, method, actor)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_payment(
        &self,
        payment_id: PaymentId,
        actor: &UserId,
    ) -> Result<(), IntakeError> {
        self.policy.authorize(actor, Action::EditPayment)?;
        self.retry
            .run("remove_payment", || self.intake.remove_payment(payment_id, actor))
            .await
    }

    async fn authorize_reversal(
        &self,
        id: SettlementId,
        actor: &UserId,
    ) -> Result<(), SettlementError> {
        let settlement = self.settlement(id).await?;
        let action = match settlement.kind {
            SettlementKind::Interim => Action::ReverseInterim {
                performed_by: settlement.performed_by,
            },
            SettlementKind::Final => Action::ReverseFinal,
        };
        self.policy.authorize(actor, action)?;
        Ok(())
    }
}

fn record_duration(operation: &'static str, start: Instant) {
    metrics::histogram!("settlement_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}
