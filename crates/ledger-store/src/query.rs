use common::{ClientRef, SaleId, UserId};

use crate::{CustodyState, Payment, Sale, Settlement, SettlementKind};

/// Filter over stored sales. Results are ordered oldest first.
#[derive(Debug, Clone, Default)]
pub struct SaleQuery {
    pub client: Option<ClientRef>,
    /// Only sales with a balance above zero.
    pub outstanding_only: bool,
}

impl SaleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_client(client: ClientRef) -> Self {
        Self {
            client: Some(client),
            ..Default::default()
        }
    }

    pub fn outstanding_only(mut self) -> Self {
        self.outstanding_only = true;
        self
    }

    pub fn matches(&self, sale: &Sale) -> bool {
        if let Some(ref client) = self.client
            && &sale.client != client
        {
            return false;
        }
        !(self.outstanding_only && !sale.balance.is_positive())
    }
}

/// Filter over stored payments. Results are ordered by collection time.
#[derive(Debug, Clone, Default)]
pub struct PaymentQuery {
    pub sale_id: Option<SaleId>,
    pub custody_holder: Option<UserId>,
    pub custody_state: Option<CustodyState>,
}

impl PaymentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_sale(sale_id: SaleId) -> Self {
        Self {
            sale_id: Some(sale_id),
            ..Default::default()
        }
    }

    pub fn in_state(state: CustodyState) -> Self {
        Self {
            custody_state: Some(state),
            ..Default::default()
        }
    }

    pub fn held_by(holder: UserId) -> Self {
        Self {
            custody_holder: Some(holder),
            ..Default::default()
        }
    }

    pub fn holder(mut self, holder: UserId) -> Self {
        self.custody_holder = Some(holder);
        self
    }

    pub fn state(mut self, state: CustodyState) -> Self {
        self.custody_state = Some(state);
        self
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        if let Some(sale_id) = self.sale_id
            && payment.sale_id != sale_id
        {
            return false;
        }
        if let Some(ref holder) = self.custody_holder
            && &payment.custody_holder != holder
        {
            return false;
        }
        if let Some(state) = self.custody_state
            && payment.custody_state != state
        {
            return false;
        }
        true
    }
}

/// Filter over stored settlements. Results are ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct SettlementQuery {
    pub kind: Option<SettlementKind>,
    pub performed_by: Option<UserId>,
    /// Maximum number of settlements to return.
    pub limit: Option<usize>,
    /// Number of settlements to skip.
    pub offset: Option<usize>,
}

impl SettlementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: SettlementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn performed_by(mut self, actor: UserId) -> Self {
        self.performed_by = Some(actor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn matches(&self, settlement: &Settlement) -> bool {
        if let Some(kind) = self.kind
            && settlement.kind != kind
        {
            return false;
        }
        if let Some(ref actor) = self.performed_by
            && &settlement.performed_by != actor
        {
            return false;
        }
        true
    }
}
