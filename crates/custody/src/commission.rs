use std::collections::{BTreeMap, BTreeSet};

use common::{Money, SaleId, UserId};
use ledger_store::Sale;

/// Flat commission credited once per paid-off sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionSchedule {
    per_sale: Money,
}

/// Commissions earned by one batch of sales.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommissionAward {
    pub by_payee: BTreeMap<UserId, Money>,
    pub sales_marked_paid: BTreeSet<SaleId>,
}

impl CommissionAward {
    pub fn total(&self) -> Money {
        self.by_payee.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sales_marked_paid.is_empty()
    }
}

impl CommissionSchedule {
    pub fn new(per_sale: Money) -> Self {
        Self { per_sale }
    }

    /// Credits the seller of every sale that is paid off and not yet
    /// commissioned. Each sale counts once however often it appears.
    pub fn award<'a>(&self, sales: impl IntoIterator<Item = &'a Sale>) -> CommissionAward {
        let mut award = CommissionAward::default();
        for sale in sales {
            if !sale.qualifies_for_commission() || !award.sales_marked_paid.insert(sale.id) {
                continue;
            }
            *award
                .by_payee
                .entry(sale.seller.clone())
                .or_insert_with(Money::zero) += self.per_sale;
        }
        award
    }
}
