use std::collections::BTreeSet;

use common::{PaymentId, SettlementId};

use crate::{
    CustodyState, LedgerStoreError, Payment, RecordKey, Result, Sale, Settlement, Version,
    Versioned,
};

/// A single write (or read guard) inside a [`ChangeSet`].
///
/// `expected` is the version the record must be at when the change set is
/// committed. `Version::initial()` means the record must not exist yet.
#[derive(Debug, Clone)]
pub enum Change {
    /// The record must still be at `expected`; nothing is written.
    Guard { key: RecordKey, expected: Version },
    PutSale { sale: Sale, expected: Version },
    PutPayment { payment: Payment, expected: Version },
    DeletePayment { id: PaymentId, expected: Version },
    PutSettlement {
        settlement: Settlement,
        expected: Version,
    },
    DeleteSettlement { id: SettlementId, expected: Version },
}

impl Change {
    /// The record this change applies to.
    pub fn key(&self) -> RecordKey {
        match self {
            Change::Guard { key, .. } => *key,
            Change::PutSale { sale, .. } => RecordKey::Sale(sale.id),
            Change::PutPayment { payment, .. } => RecordKey::Payment(payment.id),
            Change::DeletePayment { id, .. } => RecordKey::Payment(*id),
            Change::PutSettlement { settlement, .. } => RecordKey::Settlement(settlement.id),
            Change::DeleteSettlement { id, .. } => RecordKey::Settlement(*id),
        }
    }

    /// The version the record must be at for the change to apply.
    pub fn expected(&self) -> Version {
        match self {
            Change::Guard { expected, .. }
            | Change::PutSale { expected, .. }
            | Change::PutPayment { expected, .. }
            | Change::DeletePayment { expected, .. }
            | Change::PutSettlement { expected, .. }
            | Change::DeleteSettlement { expected, .. } => *expected,
        }
    }
}

/// An all-or-nothing batch of changes against the ledger.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a record that was read but is not written to be unchanged at
    /// commit time.
    pub fn guard(&mut self, key: RecordKey, expected: Version) -> &mut Self {
        self.changes.push(Change::Guard { key, expected });
        self
    }

    /// Guards a sale that was read at `versioned.version`.
    pub fn guard_sale(&mut self, versioned: &Versioned<Sale>) -> &mut Self {
        self.guard(RecordKey::Sale(versioned.record.id), versioned.version)
    }

    pub fn put_sale(&mut self, sale: Sale, expected: Version) -> &mut Self {
        self.changes.push(Change::PutSale { sale, expected });
        self
    }

    pub fn insert_sale(&mut self, sale: Sale) -> &mut Self {
        self.put_sale(sale, Version::initial())
    }

    pub fn put_payment(&mut self, payment: Payment, expected: Version) -> &mut Self {
        self.changes.push(Change::PutPayment { payment, expected });
        self
    }

    pub fn insert_payment(&mut self, payment: Payment) -> &mut Self {
        self.put_payment(payment, Version::initial())
    }

    pub fn delete_payment(&mut self, id: PaymentId, expected: Version) -> &mut Self {
        self.changes.push(Change::DeletePayment { id, expected });
        self
    }

    pub fn insert_settlement(&mut self, settlement: Settlement) -> &mut Self {
        self.changes.push(Change::PutSettlement {
            settlement,
            expected: Version::initial(),
        });
        self
    }

    pub fn delete_settlement(&mut self, id: SettlementId, expected: Version) -> &mut Self {
        self.changes.push(Change::DeleteSettlement { id, expected });
        self
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Rejects change sets that no store should attempt to apply.
    ///
    /// Each record may appear at most once and settlements cannot be
    /// rewritten in place. A pending payment never points at a settlement; a
    /// finally settled one always does.
    pub fn validate(&self) -> Result<()> {
        if self.changes.is_empty() {
            return Err(LedgerStoreError::InvalidChangeSet(
                "Cannot commit an empty change set".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for change in &self.changes {
            let key = change.key();
            if !seen.insert(key) {
                return Err(LedgerStoreError::InvalidChangeSet(format!(
                    "{key} appears more than once"
                )));
            }

            match change {
                Change::PutPayment { payment, .. }
                    if payment.custody_state.is_pending() && payment.settlement_ref.is_some() =>
                {
                    return Err(LedgerStoreError::InvalidChangeSet(format!(
                        "pending payment {} cannot reference a settlement",
                        payment.id
                    )));
                }
                Change::PutPayment { payment, .. }
                    if payment.custody_state == CustodyState::SettledFinal
                        && payment.settlement_ref.is_none() =>
                {
                    return Err(LedgerStoreError::InvalidChangeSet(format!(
                        "settled payment {} must reference its settlement",
                        payment.id
                    )));
                }
                Change::PutSettlement { expected, .. } if *expected != Version::initial() => {
                    return Err(LedgerStoreError::InvalidChangeSet(format!(
                        "{key} is immutable once created"
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, SaleId, UserId};

    use super::*;
    use crate::PaymentMethod;

    fn payment() -> Payment {
        Payment::new_pending(
            SaleId::new(),
            Money::from_cents(100),
            PaymentMethod::Cash,
            UserId::new("ana"),
        )
    }

    #[test]
    fn empty_change_set_is_rejected() {
        assert!(matches!(
            ChangeSet::new().validate(),
            Err(LedgerStoreError::InvalidChangeSet(_))
        ));
    }

    #[test]
    fn duplicate_record_is_rejected() {
        let p = payment();
        let mut changes = ChangeSet::new();
        changes
            .guard(RecordKey::Payment(p.id), Version::first())
            .put_payment(p, Version::first());
        assert!(changes.validate().is_err());
    }

    #[test]
    fn pending_payment_with_ref_is_rejected() {
        let mut p = payment();
        p.settlement_ref = Some(SettlementId::new());
        let mut changes = ChangeSet::new();
        changes.put_payment(p, Version::first());
        assert!(changes.validate().is_err());
    }

    #[test]
    fn builder_keeps_order_and_versions() {
        let p = payment();
        let id = p.id;
        let mut changes = ChangeSet::new();
        changes
            .insert_payment(p)
            .delete_settlement(SettlementId::new(), Version::new(3));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.changes()[0].key(), RecordKey::Payment(id));
        assert_eq!(changes.changes()[0].expected(), Version::initial());
        assert_eq!(changes.changes()[1].expected(), Version::new(3));
        assert!(changes.validate().is_ok());
    }
}
