use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use common::{ClientRef, ItemRef, Money, PaymentId, SaleId, SettlementId, UserId};
use serde::{Deserialize, Serialize};

/// Version number of a stored record, used for optimistic concurrency control.
///
/// A record that does not exist is at version 0. The first write puts it at
/// version 1 and every later write increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of a record that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version of a record after its first write.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A record as read from the store, together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub record: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn new(record: T, version: Version) -> Self {
        Self { record, version }
    }
}

/// Who is answerable for a payment's cash right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyState {
    /// Still in the hands of whoever collected it.
    Pending,
    /// Handed to the supervisor by an Interim settlement.
    HandedToSupervisor,
    /// Delivered to the owner by a Final settlement.
    SettledFinal,
}

impl CustodyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustodyState::Pending => "pending",
            CustodyState::HandedToSupervisor => "handed_to_supervisor",
            CustodyState::SettledFinal => "settled_final",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CustodyState::Pending)
    }
}

impl std::fmt::Display for CustodyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CustodyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CustodyState::Pending),
            "handed_to_supervisor" => Ok(CustodyState::HandedToSupervisor),
            "settled_final" => Ok(CustodyState::SettledFinal),
            other => Err(format!("unknown custody state '{other}'")),
        }
    }
}

/// How the money of a payment was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "transfer" => Ok(PaymentMethod::Transfer),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Interim,
    Final,
}

impl SettlementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::Interim => "interim",
            SettlementKind::Final => "final",
        }
    }
}

impl std::fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SettlementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interim" => Ok(SettlementKind::Interim),
            "final" => Ok(SettlementKind::Final),
            other => Err(format!("unknown settlement kind '{other}'")),
        }
    }
}

/// An installment sale and its outstanding balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub client: ClientRef,
    pub item: ItemRef,
    pub agreed_price: Money,
    pub balance: Money,
    pub seller: UserId,
    pub commission_paid: bool,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    /// Creates a sale with nothing paid yet.
    pub fn new(client: ClientRef, item: ItemRef, agreed_price: Money, seller: UserId) -> Self {
        Self {
            id: SaleId::new(),
            client,
            item,
            agreed_price,
            balance: agreed_price,
            seller,
            commission_paid: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_paid_off(&self) -> bool {
        !self.balance.is_positive()
    }

    /// A sale earns its seller a commission once, when it is paid off.
    pub fn qualifies_for_commission(&self) -> bool {
        self.is_paid_off() && !self.commission_paid
    }
}

/// A partial payment collected against a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub sale_id: SaleId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub collected_by: UserId,
    pub custody_holder: UserId,
    pub custody_state: CustodyState,
    pub settlement_ref: Option<SettlementId>,
    pub collected_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a payment held by the user who collected it.
    pub fn new_pending(
        sale_id: SaleId,
        amount: Money,
        method: PaymentMethod,
        collector: UserId,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            sale_id,
            amount,
            method,
            custody_holder: collector.clone(),
            collected_by: collector,
            custody_state: CustodyState::Pending,
            settlement_ref: None,
            collected_at: Utc::now(),
        }
    }

    /// Moves the payment into `state` under `settlement`.
    pub fn hand_over(&mut self, state: CustodyState, settlement: SettlementId) {
        self.custody_state = state;
        self.settlement_ref = Some(settlement);
    }

    /// Moves the payment back to `state`, detached from any settlement.
    pub fn restore(&mut self, state: CustodyState) {
        self.custody_state = state;
        self.settlement_ref = None;
    }
}

/// A cash handoff. Immutable once created; removed only by reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub kind: SettlementKind,
    pub performed_by: UserId,
    pub received_by: UserId,
    pub total_amount: Money,
    pub included_payment_ids: BTreeSet<PaymentId>,
    pub commission_total: Money,
    pub commission_by_payee: BTreeMap<UserId, Money>,
    /// Sales whose `commission_paid` flag this settlement set.
    pub sales_marked_paid: BTreeSet<SaleId>,
    pub created_at: DateTime<Utc>,
}

/// Identifies a stored record across the three tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    Sale(SaleId),
    Payment(PaymentId),
    Settlement(SettlementId),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Sale(id) => write!(f, "sale {id}"),
            RecordKey::Payment(id) => write!(f, "payment {id}"),
            RecordKey::Settlement(id) => write!(f, "settlement {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale_with_balance(cents: i64) -> Sale {
        let mut sale = Sale::new(
            ClientRef::new("client-1"),
            ItemRef::new("item-1"),
            Money::from_cents(10_000),
            UserId::new("ana"),
        );
        sale.balance = Money::from_cents(cents);
        sale
    }

    #[test]
    fn version_sequence() {
        let v = Version::initial();
        assert_eq!(v.as_i64(), 0);
        assert_eq!(v.next(), Version::first());
        assert_eq!(Version::first().next().as_i64(), 2);
    }

    #[test]
    fn zero_balance_qualifies_for_commission() {
        assert!(sale_with_balance(0).qualifies_for_commission());
        assert!(!sale_with_balance(1).qualifies_for_commission());
    }

    #[test]
    fn commissioned_sale_never_qualifies_again() {
        let mut sale = sale_with_balance(0);
        sale.commission_paid = true;
        assert!(!sale.qualifies_for_commission());
    }

    #[test]
    fn new_payment_is_pending_with_collector_as_holder() {
        let payment = Payment::new_pending(
            SaleId::new(),
            Money::from_cents(500),
            PaymentMethod::Cash,
            UserId::new("ana"),
        );
        assert_eq!(payment.custody_state, CustodyState::Pending);
        assert_eq!(payment.custody_holder, payment.collected_by);
        assert!(payment.settlement_ref.is_none());
    }

    #[test]
    fn custody_state_parses_its_own_names() {
        for state in [
            CustodyState::Pending,
            CustodyState::HandedToSupervisor,
            CustodyState::SettledFinal,
        ] {
            assert_eq!(state.as_str().parse::<CustodyState>().unwrap(), state);
        }
        assert!("lost".parse::<CustodyState>().is_err());
    }

    #[test]
    fn enums_serialize_snake_case() {
        let json = serde_json::to_string(&CustodyState::HandedToSupervisor).unwrap();
        assert_eq!(json, "\"handed_to_supervisor\"");
        let kind: SettlementKind = serde_json::from_str("\"final\"").unwrap();
        assert_eq!(kind, SettlementKind::Final);
    }
}
