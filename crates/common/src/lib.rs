//! Shared types for the custody ledger.
//!
//! Identifiers are opaque newtypes so a sale id can never be passed where a
//! payment id is expected, and every amount is a [`Money`] value held in
//! integer cents.

mod ids;
mod money;

pub use ids::{ClientRef, ItemRef, PaymentId, SaleId, SettlementId, UserId};
pub use money::Money;
