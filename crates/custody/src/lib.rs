//! Cash custody ledger.
//!
//! Tracks who physically holds collected cash and moves it through a
//! two-stage handoff (salesperson to supervisor, supervisor to owner):
//! - [`SettlementEngine`] performs Interim and Final settlements, awarding
//!   sales commissions at most once per sale
//! - [`ReversalEngine`] undoes a settlement exactly
//! - [`PaymentIntake`] registers sales and the payments collected against them
//! - [`LedgerView`] answers read-only queries
//! - [`CustodyService`] ties them together behind an [`AccessPolicy`] and a
//!   bounded [`RetryPolicy`]

pub mod commission;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod policy;
pub mod retry;
pub mod reversal;
pub mod service;
pub mod view;

pub use commission::{CommissionAward, CommissionSchedule};
pub use config::LedgerConfig;
pub use engine::{SettlementEngine, SettlementPreview};
pub use error::{IntakeError, SettlementError};
pub use intake::{NewSale, PaymentIntake};
pub use policy::{AccessDenied, AccessPolicy, Action, RolePolicy};
pub use retry::{RetryPolicy, Retryable};
pub use reversal::{ReversalEngine, ReversalSummary};
pub use service::CustodyService;
pub use view::{CustodySummary, LedgerView};
