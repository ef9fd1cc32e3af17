//! Transactional record store for the custody ledger.
//!
//! Every read returns the record together with its [`Version`]. Every write
//! goes through a [`ChangeSet`] that names the version each touched record is
//! expected to be at; the store applies the whole set atomically or rejects it
//! with [`LedgerStoreError::ConcurrencyConflict`].

pub mod change;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use change::{Change, ChangeSet};
pub use error::{LedgerStoreError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{PaymentQuery, SaleQuery, SettlementQuery};
pub use record::{
    CustodyState, Payment, PaymentMethod, RecordKey, Sale, Settlement, SettlementKind, Version,
    Versioned,
};
pub use store::{LedgerStore, LedgerStoreExt};
