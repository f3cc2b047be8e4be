//! Per-user balance ledger.
//!
//! This module implements the balance ledger:
//! - Transaction records and their validation
//! - The ordered transaction store contract
//! - Cached balance state and its repository contract
//! - Incremental and full recalculation
//! - Per-user serialization of mutations and reads
//! - The service facade used by the CRUD layer

pub mod balance;
pub mod balance_ledger;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod recalculation;
pub mod record;
pub mod references;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(test)]
mod service_props;
#[cfg(test)]
pub(crate) mod testing;

pub use balance::{BalanceRepository, BalanceState};
pub use balance_ledger::{BalanceLedger, Ledger};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{ConsistencyCoordinator, MutationReceipt, ScopeState, StoreWrite};
pub use error::LedgerError;
pub use recalculation::{
    MutationEffect, MutationKind, RecalcHint, RecalcOutcome, RecalcPath, RecalculationEngine,
};
pub use record::{
    Direction, OrderingKey, TransactionDraft, TransactionPatch, TransactionRecord, ValidTransaction,
};
pub use references::ReferenceCatalog;
pub use service::{Deleted, LedgerService, ServiceSettings};
pub use store::{DateWindow, RecordPager, Replaced, SortOrder, TransactionQuery, TransactionStore};
pub use validation::{check_draft, validate_draft};
