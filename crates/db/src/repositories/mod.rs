//! Repository implementations of the ledger's storage traits.
//!
//! Repositories share one [`crate::Connection`] and fail once it is closed.

pub mod balance;
pub mod reference;
pub mod transaction;

pub use balance::BalanceStateRepository;
pub use reference::ReferenceRepository;
pub use transaction::TransactionRepository;
