//! Storage layer for the Tally ledger.
//!
//! This crate provides:
//! - In-process implementations of the ledger's store traits
//! - The [`Database`] handle with explicit `connect` / `close`

pub mod connection;
pub mod repositories;

pub use connection::{Connection, Database, DbError, connect};
pub use repositories::{BalanceStateRepository, ReferenceRepository, TransactionRepository};
