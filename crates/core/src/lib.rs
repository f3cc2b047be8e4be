//! Balance ledger core for Tally.
//!
//! This crate contains the ledger logic with ZERO storage dependencies.
//! Stores are reached through the traits in [`ledger::store`],
//! [`ledger::balance`] and [`ledger::references`]; `tally-db` provides the
//! concrete implementations.
//!
//! # Modules
//!
//! - `ledger` - Transaction records, balance state, recalculation and the
//!   per-user consistency coordinator

pub mod ledger;
