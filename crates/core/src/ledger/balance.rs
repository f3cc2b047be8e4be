//! Cached per-user balance state.
//!
//! [`BalanceState`] is a derived projection of the transaction store. It can
//! always be rebuilt as `initial_balance + sum(signed effects)`, so it is
//! never a second source of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::types::{Money, UserId};

use super::error::LedgerError;

/// Cached balance for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceState {
    /// The owner.
    pub user_id: UserId,
    /// Balance before any transaction. Changes only through re-initialization.
    pub initial_balance: Money,
    /// `initial_balance` plus every signed transaction effect.
    pub current_balance: Money,
    /// When the cache was last brought up to date.
    pub last_updated: DateTime<Utc>,
    /// Incremented on every successful recalculation.
    pub version: u64,
    /// Set when a mutation could not settle the cache. A stale state is
    /// rebuilt before it is served.
    pub stale: bool,
}

impl BalanceState {
    /// State for a freshly provisioned account.
    #[must_use]
    pub fn provision(user_id: UserId, initial_balance: Money, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            initial_balance,
            current_balance: initial_balance,
            last_updated: now,
            version: 1,
            stale: false,
        }
    }

    /// Next state after applying `delta` to the cached total.
    #[must_use]
    pub fn advanced_by(&self, delta: Money, now: DateTime<Utc>) -> Self {
        Self {
            current_balance: self.current_balance + delta,
            last_updated: now,
            version: self.version + 1,
            stale: false,
            ..self.clone()
        }
    }

    /// Next state after a full replay produced `total_effect`.
    #[must_use]
    pub fn rebuilt(&self, total_effect: Money, now: DateTime<Utc>) -> Self {
        Self {
            current_balance: self.initial_balance + total_effect,
            last_updated: now,
            version: self.version + 1,
            stale: false,
            ..self.clone()
        }
    }

    /// Same state with a new opening balance. The cache is marked stale
    /// until the next rebuild.
    #[must_use]
    pub fn reinitialized(&self, initial_balance: Money) -> Self {
        Self {
            initial_balance,
            stale: true,
            ..self.clone()
        }
    }

    /// Net effect of all transactions according to the cache.
    #[must_use]
    pub fn cached_effect(&self) -> Money {
        self.current_balance - self.initial_balance
    }
}

/// Persistence of balance states keyed by user.
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Fetches a user's state, if provisioned.
    async fn find(&self, user_id: UserId) -> Result<Option<BalanceState>, LedgerError>;

    /// Stores a new state. Fails with `BalanceAlreadyInitialized` if one exists.
    async fn insert(&self, state: BalanceState) -> Result<BalanceState, LedgerError>;

    /// Overwrites an existing state. Fails with `BalanceNotFound` if none exists.
    async fn save(&self, state: BalanceState) -> Result<BalanceState, LedgerError>;
}
