//! Balance state repository.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tally_core::ledger::{BalanceRepository, BalanceState, LedgerError};
use tally_shared::types::UserId;
use tracing::debug;

use crate::connection::Connection;

/// Balance state repository keyed by user.
#[derive(Debug)]
pub struct BalanceStateRepository {
    conn: Connection,
    states: DashMap<UserId, BalanceState>,
}

impl BalanceStateRepository {
    /// Creates a new balance state repository.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            states: DashMap::new(),
        }
    }

    /// Overwrites a stored state without any checks.
    ///
    /// Meant for repair tooling and tests that simulate a drifted cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn overwrite(&self, state: BalanceState) -> Result<(), LedgerError> {
        self.conn.ensure_open()?;
        self.states.insert(state.user_id, state);
        Ok(())
    }
}

#[async_trait]
impl BalanceRepository for BalanceStateRepository {
    async fn find(&self, user_id: UserId) -> Result<Option<BalanceState>, LedgerError> {
        self.conn.ensure_open()?;
        Ok(self.states.get(&user_id).map(|state| state.clone()))
    }

    async fn insert(&self, state: BalanceState) -> Result<BalanceState, LedgerError> {
        self.conn.ensure_open()?;
        match self.states.entry(state.user_id) {
            Entry::Occupied(_) => Err(LedgerError::BalanceAlreadyInitialized(state.user_id)),
            Entry::Vacant(slot) => {
                slot.insert(state.clone());
                debug!(user_id = %state.user_id, "Balance state inserted");
                Ok(state)
            }
        }
    }

    async fn save(&self, state: BalanceState) -> Result<BalanceState, LedgerError> {
        self.conn.ensure_open()?;
        match self.states.get_mut(&state.user_id) {
            Some(mut slot) => {
                *slot = state.clone();
                Ok(state)
            }
            None => Err(LedgerError::BalanceNotFound(state.user_id)),
        }
    }
}
