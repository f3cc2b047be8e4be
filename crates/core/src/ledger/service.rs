//! External entry point of the balance ledger.
//!
//! [`LedgerService`] is what the CRUD layer talks to. Every mutation goes
//! through the [`ConsistencyCoordinator`]; every read takes the shared side
//! of the user's scope so it linearizes with the last completed mutation.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::config::AppConfig;
use tally_shared::types::{Money, PageRequest, PageResponse, TransactionId, UserId};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::balance::{BalanceRepository, BalanceState};
use super::balance_ledger::{BalanceLedger, Ledger};
use super::clock::Clock;
use super::coordinator::{ConsistencyCoordinator, ScopeState, StoreWrite};
use super::error::LedgerError;
use super::record::{TransactionDraft, TransactionPatch, TransactionRecord};
use super::recalculation::RecalculationEngine;
use super::references::ReferenceCatalog;
use super::store::{TransactionQuery, TransactionStore};

/// Confirmation of a deleted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    /// The removed transaction.
    pub id: TransactionId,
}

/// Tunables taken from [`AppConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Decimal places for presentation.
    pub display_scale: u32,
    /// Page size used when a query asks for none.
    pub default_page_size: u32,
    /// Largest page a query may request.
    pub max_page_size: u32,
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            display_scale: config.ledger.display_scale,
            default_page_size: config.database.default_page_size,
            max_page_size: config.database.max_page_size,
        }
    }
}

/// The balance ledger's public operations.
pub struct LedgerService {
    coordinator: ConsistencyCoordinator,
    ledger: Arc<dyn BalanceLedger>,
    store: Arc<dyn TransactionStore>,
    settings: ServiceSettings,
}

impl LedgerService {
    /// Wires the ledger over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn TransactionStore>,
        balances: Arc<dyn BalanceRepository>,
        catalog: Arc<dyn ReferenceCatalog>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let engine = RecalculationEngine::new(
            config.ledger.verify_mutations,
            config.database.max_page_size,
        );
        let ledger: Arc<dyn BalanceLedger> = Arc::new(Ledger::new(
            store.clone(),
            balances,
            engine,
            clock.clone(),
        ));
        let coordinator = ConsistencyCoordinator::new(
            store.clone(),
            ledger.clone(),
            catalog,
            clock,
            config.ledger.read_wait_timeout(),
        );

        Self {
            coordinator,
            ledger,
            store,
            settings: ServiceSettings::from(config),
        }
    }

    /// Settings in effect.
    #[must_use]
    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Records a new transaction and settles the balance.
    ///
    /// # Errors
    ///
    /// Validation errors, `BalanceNotFound`, or `CorruptedStorage`.
    #[instrument(skip(self, draft), fields(user_id = %draft.user_id))]
    pub async fn create_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<TransactionRecord, LedgerError> {
        let user_id = draft.user_id;
        let receipt = self
            .coordinator
            .mutate(user_id, StoreWrite::Create(draft))
            .await?;
        Ok(receipt.record)
    }

    /// Changes an existing transaction and settles the balance.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound` if the id is unknown for this user, otherwise as
    /// [`Self::create_transaction`].
    #[instrument(skip(self, patch))]
    pub async fn update_transaction(
        &self,
        id: TransactionId,
        user_id: UserId,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord, LedgerError> {
        let receipt = self
            .coordinator
            .mutate(user_id, StoreWrite::Update { id, patch })
            .await?;
        Ok(receipt.record)
    }

    /// Removes a transaction and settles the balance.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound` if the id is unknown for this user.
    #[instrument(skip(self))]
    pub async fn delete_transaction(
        &self,
        id: TransactionId,
        user_id: UserId,
    ) -> Result<Deleted, LedgerError> {
        let receipt = self
            .coordinator
            .mutate(user_id, StoreWrite::Delete { id })
            .await?;
        Ok(Deleted {
            id: receipt.record.id,
        })
    }

    /// Provisions a user's balance.
    ///
    /// # Errors
    ///
    /// `BalanceAlreadyInitialized` if the user already has one.
    pub async fn initialize_balance(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError> {
        self.coordinator.initialize(user_id, initial_balance).await
    }

    /// Replaces a user's opening balance, keeping the transaction history.
    ///
    /// # Errors
    ///
    /// `BalanceNotFound` if the user has no balance.
    pub async fn reinitialize_balance(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError> {
        self.coordinator.reinitialize(user_id, initial_balance).await
    }

    /// Rebuilds the cached balance from a full replay.
    ///
    /// # Errors
    ///
    /// `BalanceNotFound`, or `CorruptedStorage` if the store's aggregate and
    /// its records disagree.
    pub async fn force_recalculate(&self, user_id: UserId) -> Result<BalanceState, LedgerError> {
        let state = self.coordinator.recalculate(user_id).await?;
        info!(
            user_id = %user_id,
            balance = %state.current_balance,
            version = state.version,
            "Forced recalculation finished"
        );
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The user's balance including every transaction.
    ///
    /// # Errors
    ///
    /// `BalanceNotFound`, or `ReadCancelled` if a mutation held the scope
    /// longer than the read wait timeout.
    pub async fn current_balance(&self, user_id: UserId) -> Result<Money, LedgerError> {
        let _read = self.coordinator.shared(user_id, None).await?;
        self.ledger.current_balance(user_id).await
    }

    /// As [`Self::current_balance`], giving up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// `ReadCancelled` if the wait was abandoned.
    pub async fn current_balance_cancellable(
        &self,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<Money, LedgerError> {
        let _read = self.coordinator.shared(user_id, Some(cancel)).await?;
        self.ledger.current_balance(user_id).await
    }

    /// Current balance rounded for presentation.
    ///
    /// # Errors
    ///
    /// As [`Self::current_balance`].
    pub async fn current_balance_for_display(&self, user_id: UserId) -> Result<Money, LedgerError> {
        let balance = self.current_balance(user_id).await?;
        Ok(Money::new(
            balance.round_for_display(self.settings.display_scale),
        ))
    }

    /// Balance including every transaction dated at or before `at`.
    ///
    /// # Errors
    ///
    /// `BalanceNotFound` or `ReadCancelled`.
    pub async fn balance_at(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Money, LedgerError> {
        let _read = self.coordinator.shared(user_id, None).await?;
        self.ledger.balance_at(user_id, at).await
    }

    /// Balance at the end of calendar day `day`.
    ///
    /// # Errors
    ///
    /// `BalanceNotFound` or `ReadCancelled`.
    pub async fn balance_on(&self, user_id: UserId, day: NaiveDate) -> Result<Money, LedgerError> {
        let _read = self.coordinator.shared(user_id, None).await?;
        self.ledger.balance_on(user_id, day).await
    }

    /// The user's cached balance state.
    ///
    /// # Errors
    ///
    /// `BalanceNotFound` or `ReadCancelled`.
    pub async fn balance_state(&self, user_id: UserId) -> Result<BalanceState, LedgerError> {
        let _read = self.coordinator.shared(user_id, None).await?;
        self.ledger.state(user_id).await
    }

    /// Fetches one transaction.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound` if the id is unknown for this user.
    pub async fn get_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        let _read = self.coordinator.shared(user_id, None).await?;
        self.store.get(user_id, id).await
    }

    /// Lists a user's transactions.
    ///
    /// The requested page size is capped at the configured maximum.
    ///
    /// # Errors
    ///
    /// `ReadCancelled` or the store's error.
    pub async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<PageResponse<TransactionRecord>, LedgerError> {
        let page = if query.page.per_page == 0 {
            PageRequest::new(query.page.page, self.settings.default_page_size)
        } else {
            query.page
        };
        let query = query.with_page(page.clamped(self.settings.max_page_size));

        let _read = self.coordinator.shared(query.user_id, None).await?;
        self.store.query(&query).await
    }

    /// Observable state of the user's scope.
    #[must_use]
    pub fn scope_state(&self, user_id: UserId) -> ScopeState {
        self.coordinator.state(user_id)
    }
}
