//! Per-user serialization of ledger mutations.
//!
//! Every mutation of a user's transactions runs inside that user's exclusive
//! scope: the store write and the balance update either both commit or both
//! roll back before the scope is released. Reads take the shared side of the
//! same lock, so they never observe a store write without its balance
//! update. Scopes of different users are independent.
//!
//! Per-user state machine:
//!
//! ```text
//! Idle -> Mutating -> Idle
//! Idle -> Mutating -> Repairing -> Idle
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tally_shared::types::{Money, TransactionId, UserId};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::balance::BalanceState;
use super::balance_ledger::BalanceLedger;
use super::clock::Clock;
use super::error::LedgerError;
use super::record::{TransactionDraft, TransactionPatch, TransactionRecord, ValidTransaction};
use super::recalculation::{MutationEffect, RecalcPath};
use super::references::ReferenceCatalog;
use super::store::TransactionStore;
use super::validation::validate_draft;

/// Observable state of a user's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ScopeState {
    /// No mutation in flight.
    Idle = 0,
    /// A mutation holds the exclusive scope.
    Mutating = 1,
    /// A mutation failed its replay check and is rebuilding the balance.
    Repairing = 2,
}

impl ScopeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Mutating,
            2 => Self::Repairing,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
struct UserScope {
    lock: Arc<RwLock<()>>,
    state: AtomicU8,
}

impl UserScope {
    fn new() -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            state: AtomicU8::new(ScopeState::Idle as u8),
        }
    }

    fn set(&self, state: ScopeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ScopeState {
        ScopeState::from_u8(self.state.load(Ordering::Acquire))
    }
}

type ScopeMap = DashMap<UserId, Arc<UserScope>>;

/// Evicts a user's scope entry once nothing outside the map holds it.
///
/// Declared after the `Arc<UserScope>` it guards so that it drops last.
#[derive(Debug)]
struct Eviction {
    scopes: Arc<ScopeMap>,
    user_id: UserId,
}

impl Drop for Eviction {
    fn drop(&mut self) {
        // Holders clone the entry under the shard lock, so a count of one
        // means no task can still reach this scope.
        self.scopes
            .remove_if(&self.user_id, |_, scope| Arc::strong_count(scope) == 1);
    }
}

/// Exclusive hold on a user's scope. Returns the scope to `Idle` on drop.
#[derive(Debug)]
pub struct MutationScope {
    scope: Arc<UserScope>,
    _guard: OwnedRwLockWriteGuard<()>,
    _eviction: Eviction,
}

impl MutationScope {
    fn enter(&self, state: ScopeState) {
        self.scope.set(state);
    }
}

impl Drop for MutationScope {
    fn drop(&mut self) {
        self.scope.set(ScopeState::Idle);
    }
}

/// Shared hold on a user's scope.
#[derive(Debug)]
pub struct ReadScope {
    _scope: Arc<UserScope>,
    _guard: OwnedRwLockReadGuard<()>,
    _eviction: Eviction,
}

/// A mutation request for one user's transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    /// Append a new transaction.
    Create(TransactionDraft),
    /// Patch an existing transaction.
    Update {
        /// Target record.
        id: TransactionId,
        /// Field changes.
        patch: TransactionPatch,
    },
    /// Remove a transaction.
    Delete {
        /// Target record.
        id: TransactionId,
    },
}

/// What a committed mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReceipt {
    /// The record after the write. For a delete, the removed record.
    pub record: TransactionRecord,
    /// The record before the write, for updates.
    pub previous: Option<TransactionRecord>,
    /// The settled balance state.
    pub balance: BalanceState,
    /// How the balance was settled.
    pub path: RecalcPath,
    /// True if the replay check failed and the balance was rebuilt.
    pub repaired: bool,
}

/// Store write that has been applied but whose balance is not yet settled.
enum Applied {
    Created(TransactionRecord),
    Updated {
        previous: TransactionRecord,
        current: TransactionRecord,
    },
    Deleted(TransactionRecord),
}

impl Applied {
    fn effect(&self) -> MutationEffect {
        match self {
            Self::Created(record) => MutationEffect::created(record),
            Self::Updated { previous, current } => MutationEffect::updated(previous, current),
            Self::Deleted(record) => MutationEffect::deleted(record),
        }
    }

    fn id(&self) -> TransactionId {
        match self {
            Self::Created(record) | Self::Deleted(record) => record.id,
            Self::Updated { current, .. } => current.id,
        }
    }
}

/// Serializes mutations per user and keeps store and balance in lockstep.
pub struct ConsistencyCoordinator {
    scopes: Arc<ScopeMap>,
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn BalanceLedger>,
    catalog: Arc<dyn ReferenceCatalog>,
    clock: Arc<dyn Clock>,
    read_wait_timeout: Duration,
}

impl ConsistencyCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn BalanceLedger>,
        catalog: Arc<dyn ReferenceCatalog>,
        clock: Arc<dyn Clock>,
        read_wait_timeout: Duration,
    ) -> Self {
        Self {
            scopes: Arc::new(DashMap::new()),
            store,
            ledger,
            catalog,
            clock,
            read_wait_timeout,
        }
    }

    /// Entry for `user_id`, created on demand. Bind the eviction before the
    /// scope so the scope is released first.
    fn scope(&self, user_id: UserId) -> (Eviction, Arc<UserScope>) {
        let eviction = Eviction {
            scopes: Arc::clone(&self.scopes),
            user_id,
        };
        let scope = self
            .scopes
            .entry(user_id)
            .or_insert_with(|| Arc::new(UserScope::new()))
            .clone();
        (eviction, scope)
    }

    /// Number of users with a live scope entry.
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.scopes.len()
    }

    /// Current state of a user's scope.
    #[must_use]
    pub fn state(&self, user_id: UserId) -> ScopeState {
        self.scopes
            .get(&user_id)
            .map_or(ScopeState::Idle, |scope| scope.get())
    }

    /// Waits for the user's exclusive scope.
    pub async fn exclusive(&self, user_id: UserId) -> MutationScope {
        let (eviction, scope) = self.scope(user_id);
        let guard = scope.lock.clone().write_owned().await;
        scope.set(ScopeState::Mutating);
        MutationScope {
            scope,
            _guard: guard,
            _eviction: eviction,
        }
    }

    /// Waits for the user's shared scope.
    ///
    /// Gives up with `ReadCancelled` when `cancel` fires or the configured
    /// wait timeout elapses. Abandoning the wait never affects the mutation
    /// being waited on.
    pub async fn shared(
        &self,
        user_id: UserId,
        cancel: Option<&CancellationToken>,
    ) -> Result<ReadScope, LedgerError> {
        let (eviction, scope) = self.scope(user_id);
        let acquire =
            tokio::time::timeout(self.read_wait_timeout, scope.lock.clone().read_owned());

        let acquired = match cancel {
            Some(token) => tokio::select! {
                biased;
                result = acquire => result.ok(),
                () = token.cancelled() => None,
            },
            None => acquire.await.ok(),
        };

        match acquired {
            Some(guard) => Ok(ReadScope {
                _scope: scope,
                _guard: guard,
                _eviction: eviction,
            }),
            None => {
                drop(scope);
                debug!(user_id = %user_id, "Read gave up waiting for in-flight mutation");
                Err(LedgerError::ReadCancelled(user_id))
            }
        }
    }

    /// Runs `write` for `user_id` and settles the balance.
    ///
    /// On any failure after the store was touched the store write is undone
    /// before the scope is released.
    ///
    /// # Errors
    ///
    /// Returns validation and lookup errors unchanged. A failed replay check
    /// is repaired internally; only `CorruptedStorage` from the repair is
    /// surfaced.
    pub async fn mutate(
        &self,
        user_id: UserId,
        write: StoreWrite,
    ) -> Result<MutationReceipt, LedgerError> {
        let scope = self.exclusive(user_id).await;

        // Rejects unprovisioned users and heals a stale cache before the write.
        self.ledger.state(user_id).await?;
        let applied = self.apply_write(user_id, write).await?;
        let effect = applied.effect();

        match self.settle(&scope, &effect).await {
            Ok((balance, path, repaired)) => {
                info!(
                    user_id = %user_id,
                    transaction_id = %applied.id(),
                    kind = ?effect.kind,
                    delta = %effect.delta,
                    balance = %balance.current_balance,
                    path = ?path,
                    "Ledger mutation committed"
                );
                Ok(receipt(applied, balance, path, repaired))
            }
            Err(err) => {
                scope.enter(ScopeState::Repairing);
                self.roll_back(user_id, applied).await;
                Err(err)
            }
        }
    }

    /// Rebuilds the user's balance under the exclusive scope.
    ///
    /// # Errors
    ///
    /// Returns `BalanceNotFound` or `CorruptedStorage`.
    pub async fn recalculate(&self, user_id: UserId) -> Result<BalanceState, LedgerError> {
        let scope = self.exclusive(user_id).await;
        scope.enter(ScopeState::Repairing);
        self.ledger.recalculate_full(user_id).await
    }

    /// Provisions the user's balance under the exclusive scope.
    ///
    /// # Errors
    ///
    /// Returns `BalanceAlreadyInitialized` if the user already has one.
    pub async fn initialize(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError> {
        let _scope = self.exclusive(user_id).await;
        self.ledger.initialize(user_id, initial_balance).await
    }

    /// Replaces the opening balance under the exclusive scope.
    ///
    /// # Errors
    ///
    /// Returns `BalanceNotFound` if the user has no balance.
    pub async fn reinitialize(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError> {
        let _scope = self.exclusive(user_id).await;
        self.ledger.reinitialize(user_id, initial_balance).await
    }

    async fn apply_write(
        &self,
        user_id: UserId,
        write: StoreWrite,
    ) -> Result<Applied, LedgerError> {
        let now = self.clock.now();
        match write {
            StoreWrite::Create(draft) => {
                if draft.user_id != user_id {
                    return Err(LedgerError::Internal(format!(
                        "draft owner {} does not match scope owner {user_id}",
                        draft.user_id
                    )));
                }
                let valid = draft.validate(now, self.catalog.as_ref()).await?;
                let record = self.store.append(valid, now).await?;
                Ok(Applied::Created(record))
            }
            StoreWrite::Update { id, patch } => {
                let existing = self.store.get(user_id, id).await?;
                let valid = validate_draft(patch.apply_to(&existing), now, self.catalog.as_ref())
                    .await?;
                let replaced = self.store.replace(id, valid, now).await?;
                Ok(Applied::Updated {
                    previous: replaced.previous,
                    current: replaced.current,
                })
            }
            StoreWrite::Delete { id } => {
                let removed = self.store.remove(user_id, id).await?;
                Ok(Applied::Deleted(removed))
            }
        }
    }

    async fn settle(
        &self,
        scope: &MutationScope,
        effect: &MutationEffect,
    ) -> Result<(BalanceState, RecalcPath, bool), LedgerError> {
        match self.ledger.apply_mutation(effect).await {
            Ok(outcome) => Ok((outcome.state, outcome.path, false)),
            Err(LedgerError::ConsistencyViolation {
                user_id,
                cached,
                replayed,
            }) => {
                warn!(
                    user_id = %user_id,
                    cached = %cached,
                    replayed = %replayed,
                    "Balance diverged from replay, repairing"
                );
                scope.enter(ScopeState::Repairing);
                let state = self.ledger.recalculate_full(user_id).await?;
                Ok((state, RecalcPath::FullRebuild, true))
            }
            Err(err) => Err(err),
        }
    }

    async fn roll_back(&self, user_id: UserId, applied: Applied) {
        let id = applied.id();
        let undo = match applied {
            Applied::Created(record) => self.store.remove(user_id, record.id).await.map(drop),
            Applied::Updated { previous, .. } => self
                .store
                .replace(
                    previous.id,
                    ValidTransaction::from_record(&previous),
                    previous.updated_at,
                )
                .await
                .map(drop),
            Applied::Deleted(record) => self.store.reinstate(record).await,
        };

        if let Err(err) = undo {
            error!(
                user_id = %user_id,
                transaction_id = %id,
                error = %err,
                "Failed to roll back store write"
            );
        } else {
            warn!(user_id = %user_id, transaction_id = %id, "Rolled back store write");
        }

        // The cache must match whatever the store now holds.
        if let Err(err) = self.ledger.recalculate_full(user_id).await {
            error!(
                user_id = %user_id,
                error = %err,
                "Balance could not be rebuilt after rollback, marking stale"
            );
            if let Err(err) = self.ledger.mark_stale(user_id).await {
                error!(user_id = %user_id, error = %err, "Failed to mark balance stale");
            }
        }
    }
}

fn receipt(
    applied: Applied,
    balance: BalanceState,
    path: RecalcPath,
    repaired: bool,
) -> MutationReceipt {
    let (record, previous) = match applied {
        Applied::Created(record) | Applied::Deleted(record) => (record, None),
        Applied::Updated { previous, current } => (current, Some(previous)),
    };
    MutationReceipt {
        record,
        previous,
        balance,
        path,
        repaired,
    }
}
