//! Bringing the cached balance back in sync after a mutation.
//!
//! Only the grand total is cached. A change anywhere in the history shifts
//! that total by the same signed delta regardless of its position, so most
//! mutations are settled in O(1) by [`RecalcPath::Incremental`]. Balances at
//! a past date are never cached; they are computed from a window sum over
//! the store every time.
//!
//! When the incremental result disagrees with a replay of the store, the
//! engine reports [`LedgerError::ConsistencyViolation`] and the caller falls
//! back to [`RecalculationEngine::rebuild`]. A rebuild is cross-checked
//! against an independent record-by-record replay; disagreement there means
//! the store itself is corrupted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::types::{Money, PageRequest, UserId};
use tracing::{debug, error};

use super::balance::BalanceState;
use super::error::LedgerError;
use super::record::TransactionRecord;
use super::store::{DateWindow, RecordPager, TransactionQuery, TransactionStore};

/// Kind of store write that produced an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// A record was appended.
    Create,
    /// A record was replaced.
    Update,
    /// A record was removed.
    Delete,
}

/// How the caller wants the effect applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalcHint {
    /// Apply the delta if it is safe to do so.
    Incremental,
    /// Replay the whole history.
    FullRebuild,
}

/// Which path actually settled a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalcPath {
    /// O(1) delta on the cached total.
    Incremental,
    /// O(n) replay of every transaction.
    FullRebuild,
}

/// Balance effect of one store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationEffect {
    /// Kind of write.
    pub kind: MutationKind,
    /// Owner of the mutated record.
    pub user_id: UserId,
    /// Earliest date whose balance the write affects.
    pub anchor: DateTime<Utc>,
    /// New effect minus old effect.
    pub delta: Money,
    /// Requested path.
    pub hint: RecalcHint,
}

impl MutationEffect {
    /// Effect of appending `record`.
    #[must_use]
    pub fn created(record: &TransactionRecord) -> Self {
        Self {
            kind: MutationKind::Create,
            user_id: record.user_id,
            anchor: record.date,
            delta: record.signed_amount(),
            hint: RecalcHint::Incremental,
        }
    }

    /// Effect of replacing `previous` with `current`.
    #[must_use]
    pub fn updated(previous: &TransactionRecord, current: &TransactionRecord) -> Self {
        Self {
            kind: MutationKind::Update,
            user_id: current.user_id,
            anchor: previous.date.min(current.date),
            delta: current.signed_amount() - previous.signed_amount(),
            hint: RecalcHint::Incremental,
        }
    }

    /// Effect of removing `record`.
    #[must_use]
    pub fn deleted(record: &TransactionRecord) -> Self {
        Self {
            kind: MutationKind::Delete,
            user_id: record.user_id,
            anchor: record.date,
            delta: -record.signed_amount(),
            hint: RecalcHint::Incremental,
        }
    }

    /// Same effect, but forcing a full rebuild.
    #[must_use]
    pub fn rebuild_required(self) -> Self {
        Self {
            hint: RecalcHint::FullRebuild,
            ..self
        }
    }
}

/// Result of settling a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcOutcome {
    /// The new balance state. Not yet persisted.
    pub state: BalanceState,
    /// The path that produced it.
    pub path: RecalcPath,
}

/// Decides and executes the cheapest correct recalculation.
#[derive(Debug, Clone, Copy)]
pub struct RecalculationEngine {
    verify: bool,
    page_size: u32,
}

impl RecalculationEngine {
    /// Creates an engine.
    ///
    /// With `verify` set, every incremental result is compared to a replay
    /// and every rebuild is cross-checked record by record. `page_size`
    /// bounds how many records a record-by-record replay loads at once.
    #[must_use]
    pub fn new(verify: bool, page_size: u32) -> Self {
        Self {
            verify,
            page_size: page_size.max(1),
        }
    }

    /// Picks the path for `effect` against the cached `state`.
    #[must_use]
    pub fn plan(
        &self,
        state: &BalanceState,
        effect: &MutationEffect,
        now: DateTime<Utc>,
    ) -> RecalcPath {
        let incremental_allowed = effect.hint == RecalcHint::Incremental
            && !state.stale
            && effect.anchor <= now
            && state.last_updated <= now;

        if incremental_allowed {
            RecalcPath::Incremental
        } else {
            RecalcPath::FullRebuild
        }
    }

    /// Settles `effect` on top of `state`.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyViolation` if the incremental result disagrees
    /// with a replay, `CorruptedStorage` if a rebuild disagrees with the
    /// record-by-record replay, or the store's error.
    pub async fn apply(
        &self,
        store: &dyn TransactionStore,
        state: &BalanceState,
        effect: &MutationEffect,
        now: DateTime<Utc>,
    ) -> Result<RecalcOutcome, LedgerError> {
        match self.plan(state, effect, now) {
            RecalcPath::Incremental => {
                let next = state.advanced_by(effect.delta, now);
                if self.verify {
                    self.verify_total(store, &next).await?;
                }
                debug!(
                    user_id = %effect.user_id,
                    kind = ?effect.kind,
                    delta = %effect.delta,
                    balance = %next.current_balance,
                    "Applied incremental balance update"
                );
                Ok(RecalcOutcome {
                    state: next,
                    path: RecalcPath::Incremental,
                })
            }
            RecalcPath::FullRebuild => {
                let next = self.rebuild(store, state, now).await?;
                Ok(RecalcOutcome {
                    state: next,
                    path: RecalcPath::FullRebuild,
                })
            }
        }
    }

    /// Compares a cached total against a replay of the store.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyViolation` on mismatch.
    pub async fn verify_total(
        &self,
        store: &dyn TransactionStore,
        state: &BalanceState,
    ) -> Result<(), LedgerError> {
        let replayed =
            state.initial_balance + store.sum_signed(state.user_id, DateWindow::ALL).await?;
        if replayed == state.current_balance {
            Ok(())
        } else {
            Err(LedgerError::ConsistencyViolation {
                user_id: state.user_id,
                cached: state.current_balance,
                replayed,
            })
        }
    }

    /// Recomputes the total from `initial_balance` and every stored record.
    ///
    /// Idempotent: with no intervening write, repeated rebuilds produce the
    /// same balance.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedStorage` if verification is on and the windowed sum
    /// disagrees with the record-by-record replay.
    pub async fn rebuild(
        &self,
        store: &dyn TransactionStore,
        state: &BalanceState,
        now: DateTime<Utc>,
    ) -> Result<BalanceState, LedgerError> {
        let total = store.sum_signed(state.user_id, DateWindow::ALL).await?;

        if self.verify {
            let replayed = self.replay_effect(store, state.user_id).await?;
            if replayed != total {
                error!(
                    user_id = %state.user_id,
                    rebuilt = %total,
                    replayed = %replayed,
                    "Rebuilt balance disagrees with record replay"
                );
                return Err(LedgerError::CorruptedStorage {
                    user_id: state.user_id,
                    rebuilt: state.initial_balance + total,
                    replayed: state.initial_balance + replayed,
                });
            }
        }

        let next = state.rebuilt(total, now);
        debug!(
            user_id = %state.user_id,
            balance = %next.current_balance,
            version = next.version,
            "Rebuilt balance from full replay"
        );
        Ok(next)
    }

    /// Sums every record's signed effect by walking the canonical order.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn replay_effect(
        &self,
        store: &dyn TransactionStore,
        user_id: UserId,
    ) -> Result<Money, LedgerError> {
        let query =
            TransactionQuery::for_user(user_id).with_page(PageRequest::new(1, self.page_size));
        let mut pager = RecordPager::new(store, query);

        let mut total = Money::ZERO;
        while let Some(page) = pager.next_page().await? {
            total += page.iter().map(TransactionRecord::signed_amount).sum::<Money>();
        }
        Ok(total)
    }

    /// Balance for the history inside `window`, computed on demand.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn balance_in(
        &self,
        store: &dyn TransactionStore,
        state: &BalanceState,
        window: DateWindow,
    ) -> Result<Money, LedgerError> {
        Ok(state.initial_balance + store.sum_signed(state.user_id, window).await?)
    }
}
