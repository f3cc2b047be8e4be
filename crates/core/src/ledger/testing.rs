//! In-process fakes for the ledger's storage seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_shared::types::{CategoryId, GroupId, Money, PageResponse, TransactionId, UserId};

use super::balance::{BalanceRepository, BalanceState};
use super::error::LedgerError;
use super::record::{TransactionRecord, ValidTransaction};
use super::references::ReferenceCatalog;
use super::store::{DateWindow, Replaced, SortOrder, TransactionQuery, TransactionStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Vector-backed store. Records are kept sorted by ordering key.
#[derive(Debug, Default)]
pub(crate) struct VecStore {
    records: Mutex<Vec<TransactionRecord>>,
    sequence: AtomicU64,
}

impl VecStore {
    /// A user's records in canonical order.
    pub(crate) fn records(&self, user_id: UserId) -> Vec<TransactionRecord> {
        lock(&self.records)
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn insert_sorted(records: &mut Vec<TransactionRecord>, record: TransactionRecord) {
        let key = record.ordering_key();
        let at = records.partition_point(|r| r.ordering_key() < key);
        records.insert(at, record);
    }
}

#[async_trait]
impl TransactionStore for VecStore {
    async fn append(
        &self,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<TransactionRecord, LedgerError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let record = TransactionRecord::commit(TransactionId::new(), sequence, txn, now);
        Self::insert_sorted(&mut lock(&self.records), record.clone());
        Ok(record)
    }

    async fn replace(
        &self,
        id: TransactionId,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<Replaced, LedgerError> {
        let mut records = lock(&self.records);
        let at = records
            .iter()
            .position(|r| r.id == id && r.user_id == txn.user_id())
            .ok_or(LedgerError::TransactionNotFound(id))?;
        let previous = records.remove(at);
        let current = previous.amend(txn, now);
        Self::insert_sorted(&mut records, current.clone());
        Ok(Replaced { previous, current })
    }

    async fn remove(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        let mut records = lock(&self.records);
        let at = records
            .iter()
            .position(|r| r.id == id && r.user_id == user_id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        Ok(records.remove(at))
    }

    async fn reinstate(&self, record: TransactionRecord) -> Result<(), LedgerError> {
        let mut records = lock(&self.records);
        if records.iter().any(|r| r.id == record.id) {
            return Err(LedgerError::Internal(format!(
                "transaction {} is already stored",
                record.id
            )));
        }
        Self::insert_sorted(&mut records, record);
        Ok(())
    }

    async fn get(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        lock(&self.records)
            .iter()
            .find(|r| r.id == id && r.user_id == user_id)
            .cloned()
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    async fn query(
        &self,
        query: &TransactionQuery,
    ) -> Result<PageResponse<TransactionRecord>, LedgerError> {
        let mut matching: Vec<TransactionRecord> = lock(&self.records)
            .iter()
            .filter(|r| r.user_id == query.user_id && query.window.contains(r.date))
            .cloned()
            .collect();
        if query.order == SortOrder::Descending {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let page: Vec<_> = matching
            .into_iter()
            .skip(usize::try_from(query.page.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.page.limit()).unwrap_or(usize::MAX))
            .collect();
        Ok(PageResponse::new(
            page,
            query.page.page,
            query.page.per_page,
            total,
        ))
    }

    async fn sum_signed(&self, user_id: UserId, window: DateWindow) -> Result<Money, LedgerError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.user_id == user_id && window.contains(r.date))
            .map(TransactionRecord::signed_amount)
            .sum())
    }
}

/// A store whose aggregate sums drift from its records by `skew`.
#[derive(Debug)]
pub(crate) struct SkewedStore {
    inner: VecStore,
    skew: Mutex<Money>,
}

impl SkewedStore {
    pub(crate) fn new(skew: Money) -> Self {
        Self {
            inner: VecStore::default(),
            skew: Mutex::new(skew),
        }
    }

    pub(crate) fn set_skew(&self, skew: Money) {
        *lock(&self.skew) = skew;
    }

    pub(crate) fn inner(&self) -> &VecStore {
        &self.inner
    }
}

#[async_trait]
impl TransactionStore for SkewedStore {
    async fn append(
        &self,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<TransactionRecord, LedgerError> {
        self.inner.append(txn, now).await
    }

    async fn replace(
        &self,
        id: TransactionId,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<Replaced, LedgerError> {
        self.inner.replace(id, txn, now).await
    }

    async fn remove(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        self.inner.remove(user_id, id).await
    }

    async fn reinstate(&self, record: TransactionRecord) -> Result<(), LedgerError> {
        self.inner.reinstate(record).await
    }

    async fn get(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        self.inner.get(user_id, id).await
    }

    async fn query(
        &self,
        query: &TransactionQuery,
    ) -> Result<PageResponse<TransactionRecord>, LedgerError> {
        self.inner.query(query).await
    }

    async fn sum_signed(&self, user_id: UserId, window: DateWindow) -> Result<Money, LedgerError> {
        let skew = *lock(&self.skew);
        Ok(self.inner.sum_signed(user_id, window).await? + skew)
    }
}

/// Map-backed balance repository.
#[derive(Debug, Default)]
pub(crate) struct MapBalances {
    states: Mutex<HashMap<UserId, BalanceState>>,
}

impl MapBalances {
    pub(crate) fn snapshot(&self, user_id: UserId) -> Option<BalanceState> {
        lock(&self.states).get(&user_id).cloned()
    }

    /// Writes a state behind the ledger's back.
    pub(crate) fn overwrite(&self, state: BalanceState) {
        lock(&self.states).insert(state.user_id, state);
    }
}

#[async_trait]
impl BalanceRepository for MapBalances {
    async fn find(&self, user_id: UserId) -> Result<Option<BalanceState>, LedgerError> {
        Ok(self.snapshot(user_id))
    }

    async fn insert(&self, state: BalanceState) -> Result<BalanceState, LedgerError> {
        let mut states = lock(&self.states);
        if states.contains_key(&state.user_id) {
            return Err(LedgerError::BalanceAlreadyInitialized(state.user_id));
        }
        states.insert(state.user_id, state.clone());
        Ok(state)
    }

    async fn save(&self, state: BalanceState) -> Result<BalanceState, LedgerError> {
        let mut states = lock(&self.states);
        if !states.contains_key(&state.user_id) {
            return Err(LedgerError::BalanceNotFound(state.user_id));
        }
        states.insert(state.user_id, state.clone());
        Ok(state)
    }
}

/// Balance repository that can be told to fail its next saves.
#[derive(Debug, Default)]
pub(crate) struct FailingBalances {
    inner: MapBalances,
    failures: AtomicU32,
}

impl FailingBalances {
    pub(crate) fn fail_next_saves(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self, user_id: UserId) -> Option<BalanceState> {
        self.inner.snapshot(user_id)
    }
}

#[async_trait]
impl BalanceRepository for FailingBalances {
    async fn find(&self, user_id: UserId) -> Result<Option<BalanceState>, LedgerError> {
        self.inner.find(user_id).await
    }

    async fn insert(&self, state: BalanceState) -> Result<BalanceState, LedgerError> {
        self.inner.insert(state).await
    }

    async fn save(&self, state: BalanceState) -> Result<BalanceState, LedgerError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Database("balance write rejected".to_string()));
        }
        self.inner.save(state).await
    }
}

/// Catalog holding a fixed set of known ids.
#[derive(Debug, Default)]
pub(crate) struct StaticCatalog {
    categories: Mutex<HashSet<CategoryId>>,
    groups: Mutex<HashSet<GroupId>>,
}

impl StaticCatalog {
    pub(crate) fn add_category(&self) -> CategoryId {
        let id = CategoryId::new();
        lock(&self.categories).insert(id);
        id
    }

    pub(crate) fn add_group(&self) -> GroupId {
        let id = GroupId::new();
        lock(&self.groups).insert(id);
        id
    }
}

#[async_trait]
impl ReferenceCatalog for StaticCatalog {
    async fn category_exists(&self, id: CategoryId) -> Result<bool, LedgerError> {
        Ok(lock(&self.categories).contains(&id))
    }

    async fn group_exists(&self, id: GroupId) -> Result<bool, LedgerError> {
        Ok(lock(&self.groups).contains(&id))
    }
}
