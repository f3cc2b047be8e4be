//! Transaction repository.
//!
//! Records live in one ordered map per user keyed by
//! `(date, insertion sequence)`, so replay order is the map's natural order
//! and windowed sums are range scans.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tally_core::ledger::{
    DateWindow, LedgerError, OrderingKey, Replaced, SortOrder, TransactionQuery, TransactionRecord,
    TransactionStore, ValidTransaction,
};
use tally_shared::types::{Money, PageResponse, TransactionId, UserId};
use tracing::debug;

use crate::connection::Connection;

/// One user's history.
#[derive(Debug, Default)]
struct UserRows {
    by_key: BTreeMap<OrderingKey, TransactionRecord>,
    keys: HashMap<TransactionId, OrderingKey>,
    last_sequence: u64,
}

impl UserRows {
    fn insert(&mut self, record: TransactionRecord) {
        let key = record.ordering_key();
        self.keys.insert(record.id, key);
        self.by_key.insert(key, record);
    }

    fn take(&mut self, id: TransactionId) -> Option<TransactionRecord> {
        let key = self.keys.remove(&id)?;
        self.by_key.remove(&key)
    }

    fn get(&self, id: TransactionId) -> Option<&TransactionRecord> {
        self.keys.get(&id).and_then(|key| self.by_key.get(key))
    }

    fn window(
        &self,
        window: DateWindow,
    ) -> Box<dyn DoubleEndedIterator<Item = &TransactionRecord> + '_> {
        match key_range(window) {
            Some(range) => Box::new(self.by_key.range(range).map(|(_, record)| record)),
            None => Box::new(std::iter::empty()),
        }
    }
}

/// Translates a date window into ordering-key bounds.
///
/// Sequences start at 1, so `0` and `u64::MAX` sort before and after every
/// real record of the same date. Returns `None` for an empty window.
fn key_range(window: DateWindow) -> Option<(Bound<OrderingKey>, Bound<OrderingKey>)> {
    let first = |date| OrderingKey { date, sequence: 0 };
    let last = |date| OrderingKey {
        date,
        sequence: u64::MAX,
    };

    let lower = match window.from {
        Bound::Included(date) => Bound::Included(first(date)),
        Bound::Excluded(date) => Bound::Excluded(last(date)),
        Bound::Unbounded => Bound::Unbounded,
    };
    let upper = match window.to {
        Bound::Included(date) => Bound::Included(last(date)),
        Bound::Excluded(date) => Bound::Excluded(first(date)),
        Bound::Unbounded => Bound::Unbounded,
    };

    let start = match lower {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    };
    let end = match upper {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    };
    if let (Some(start), Some(end)) = (start, end) {
        let both_included = matches!((lower, upper), (Bound::Included(_), Bound::Included(_)));
        if start > end || (start == end && !both_included) {
            return None;
        }
    }

    Some((lower, upper))
}

/// Transaction repository backed by per-user ordered maps.
#[derive(Debug)]
pub struct TransactionRepository {
    conn: Connection,
    users: DashMap<UserId, UserRows>,
}

impl TransactionRepository {
    /// Creates a new transaction repository.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            users: DashMap::new(),
        }
    }

    /// Number of stored records for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn count(&self, user_id: UserId) -> Result<usize, LedgerError> {
        self.conn.ensure_open()?;
        Ok(self.users.get(&user_id).map_or(0, |rows| rows.by_key.len()))
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn append(
        &self,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<TransactionRecord, LedgerError> {
        self.conn.ensure_open()?;

        let mut rows = self.users.entry(txn.user_id()).or_default();
        rows.last_sequence += 1;
        let record = TransactionRecord::commit(TransactionId::new(), rows.last_sequence, txn, now);
        rows.insert(record.clone());

        debug!(
            user_id = %record.user_id,
            transaction_id = %record.id,
            sequence = record.sequence,
            "Transaction appended"
        );
        Ok(record)
    }

    async fn replace(
        &self,
        id: TransactionId,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<Replaced, LedgerError> {
        self.conn.ensure_open()?;

        let mut rows = self
            .users
            .get_mut(&txn.user_id())
            .ok_or(LedgerError::TransactionNotFound(id))?;
        let previous = rows.take(id).ok_or(LedgerError::TransactionNotFound(id))?;
        let current = previous.amend(txn, now);
        rows.insert(current.clone());

        debug!(user_id = %current.user_id, transaction_id = %id, "Transaction replaced");
        Ok(Replaced { previous, current })
    }

    async fn remove(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        self.conn.ensure_open()?;

        let mut rows = self
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        let removed = rows.take(id).ok_or(LedgerError::TransactionNotFound(id))?;

        debug!(user_id = %user_id, transaction_id = %id, "Transaction removed");
        Ok(removed)
    }

    async fn reinstate(&self, record: TransactionRecord) -> Result<(), LedgerError> {
        self.conn.ensure_open()?;

        let mut rows = self.users.entry(record.user_id).or_default();
        if rows.keys.contains_key(&record.id) {
            return Err(LedgerError::Internal(format!(
                "transaction {} is already stored",
                record.id
            )));
        }
        rows.last_sequence = rows.last_sequence.max(record.sequence);

        debug!(
            user_id = %record.user_id,
            transaction_id = %record.id,
            sequence = record.sequence,
            "Transaction reinstated"
        );
        rows.insert(record);
        Ok(())
    }

    async fn get(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError> {
        self.conn.ensure_open()?;

        self.users
            .get(&user_id)
            .and_then(|rows| rows.get(id).cloned())
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    async fn query(
        &self,
        query: &TransactionQuery,
    ) -> Result<PageResponse<TransactionRecord>, LedgerError> {
        self.conn.ensure_open()?;

        let page = query.page;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);

        let Some(rows) = self.users.get(&query.user_id) else {
            return Ok(PageResponse::new(Vec::new(), page.page, page.per_page, 0));
        };

        let total = rows.window(query.window).count() as u64;
        let data: Vec<TransactionRecord> = match query.order {
            SortOrder::Ascending => rows
                .window(query.window)
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            SortOrder::Descending => rows
                .window(query.window)
                .rev()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        };

        Ok(PageResponse::new(data, page.page, page.per_page, total))
    }

    async fn sum_signed(&self, user_id: UserId, window: DateWindow) -> Result<Money, LedgerError> {
        self.conn.ensure_open()?;

        Ok(self.users.get(&user_id).map_or(Money::ZERO, |rows| {
            rows.window(window)
                .map(TransactionRecord::signed_amount)
                .sum()
        }))
    }
}
