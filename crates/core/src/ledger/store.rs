//! Ordered transaction persistence.
//!
//! The [`TransactionStore`] trait is the only way the ledger reaches stored
//! transactions. Records are kept per user in ascending
//! `(date, insertion sequence)` order; see [`super::record::OrderingKey`].

use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::types::{Money, PageRequest, PageResponse, TransactionId, UserId};

use super::error::LedgerError;
use super::record::{TransactionRecord, ValidTransaction};

/// Sort order for read-side queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first. The canonical replay order.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// A range of transaction dates with explicit bound kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// Lower bound.
    pub from: Bound<DateTime<Utc>>,
    /// Upper bound.
    pub to: Bound<DateTime<Utc>>,
}

impl Default for DateWindow {
    fn default() -> Self {
        Self::ALL
    }
}

impl DateWindow {
    /// Every date.
    pub const ALL: Self = Self {
        from: Bound::Unbounded,
        to: Bound::Unbounded,
    };

    /// Everything up to and including `to`.
    #[must_use]
    pub const fn through(to: DateTime<Utc>) -> Self {
        Self {
            from: Bound::Unbounded,
            to: Bound::Included(to),
        }
    }

    /// Everything up to and including the last instant of `day`.
    #[must_use]
    pub fn through_day(day: NaiveDate) -> Self {
        let to = day
            .checked_add_days(Days::new(1))
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .map_or(Bound::Unbounded, |start| Bound::Excluded(start.and_utc()));
        Self {
            from: Bound::Unbounded,
            to,
        }
    }

    /// Everything from `from` through `to`, both inclusive.
    #[must_use]
    pub const fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Bound::Included(from),
            to: Bound::Included(to),
        }
    }

    /// Everything strictly after `from`.
    #[must_use]
    pub const fn after(from: DateTime<Utc>) -> Self {
        Self {
            from: Bound::Excluded(from),
            to: Bound::Unbounded,
        }
    }

    /// Returns true if `date` falls inside the window.
    #[must_use]
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        let above = match self.from {
            Bound::Included(from) => date >= from,
            Bound::Excluded(from) => date > from,
            Bound::Unbounded => true,
        };
        let below = match self.to {
            Bound::Included(to) => date <= to,
            Bound::Excluded(to) => date < to,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Read-side query over one user's transactions.
///
/// A query is a plain value: running it again yields the same pages as long
/// as no mutation happened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    /// Owner of the transactions.
    pub user_id: UserId,
    /// Date filter.
    pub window: DateWindow,
    /// Result order.
    pub order: SortOrder,
    /// Requested page.
    pub page: PageRequest,
}

impl TransactionQuery {
    /// All of a user's transactions in canonical order, first page.
    #[must_use]
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            window: DateWindow::ALL,
            order: SortOrder::Ascending,
            page: PageRequest::default(),
        }
    }

    /// Restricts the query to a date window.
    #[must_use]
    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
    }

    /// Sets the result order.
    #[must_use]
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets the requested page.
    #[must_use]
    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// Result of a successful [`TransactionStore::replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    /// The record before the write.
    pub previous: TransactionRecord,
    /// The record after the write.
    pub current: TransactionRecord,
}

/// Ordered, queryable persistence of transaction records scoped by user.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Assigns an id and insertion sequence and persists the transaction.
    async fn append(
        &self,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<TransactionRecord, LedgerError>;

    /// Replaces the fields of an existing record.
    ///
    /// Fails with `TransactionNotFound` if `id` is absent or belongs to a
    /// different user than `txn`.
    async fn replace(
        &self,
        id: TransactionId,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Result<Replaced, LedgerError>;

    /// Removes a record and returns it.
    async fn remove(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError>;

    /// Puts a removed record back with its original id and sequence.
    async fn reinstate(&self, record: TransactionRecord) -> Result<(), LedgerError>;

    /// Fetches one record.
    async fn get(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, LedgerError>;

    /// Runs a read-side query.
    async fn query(
        &self,
        query: &TransactionQuery,
    ) -> Result<PageResponse<TransactionRecord>, LedgerError>;

    /// Signed sum of every transaction effect inside `window`.
    async fn sum_signed(&self, user_id: UserId, window: DateWindow) -> Result<Money, LedgerError>;
}

/// Walks a query page by page.
///
/// Nothing is fetched until [`RecordPager::next_page`] is called, and
/// [`RecordPager::restart`] rewinds to the first page.
pub struct RecordPager<'a> {
    store: &'a dyn TransactionStore,
    query: TransactionQuery,
    next: Option<PageRequest>,
}

impl<'a> RecordPager<'a> {
    /// Creates a pager starting at `query.page`.
    #[must_use]
    pub fn new(store: &'a dyn TransactionStore, query: TransactionQuery) -> Self {
        Self {
            store,
            query,
            next: Some(query.page),
        }
    }

    /// Fetches the next page, or `None` once the query is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<TransactionRecord>>, LedgerError> {
        let Some(page) = self.next else {
            return Ok(None);
        };

        let response = self.store.query(&self.query.with_page(page)).await?;
        self.next = response.has_next().then(|| page.next());

        if response.data.is_empty() {
            self.next = None;
            return Ok(None);
        }
        Ok(Some(response.data))
    }

    /// Rewinds to the first page.
    pub fn restart(&mut self) {
        self.next = Some(self.query.page);
    }
}
