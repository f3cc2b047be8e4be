//! Transaction records and their inputs.
//!
//! A [`TransactionRecord`] is what the store holds once a transaction is
//! committed. Callers describe new transactions with a [`TransactionDraft`]
//! and edits with a [`TransactionPatch`]; both must pass validation and
//! become a [`ValidTransaction`] before a store accepts them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_shared::types::{CategoryId, GroupId, Money, TransactionId, UserId};

/// Direction of a transaction's effect on the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Money leaving the account. Subtracts from the balance.
    Expense,
    /// Money entering the account. Adds to the balance.
    Income,
}

impl Direction {
    /// Applies this direction's sign to a positive magnitude.
    #[must_use]
    pub fn apply(self, amount: Money) -> Money {
        match self {
            Self::Expense => -amount,
            Self::Income => amount,
        }
    }

    /// Returns true if records in this direction must reference a category.
    #[must_use]
    pub fn requires_category(self) -> bool {
        matches!(self, Self::Expense)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expense => write!(f, "EXPENSE"),
            Self::Income => write!(f, "INCOME"),
        }
    }
}

/// Total order over a user's transactions.
///
/// Records sort by date, then by insertion sequence. The sequence is
/// assigned once at creation and survives every later edit, so two records
/// sharing a date always replay in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingKey {
    /// Transaction date.
    pub date: DateTime<Utc>,
    /// Per-user insertion sequence.
    pub sequence: u64,
}

/// A committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique identifier, assigned by the store.
    pub id: TransactionId,
    /// Owner. Never changes.
    pub user_id: UserId,
    /// Positive magnitude.
    pub amount: Money,
    /// Whether the amount adds or subtracts.
    pub direction: Direction,
    /// Date the transaction took effect.
    pub date: DateTime<Utc>,
    /// Optional category reference.
    pub category_id: Option<CategoryId>,
    /// Optional transaction group reference.
    pub group_id: Option<GroupId>,
    /// Per-user insertion sequence, assigned by the store.
    pub sequence: u64,
    /// When the record was first stored.
    pub created_at: DateTime<Utc>,
    /// When the record was last replaced.
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Builds a freshly committed record from validated input.
    #[must_use]
    pub fn commit(
        id: TransactionId,
        sequence: u64,
        txn: ValidTransaction,
        now: DateTime<Utc>,
    ) -> Self {
        let draft = txn.0;
        Self {
            id,
            user_id: draft.user_id,
            amount: draft.amount,
            direction: draft.direction,
            date: draft.date,
            category_id: draft.category_id,
            group_id: draft.group_id,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy carrying the new field values.
    ///
    /// Identity, owner, sequence and creation time are preserved.
    #[must_use]
    pub fn amend(&self, txn: ValidTransaction, now: DateTime<Utc>) -> Self {
        let draft = txn.0;
        Self {
            amount: draft.amount,
            direction: draft.direction,
            date: draft.date,
            category_id: draft.category_id,
            group_id: draft.group_id,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Signed effect of this record on the balance.
    #[must_use]
    pub fn signed_amount(&self) -> Money {
        self.direction.apply(self.amount)
    }

    /// Position of this record in the user's history.
    #[must_use]
    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            date: self.date,
            sequence: self.sequence,
        }
    }
}

/// Input describing a new transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    /// Owner.
    pub user_id: UserId,
    /// Positive magnitude.
    pub amount: Money,
    /// Whether the amount adds or subtracts.
    pub direction: Direction,
    /// Date the transaction took effect.
    pub date: DateTime<Utc>,
    /// Optional category reference. Required for expenses.
    pub category_id: Option<CategoryId>,
    /// Optional transaction group reference.
    pub group_id: Option<GroupId>,
}

impl TransactionDraft {
    /// Draft for an expense in `category_id`.
    #[must_use]
    pub fn expense(
        user_id: UserId,
        amount: Money,
        date: DateTime<Utc>,
        category_id: CategoryId,
    ) -> Self {
        Self {
            user_id,
            amount,
            direction: Direction::Expense,
            date,
            category_id: Some(category_id),
            group_id: None,
        }
    }

    /// Draft for an income without category.
    #[must_use]
    pub fn income(user_id: UserId, amount: Money, date: DateTime<Utc>) -> Self {
        Self {
            user_id,
            amount,
            direction: Direction::Income,
            date,
            category_id: None,
            group_id: None,
        }
    }

    /// Attaches a transaction group.
    #[must_use]
    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }
}

/// Partial update of an existing transaction.
///
/// `None` keeps the current value. For the optional references,
/// `Some(None)` clears the reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPatch {
    /// New magnitude.
    pub amount: Option<Money>,
    /// New direction.
    pub direction: Option<Direction>,
    /// New date.
    pub date: Option<DateTime<Utc>>,
    /// New category reference.
    pub category_id: Option<Option<CategoryId>>,
    /// New group reference.
    pub group_id: Option<Option<GroupId>>,
}

impl TransactionPatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merges the patch over `record`, producing the draft to validate.
    #[must_use]
    pub fn apply_to(&self, record: &TransactionRecord) -> TransactionDraft {
        TransactionDraft {
            user_id: record.user_id,
            amount: self.amount.unwrap_or(record.amount),
            direction: self.direction.unwrap_or(record.direction),
            date: self.date.unwrap_or(record.date),
            category_id: self.category_id.unwrap_or(record.category_id),
            group_id: self.group_id.unwrap_or(record.group_id),
        }
    }
}

/// A draft that passed validation.
///
/// Only [`super::validation`] and ledger-internal rollback can build one, so
/// a store never sees a non-positive amount, a future date or an expense
/// without a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidTransaction(TransactionDraft);

impl ValidTransaction {
    pub(crate) fn new_unchecked(draft: TransactionDraft) -> Self {
        Self(draft)
    }

    /// Rebuilds the input a committed record was created from.
    ///
    /// Used to restore a record's previous values during rollback.
    pub(crate) fn from_record(record: &TransactionRecord) -> Self {
        Self(TransactionDraft {
            user_id: record.user_id,
            amount: record.amount,
            direction: record.direction,
            date: record.date,
            category_id: record.category_id,
            group_id: record.group_id,
        })
    }

    /// Owner.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.0.user_id
    }

    /// Date the transaction takes effect.
    #[must_use]
    pub fn date(&self) -> DateTime<Utc> {
        self.0.date
    }

    /// Signed effect on the balance.
    #[must_use]
    pub fn signed_amount(&self) -> Money {
        self.0.direction.apply(self.0.amount)
    }

    /// Borrow the validated fields.
    #[must_use]
    pub fn as_draft(&self) -> &TransactionDraft {
        &self.0
    }
}
