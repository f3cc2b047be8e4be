//! Ledger error types.
//!
//! This module defines every error a ledger operation can produce:
//! validation errors, lookup errors, initialization conflicts, consistency
//! errors raised by the replay check, and storage errors.

use chrono::{DateTime, Utc};
use tally_shared::AppError;
use tally_shared::types::{CategoryId, GroupId, Money, TransactionId, UserId};
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Amount must be strictly positive.
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Money),

    /// Transaction date lies after the current time.
    #[error("Transaction date {date} is in the future (now: {now})")]
    FutureDate {
        /// Requested transaction date.
        date: DateTime<Utc>,
        /// Clock reading at validation time.
        now: DateTime<Utc>,
    },

    /// Expenses must reference a category.
    #[error("Expense transactions require a category")]
    MissingCategory,

    /// Referenced category does not exist.
    #[error("Unknown category: {0}")]
    UnknownCategory(CategoryId),

    /// Referenced transaction group does not exist.
    #[error("Unknown transaction group: {0}")]
    UnknownGroup(GroupId),

    // ========== Lookup Errors ==========
    /// Transaction not found for this user.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The user has no balance state.
    #[error("No balance initialized for user {0}")]
    BalanceNotFound(UserId),

    // ========== Conflict Errors ==========
    /// Balance state already exists for the user.
    #[error("Balance already initialized for user {0}")]
    BalanceAlreadyInitialized(UserId),

    // ========== Consistency Errors ==========
    /// The incrementally maintained balance diverged from a full replay.
    ///
    /// Handled internally by a full rebuild; never returned from a mutation.
    #[error("Balance for user {user_id} diverged: cached {cached}, replay {replayed}")]
    ConsistencyViolation {
        /// The affected user.
        user_id: UserId,
        /// Value produced by the incremental path.
        cached: Money,
        /// Value produced by replaying the store.
        replayed: Money,
    },

    /// A full rebuild still disagrees with an independent replay.
    #[error("Corrupted transaction storage for user {user_id}: rebuilt {rebuilt}, replayed {replayed}")]
    CorruptedStorage {
        /// The affected user.
        user_id: UserId,
        /// Value produced by the windowed sum.
        rebuilt: Money,
        /// Value produced by iterating every record.
        replayed: Money,
    },

    // ========== Concurrency Errors ==========
    /// A read stopped waiting for an in-flight mutation.
    #[error("Read for user {0} was cancelled while waiting for a mutation")]
    ReadCancelled(UserId),

    // ========== Storage Errors ==========
    /// Store error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            Self::FutureDate { .. } => "FUTURE_DATE",
            Self::MissingCategory => "MISSING_CATEGORY",
            Self::UnknownCategory(_) => "UNKNOWN_CATEGORY",
            Self::UnknownGroup(_) => "UNKNOWN_GROUP",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::BalanceNotFound(_) => "BALANCE_NOT_FOUND",
            Self::BalanceAlreadyInitialized(_) => "BALANCE_ALREADY_INITIALIZED",
            Self::ConsistencyViolation { .. } => "CONSISTENCY_VIOLATION",
            Self::CorruptedStorage { .. } => "CORRUPTED_STORAGE",
            Self::ReadCancelled(_) => "READ_CANCELLED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::NonPositiveAmount(_)
            | Self::FutureDate { .. }
            | Self::MissingCategory
            | Self::UnknownCategory(_)
            | Self::UnknownGroup(_) => 400,

            // 404 Not Found
            Self::TransactionNotFound(_) | Self::BalanceNotFound(_) => 404,

            // 409 Conflict
            Self::BalanceAlreadyInitialized(_) => 409,

            // 499 Client Closed Request
            Self::ReadCancelled(_) => 499,

            // 500 Internal Server Error
            Self::ConsistencyViolation { .. }
            | Self::CorruptedStorage { .. }
            | Self::Database(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this is an input validation error.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.http_status_code() == 400
    }

    /// Returns true if this error is retryable.
    ///
    /// Validation errors are never retried automatically.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ReadCancelled(_))
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::NonPositiveAmount(_)
            | LedgerError::FutureDate { .. }
            | LedgerError::MissingCategory
            | LedgerError::UnknownCategory(_)
            | LedgerError::UnknownGroup(_) => Self::Validation(message),
            LedgerError::TransactionNotFound(_) | LedgerError::BalanceNotFound(_) => {
                Self::NotFound(message)
            }
            LedgerError::BalanceAlreadyInitialized(_) => Self::Conflict(message),
            LedgerError::ReadCancelled(_) => Self::Cancelled(message),
            LedgerError::Database(_) => Self::Database(message),
            LedgerError::ConsistencyViolation { .. }
            | LedgerError::CorruptedStorage { .. }
            | LedgerError::Internal(_) => Self::Internal(message),
        }
    }
}
