//! Master-data lookups the ledger depends on.
//!
//! Categories and transaction groups are owned by other services. The ledger
//! only asks whether a referenced id exists.

use async_trait::async_trait;
use tally_shared::types::{CategoryId, GroupId};

use super::error::LedgerError;

/// Existence checks for referenced master data.
#[async_trait]
pub trait ReferenceCatalog: Send + Sync {
    /// Returns true if the category exists.
    async fn category_exists(&self, id: CategoryId) -> Result<bool, LedgerError>;

    /// Returns true if the transaction group exists.
    async fn group_exists(&self, id: GroupId) -> Result<bool, LedgerError>;
}
