//! Category and transaction group catalog.
//!
//! Master data is owned elsewhere; this repository only remembers which ids
//! have been registered so the ledger can check references.

use async_trait::async_trait;
use dashmap::DashSet;
use tally_core::ledger::{LedgerError, ReferenceCatalog};
use tally_shared::types::{CategoryId, GroupId};

use crate::connection::Connection;

/// Registry of known categories and groups.
#[derive(Debug)]
pub struct ReferenceRepository {
    conn: Connection,
    categories: DashSet<CategoryId>,
    groups: DashSet<GroupId>,
}

impl ReferenceRepository {
    /// Creates a new reference repository.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            categories: DashSet::new(),
            groups: DashSet::new(),
        }
    }

    /// Registers a new category and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn register_category(&self) -> Result<CategoryId, LedgerError> {
        self.conn.ensure_open()?;
        let id = CategoryId::new();
        self.categories.insert(id);
        Ok(id)
    }

    /// Registers a new transaction group and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn register_group(&self) -> Result<GroupId, LedgerError> {
        self.conn.ensure_open()?;
        let id = GroupId::new();
        self.groups.insert(id);
        Ok(id)
    }
}

#[async_trait]
impl ReferenceCatalog for ReferenceRepository {
    async fn category_exists(&self, id: CategoryId) -> Result<bool, LedgerError> {
        self.conn.ensure_open()?;
        Ok(self.categories.contains(&id))
    }

    async fn group_exists(&self, id: GroupId) -> Result<bool, LedgerError> {
        self.conn.ensure_open()?;
        Ok(self.groups.contains(&id))
    }
}
