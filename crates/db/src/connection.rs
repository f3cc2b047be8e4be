//! Process-wide store handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tally_core::ledger::{Clock, LedgerError, LedgerService};
use tally_shared::AppError;
use tally_shared::config::{AppConfig, DatabaseConfig};
use tracing::info;

use crate::repositories::{BalanceStateRepository, ReferenceRepository, TransactionRepository};

const MEMORY_SCHEME: &str = "memory://";

/// Error types for connection handling.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The URL names a backend this crate does not provide.
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    /// The handle was closed.
    #[error("Database connection is closed")]
    Closed,
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UnsupportedUrl(_) => Self::Config(err.to_string()),
            DbError::Closed => Self::Database(err.to_string()),
        }
    }
}

/// Shared open/closed flag checked by every repository call.
#[derive(Debug, Clone)]
pub struct Connection {
    name: Arc<str>,
    open: Arc<AtomicBool>,
}

impl Connection {
    fn open(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Name of the store, taken from the URL.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until the owning [`Database`] is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fails with [`DbError::Closed`] once the handle is closed.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Closed` after [`Database::close`].
    pub fn ensure_open(&self) -> Result<(), DbError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DbError::Closed)
        }
    }
}

/// Owner of the stores backing one ledger.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Connection,
    transactions: Arc<TransactionRepository>,
    balances: Arc<BalanceStateRepository>,
    references: Arc<ReferenceRepository>,
}

impl Database {
    /// The connection shared by every repository.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Transaction store.
    #[must_use]
    pub fn transactions(&self) -> Arc<TransactionRepository> {
        self.transactions.clone()
    }

    /// Balance state store.
    #[must_use]
    pub fn balances(&self) -> Arc<BalanceStateRepository> {
        self.balances.clone()
    }

    /// Category and group catalog.
    #[must_use]
    pub fn references(&self) -> Arc<ReferenceRepository> {
        self.references.clone()
    }

    /// Builds a ledger service over this database.
    #[must_use]
    pub fn ledger_service(&self, config: &AppConfig, clock: Arc<dyn Clock>) -> LedgerService {
        LedgerService::new(
            self.transactions(),
            self.balances(),
            self.references(),
            clock,
            config,
        )
    }

    /// Closes the handle. Every later repository call fails.
    pub async fn close(&self) {
        if self.conn.open.swap(false, Ordering::AcqRel) {
            info!(database = %self.conn.name(), "Database closed");
        }
    }
}

/// Opens the stores named by `config.url`.
///
/// Only `memory://<name>` URLs are supported.
///
/// # Errors
///
/// Returns `DbError::UnsupportedUrl` for any other scheme.
pub async fn connect(config: &DatabaseConfig) -> Result<Database, DbError> {
    let name = config
        .url
        .strip_prefix(MEMORY_SCHEME)
        .ok_or_else(|| DbError::UnsupportedUrl(config.url.clone()))?;

    let conn = Connection::open(name);
    info!(database = %name, "Database opened");

    Ok(Database {
        transactions: Arc::new(TransactionRepository::new(conn.clone())),
        balances: Arc::new(BalanceStateRepository::new(conn.clone())),
        references: Arc::new(ReferenceRepository::new(conn.clone())),
        conn,
    })
}
