//! Application configuration management.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Ledger behaviour.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Ledger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Replay-check every incremental balance update.
    ///
    /// Costs O(n) in the user's history per mutation: each incremental
    /// update is compared against a windowed sum over the store, and each
    /// full rebuild against a record-by-record replay. With this off,
    /// incremental updates are O(1) and divergence is only caught by
    /// `force_recalculate`.
    #[serde(default = "default_verify_mutations")]
    pub verify_mutations: bool,
    /// How long a read waits for an in-flight mutation, in milliseconds.
    #[serde(default = "default_read_wait_timeout_ms")]
    pub read_wait_timeout_ms: u64,
    /// Decimal places used when balances are rendered.
    #[serde(default = "default_display_scale")]
    pub display_scale: u32,
}

fn default_verify_mutations() -> bool {
    true
}

fn default_read_wait_timeout_ms() -> u64 {
    5_000
}

fn default_display_scale() -> u32 {
    2
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            verify_mutations: default_verify_mutations(),
            read_wait_timeout_ms: default_read_wait_timeout_ms(),
            display_scale: default_display_scale(),
        }
    }
}

impl LedgerConfig {
    /// Returns the read wait timeout as a `Duration`.
    #[must_use]
    pub fn read_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.read_wait_timeout_ms)
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Store URL. Only the `memory://` scheme is supported.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Page size used when a query does not specify one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Upper bound on the page size a query may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_database_url() -> String {
    "memory://tally".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    500
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
