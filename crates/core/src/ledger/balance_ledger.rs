//! The authoritative read/write facade for balances.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tally_shared::types::{Money, UserId};
use tracing::{info, warn};

use super::balance::{BalanceRepository, BalanceState};
use super::clock::Clock;
use super::error::LedgerError;
use super::recalculation::{MutationEffect, RecalcOutcome, RecalculationEngine};
use super::store::{DateWindow, TransactionStore};

/// Balance reads and cache maintenance.
///
/// Writes through this trait are expected to run inside the per-user
/// exclusive scope of [`super::coordinator::ConsistencyCoordinator`].
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// The user's balance state, rebuilt first if it is stale.
    async fn state(&self, user_id: UserId) -> Result<BalanceState, LedgerError>;

    /// The user's current balance.
    async fn current_balance(&self, user_id: UserId) -> Result<Money, LedgerError> {
        Ok(self.state(user_id).await?.current_balance)
    }

    /// Balance including every transaction dated at or before `at`.
    async fn balance_at(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Money, LedgerError>;

    /// Balance at the end of calendar day `day`.
    async fn balance_on(&self, user_id: UserId, day: NaiveDate) -> Result<Money, LedgerError>;

    /// Provisions the user's balance state.
    async fn initialize(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError>;

    /// Replaces the opening balance and rebuilds.
    async fn reinitialize(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError>;

    /// Settles a store write and persists the new state.
    async fn apply_mutation(
        &self,
        effect: &MutationEffect,
    ) -> Result<RecalcOutcome, LedgerError>;

    /// Discards the cache and rebuilds it from a full replay.
    async fn recalculate_full(&self, user_id: UserId) -> Result<BalanceState, LedgerError>;

    /// Flags the cache as untrusted so the next read rebuilds it.
    async fn mark_stale(&self, user_id: UserId) -> Result<(), LedgerError>;
}

/// [`BalanceLedger`] over a transaction store and a balance repository.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn TransactionStore>,
    balances: Arc<dyn BalanceRepository>,
    engine: RecalculationEngine,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Creates a ledger.
    #[must_use]
    pub fn new(
        store: Arc<dyn TransactionStore>,
        balances: Arc<dyn BalanceRepository>,
        engine: RecalculationEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            balances,
            engine,
            clock,
        }
    }

    async fn require(&self, user_id: UserId) -> Result<BalanceState, LedgerError> {
        self.balances
            .find(user_id)
            .await?
            .ok_or(LedgerError::BalanceNotFound(user_id))
    }

    async fn rebuild_and_save(&self, state: &BalanceState) -> Result<BalanceState, LedgerError> {
        let rebuilt = self
            .engine
            .rebuild(self.store.as_ref(), state, self.clock.now())
            .await?;
        self.balances.save(rebuilt).await
    }
}

#[async_trait]
impl BalanceLedger for Ledger {
    async fn state(&self, user_id: UserId) -> Result<BalanceState, LedgerError> {
        let state = self.require(user_id).await?;
        if !state.stale {
            return Ok(state);
        }

        info!(user_id = %user_id, "Cached balance is stale, rebuilding");
        self.rebuild_and_save(&state).await
    }

    async fn balance_at(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Money, LedgerError> {
        let state = self.require(user_id).await?;
        self.engine
            .balance_in(self.store.as_ref(), &state, DateWindow::through(at))
            .await
    }

    async fn balance_on(&self, user_id: UserId, day: NaiveDate) -> Result<Money, LedgerError> {
        let state = self.require(user_id).await?;
        self.engine
            .balance_in(self.store.as_ref(), &state, DateWindow::through_day(day))
            .await
    }

    async fn initialize(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError> {
        let now = self.clock.now();
        let provisioned = BalanceState::provision(user_id, initial_balance, now);

        // Transactions stored before provisioning still count. The state is
        // written once, already rebuilt.
        let rebuilt = self
            .engine
            .rebuild(self.store.as_ref(), &provisioned, now)
            .await?;
        let state = self.balances.insert(rebuilt).await?;
        info!(
            user_id = %user_id,
            initial_balance = %initial_balance,
            balance = %state.current_balance,
            "Balance initialized"
        );
        Ok(state)
    }

    async fn reinitialize(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<BalanceState, LedgerError> {
        let state = self.require(user_id).await?;
        let state = self
            .rebuild_and_save(&state.reinitialized(initial_balance))
            .await?;
        info!(
            user_id = %user_id,
            initial_balance = %initial_balance,
            balance = %state.current_balance,
            "Balance re-initialized"
        );
        Ok(state)
    }

    async fn apply_mutation(
        &self,
        effect: &MutationEffect,
    ) -> Result<RecalcOutcome, LedgerError> {
        let state = self.require(effect.user_id).await?;
        let outcome = self
            .engine
            .apply(self.store.as_ref(), &state, effect, self.clock.now())
            .await?;
        let saved = self.balances.save(outcome.state).await?;
        Ok(RecalcOutcome {
            state: saved,
            path: outcome.path,
        })
    }

    async fn recalculate_full(&self, user_id: UserId) -> Result<BalanceState, LedgerError> {
        let state = self.require(user_id).await?;
        let rebuilt = self.rebuild_and_save(&state).await?;
        if rebuilt.current_balance != state.current_balance {
            warn!(
                user_id = %user_id,
                cached = %state.current_balance,
                rebuilt = %rebuilt.current_balance,
                "Full recalculation corrected the cached balance"
            );
        }
        Ok(rebuilt)
    }

    async fn mark_stale(&self, user_id: UserId) -> Result<(), LedgerError> {
        let state = self.require(user_id).await?;
        self.balances
            .save(BalanceState {
                stale: true,
                ..state
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::clock::ManualClock;
    use crate::ledger::record::{TransactionDraft, ValidTransaction};
    use crate::ledger::testing::{MapBalances, VecStore};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tally_shared::types::CategoryId;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, d, 8, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<VecStore>,
        balances: Arc<MapBalances>,
        ledger: Ledger,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(VecStore::default());
        let balances = Arc::new(MapBalances::default());
        let ledger = Ledger::new(
            store.clone(),
            balances.clone(),
            RecalculationEngine::new(true, 10),
            Arc::new(ManualClock::new(day(28))),
        );
        Fixture {
            store,
            balances,
            ledger,
        }
    }

    #[tokio::test]
    async fn test_initialize_conflict() {
        let fx = fixture();
        let user = UserId::new();
        fx.ledger.initialize(user, Money::new(dec!(100))).await.unwrap();

        let result = fx.ledger.initialize(user, Money::new(dec!(5))).await;
        assert!(matches!(result, Err(LedgerError::BalanceAlreadyInitialized(u)) if u == user));
        assert_eq!(
            fx.ledger.current_balance(user).await.unwrap(),
            Money::new(dec!(100))
        );
    }

    #[tokio::test]
    async fn test_unknown_user_not_found() {
        let fx = fixture();
        let user = UserId::new();
        assert!(matches!(
            fx.ledger.current_balance(user).await,
            Err(LedgerError::BalanceNotFound(_))
        ));
        assert!(matches!(
            fx.ledger.balance_at(user, day(1)).await,
            Err(LedgerError::BalanceNotFound(_))
        ));
        assert!(matches!(
            fx.ledger.recalculate_full(user).await,
            Err(LedgerError::BalanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_state_is_rebuilt_on_read() {
        let fx = fixture();
        let user = UserId::new();
        fx.ledger.initialize(user, Money::new(dec!(100))).await.unwrap();

        // A write the cache never heard about.
        let draft = TransactionDraft::expense(user, Money::new(dec!(30)), day(1), CategoryId::new());
        fx.store
            .append(ValidTransaction::new_unchecked(draft), day(1))
            .await
            .unwrap();

        fx.ledger.mark_stale(user).await.unwrap();
        assert_eq!(
            fx.ledger.current_balance(user).await.unwrap(),
            Money::new(dec!(70))
        );
        assert!(!fx.balances.snapshot(user).unwrap().stale);
    }

    #[tokio::test]
    async fn test_reinitialize_keeps_history() {
        let fx = fixture();
        let user = UserId::new();
        fx.ledger.initialize(user, Money::new(dec!(100))).await.unwrap();
        let draft = TransactionDraft::income(user, Money::new(dec!(25)), day(2));
        let rec = fx
            .store
            .append(ValidTransaction::new_unchecked(draft), day(2))
            .await
            .unwrap();
        fx.ledger
            .apply_mutation(&MutationEffect::created(&rec))
            .await
            .unwrap();

        let state = fx.ledger.reinitialize(user, Money::new(dec!(0))).await.unwrap();
        assert_eq!(state.initial_balance, Money::ZERO);
        assert_eq!(state.current_balance, Money::new(dec!(25)));
        assert!(!state.stale);
    }

    #[tokio::test]
    async fn test_recalculate_full_repairs_tampered_cache() {
        let fx = fixture();
        let user = UserId::new();
        let initial = fx.ledger.initialize(user, Money::new(dec!(100))).await.unwrap();
        fx.balances.overwrite(BalanceState {
            current_balance: Money::new(dec!(1)),
            ..initial
        });

        let repaired = fx.ledger.recalculate_full(user).await.unwrap();
        assert_eq!(repaired.current_balance, Money::new(dec!(100)));
        let again = fx.ledger.recalculate_full(user).await.unwrap();
        assert_eq!(again.current_balance, repaired.current_balance);
        assert!(again.version > repaired.version);
    }

    #[tokio::test]
    async fn test_balance_on_day_is_inclusive() {
        let fx = fixture();
        let user = UserId::new();
        fx.ledger.initialize(user, Money::new(dec!(10))).await.unwrap();
        let late = Utc.with_ymd_and_hms(2025, 7, 3, 23, 59, 59).unwrap();
        let draft = TransactionDraft::income(user, Money::new(dec!(5)), late);
        fx.store
            .append(ValidTransaction::new_unchecked(draft), late)
            .await
            .unwrap();

        let on_day = fx
            .ledger
            .balance_on(user, NaiveDate::from_ymd_opt(2025, 7, 3).unwrap())
            .await
            .unwrap();
        let day_before = fx
            .ledger
            .balance_on(user, NaiveDate::from_ymd_opt(2025, 7, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(on_day, Money::new(dec!(15)));
        assert_eq!(day_before, Money::new(dec!(10)));
    }
}
