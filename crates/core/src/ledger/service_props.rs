//! Property-based tests for LedgerService.
//!
//! - Replay equivalence: the cached balance always matches a full replay
//! - Order independence: creation order does not change the final balance
//! - Idempotence: repeated forced recalculation is a no-op on the balance
//! - At-date monotonicity: income-only histories never decrease over time

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::config::AppConfig;
use tally_shared::types::{CategoryId, Money, UserId};

use super::clock::ManualClock;
use super::record::{Direction, TransactionDraft, TransactionPatch, TransactionRecord};
use super::service::LedgerService;
use super::testing::{MapBalances, StaticCatalog, VecStore};

/// Strategy to generate positive amounts (0.01 to 10,000.00).
fn positive_amount() -> impl Strategy<Value = Money> {
    (1i64..1_000_000i64).prop_map(|cents| Money::new(Decimal::new(cents, 2)))
}

/// Strategy to generate any amount, including negative (-10,000.00 to 10,000.00).
fn opening_balance() -> impl Strategy<Value = Money> {
    (-1_000_000i64..1_000_000i64).prop_map(|cents| Money::new(Decimal::new(cents, 2)))
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Expense), Just(Direction::Income)]
}

/// Day offset inside a 60 day history.
fn day_offset() -> impl Strategy<Value = u32> {
    0u32..60
}

#[derive(Debug, Clone)]
enum Op {
    Create {
        direction: Direction,
        amount: Money,
        day: u32,
    },
    Update {
        pick: usize,
        amount: Option<Money>,
        direction: Option<Direction>,
        day: Option<u32>,
    },
    Delete {
        pick: usize,
    },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (direction(), positive_amount(), day_offset())
            .prop_map(|(direction, amount, day)| Op::Create { direction, amount, day }),
        2 => (
            any::<usize>(),
            proptest::option::of(positive_amount()),
            proptest::option::of(direction()),
            proptest::option::of(day_offset()),
        )
            .prop_map(|(pick, amount, direction, day)| Op::Update { pick, amount, direction, day }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
}

fn date(offset: u32) -> DateTime<Utc> {
    start() + Duration::days(i64::from(offset))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct Harness {
    service: LedgerService,
    store: Arc<VecStore>,
    category: CategoryId,
}

fn harness() -> Harness {
    let store = Arc::new(VecStore::default());
    let catalog = Arc::new(StaticCatalog::default());
    let category = catalog.add_category();
    let service = LedgerService::new(
        store.clone(),
        Arc::new(MapBalances::default()),
        catalog,
        Arc::new(ManualClock::new(date(90))),
        &AppConfig::default(),
    );
    Harness {
        service,
        store,
        category,
    }
}

fn draft(h: &Harness, user: UserId, direction: Direction, amount: Money, day: u32) -> TransactionDraft {
    match direction {
        Direction::Expense => TransactionDraft::expense(user, amount, date(day), h.category),
        Direction::Income => TransactionDraft::income(user, amount, date(day)),
    }
}

fn replay(initial: Money, records: &[TransactionRecord]) -> Money {
    initial + records.iter().map(TransactionRecord::signed_amount).sum::<Money>()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// *For any* sequence of creates, updates and deletes, the current
    /// balance equals the opening balance plus every surviving effect.
    #[test]
    fn prop_replay_equivalence(
        initial in opening_balance(),
        ops in prop::collection::vec(op(), 1..30),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let user = UserId::new();
            h.service.initialize_balance(user, initial).await.unwrap();

            for op in ops {
                let live = h.store.records(user);
                match op {
                    Op::Create { direction, amount, day } => {
                        h.service
                            .create_transaction(draft(&h, user, direction, amount, day))
                            .await
                            .unwrap();
                    }
                    Op::Update { pick, amount, direction, day } => {
                        if live.is_empty() {
                            continue;
                        }
                        let target = &live[pick % live.len()];
                        let patch = TransactionPatch {
                            amount,
                            direction,
                            date: day.map(date),
                            // flipping to expense needs a category
                            category_id: Some(Some(h.category)),
                            group_id: None,
                        };
                        h.service.update_transaction(target.id, user, patch).await.unwrap();
                    }
                    Op::Delete { pick } => {
                        if live.is_empty() {
                            continue;
                        }
                        let target = &live[pick % live.len()];
                        h.service.delete_transaction(target.id, user).await.unwrap();
                    }
                }

                let expected = replay(initial, &h.store.records(user));
                let actual = h.service.current_balance(user).await.unwrap();
                prop_assert_eq!(actual, expected);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// *For any* set of transactions, creating them in a shuffled order
    /// yields the same final balance.
    #[test]
    fn prop_order_independence(
        initial in opening_balance(),
        (txns, shuffled) in prop::collection::vec((direction(), positive_amount(), day_offset()), 1..20)
            .prop_flat_map(|txns| (Just(txns.clone()), Just(txns).prop_shuffle())),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let in_order = UserId::new();
            let reordered = UserId::new();
            h.service.initialize_balance(in_order, initial).await.unwrap();
            h.service.initialize_balance(reordered, initial).await.unwrap();

            for &(direction, amount, day) in &txns {
                h.service
                    .create_transaction(draft(&h, in_order, direction, amount, day))
                    .await
                    .unwrap();
            }
            for &(direction, amount, day) in &shuffled {
                h.service
                    .create_transaction(draft(&h, reordered, direction, amount, day))
                    .await
                    .unwrap();
            }

            prop_assert_eq!(
                h.service.current_balance(in_order).await.unwrap(),
                h.service.current_balance(reordered).await.unwrap()
            );
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// *For any* history, forcing recalculation twice yields the same balance.
    #[test]
    fn prop_force_recalculate_idempotent(
        initial in opening_balance(),
        txns in prop::collection::vec((direction(), positive_amount(), day_offset()), 0..15),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let user = UserId::new();
            h.service.initialize_balance(user, initial).await.unwrap();
            for (direction, amount, day) in txns {
                h.service
                    .create_transaction(draft(&h, user, direction, amount, day))
                    .await
                    .unwrap();
            }

            let cached = h.service.current_balance(user).await.unwrap();
            let first = h.service.force_recalculate(user).await.unwrap();
            let second = h.service.force_recalculate(user).await.unwrap();
            prop_assert_eq!(first.current_balance, cached);
            prop_assert_eq!(first.current_balance, second.current_balance);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// *For any* single-direction history, balance at date is monotone:
    /// non-decreasing for income, non-increasing for expenses.
    #[test]
    fn prop_balance_at_date_monotone(
        direction in direction(),
        txns in prop::collection::vec((positive_amount(), day_offset()), 1..15),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let user = UserId::new();
            h.service.initialize_balance(user, Money::ZERO).await.unwrap();
            for (amount, day) in txns {
                h.service
                    .create_transaction(draft(&h, user, direction, amount, day))
                    .await
                    .unwrap();
            }

            let mut previous = h.service.balance_at(user, date(0) - Duration::days(1)).await.unwrap();
            prop_assert_eq!(previous, Money::ZERO);
            for offset in 0..60 {
                let at = h.service.balance_at(user, date(offset)).await.unwrap();
                match direction {
                    Direction::Income => prop_assert!(at >= previous),
                    Direction::Expense => prop_assert!(at <= previous),
                }
                previous = at;
            }
            prop_assert_eq!(previous, h.service.current_balance(user).await.unwrap());
            Ok::<(), TestCaseError>(())
        })?;
    }
}
