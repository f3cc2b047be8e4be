//! Demo data seeder for the Tally ledger.
//!
//! Provisions a demo user, replays a short transaction history against the
//! ledger and prints the resulting balance state.
//!
//! Usage: cargo run --bin seeder

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tally_core::ledger::{SystemClock, TransactionDraft, TransactionPatch, TransactionQuery};
use tally_db::connect;
use tally_shared::AppConfig;
use tally_shared::types::{Money, UserId};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    let db = connect(&config.database).await?;
    info!(database = %db.connection().name(), "Connected to database");

    let service = db.ledger_service(&config, Arc::new(SystemClock));
    let groceries = db.references().register_category()?;
    let user = UserId::new();

    let now = Utc::now();
    let day_one = now - Duration::days(3);
    let day_three = now - Duration::days(1);

    info!(user_id = %user, "Seeding demo user");
    service
        .initialize_balance(user, Money::new(Decimal::new(10_000, 2)))
        .await?;

    let expense = service
        .create_transaction(TransactionDraft::expense(
            user,
            Money::new(Decimal::new(3_000, 2)),
            day_one,
            groceries,
        ))
        .await?;
    let income = service
        .create_transaction(TransactionDraft::income(
            user,
            Money::new(Decimal::new(5_000, 2)),
            day_three,
        ))
        .await?;

    let patch = TransactionPatch {
        amount: Some(Money::new(Decimal::new(2_000, 2))),
        ..TransactionPatch::default()
    };
    service.update_transaction(expense.id, user, patch).await?;
    service.delete_transaction(income.id, user).await?;

    let state = service.balance_state(user).await?;
    let at_day_one = service.balance_at(user, day_one).await?;
    let history = service
        .list_transactions(TransactionQuery::for_user(user))
        .await?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    println!("{}", serde_json::to_string_pretty(&history)?);
    info!(
        user_id = %user,
        balance = %service.current_balance_for_display(user).await?,
        balance_at_day_one = %at_day_one,
        "Seeding complete"
    );

    db.close().await;
    Ok(())
}
