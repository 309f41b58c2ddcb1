//! Bank account demo
//!
//! Raises a deposit and a withdrawal on one account and shows the tentative
//! and confirmed views, the outbox recipient's view and a projection.

use eventide_core::handler::HandlerError;
use eventide_core::snapshot::EveryNVersions;
use eventide_projections::{ProjectionDispatcher, ProjectionOptions, ProjectionRegistry};
use eventide_runtime::{AggregateController, MetricsServer, TokioScheduler};
use eventide_testing::bank::{AccountEvent, BalanceView, BankAccount, Withdrawn, deposited, withdrawn};
use eventide_testing::{InMemoryProjectionStore, InMemoryStore, RecordingProjection};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bank_account=info,eventide_runtime=debug,eventide_projections=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics = MetricsServer::new(([127, 0, 0, 1], 9090).into());
    metrics.start()?;

    println!("=== Bank Account Example: Eventide ===\n");

    let store = Arc::new(InMemoryStore::new());
    let balances = Arc::new(BalanceView::new());

    let read_models = InMemoryProjectionStore::new();
    let registry = Arc::new(ProjectionRegistry::new());
    let movements = Arc::new(
        RecordingProjection::<AccountEvent>::new(
            "movements",
            vec!["Account.Deposited.v1", "Account.Withdrawn.v1"],
        )
        .with_store(read_models.clone()),
    );
    registry.register(movements.clone())?;
    let dispatcher = ProjectionDispatcher::start(registry, ProjectionOptions::default())?;

    let account_id = Uuid::new_v4();
    let account = AggregateController::<BankAccount>::builder(account_id)
        .store(store.clone())
        .scheduler(Arc::new(TokioScheduler::try_current()?))
        .snapshot_strategy(EveryNVersions::new(2))
        .recipient(balances.clone())
        .projections(dispatcher.clone())
        .activate()
        .await?;

    account.register_typed_handler(|w: &Withdrawn| {
        let amount = w.amount;
        async move {
            if amount > 1_000_000 {
                return Err(HandlerError::failed("withdrawal over daily limit"));
            }
            tracing::info!(amount, "Withdrawal approved");
            Ok(())
        }
    });

    println!(">>> Raising: Deposited(100)");
    account.raise(deposited(100)).await?;
    println!(">>> Raising: Withdrawn(40)");
    account.raise(withdrawn(40)).await?;

    let tentative = account.tentative(|a| a.balance).await;
    let confirmed = account.confirmed(|a| a.balance).await;
    println!("\nTentative balance: {tentative}");
    println!("Confirmed balance: {confirmed}");
    println!("Journal entries:   {}", account.events().await?.len());
    println!("Snapshots:         {:?}", store.snapshot_versions(account.id()));

    let report = account.deactivate().await?;
    dispatcher.shutdown().await;

    println!("\nOutbox delivered on deactivation: {}", report.drain.delivered);
    println!("Recipient balance view:          {}", balances.balance(account.id()));
    println!("Projection applied events:       {}", movements.applied().len());
    println!("Read model keys:                 {:?}", read_models.keys());

    if let Some(rendered) = metrics.render() {
        println!("\nMetrics ({}):", metrics.addr());
        for line in rendered.lines().filter(|l| l.starts_with("eventide_")) {
            println!("  {line}");
        }
    }

    println!("\n=== Done ===");
    Ok(())
}
