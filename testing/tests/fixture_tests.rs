//! Tests for the shared fixtures working together

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use eventide_core::aggregate::Aggregate;
use eventide_core::event::{EventEnvelope, EventVariant, StoredEvent};
use eventide_core::outbox::OutboxRecipient;
use eventide_core::projection::{Projection, ProjectionStore};
use eventide_core::storage::EventJournal;
use eventide_core::stream::{StreamId, Version};
use eventide_testing::bank::{
    AccountEvent, BalanceView, BankAccount, Deposited, Withdrawn, deposited, withdrawn,
};
use eventide_testing::{InMemoryProjectionStore, InMemoryStore, RecordingProjection, test_clock};
use eventide_core::environment::Clock;

fn owner() -> StreamId {
    StreamId::for_aggregate(BankAccount::AGGREGATE_TYPE, "42")
}

fn stored(events: &[AccountEvent]) -> Vec<StoredEvent> {
    events
        .iter()
        .zip(1..)
        .map(|(event, v)| {
            StoredEvent::from_envelope(&EventEnvelope::new(
                event.clone(),
                Version::new(v),
                test_clock().now(),
            ))
            .unwrap()
        })
        .collect()
}

#[tokio::test]
async fn journal_round_trips_bank_events() {
    let store = InMemoryStore::new();
    let events = vec![deposited(10), withdrawn(3)];
    store.append(&owner(), stored(&events)).await.unwrap();

    let tail = store.read_tail(&owner(), Version::INITIAL).await.unwrap();
    let decoded: Vec<AccountEvent> = tail
        .iter()
        .map(|s| s.decode::<AccountEvent>().unwrap().event)
        .collect();
    assert_eq!(decoded, events);
    assert_eq!(tail[1].event_type, Withdrawn::EVENT_TYPE);
}

#[tokio::test]
async fn balance_view_and_projection_agree() {
    let view = BalanceView::new();
    let projection_store = InMemoryProjectionStore::new();
    let projection: RecordingProjection<AccountEvent> =
        RecordingProjection::new("deposits", vec![Deposited::EVENT_TYPE])
            .with_store(projection_store.clone());

    for (event, v) in [deposited(50), withdrawn(20), deposited(5)].iter().zip(1..) {
        view.handle(&owner(), Version::new(v), event).await.unwrap();
        if projection.event_types().contains(&eventide_core::event::Event::event_type(event)) {
            projection
                .apply_event(&owner(), Version::new(v), event)
                .await
                .unwrap();
        }
    }

    assert_eq!(view.balance(&owner()), 35);
    assert_eq!(projection.applied().len(), 2);
    let last = projection_store
        .get("deposits:account/42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last, 3u64.to_be_bytes().to_vec());
}
