//! Property tests for the dual-view event log.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use eventide_core::aggregate::Aggregate;
use eventide_core::stream::{StreamId, Version};
use eventide_runtime::event_log::EventLog;
use eventide_testing::InMemoryStore;
use eventide_testing::bank::{AccountEvent, BankAccount, arb_events};
use proptest::prelude::*;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn log_for(store: &Arc<InMemoryStore>, owner: &StreamId) -> EventLog<BankAccount> {
    EventLog::new(owner.clone(), store.clone(), store.clone())
}

fn replay(events: &[AccountEvent]) -> BankAccount {
    let mut account = BankAccount::default();
    for event in events {
        account.apply(event).unwrap();
    }
    account
}

proptest! {
    #[test]
    fn versions_track_submissions(events in arb_events(40), confirm_every in 1usize..8) {
        runtime().block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let owner = StreamId::for_aggregate("account", "prop");
            let mut log = log_for(&store, &owner);
            log.hydrate().await.unwrap();

            for (i, event) in events.iter().enumerate() {
                log.submit(event.clone()).unwrap();
                assert_eq!(log.tentative_version(), Version::new(i as u64 + 1));
                assert!(log.confirmed_version() <= log.tentative_version());
                if (i + 1) % confirm_every == 0 {
                    log.wait_for_confirmation().await.unwrap();
                    assert_eq!(log.confirmed_version(), log.tentative_version());
                    assert_eq!(log.confirmed_view(), log.tentative_view());
                }
            }
        });
    }

    #[test]
    fn snapshot_plus_tail_equals_full_replay(
        events in arb_events(40),
        split in 0usize..=40,
        truncate in any::<bool>(),
    ) {
        let split = split.min(events.len());
        let expected = replay(&events);

        runtime().block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let owner = StreamId::for_aggregate("account", "prop");

            let mut writer = log_for(&store, &owner);
            writer.hydrate().await.unwrap();
            writer.submit_all(events[..split].to_vec()).unwrap();
            writer.wait_for_confirmation().await.unwrap();
            writer.snapshot(truncate).await.unwrap();
            writer.submit_all(events[split..].to_vec()).unwrap();
            writer.wait_for_confirmation().await.unwrap();

            let mut reader = log_for(&store, &owner);
            reader.hydrate().await.unwrap();
            assert_eq!(reader.confirmed_view(), &expected);
            assert_eq!(reader.tentative_view(), &expected);
            assert_eq!(reader.confirmed_version(), Version::new(events.len() as u64));
        });
    }
}
