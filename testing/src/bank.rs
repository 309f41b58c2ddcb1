//! Bank account fixture.
//!
//! A small aggregate used across the workspace's tests: deposits add to the
//! balance, withdrawals subtract (clamped at zero), and a closed account
//! refuses every further event.

use eventide_core::aggregate::{Aggregate, ApplyError};
use eventide_core::event::Event;
use eventide_core::event_variants;
use eventide_core::outbox::{DeliveryError, DeliveryFuture, OutboxRecipient, RecipientKey};
use eventide_core::stream::{StreamId, Version};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

/// Money paid in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposited {
    /// Amount in cents.
    pub amount: u64,
}

/// Money paid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawn {
    /// Amount in cents.
    pub amount: u64,
}

/// The account was closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closed;

/// Events of [`BankAccount`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    /// See [`Deposited`].
    Deposited(Deposited),
    /// See [`Withdrawn`].
    Withdrawn(Withdrawn),
    /// See [`Closed`].
    Closed(Closed),
}

event_variants!(AccountEvent {
    Deposited(Deposited) => "Account.Deposited.v1",
    Withdrawn(Withdrawn) => "Account.Withdrawn.v1",
    Closed(Closed) => "Account.Closed.v1",
});

/// A balance movement, kept so tests can check the confirmed view is a deep
/// copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Movement {
    /// Credit of the given amount.
    Credit(u64),
    /// Debit of the amount actually withdrawn.
    Debit(u64),
}

/// Bank account aggregate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    /// Current balance in cents.
    pub balance: u64,
    /// True once [`Closed`] was applied.
    pub closed: bool,
    /// One entry per applied deposit or withdrawal.
    pub history: Vec<Movement>,
}

impl Aggregate for BankAccount {
    const AGGREGATE_TYPE: &'static str = "account";
    type Event = AccountEvent;

    fn apply(&mut self, event: &AccountEvent) -> Result<(), ApplyError> {
        if self.closed {
            return Err(ApplyError::Rejected(format!(
                "account is closed, cannot apply {}",
                event.event_type()
            )));
        }
        match event {
            AccountEvent::Deposited(Deposited { amount }) => {
                self.balance = self.balance.saturating_add(*amount);
                self.history.push(Movement::Credit(*amount));
            }
            AccountEvent::Withdrawn(Withdrawn { amount }) => {
                let taken = (*amount).min(self.balance);
                self.balance -= taken;
                self.history.push(Movement::Debit(taken));
            }
            AccountEvent::Closed(Closed) => self.closed = true,
        }
        Ok(())
    }
}

/// A [`Deposited`] event.
#[must_use]
pub const fn deposited(amount: u64) -> AccountEvent {
    AccountEvent::Deposited(Deposited { amount })
}

/// A [`Withdrawn`] event.
#[must_use]
pub const fn withdrawn(amount: u64) -> AccountEvent {
    AccountEvent::Withdrawn(Withdrawn { amount })
}

/// A [`Closed`] event.
#[must_use]
pub const fn closed() -> AccountEvent {
    AccountEvent::Closed(Closed)
}

/// Any deposit or withdrawal (never a close, so sequences always apply).
pub fn arb_event() -> impl Strategy<Value = AccountEvent> {
    prop_oneof![
        (1u64..10_000).prop_map(deposited),
        (1u64..10_000).prop_map(withdrawn),
    ]
}

/// Up to `max` applicable events.
pub fn arb_events(max: usize) -> impl Strategy<Value = Vec<AccountEvent>> {
    prop::collection::vec(arb_event(), 0..=max)
}

/// Outbox recipient maintaining per-owner balances.
///
/// Withdrawals are clamped at zero the same way [`BankAccount`] clamps them.
/// Deliveries are deduplicated by `(owner, version)`, so redelivery after a
/// crash does not double-count.
#[derive(Debug, Default)]
pub struct BalanceView {
    inner: Mutex<BalanceInner>,
}

#[derive(Debug, Default)]
struct BalanceInner {
    seen: BTreeSet<(StreamId, Version)>,
    balances: HashMap<StreamId, i128>,
    duplicates: usize,
}

impl BalanceView {
    /// Recipient key used when registering this view.
    pub const KEY: &'static str = "balance-view";

    /// Create an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance seen for `owner` (zero if nothing was delivered).
    #[must_use]
    pub fn balance(&self, owner: &StreamId) -> i128 {
        self.lock().balances.get(owner).copied().unwrap_or(0)
    }

    /// Deliveries ignored because the version was already seen.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.lock().duplicates
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BalanceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutboxRecipient<AccountEvent> for BalanceView {
    fn key(&self) -> RecipientKey {
        RecipientKey::new(Self::KEY)
    }

    fn handle<'a>(
        &'a self,
        owner: &'a StreamId,
        version: Version,
        event: &'a AccountEvent,
    ) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let mut inner = self.lock();
            if !inner.seen.insert((owner.clone(), version)) {
                inner.duplicates += 1;
                return Ok(());
            }
            let balance = inner.balances.entry(owner.clone()).or_default();
            match event {
                AccountEvent::Deposited(d) => *balance += i128::from(d.amount),
                AccountEvent::Withdrawn(w) => *balance -= i128::from(w.amount).min(*balance),
                AccountEvent::Closed(_) => {}
            }
            Ok::<(), DeliveryError>(())
        })
    }
}
