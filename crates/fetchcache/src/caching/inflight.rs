use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;

use super::CacheKey;
use crate::outcome::{RequestError, SoftError};

/// The final outcome of a fetch, as handed to everyone waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    Value(T),
    SoftError(SoftError),
    Failed(RequestError),
}

type Slot<T> = Option<Settled<T>>;

/// Identifies the owner of an in-flight fetch.
///
/// Each record gets a new generation, so that an owner whose record has been taken over can
/// not release the record of its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerTicket {
    generation: u64,
}

/// A fetch that is currently underway.
#[derive(Debug)]
struct InFlightRecord<T> {
    generation: u64,
    /// Completion signal and result slot in one. Dropping it without sending wakes all waiters
    /// with [`WaitResult::Abandoned`].
    sender: watch::Sender<Slot<T>>,
}

/// The result of [`InFlightRegistry::try_become_owner`].
#[derive(Debug)]
pub enum Registration<T> {
    /// The caller is now responsible for fetching the key and releasing the record.
    Owner(OwnerTicket),
    /// Someone else is already fetching the key.
    Waiter(WaitHandle<T>),
}

/// Waits for the outcome of a fetch owned by someone else.
#[derive(Debug)]
pub struct WaitHandle<T> {
    generation: u64,
    receiver: watch::Receiver<Slot<T>>,
}

/// The result of [`WaitHandle::wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitResult<T> {
    /// The owner finished the fetch.
    Settled(Settled<T>),
    /// The owner went away without an outcome, because it was cancelled or taken over.
    Abandoned,
    /// The owner did not finish in time. Carries the ticket of the owner that is stuck.
    TimedOut(OwnerTicket),
}

impl<T: Clone> WaitHandle<T> {
    /// Blocks until the owner settles the fetch, for at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> WaitResult<T> {
        let settled = tokio::time::timeout(timeout, self.receiver.wait_for(Option::is_some)).await;
        match settled {
            Ok(Ok(slot)) => match &*slot {
                Some(settled) => WaitResult::Settled(settled.clone()),
                None => WaitResult::Abandoned,
            },
            Ok(Err(_)) => WaitResult::Abandoned,
            Err(_) => WaitResult::TimedOut(OwnerTicket {
                generation: self.generation,
            }),
        }
    }
}

/// Tracks the fetches that are currently underway, at most one per key.
///
/// The registry is not synchronized by itself. It is meant to live behind the same lock as the
/// [`TtlStore`](super::TtlStore), so that checking the store and registering as owner is atomic.
#[derive(Debug)]
pub struct InFlightRegistry<T> {
    records: HashMap<CacheKey, InFlightRecord<T>>,
    next_generation: u64,
}

impl<T> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl<T> InFlightRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the caller the owner of the fetch for `key`, unless someone else already is.
    pub fn try_become_owner(&mut self, key: &CacheKey) -> Registration<T> {
        match self.records.get(key) {
            Some(record) => Registration::Waiter(WaitHandle {
                generation: record.generation,
                receiver: record.sender.subscribe(),
            }),
            None => Registration::Owner(self.register(key.clone())),
        }
    }

    /// Takes over the fetch for `key` from the `stuck` owner.
    ///
    /// If the stuck record is still registered, it is replaced by a new record owned by the caller,
    /// and the waiters of the stuck record are woken with [`WaitResult::Abandoned`]. If the stuck
    /// owner has finished in the meantime, this behaves like [`try_become_owner`](Self::try_become_owner).
    pub fn take_over(&mut self, key: &CacheKey, stuck: OwnerTicket) -> Registration<T> {
        let is_stuck = self
            .records
            .get(key)
            .is_some_and(|record| record.generation == stuck.generation);

        if is_stuck {
            Registration::Owner(self.register(key.clone()))
        } else {
            self.try_become_owner(key)
        }
    }

    /// Settles the fetch for `key`, waking all of its waiters, and removes the record.
    ///
    /// Returns `false` if the record of `ticket` has been taken over in the meantime, in which case
    /// nothing is done.
    pub fn notify_and_release(
        &mut self,
        key: &CacheKey,
        ticket: OwnerTicket,
        outcome: Settled<T>,
    ) -> bool {
        match self.remove(key, ticket) {
            Some(record) => {
                // `send_replace` stores the value even if no one is subscribed.
                record.sender.send_replace(Some(outcome));
                true
            }
            None => false,
        }
    }

    /// Removes the record for `key` without an outcome, if `ticket` still owns it.
    pub fn abandon(&mut self, key: &CacheKey, ticket: OwnerTicket) -> bool {
        self.remove(key, ticket).is_some()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.records.contains_key(key)
    }

    /// The number of fetches currently underway.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn register(&mut self, key: CacheKey) -> OwnerTicket {
        let generation = self.next_generation;
        self.next_generation += 1;

        let (sender, _) = watch::channel(None);
        self.records
            .insert(key, InFlightRecord { generation, sender });

        OwnerTicket { generation }
    }

    fn remove(&mut self, key: &CacheKey, ticket: OwnerTicket) -> Option<InFlightRecord<T>> {
        let owned = self
            .records
            .get(key)
            .is_some_and(|record| record.generation == ticket.generation);
        owned.then(|| self.records.remove(key)).flatten()
    }
}
