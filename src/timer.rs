//! Cancellable timers for slot waits, session inactivity and archive expiry.
//!
//! The engine never sleeps itself. It asks a [`Scheduler`] to deliver a
//! [`TimerEvent`] after a delay and cancels the returned [`TimerKey`] as
//! soon as the guarded condition resolves another way. [`ManualScheduler`]
//! drives time explicitly for tests; [`DelayQueueScheduler`] backs the
//! async driver with a `tokio_util` delay queue.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::{session::SessionId, stream::StreamName};

/// Identifier of a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey(u64);

/// Identifier of a held response slot within its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) u64);

/// What a timer guards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// A held slot has waited `wait` seconds without a response.
    SlotWait {
        /// Session holding the slot.
        sid: SessionId,
        /// Slot to release.
        slot: SlotId,
    },
    /// A session saw no request for `inactivity + 10` seconds.
    Inactivity(SessionId),
    /// The archived terminate condition of a session may be forgotten.
    SessionArchiveExpiry(SessionId),
    /// The archived terminate condition of a stream may be forgotten.
    StreamArchiveExpiry(StreamName),
}

/// Source of time and cancellable timers.
pub trait Scheduler {
    /// Current instant as seen by this scheduler.
    fn now(&self) -> Instant;

    /// Deliver `event` once `after` has elapsed.
    fn schedule(&mut self, after: Duration, event: TimerEvent) -> TimerKey;

    /// Cancel a timer. Cancelling an expired or unknown key is a no-op.
    fn cancel(&mut self, key: TimerKey);
}

/// Scheduler with a virtual clock advanced by the caller.
#[derive(Debug)]
pub struct ManualScheduler {
    origin: Instant,
    elapsed: Duration,
    next_key: u64,
    due: BTreeMap<(Duration, TimerKey), TimerEvent>,
    deadlines: HashMap<TimerKey, Duration>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Duration::ZERO,
            next_key: 0,
            due: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts now.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Time elapsed on the virtual clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration { self.elapsed }

    /// Number of timers still armed.
    #[must_use]
    pub fn armed(&self) -> usize { self.due.len() }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its deadline.
    pub fn pop_due(&mut self, until: Duration) -> Option<TimerEvent> {
        let (&(deadline, key), _) = self.due.first_key_value()?;
        if deadline > until {
            return None;
        }
        let event = self.due.remove(&(deadline, key))?;
        self.deadlines.remove(&key);
        self.elapsed = self.elapsed.max(deadline);
        Some(event)
    }

    /// Move the clock forward without firing anything.
    pub fn set_elapsed(&mut self, elapsed: Duration) { self.elapsed = self.elapsed.max(elapsed); }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant { self.origin + self.elapsed }

    fn schedule(&mut self, after: Duration, event: TimerEvent) -> TimerKey {
        let key = TimerKey(self.next_key);
        self.next_key += 1;
        let deadline = self.elapsed + after;
        self.due.insert((deadline, key), event);
        self.deadlines.insert(key, deadline);
        key
    }

    fn cancel(&mut self, key: TimerKey) {
        if let Some(deadline) = self.deadlines.remove(&key) {
            self.due.remove(&(deadline, key));
        }
    }
}

/// Scheduler backed by [`tokio_util::time::DelayQueue`].
#[derive(Debug, Default)]
pub struct DelayQueueScheduler {
    queue: DelayQueue<(TimerKey, TimerEvent)>,
    keys: HashMap<TimerKey, delay_queue::Key>,
    next_key: u64,
}

impl DelayQueueScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Whether no timer is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }

    /// Wait for the next expired timer.
    pub async fn next_expired(&mut self) -> Option<TimerEvent> {
        let expired = self.queue.next().await?;
        let (key, event) = expired.into_inner();
        self.keys.remove(&key);
        Some(event)
    }
}

impl Scheduler for DelayQueueScheduler {
    fn now(&self) -> Instant { Instant::now() }

    fn schedule(&mut self, after: Duration, event: TimerEvent) -> TimerKey {
        let key = TimerKey(self.next_key);
        self.next_key += 1;
        let queue_key = self.queue.insert((key, event), after);
        self.keys.insert(key, queue_key);
        key
    }

    fn cancel(&mut self, key: TimerKey) {
        if let Some(queue_key) = self.keys.remove(&key) {
            self.queue.remove(&queue_key);
        }
    }
}
