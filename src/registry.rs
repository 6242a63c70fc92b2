//! Registries of live sessions and streams.
//!
//! A [`Registry`] owns the live entries keyed by identifier. When an entry
//! ends, its terminate condition is archived for a grace period so a late
//! request naming it is answered with the original condition instead of a
//! generic `item-not-found`.

use std::{collections::HashMap, hash::Hash, time::Duration};

use log::{debug, info};

use crate::{
    error::Condition,
    metrics,
    session::{Session, SessionId},
    stream::{Stream, StreamName},
    timer::{Scheduler, TimerEvent, TimerKey},
};

/// Extra seconds an archived condition outlives the negotiated wait.
const ARCHIVE_MARGIN: Duration = Duration::from_secs(5);

/// What a registry stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryKind {
    /// BOSH sessions.
    Session,
    /// Streams within sessions.
    Stream,
}

impl RegistryKind {
    fn as_str(self) -> &'static str {
        match self {
            RegistryKind::Session => "session",
            RegistryKind::Stream => "stream",
        }
    }
}

#[derive(Debug)]
struct Archived {
    condition: Option<Condition>,
    timer: TimerKey,
}

/// Live entries plus archived terminate conditions.
#[derive(Debug)]
pub struct Registry<K, V> {
    kind: RegistryKind,
    live: HashMap<K, V>,
    archive: HashMap<K, Archived>,
    total: u64,
}

/// Registry of sessions keyed by [`SessionId`].
pub type SessionRegistry = Registry<SessionId, Session>;
/// Registry of streams keyed by [`StreamName`].
pub type StreamRegistry = Registry<StreamName, Stream>;

impl<K, V> Registry<K, V>
where
    K: Clone + Eq + Hash + std::fmt::Display,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new(kind: RegistryKind) -> Self {
        Self {
            kind,
            live: HashMap::new(),
            archive: HashMap::new(),
            total: 0,
        }
    }

    /// Register a new entry.
    pub fn add(&mut self, key: K, value: V) {
        debug!("{} {key} added", self.kind.as_str());
        self.live.insert(key, value);
        self.total += 1;
        metrics::inc_active(self.kind);
    }

    /// Live entry for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> { self.live.get(key) }

    /// Mutable live entry for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> { self.live.get_mut(key) }

    /// Whether `key` is live.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool { self.live.contains_key(key) }

    /// Keys of every live entry.
    #[must_use]
    pub fn keys(&self) -> Vec<K> { self.live.keys().cloned().collect() }

    /// Remove a live entry and archive its condition for `wait + 5` seconds.
    pub fn remove(
        &mut self,
        key: &K,
        condition: Option<Condition>,
        wait: u64,
        expiry: TimerEvent,
        scheduler: &mut dyn Scheduler,
    ) -> Option<V> {
        let value = self.live.remove(key)?;
        metrics::dec_active(self.kind);
        let grace = Duration::from_secs(wait) + ARCHIVE_MARGIN;
        let timer = scheduler.schedule(grace, expiry);
        info!(
            "{} {key} ended with condition {}",
            self.kind.as_str(),
            condition.as_ref().map_or("none", Condition::as_str)
        );
        if let Some(previous) = self.archive.insert(key.clone(), Archived { condition, timer }) {
            scheduler.cancel(previous.timer);
        }
        Some(value)
    }

    /// Archived condition for a recently ended entry.
    ///
    /// `None` means the key is unknown; `Some(None)` means the entry ended
    /// without a condition.
    #[must_use]
    pub fn archived(&self, key: &K) -> Option<Option<&Condition>> {
        self.archive.get(key).map(|archived| archived.condition.as_ref())
    }

    /// Drop an archived condition once its grace period elapsed.
    pub fn expire(&mut self, key: &K) {
        if self.archive.remove(key).is_some() {
            debug!("{} {key} archive expired", self.kind.as_str());
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn active(&self) -> usize { self.live.len() }

    /// Number of entries ever added.
    #[must_use]
    pub fn total(&self) -> u64 { self.total }

    /// Number of archived conditions.
    #[must_use]
    pub fn archived_len(&self) -> usize { self.archive.len() }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::timer::ManualScheduler;

    fn expiry(sid: &str) -> TimerEvent { TimerEvent::SessionArchiveExpiry(SessionId::from(sid)) }

    #[rstest]
    fn archives_condition_until_expiry() {
        let mut scheduler = ManualScheduler::new();
        let mut registry: Registry<SessionId, u8> = Registry::new(RegistryKind::Session);
        let sid = SessionId::from("a");
        registry.add(sid.clone(), 1);
        assert_eq!(registry.active(), 1);

        let removed = registry.remove(
            &sid,
            Some(Condition::PolicyViolation),
            10,
            expiry("a"),
            &mut scheduler,
        );
        assert_eq!(removed, Some(1));
        assert_eq!(registry.active(), 0);
        assert_eq!(registry.total(), 1);
        assert_eq!(
            registry.archived(&sid),
            Some(Some(&Condition::PolicyViolation))
        );

        assert_eq!(scheduler.pop_due(Duration::from_secs(14)), None);
        assert_eq!(scheduler.pop_due(Duration::from_secs(15)), Some(expiry("a")));
        registry.expire(&sid);
        assert_eq!(registry.archived(&sid), None);
    }

    #[test]
    fn removing_unknown_key_schedules_nothing() {
        let mut scheduler = ManualScheduler::new();
        let mut registry: Registry<SessionId, u8> = Registry::new(RegistryKind::Session);
        let removed = registry.remove(&SessionId::from("x"), None, 10, expiry("x"), &mut scheduler);
        assert_eq!(removed, None);
        assert_eq!(scheduler.armed(), 0);
        assert_eq!(registry.archived_len(), 0);
    }
}
