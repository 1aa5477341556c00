//! Listener table of a dispatcher and the scoped guard that unregisters from it.
//!
//! A dispatcher routes each dequeued event by `(kind, target)`. The consumer
//! is cloned out of the table before delivery, so consumers may add or remove
//! registrations while an event is being processed, and every event reaches
//! the listener set that existed when it was dequeued.

use super::dispatcher::SharedConsumer;
use crate::error::{BusError, BusResult};
use crate::event::{EventKind, EventTarget};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type ListenerKey = (EventKind, EventTarget);

struct Entry {
    token: u64,
    consumer: SharedConsumer,
}

#[derive(Default)]
pub struct ListenerTable {
    entries: Mutex<HashMap<ListenerKey, Entry>>,
    next_token: AtomicU64,
}

impl ListenerTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `consumer` for every kind in `kinds` addressed to `target`.
    ///
    /// The returned guard removes exactly these entries when dropped.
    pub fn insert(
        self: &Arc<Self>,
        kinds: &[EventKind],
        target: EventTarget,
        consumer: SharedConsumer,
    ) -> BusResult<Registration> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<ListenerKey> = kinds.iter().map(|kind| (*kind, target.clone())).collect();
        if keys.iter().any(|key| entries.contains_key(key)) {
            return Err(BusError::AlreadyRegistered(target.to_string()));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        for key in &keys {
            entries.insert(
                key.clone(),
                Entry {
                    token,
                    consumer: consumer.clone(),
                },
            );
        }
        log::debug!("Registered {} for {:?}", target, kinds);

        Ok(Registration {
            table: Arc::downgrade(self),
            token,
            target,
            keys,
        })
    }

    pub fn lookup(&self, kind: EventKind, target: &EventTarget) -> Option<SharedConsumer> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(kind, target.clone()))
            .map(|entry| entry.consumer.clone())
    }

    pub fn contains(&self, kind: EventKind, target: &EventTarget) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&(kind, target.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, token: u64, keys: &[ListenerKey]) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            // a newer registration may own the key by now
            if entries.get(key).map(|entry| entry.token) == Some(token) {
                entries.remove(key);
            }
        }
    }
}

/// Scoped binding of a consumer to a dispatcher; dropping it unregisters.
pub struct Registration {
    table: Weak<ListenerTable>,
    token: u64,
    target: EventTarget,
    keys: Vec<ListenerKey>,
}

impl Registration {
    pub fn target(&self) -> &EventTarget {
        &self.target
    }

    /// Unregisters now instead of at drop.
    pub fn release(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self.token, &self.keys);
            log::debug!("Unregistered {}", self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::EventConsumer;
    use crate::event::ServiceEvent;
    use crate::service::StubAddress;

    struct Sink;

    impl EventConsumer for Sink {
        fn process_event(&mut self, _event: ServiceEvent) {}
    }

    fn target() -> EventTarget {
        EventTarget::Stub(StubAddress::new("Chat", "main"))
    }

    fn consumer() -> SharedConsumer {
        Arc::new(Mutex::new(Sink))
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let table = ListenerTable::new();
        let registration = table
            .insert(&[EventKind::Request, EventKind::NotifyRequest], target(), consumer())
            .unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.contains(EventKind::Request, &target()));

        drop(registration);
        assert!(table.is_empty());
        assert!(table.lookup(EventKind::Request, &target()).is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let table = ListenerTable::new();
        let _first = table.insert(&[EventKind::Request], target(), consumer()).unwrap();
        let second = table.insert(&[EventKind::Request], target(), consumer());
        assert!(matches!(second, Err(BusError::AlreadyRegistered(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_stale_guard_leaves_newer_registration() {
        let table = ListenerTable::new();
        let first = table.insert(&[EventKind::Request], target(), consumer()).unwrap();
        let keys = first.keys.clone();
        let token = first.token;
        drop(first);

        let _second = table.insert(&[EventKind::Request], target(), consumer()).unwrap();
        table.remove(token, &keys);
        assert!(table.contains(EventKind::Request, &target()));
    }
}
