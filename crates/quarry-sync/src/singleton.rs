//! Exactly-once construction of shared values, keyed by hashable keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SingletonError<E> {
    /// The producer failed (or panicked) in the thread that won the race;
    /// every waiter observes the same poisoned slot.
    #[error("singleton producer failed in another thread")]
    Poisoned,
    #[error("singleton producer failed: {0}")]
    Init(E),
}

enum Slot<V> {
    Pending,
    Ready(Arc<V>),
    Poisoned,
}

struct Holder<V> {
    slot: Mutex<Slot<V>>,
    ready: Condvar,
}

/// A concurrent map whose values are produced exactly once per key.
///
/// The first caller of [`SingletonMap::get_or_create`] for a key runs the
/// producer; concurrent callers block on a latch until the producer
/// publishes a value or fails. A producer failure publishes a poison
/// marker instead of leaving waiters deadlocked.
pub struct SingletonMap<K, V> {
    map: Mutex<HashMap<K, Arc<Holder<V>>>>,
}

impl<K, V> Default for SingletonMap<K, V> {
    fn default() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> SingletonMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the value for `key`, running `init` if this is the first call
    /// for that key. All callers observe the same `Arc`.
    pub fn get_or_create<E>(
        &self,
        key: K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, SingletonError<E>> {
        let (holder, winner) = {
            let mut map = self.map.lock();
            match map.get(&key) {
                Some(holder) => (Arc::clone(holder), false),
                None => {
                    let holder = Arc::new(Holder {
                        slot: Mutex::new(Slot::Pending),
                        ready: Condvar::new(),
                    });
                    map.insert(key, Arc::clone(&holder));
                    (holder, true)
                }
            }
        };

        if !winner {
            let mut slot = holder.slot.lock();
            loop {
                match &*slot {
                    Slot::Ready(value) => return Ok(Arc::clone(value)),
                    Slot::Poisoned => return Err(SingletonError::Poisoned),
                    Slot::Pending => holder.ready.wait(&mut slot),
                }
            }
        }

        // A panic in `init` must still release the latch; the guard
        // publishes a poison marker unless disarmed.
        let mut guard = PoisonGuard {
            holder: &holder,
            armed: true,
        };
        let result = init();
        guard.armed = false;
        drop(guard);

        let mut slot = holder.slot.lock();
        match result {
            Ok(value) => {
                let value = Arc::new(value);
                *slot = Slot::Ready(Arc::clone(&value));
                holder.ready.notify_all();
                Ok(value)
            }
            Err(err) => {
                *slot = Slot::Poisoned;
                holder.ready.notify_all();
                Err(SingletonError::Init(err))
            }
        }
    }

    /// The already-published value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let holder = Arc::clone(self.map.lock().get(key)?);
        let slot = holder.slot.lock();
        match &*slot {
            Slot::Ready(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Remove and return every published value. Used on session close.
    pub fn drain(&self) -> Vec<Arc<V>> {
        let holders: Vec<Arc<Holder<V>>> = self.map.lock().drain().map(|(_, h)| h).collect();
        holders
            .into_iter()
            .filter_map(|holder| {
                let slot = holder.slot.lock();
                match &*slot {
                    Slot::Ready(value) => Some(Arc::clone(value)),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

struct PoisonGuard<'a, V> {
    holder: &'a Holder<V>,
    armed: bool,
}

impl<V> Drop for PoisonGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.holder.slot.lock();
            *slot = Slot::Poisoned;
            self.holder.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn init_runs_once_per_key() {
        let map: SingletonMap<&'static str, usize> = SingletonMap::new();
        let calls = AtomicUsize::new(0);

        let first = map
            .get_or_create("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(7)
            })
            .unwrap();
        let second = map
            .get_or_create("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(8)
            })
            .unwrap();

        assert_eq!(*first, 7);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_init_poisons_the_key() {
        let map: SingletonMap<u32, u32> = SingletonMap::new();
        let err = map
            .get_or_create(1, || Err::<u32, _>("boom"))
            .unwrap_err();
        assert!(matches!(err, SingletonError::Init("boom")));

        let err = map.get_or_create(1, || Ok::<_, &str>(2)).unwrap_err();
        assert!(matches!(err, SingletonError::Poisoned));
        assert!(map.get(&1).is_none());
    }
}
