//! Pooled, resettable handles for per-thread resources.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Implemented by pooled resources. `recycle` restores the instance to a
/// reusable state when its handle returns to the pool.
pub trait Recyclable {
    fn recycle(&mut self) {}
}

struct Pool<T> {
    idle: Mutex<Vec<T>>,
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

/// A bounded-growth pool of reusable instances.
///
/// [`Recycler::acquire_with`] hands out a [`RecyclerHandle`]; dropping the
/// handle recycles the instance back into the free list. [`Recycler::close`]
/// drops the idle instances and leaves the pool usable;
/// [`Recycler::force_close`] additionally stops pooling, so instances
/// still on loan are dropped when their handles return and every pooled
/// resource is released without waiting on borrowers.
pub struct Recycler<T: Recyclable> {
    pool: Arc<Pool<T>>,
}

impl<T: Recyclable> Default for Recycler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recyclable> Recycler<T> {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Take an idle instance, or construct a fresh one with `new_instance`.
    pub fn acquire_with<E>(
        &self,
        new_instance: impl FnOnce() -> Result<T, E>,
    ) -> Result<RecyclerHandle<T>, E> {
        let existing = self.pool.idle.lock().pop();
        let value = match existing {
            Some(value) => value,
            None => new_instance()?,
        };
        self.pool.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(RecyclerHandle {
            value: Some(value),
            pool: Arc::clone(&self.pool),
        })
    }

    /// Drop all idle instances. Instances still on loan return to the
    /// pool as usual.
    pub fn close(&self) {
        let idle = std::mem::take(&mut *self.pool.idle.lock());
        drop(idle);
    }

    /// [`Recycler::close`], and additionally reclaim in-flight instances:
    /// the pool stops recycling, so instances still on loan are dropped
    /// the moment their handles return. A value owned by a live handle
    /// cannot be dropped out from under it, so reclamation completes at
    /// handle-drop rather than instantly.
    pub fn force_close(&self) {
        self.pool.closed.store(true, Ordering::SeqCst);
        self.close();
    }

    pub fn idle_count(&self) -> usize {
        self.pool.idle.lock().len()
    }

    pub fn outstanding_count(&self) -> usize {
        self.pool.outstanding.load(Ordering::SeqCst)
    }
}

impl<T: Recyclable> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

/// A scoped borrow of a pooled instance.
pub struct RecyclerHandle<T: Recyclable> {
    value: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Recyclable> std::fmt::Debug for RecyclerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecyclerHandle").finish_non_exhaustive()
    }
}

impl<T: Recyclable> Deref for RecyclerHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("recycler handle already returned")
    }
}

impl<T: Recyclable> DerefMut for RecyclerHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("recycler handle already returned")
    }
}

impl<T: Recyclable> Drop for RecyclerHandle<T> {
    fn drop(&mut self) {
        let Some(mut value) = self.value.take() else {
            return;
        };
        self.pool.outstanding.fetch_sub(1, Ordering::SeqCst);
        if self.pool.closed.load(Ordering::SeqCst) {
            return;
        }
        value.recycle();
        self.pool.idle.lock().push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    struct Probe {
        resets: usize,
    }

    impl Recyclable for Probe {
        fn recycle(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn handles_return_to_the_pool_recycled() {
        let pool: Recycler<Probe> = Recycler::new();

        let handle = pool
            .acquire_with(|| Ok::<_, Infallible>(Probe { resets: 0 }))
            .unwrap();
        assert_eq!(pool.outstanding_count(), 1);
        drop(handle);
        assert_eq!(pool.outstanding_count(), 0);
        assert_eq!(pool.idle_count(), 1);

        let handle = pool
            .acquire_with(|| panic!("pool should reuse the idle instance"))
            .unwrap_or_else(|_: Infallible| unreachable!());
        assert_eq!(handle.resets, 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn close_drops_idle_but_keeps_pooling() {
        let pool: Recycler<Probe> = Recycler::new();
        let held = pool
            .acquire_with(|| Ok::<_, Infallible>(Probe { resets: 0 }))
            .unwrap();
        drop(
            pool.acquire_with(|| Ok::<_, Infallible>(Probe { resets: 0 }))
                .unwrap(),
        );
        assert_eq!(pool.idle_count(), 1);

        pool.close();
        assert_eq!(pool.idle_count(), 0);

        // Instances on loan still recycle after a plain close.
        drop(held);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.outstanding_count(), 0);
    }

    #[test]
    fn force_close_reclaims_loaned_instances_on_return() {
        let pool: Recycler<Probe> = Recycler::new();
        let held = pool
            .acquire_with(|| Ok::<_, Infallible>(Probe { resets: 0 }))
            .unwrap();
        drop(
            pool.acquire_with(|| Ok::<_, Infallible>(Probe { resets: 0 }))
                .unwrap(),
        );
        assert_eq!(pool.idle_count(), 1);

        pool.force_close();
        assert_eq!(pool.idle_count(), 0);

        // Returned after force-close: dropped instead of pooled.
        drop(held);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.outstanding_count(), 0);
    }

    #[test]
    fn failed_construction_leaves_counts_untouched() {
        let pool: Recycler<Probe> = Recycler::new();
        let err = pool.acquire_with(|| Err::<Probe, _>("nope")).unwrap_err();
        assert_eq!(err, "nope");
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.outstanding_count(), 0);
    }
}
