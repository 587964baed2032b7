//! A shared work queue whose processors may enqueue further work.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::{Interrupted, InterruptionState};

#[derive(Debug, Error)]
pub enum QueueError<E> {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error("worker failed: {0}")]
    Worker(E),
}

struct QueueState<T> {
    units: Vec<T>,
    in_flight: usize,
}

/// A LIFO queue drained by a pool of worker threads.
///
/// While any unit is in flight its worker may add more units, and the
/// in-flight count keeps idle workers parked rather than exiting, so
/// discovered work (e.g. manifest `Class-Path` references) is never lost
/// to premature termination. Worker failures are recorded on the shared
/// [`InterruptionState`], which stops the remaining workers;
/// [`WorkQueue::run`] is a barrier that joins all workers and re-throws
/// the first recorded failure.
pub struct WorkQueue<T, E> {
    state: Mutex<QueueState<T>>,
    work_ready: Condvar,
    interruption: Arc<InterruptionState<E>>,
}

impl<T, E> WorkQueue<T, E> {
    pub fn new(interruption: Arc<InterruptionState<E>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                units: Vec::new(),
                in_flight: 0,
            }),
            work_ready: Condvar::new(),
            interruption,
        }
    }

    pub fn add(&self, unit: T) {
        let mut state = self.state.lock();
        state.units.push(unit);
        self.work_ready.notify_one();
    }

    pub fn add_all(&self, units: impl IntoIterator<Item = T>) {
        let mut state = self.state.lock();
        state.units.extend(units);
        self.work_ready.notify_all();
    }

    /// Remove and return all queued units without processing them.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut self.state.lock().units)
    }

    pub fn interruption(&self) -> &Arc<InterruptionState<E>> {
        &self.interruption
    }

    /// Process the queue on `workers` threads until it runs dry.
    ///
    /// The first processing error interrupts the remaining workers and is
    /// returned once every worker has stopped.
    pub fn run<F>(&self, workers: usize, process: F) -> Result<(), QueueError<E>>
    where
        T: Send,
        E: Send,
        F: Fn(T, &Self) -> Result<(), E> + Sync,
    {
        let workers = workers.max(1);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(unit) = self.next_unit() {
                        let guard = InFlightGuard { queue: self };
                        let result = process(unit, self);
                        drop(guard);
                        if let Err(err) = result {
                            self.interruption.set_error(err);
                            return;
                        }
                    }
                });
            }
        });

        if let Some(err) = self.interruption.take_error() {
            return Err(QueueError::Worker(err));
        }
        self.interruption.check()?;
        Ok(())
    }

    fn next_unit(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if self.interruption.is_interrupted() {
                return None;
            }
            if let Some(unit) = state.units.pop() {
                state.in_flight += 1;
                return Some(unit);
            }
            if state.in_flight == 0 {
                return None;
            }
            // Bounded wait so interruption is observed promptly even when
            // no producer ever wakes us.
            self.work_ready
                .wait_for(&mut state, InterruptionState::<E>::POLL_INTERVAL);
        }
    }

    fn complete_unit(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 && state.units.is_empty() {
            self.work_ready.notify_all();
        }
    }
}

/// Keeps the in-flight count balanced on every exit path, including a
/// panicking processor; a panic also cancels the remaining workers so the
/// scope can unwind instead of deadlocking on the in-flight count.
struct InFlightGuard<'a, T, E> {
    queue: &'a WorkQueue<T, E>,
}

impl<T, E> Drop for InFlightGuard<'_, T, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.queue.interruption.interrupt();
        }
        self.queue.complete_unit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn processes_every_unit() {
        let queue = WorkQueue::new(Arc::new(InterruptionState::new()));
        queue.add_all(0..100u32);
        let seen = AtomicUsize::new(0);
        queue
            .run(4, |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            })
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn units_added_during_processing_are_not_lost() {
        let queue = WorkQueue::new(Arc::new(InterruptionState::new()));
        queue.add(0u32);
        let seen = AtomicUsize::new(0);
        queue
            .run(4, |unit, queue| {
                seen.fetch_add(1, Ordering::SeqCst);
                if unit < 20 {
                    queue.add(unit + 1);
                }
                Ok::<_, Infallible>(())
            })
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn first_error_wins_and_interrupts() {
        let interruption = Arc::new(InterruptionState::new());
        let queue = WorkQueue::new(Arc::clone(&interruption));
        queue.add_all(0..1000u32);
        let err = queue
            .run(4, |unit, _| if unit == 0 { Err("boom") } else { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, QueueError::Worker("boom")));
        assert!(interruption.is_interrupted());
        // The barrier consumed the recorded error.
        assert!(interruption.take_error().is_none());
    }

    #[test]
    fn external_interruption_stops_the_run() {
        let interruption = Arc::new(InterruptionState::new());
        interruption.interrupt();
        let queue = WorkQueue::new(Arc::clone(&interruption));
        queue.add_all(0..10u32);
        let err = queue
            .run(2, |_, _| Ok::<_, Infallible>(()))
            .unwrap_err();
        assert!(matches!(err, QueueError::Interrupted(_)));
        assert_eq!(queue.drain().len(), 10);
    }
}
