//! Concurrency primitives shared by the scan pipeline.
//!
//! Scanning is driven by a fixed-size pool of worker threads doing blocking
//! I/O, coordinated through a handful of primitives: a [`SingletonMap`] for
//! exactly-once construction of shared resources, a [`Recycler`] pooling
//! resettable per-thread handles, an [`InterruptionState`] carrying the
//! cancellation flag and the first worker failure, and a [`WorkQueue`]
//! whose processors may enqueue further work.

mod interrupt;
mod queue;
mod recycler;
mod singleton;

pub use interrupt::{Interrupted, InterruptionState};
pub use queue::{QueueError, WorkQueue};
pub use recycler::{Recyclable, Recycler, RecyclerHandle};
pub use singleton::{SingletonError, SingletonMap};
