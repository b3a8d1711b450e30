use std::sync::Arc;
use std::thread;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Lower bound for the default pool size.
const MIN_WORKERS: usize = 5;
/// Upper bound for the default pool size.
const MAX_WORKERS: usize = 19;

/// Returns the default pool capacity, scaled from available cores.
///
/// Twice the core count, clamped to `5..=19`. The clamp keeps small machines
/// responsive and stops large machines from admitting an unbounded number of
/// long-running handlers at once.
#[must_use]
pub fn default_pool_size() -> usize {
	thread::available_parallelism().map_or(MIN_WORKERS, |n| (n.get() * 2).clamp(MIN_WORKERS, MAX_WORKERS))
}

/// Semaphore-bounded admission pool for deferred request handlers.
///
/// The pool does not own tasks; callers spawn their own futures and acquire a
/// permit before running the handler body. Holding the permit for the full
/// handler duration bounds the effective request concurrency to the pool
/// capacity.
#[derive(Debug, Clone)]
pub struct WorkerPool {
	permits: Arc<Semaphore>,
	capacity: usize,
}

impl Default for WorkerPool {
	fn default() -> Self {
		Self::new(default_pool_size())
	}
}

impl WorkerPool {
	/// Creates a pool admitting at most `capacity` concurrent units of work.
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		Self {
			permits: Arc::new(Semaphore::new(capacity)),
			capacity,
		}
	}

	/// Total pool capacity.
	#[must_use]
	pub const fn capacity(&self) -> usize {
		self.capacity
	}

	/// Number of units of work currently admitted.
	#[must_use]
	pub fn in_use(&self) -> usize {
		self.capacity - self.permits.available_permits()
	}

	/// Waits for an admission permit.
	///
	/// The returned permit must be held for the full duration of the unit of
	/// work. Fails only if the pool was closed.
	pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
		tracing::trace!(in_use = self.in_use(), capacity = self.capacity, "worker.pool.acquire");
		self.permits.clone().acquire_owned().await
	}
}
