use tokio_util::sync::CancellationToken;

/// Cooperative cancellation token for deferred handlers.
///
/// Cancellation is advisory: it prevents not-yet-started work from starting
/// and lets running handlers observe the request at their own check points.
/// Nothing here preempts a running future.
#[derive(Debug, Default, Clone)]
pub struct CancelToken {
	inner: CancellationToken,
}

impl CancelToken {
	/// Creates an uncancelled token.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.inner.cancel();
	}

	/// Returns true when cancellation was requested.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.inner.is_cancelled()
	}

	/// Resolves when cancellation is requested.
	pub async fn cancelled(&self) {
		self.inner.cancelled().await;
	}

	/// Creates a child token cancelled together with its parent.
	#[must_use]
	pub fn child(&self) -> Self {
		Self {
			inner: self.inner.child_token(),
		}
	}
}
