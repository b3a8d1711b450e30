//! Slow-task diagnostics.
//!
//! A watchdog observes one unit of work and emits a structured warning when
//! it outlives a threshold. It never aborts the work; the diagnostic exists
//! so a stuck or slow handler shows up in the logs while it keeps running.

use std::future::Future;
use std::pin::pin;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// Default threshold after which a deferred handler is reported as slow.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(8);

/// Drives `fut` to completion, logging one warning if it runs past
/// `threshold`.
///
/// `label` and `detail` identify the unit of work in the diagnostic
/// (typically the wire method and request id).
pub async fn watched<F: Future>(label: &str, detail: &str, threshold: Duration, fut: F) -> F::Output {
	let started = Instant::now();
	let mut fut = pin!(fut);

	tokio::select! {
		out = &mut fut => return out,
		() = sleep(threshold) => {
			tracing::warn!(
				target: "verity_worker::watchdog",
				%label,
				%detail,
				elapsed_ms = started.elapsed().as_millis() as u64,
				threshold_ms = threshold.as_millis() as u64,
				"worker.watchdog.slow"
			);
		}
	}

	let out = fut.await;
	tracing::debug!(
		target: "verity_worker::watchdog",
		%label,
		%detail,
		elapsed_ms = started.elapsed().as_millis() as u64,
		"worker.watchdog.slow_completed"
	);
	out
}
