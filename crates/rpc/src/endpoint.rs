//! The dispatch engine driving one peer channel.
//!
//! One [`Endpoint`] owns everything that crosses the channel: the frame
//! reader, the single writer, the pending map for requests this process
//! issued, and the task set of deferred handlers for requests the peer
//! issued. Dispatch decisions happen in strict arrival order on the reader
//! path; deferred handler completions may finish in any order and are
//! correlated purely by id.

use std::any::Any;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use verity_worker::{CancelToken, WorkerPool, watchdog};

use crate::message::Message;
use crate::router::{NotifyDispatch, RequestDispatch, Router};
use crate::types::{AnyNotification, AnyRequest, AnyResponse, RequestId, ResponseError};
use crate::{Error, Result};

/// Control notification cancelling a previously issued request, in either
/// direction.
pub const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

#[derive(Deserialize)]
struct CancelParams {
	id: RequestId,
}

/// A request the peer sent that is executing on the worker pool.
struct InFlight {
	token: CancelToken,
	method: String,
}

/// Internal events fed to the main loop by [`PeerSocket`] handles.
enum LoopEvent {
	/// A request this process issues; the loop assigns the id.
	OutgoingRequest(AnyRequest, oneshot::Sender<AnyResponse>),
	/// A fire-and-forget outgoing message.
	Outgoing(Message),
}

/// The dispatcher/concurrency core for one duplex channel.
pub struct Endpoint<S> {
	/// Routing table and server state.
	router: Router<S>,
	/// Receiver for events from [`PeerSocket`] handles.
	rx: mpsc::UnboundedReceiver<LoopEvent>,
	/// Counter for outgoing request ids.
	outgoing_id: i64,
	/// Requests this process sent, awaiting responses.
	outgoing: HashMap<RequestId, oneshot::Sender<AnyResponse>>,
	/// Deferred handlers in flight. `None` outputs are notification tasks.
	tasks: JoinSet<Option<AnyResponse>>,
	/// Cancellation bookkeeping for deferred peer requests.
	in_flight: HashMap<RequestId, InFlight>,
	/// Admission pool bounding concurrent deferred handlers.
	pool: WorkerPool,
	/// Threshold past which a deferred handler is reported as slow.
	watchdog_threshold: Duration,
}

impl<S> Endpoint<S> {
	/// Creates an endpoint and the socket feeding it.
	///
	/// The builder receives the socket so the server state can issue requests
	/// and notifications toward the peer from inside handlers.
	#[must_use]
	pub fn new(builder: impl FnOnce(PeerSocket) -> Router<S>) -> (Self, PeerSocket) {
		let (tx, rx) = mpsc::unbounded_channel();
		let socket = PeerSocket { tx };
		let this = Self {
			router: builder(socket.clone()),
			rx,
			outgoing_id: 0,
			outgoing: HashMap::new(),
			tasks: JoinSet::new(),
			in_flight: HashMap::new(),
			pool: WorkerPool::default(),
			watchdog_threshold: watchdog::DEFAULT_THRESHOLD,
		};
		(this, socket)
	}

	/// Replaces the worker pool (sizing, sharing across endpoints).
	#[must_use]
	pub fn with_pool(mut self, pool: WorkerPool) -> Self {
		self.pool = pool;
		self
	}

	/// Overrides the slow-handler watchdog threshold.
	#[must_use]
	pub fn with_watchdog_threshold(mut self, threshold: Duration) -> Self {
		self.watchdog_threshold = threshold;
		self
	}

	/// A reference to the router and its state.
	#[must_use]
	pub fn router(&self) -> &Router<S> {
		&self.router
	}

	/// A mutable reference to the router and its state.
	#[must_use]
	pub fn router_mut(&mut self) -> &mut Router<S> {
		&mut self.router
	}

	/// Shortcut to [`Endpoint::run`] wrapping `input` in a [`BufReader`].
	#[allow(clippy::missing_errors_doc, reason = "errors documented in Self::run")]
	pub async fn run_buffered(
		self,
		input: impl AsyncRead + Unpin + Send + 'static,
		output: impl AsyncWrite + Unpin,
	) -> Result<()> {
		self.run(BufReader::new(input), output).await
	}

	/// Drives the endpoint until the peer disconnects or a handler breaks
	/// the loop (`exit`).
	///
	/// # Errors
	///
	/// - `Error::Io` when the underlying channels fail.
	/// - `Error::Protocol` / `Error::Deserialize` when the peer sends a
	///   malformed frame; the loop terminates as if the peer disconnected.
	/// - Errors returned from loop-breaking handlers.
	pub async fn run(
		mut self,
		input: impl AsyncBufRead + Unpin + Send + 'static,
		mut output: impl AsyncWrite + Unpin,
	) -> Result<()> {
		// Frames are decoded on their own task: `Message::read` holds partial
		// frame state, and `select!` would drop that state whenever another
		// branch wins.
		let (frame_tx, mut frames) = mpsc::channel::<Result<Message>>(16);
		let reader = tokio::spawn(async move {
			let mut input = input;
			loop {
				let msg = Message::read(&mut input).await;
				let done = msg.is_err();
				if frame_tx.send(msg).await.is_err() || done {
					break;
				}
			}
		});

		let ret = loop {
			let ctl = tokio::select! {
				biased;

				resp = self.tasks.join_next(), if !self.tasks.is_empty() => {
					self.finish_task(resp)
				}

				event = self.rx.recv() => match event {
					Some(event) => self.dispatch_event(event),
					// All sockets dropped; nothing can feed the loop anymore.
					None => break Ok(()),
				},

				msg = frames.recv() => match msg {
					Some(Ok(msg)) => self.dispatch_message(msg),
					Some(Err(Error::Eof)) | None => break Ok(()),
					Some(Err(err)) => {
						error!(error = %err, "rpc.read.terminated");
						break Err(err);
					}
				},
			};

			let msg = match ctl {
				ControlFlow::Continue(Some(msg)) => msg,
				ControlFlow::Continue(None) => continue,
				ControlFlow::Break(ret) => break ret,
			};
			msg.write(&mut output).await?;
		};

		reader.abort();
		output.shutdown().await?;
		ret
	}

	/// Routes one incoming message in arrival order.
	fn dispatch_message(&mut self, msg: Message) -> ControlFlow<Result<()>, Option<Message>> {
		match msg {
			Message::Request(req) => self.dispatch_peer_request(req),
			Message::Response(resp) => {
				match self.outgoing.remove(&resp.id) {
					// The caller may have timed out and dropped the receiver.
					Some(tx) => drop(tx.send(resp)),
					None => warn!(id = %resp.id, "rpc.response.unmatched"),
				}
				ControlFlow::Continue(None)
			}
			Message::Notification(notif) => {
				if notif.method == CANCEL_REQUEST_METHOD {
					self.cancel_in_flight(notif.params);
					return ControlFlow::Continue(None);
				}
				self.dispatch_peer_notification(notif)
			}
		}
	}

	fn dispatch_peer_request(&mut self, req: AnyRequest) -> ControlFlow<Result<()>, Option<Message>> {
		let id = req.id.clone();
		let method = req.method.clone();
		let token = CancelToken::new();
		let dispatch = std::panic::catch_unwind(AssertUnwindSafe(|| self.router.dispatch_request(req, token.clone())));
		match dispatch {
			Ok(RequestDispatch::Ready(result)) => {
				let resp = match result {
					Ok(value) => AnyResponse::ok(id, value),
					Err(err) => AnyResponse::err(id, err),
				};
				ControlFlow::Continue(Some(Message::Response(resp)))
			}
			Ok(RequestDispatch::Deferred(fut)) => {
				self.spawn_deferred_request(id, method, fut, token);
				ControlFlow::Continue(None)
			}
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				error!(%method, panic = %message, "rpc.request.panicked");
				ControlFlow::Continue(Some(Message::Response(AnyResponse::err(
					id,
					ResponseError::internal(message),
				))))
			}
		}
	}

	fn dispatch_peer_notification(&mut self, notif: AnyNotification) -> ControlFlow<Result<()>, Option<Message>> {
		let method = notif.method.clone();
		let dispatch = std::panic::catch_unwind(AssertUnwindSafe(|| self.router.dispatch_notification(notif)));
		match dispatch {
			Ok(NotifyDispatch::Done(ControlFlow::Continue(()))) => ControlFlow::Continue(None),
			Ok(NotifyDispatch::Done(ControlFlow::Break(ret))) => ControlFlow::Break(ret),
			Ok(NotifyDispatch::Deferred(fut)) => {
				self.spawn_deferred_notification(method, fut);
				ControlFlow::Continue(None)
			}
			Err(payload) => {
				// No response channel for notifications; log only.
				error!(%method, panic = %panic_message(payload.as_ref()), "rpc.notification.panicked");
				ControlFlow::Continue(None)
			}
		}
	}

	/// Submits a deferred request handler to the bounded pool.
	///
	/// The handler body runs only after a pool permit is acquired and the
	/// cancellation token was observed unset, which guarantees a request
	/// cancelled before its turn never executes.
	fn spawn_deferred_request(
		&mut self,
		id: RequestId,
		method: String,
		fut: BoxFuture<'static, std::result::Result<JsonValue, ResponseError>>,
		token: CancelToken,
	) {
		self.in_flight.insert(
			id.clone(),
			InFlight {
				token: token.clone(),
				method: method.clone(),
			},
		);
		let pool = self.pool.clone();
		let threshold = self.watchdog_threshold;
		self.tasks.spawn(async move {
			let Ok(_permit) = pool.acquire().await else {
				return Some(AnyResponse::err(id, ResponseError::internal("worker pool closed")));
			};
			if token.is_cancelled() {
				return Some(AnyResponse::err(id, ResponseError::request_cancelled()));
			}
			let detail = id.to_string();
			let outcome = watchdog::watched(&method, &detail, threshold, AssertUnwindSafe(fut).catch_unwind()).await;
			let resp = match outcome {
				Ok(Ok(value)) => AnyResponse::ok(id, value),
				Ok(Err(err)) => AnyResponse::err(id, err),
				Err(payload) => {
					let message = panic_message(payload.as_ref());
					error!(%method, panic = %message, "rpc.request.panicked");
					AnyResponse::err(id, ResponseError::internal(message))
				}
			};
			Some(resp)
		});
	}

	fn spawn_deferred_notification(&mut self, method: String, fut: BoxFuture<'static, std::result::Result<(), ResponseError>>) {
		let pool = self.pool.clone();
		let threshold = self.watchdog_threshold;
		self.tasks.spawn(async move {
			let Ok(_permit) = pool.acquire().await else {
				return None;
			};
			match watchdog::watched(&method, "notification", threshold, AssertUnwindSafe(fut).catch_unwind()).await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => error!(%method, error = %err, "rpc.notification.failed"),
				Err(payload) => error!(%method, panic = %panic_message(payload.as_ref()), "rpc.notification.panicked"),
			}
			None
		});
	}

	/// Handles `$/cancelRequest` for a request the peer sent to this process.
	///
	/// Best-effort by design: a unit of work that has not started yet is
	/// prevented from starting; a running handler is only signalled and may
	/// observe the token at its own check points.
	fn cancel_in_flight(&mut self, params: JsonValue) {
		let id = match serde_json::from_value::<CancelParams>(params) {
			Ok(params) => params.id,
			Err(err) => {
				warn!(error = %err, "rpc.cancel.invalid_params");
				return;
			}
		};
		match self.in_flight.get(&id) {
			Some(entry) => {
				debug!(%id, method = %entry.method, "rpc.cancel.signalled");
				entry.token.cancel();
			}
			// Already completed, or it ran inline; either way a response has
			// been or will be written for it.
			None => debug!(%id, "rpc.cancel.not_in_flight"),
		}
	}

	/// Collects one deferred-task completion.
	fn finish_task(
		&mut self,
		joined: Option<std::result::Result<Option<AnyResponse>, tokio::task::JoinError>>,
	) -> ControlFlow<Result<()>, Option<Message>> {
		match joined {
			Some(Ok(Some(resp))) => {
				self.in_flight.remove(&resp.id);
				ControlFlow::Continue(Some(Message::Response(resp)))
			}
			Some(Ok(None)) => ControlFlow::Continue(None),
			Some(Err(err)) => {
				error!(error = %err, "rpc.task.join_failed");
				ControlFlow::Continue(None)
			}
			None => ControlFlow::Continue(None),
		}
	}

	/// Routes an internal event from a socket handle.
	fn dispatch_event(&mut self, event: LoopEvent) -> ControlFlow<Result<()>, Option<Message>> {
		match event {
			LoopEvent::OutgoingRequest(mut req, tx) => {
				req.id = RequestId::Number(self.outgoing_id);
				self.outgoing_id += 1;
				assert!(self.outgoing.insert(req.id.clone(), tx).is_none());
				ControlFlow::Continue(Some(Message::Request(req)))
			}
			LoopEvent::Outgoing(msg) => ControlFlow::Continue(Some(msg)),
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&'static str>()
		.map(|s| (*s).to_owned())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "handler panicked".to_owned())
}

/// Cloneable handle for talking to the peer through the endpoint loop.
///
/// All messages funnel through the loop's single writer, so concurrent
/// callers never interleave frames.
#[derive(Debug, Clone)]
pub struct PeerSocket {
	tx: mpsc::UnboundedSender<LoopEvent>,
}

impl PeerSocket {
	/// Issues a typed request and awaits its response.
	///
	/// Returns immediately-pending: the message is written by the loop and
	/// the future resolves when the matching response arrives. Fails with
	/// [`Error::ServiceStopped`] when the channel closed first.
	pub async fn request<R: lsp_types::request::Request>(&self, params: R::Params) -> Result<R::Result> {
		let raw = self.request_raw(R::METHOD, serde_json::to_value(params)?).await?;
		Ok(serde_json::from_value(raw)?)
	}

	/// Issues a typed request with a deadline.
	pub async fn request_timeout<R: lsp_types::request::Request>(&self, params: R::Params, timeout: Duration) -> Result<R::Result> {
		tokio::time::timeout(timeout, self.request::<R>(params))
			.await
			.map_err(|_| Error::RequestTimeout(R::METHOD.to_owned()))?
	}

	/// Issues a request by raw method name and params.
	pub async fn request_raw(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
		let (tx, rx) = oneshot::channel();
		let req = AnyRequest {
			// Placeholder; the loop assigns the real id.
			id: RequestId::Number(0),
			method: method.to_owned(),
			params,
		};
		self.tx
			.send(LoopEvent::OutgoingRequest(req, tx))
			.map_err(|_| Error::ServiceStopped)?;
		let resp = rx.await.map_err(|_| Error::ServiceStopped)?;
		match resp.error {
			Some(err) => Err(Error::Response(err)),
			None => Ok(resp.result.unwrap_or(JsonValue::Null)),
		}
	}

	/// Sends a typed notification. No bookkeeping, no response expected.
	pub fn notify<N: lsp_types::notification::Notification>(&self, params: N::Params) -> Result<()> {
		self.notify_raw(N::METHOD, serde_json::to_value(params)?)
	}

	/// Sends a notification by raw method name and params.
	pub fn notify_raw(&self, method: &str, params: JsonValue) -> Result<()> {
		self.tx
			.send(LoopEvent::Outgoing(Message::Notification(AnyNotification {
				method: method.to_owned(),
				params,
			})))
			.map_err(|_| Error::ServiceStopped)
	}

	/// Requests cancellation of a previously issued request.
	pub fn cancel(&self, id: RequestId) -> Result<()> {
		self.notify_raw(CANCEL_REQUEST_METHOD, serde_json::json!({ "id": id }))
	}
}
