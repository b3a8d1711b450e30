//! Method routing with declared dispatch modes.
//!
//! A [`Router`] owns the server state and an explicit lookup table from wire
//! method name to handler, built once at construction. Whether a method runs
//! inline on the reader path or deferred on the worker pool is declared at
//! registration time, not inferred at call sites: handlers that mutate
//! workspace state register with [`Router::request_sync`] /
//! [`Router::notification_sync`] so they observe messages in strict arrival
//! order, while read-only or long-running handlers register with the `async`
//! variants and may run concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;

use futures::future::BoxFuture;
use lsp_types::notification::Notification;
use lsp_types::request::Request;
use serde_json::Value as JsonValue;
use verity_worker::CancelToken;

use crate::types::{AnyNotification, AnyRequest, ResponseError};

/// Outcome of resolving a request against the routing table.
pub enum RequestDispatch {
	/// The handler ran inline; the response is ready to be written.
	Ready(Result<JsonValue, ResponseError>),
	/// The handler produced a deferred unit of work for the worker pool.
	Deferred(BoxFuture<'static, Result<JsonValue, ResponseError>>),
}

/// Outcome of resolving a notification against the routing table.
pub enum NotifyDispatch {
	/// The handler ran inline. `Break` stops the endpoint main loop.
	Done(ControlFlow<crate::Result<()>>),
	/// The handler produced a deferred unit of work; its outcome is only
	/// logged, notifications have no response channel.
	Deferred(BoxFuture<'static, Result<(), ResponseError>>),
}

type RequestHandler<S> = Box<dyn Fn(&mut S, AnyRequest, CancelToken) -> RequestDispatch + Send>;
type NotificationHandler<S> = Box<dyn Fn(&mut S, AnyNotification) -> NotifyDispatch + Send>;

/// Explicit method-to-handler table bound to a server state `S`.
pub struct Router<S> {
	state: S,
	requests: HashMap<&'static str, RequestHandler<S>>,
	notifications: HashMap<&'static str, NotificationHandler<S>>,
}

impl<S> Router<S> {
	/// Creates a router with an empty table.
	#[must_use]
	pub fn new(state: S) -> Self {
		Self {
			state,
			requests: HashMap::new(),
			notifications: HashMap::new(),
		}
	}

	/// A reference to the owned state.
	#[must_use]
	pub fn state(&self) -> &S {
		&self.state
	}

	/// A mutable reference to the owned state.
	#[must_use]
	pub fn state_mut(&mut self) -> &mut S {
		&mut self.state
	}

	/// Registers a request handler that runs inline on the reader path.
	///
	/// Use for handlers that must observe workspace mutations in strict
	/// arrival order. The response is written before the next incoming
	/// message is dispatched.
	pub fn request_sync<R: Request>(
		&mut self,
		f: impl Fn(&mut S, R::Params) -> Result<R::Result, ResponseError> + Send + 'static,
	) -> &mut Self {
		self.requests.insert(
			R::METHOD,
			Box::new(move |state, req, _token| {
				let params = match serde_json::from_value::<R::Params>(req.params) {
					Ok(params) => params,
					Err(err) => return RequestDispatch::Ready(Err(ResponseError::invalid_params(err))),
				};
				RequestDispatch::Ready(f(state, params).and_then(serialize_result))
			}),
		);
		self
	}

	/// Registers a request handler deferred to the bounded worker pool.
	///
	/// The closure runs inline and should only capture what the returned
	/// future needs; the future itself runs on the pool and receives the
	/// request's [`CancelToken`] to observe at its own check points.
	pub fn request_async<R: Request, Fut>(
		&mut self,
		f: impl Fn(&mut S, R::Params, CancelToken) -> Fut + Send + 'static,
	) -> &mut Self
	where
		Fut: Future<Output = Result<R::Result, ResponseError>> + Send + 'static,
	{
		self.requests.insert(
			R::METHOD,
			Box::new(move |state, req, token| {
				let params = match serde_json::from_value::<R::Params>(req.params) {
					Ok(params) => params,
					Err(err) => return RequestDispatch::Ready(Err(ResponseError::invalid_params(err))),
				};
				let fut = f(state, params, token);
				RequestDispatch::Deferred(Box::pin(async move { fut.await.and_then(serialize_result) }))
			}),
		);
		self
	}

	/// Registers a notification handler that runs inline on the reader path.
	///
	/// Returning `ControlFlow::Break` stops the endpoint main loop (used by
	/// `exit`).
	pub fn notification_sync<N: Notification>(
		&mut self,
		f: impl Fn(&mut S, N::Params) -> ControlFlow<crate::Result<()>> + Send + 'static,
	) -> &mut Self {
		self.notifications.insert(
			N::METHOD,
			Box::new(move |state, notif| {
				let params = match serde_json::from_value::<N::Params>(notif.params) {
					Ok(params) => params,
					Err(err) => {
						tracing::warn!(method = N::METHOD, error = %err, "rpc.notification.invalid_params");
						return NotifyDispatch::Done(ControlFlow::Continue(()));
					}
				};
				NotifyDispatch::Done(f(state, params))
			}),
		);
		self
	}

	/// Registers a notification handler deferred to the bounded worker pool.
	pub fn notification_async<N: Notification, Fut>(
		&mut self,
		f: impl Fn(&mut S, N::Params) -> Fut + Send + 'static,
	) -> &mut Self
	where
		Fut: Future<Output = Result<(), ResponseError>> + Send + 'static,
	{
		self.notifications.insert(
			N::METHOD,
			Box::new(move |state, notif| {
				let params = match serde_json::from_value::<N::Params>(notif.params) {
					Ok(params) => params,
					Err(err) => {
						tracing::warn!(method = N::METHOD, error = %err, "rpc.notification.invalid_params");
						return NotifyDispatch::Done(ControlFlow::Continue(()));
					}
				};
				NotifyDispatch::Deferred(Box::pin(f(state, params)))
			}),
		);
		self
	}

	/// Resolves and invokes the handler for a peer request.
	///
	/// An unregistered method yields a ready `METHOD_NOT_FOUND` error and
	/// never any other failure mode.
	pub fn dispatch_request(&mut self, req: AnyRequest, token: CancelToken) -> RequestDispatch {
		match self.requests.get(req.method.as_str()) {
			Some(handler) => handler(&mut self.state, req, token),
			None => RequestDispatch::Ready(Err(ResponseError::method_not_found(&req.method))),
		}
	}

	/// Resolves and invokes the handler for a peer notification.
	///
	/// Unregistered notifications are dropped; `$/`-prefixed ones are
	/// optional by protocol and only logged at debug level.
	pub fn dispatch_notification(&mut self, notif: AnyNotification) -> NotifyDispatch {
		match self.notifications.get(notif.method.as_str()) {
			Some(handler) => handler(&mut self.state, notif),
			None => {
				if notif.method.starts_with("$/") {
					tracing::debug!(method = %notif.method, "rpc.notification.ignored");
				} else {
					tracing::warn!(method = %notif.method, "rpc.notification.unhandled");
				}
				NotifyDispatch::Done(ControlFlow::Continue(()))
			}
		}
	}
}

fn serialize_result<T: serde::Serialize>(value: T) -> Result<JsonValue, ResponseError> {
	serde_json::to_value(value).map_err(|err| ResponseError::internal(format!("serialize response: {err}")))
}
