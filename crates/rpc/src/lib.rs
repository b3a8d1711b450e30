//! Framed JSON-RPC backbone shared by the verity tooling servers.
//!
//! Every verity server process (language server, debug adapter, console
//! server, inspector) talks to its editor over the same duplex channel: a
//! `Content-Length`-framed stream of JSON-RPC 2.0 messages. This crate is
//! that backbone:
//!
//! * [`Message`]: wire codec — one reader decodes complete frames, one writer
//!   emits them without interleaving.
//! * [`Router`]: explicit method-to-handler table with a declared per-method
//!   dispatch mode (inline on the reader path, or deferred to the bounded
//!   worker pool).
//! * [`Endpoint`]: the dispatch engine — classifies incoming messages, runs
//!   peer requests, correlates responses to requests this process issued,
//!   propagates cancellation and watchdogs slow handlers.
//! * [`PeerSocket`]: cloneable handle for issuing requests and notifications
//!   toward the peer from anywhere in the process.

#![warn(missing_docs)]

use std::io;

/// Re-export of the [`lsp_types`] dependency of this crate.
pub use lsp_types;
pub use serde_json::Value as JsonValue;
/// Re-export of the cancellation token deferred handlers receive.
pub use verity_worker::CancelToken;

mod endpoint;
mod message;
mod router;
mod types;

pub use endpoint::{CANCEL_REQUEST_METHOD, Endpoint, PeerSocket};
pub use message::Message;
pub use router::{NotifyDispatch, RequestDispatch, Router};
pub use types::{AnyNotification, AnyRequest, AnyResponse, ErrorCode, RequestId, ResponseError};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The endpoint main loop stopped while a request was outstanding.
	#[error("service stopped")]
	ServiceStopped,
	/// The peer sent undecodable or invalid messages.
	#[error("deserialization failed: {0}")]
	Deserialize(String),
	/// The peer replied with an error.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The request timed out.
	#[error("request timed out: {0}")]
	RequestTimeout(String),
	/// The peer violates the framing or JSON-RPC contract.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// Input/output errors from the underlying channels.
	#[error("{0}")]
	Io(String),
	/// The underlying channel reached EOF (end of file).
	#[error("the underlying channel reached EOF")]
	Eof,
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Self::Deserialize(e.to_string())
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Self::Io(e.to_string())
	}
}
