//! JSON-RPC 2.0 message bodies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Identifier of a request, correlating it with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Numeric id.
	Number(i64),
	/// String id.
	String(String),
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Number(n) => n.fmt(f),
			Self::String(s) => s.fmt(f),
		}
	}
}

impl From<i64> for RequestId {
	fn from(n: i64) -> Self {
		Self::Number(n)
	}
}

impl From<String> for RequestId {
	fn from(s: String) -> Self {
		Self::String(s)
	}
}

/// A request the peer expects a response for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyRequest {
	/// Request id, echoed verbatim in the response.
	pub id: RequestId,
	/// Wire method name.
	pub method: String,
	/// Method parameters. `Null` when absent on the wire.
	#[serde(default, skip_serializing_if = "JsonValue::is_null")]
	pub params: JsonValue,
}

/// A message with no id; elicits no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyNotification {
	/// Wire method name.
	pub method: String,
	/// Method parameters. `Null` when absent on the wire.
	#[serde(default, skip_serializing_if = "JsonValue::is_null")]
	pub params: JsonValue,
}

/// The response to a request, carrying either a result or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyResponse {
	/// Id of the request this responds to.
	pub id: RequestId,
	/// Successful result. Mutually exclusive with `error`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Error outcome. Mutually exclusive with `result`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

impl AnyResponse {
	/// Creates a successful response.
	#[must_use]
	pub const fn ok(id: RequestId, result: JsonValue) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	/// Creates an error response.
	#[must_use]
	pub const fn err(id: RequestId, error: ResponseError) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
		}
	}
}

/// Well-known JSON-RPC and LSP error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
	/// Invalid JSON was received by the server.
	pub const PARSE_ERROR: Self = Self(-32700);
	/// The JSON sent is not a valid request object.
	pub const INVALID_REQUEST: Self = Self(-32600);
	/// The method does not exist or is not registered.
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	/// Invalid method parameters.
	pub const INVALID_PARAMS: Self = Self(-32602);
	/// Internal error, including handler faults.
	pub const INTERNAL_ERROR: Self = Self(-32603);
	/// A request arrived before the `initialize` handshake completed.
	pub const SERVER_NOT_INITIALIZED: Self = Self(-32002);
	/// The handler observed cancellation and terminated early.
	pub const REQUEST_CANCELLED: Self = Self(-32800);
	/// The document was modified while the request was computed.
	pub const CONTENT_MODIFIED: Self = Self(-32801);
}

/// Error body of an [`AnyResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {})", .code.0)]
pub struct ResponseError {
	/// Machine-readable error code.
	pub code: ErrorCode,
	/// Human-readable description.
	pub message: String,
	/// Optional structured payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// Creates an error with the given code and message.
	#[must_use]
	pub fn new(code: ErrorCode, message: impl fmt::Display) -> Self {
		Self {
			code,
			message: message.to_string(),
			data: None,
		}
	}

	/// The wire method has no registered handler.
	#[must_use]
	pub fn method_not_found(method: &str) -> Self {
		Self::new(ErrorCode::METHOD_NOT_FOUND, format!("method not found: {method}"))
	}

	/// The handler observed cancellation.
	#[must_use]
	pub fn request_cancelled() -> Self {
		Self::new(ErrorCode::REQUEST_CANCELLED, "request cancelled")
	}

	/// The request parameters failed to decode.
	#[must_use]
	pub fn invalid_params(message: impl fmt::Display) -> Self {
		Self::new(ErrorCode::INVALID_PARAMS, message)
	}

	/// The request is not valid in the current server state.
	#[must_use]
	pub fn invalid_request(message: impl fmt::Display) -> Self {
		Self::new(ErrorCode::INVALID_REQUEST, message)
	}

	/// A handler fault, surfaced as a structured response instead of a crash.
	#[must_use]
	pub fn internal(message: impl fmt::Display) -> Self {
		Self::new(ErrorCode::INTERNAL_ERROR, message)
	}

	/// The `initialize` handshake has not completed yet.
	#[must_use]
	pub fn not_initialized() -> Self {
		Self::new(ErrorCode::SERVER_NOT_INITIALIZED, "server not initialized")
	}
}
