//! Header-framed wire codec.
//!
//! One complete message is a `Content-Length` header block followed by that
//! many bytes of one JSON-RPC object. A single reader decodes frames; all
//! writes are funneled through the endpoint loop, so header and body of a
//! frame can never interleave with another writer's output.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{AnyNotification, AnyRequest, AnyResponse};
use crate::{Error, Result};

const CONTENT_LENGTH: &str = "Content-Length";

/// One wire message, classified by the presence of `id` and `method` fields
/// rather than an explicit type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// A message with both `id` and `method`.
	Request(AnyRequest),
	/// A message with `method` but no `id`.
	Notification(AnyNotification),
	/// A message with `id` but no `method`.
	Response(AnyResponse),
}

/// Envelope adding the `jsonrpc` version marker around a message body.
#[derive(Serialize, Deserialize)]
struct RawMessage<T> {
	jsonrpc: RpcVersion,
	#[serde(flatten)]
	inner: T,
}

#[derive(Serialize, Deserialize)]
enum RpcVersion {
	#[serde(rename = "2.0")]
	V2,
}

impl Message {
	/// Reads one complete message.
	///
	/// Returns [`Error::Eof`] on a clean disconnect before a frame starts.
	/// A malformed header or undecodable body is a protocol error; the caller
	/// treats it as a peer disconnect and terminates the read loop.
	pub async fn read(reader: &mut (impl AsyncBufRead + Unpin)) -> Result<Self> {
		let mut content_length = None;
		let mut line = String::new();
		loop {
			line.clear();
			if reader.read_line(&mut line).await? == 0 {
				return Err(Error::Eof);
			}
			let header = line.trim_end();
			if header.is_empty() {
				break;
			}
			let Some((name, value)) = header.split_once(':') else {
				return Err(Error::Protocol(format!("invalid header: {header}")));
			};
			if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
				let len = value
					.trim()
					.parse::<usize>()
					.map_err(|_| Error::Protocol(format!("invalid {CONTENT_LENGTH}: {value}")))?;
				content_length = Some(len);
			}
			// Other headers (Content-Type) are tolerated and ignored.
		}
		let content_length = content_length.ok_or_else(|| Error::Protocol(format!("missing {CONTENT_LENGTH}")))?;
		let mut body = vec![0u8; content_length];
		reader.read_exact(&mut body).await?;
		let raw: RawMessage<Self> = serde_json::from_slice(&body)?;
		Ok(raw.inner)
	}

	/// Writes one complete message: header block, body, flush.
	pub async fn write(&self, writer: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
		let body = serde_json::to_vec(&RawMessage {
			jsonrpc: RpcVersion::V2,
			inner: self,
		})?;
		writer
			.write_all(format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).as_bytes())
			.await?;
		writer.write_all(&body).await?;
		writer.flush().await?;
		Ok(())
	}
}
