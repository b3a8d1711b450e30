//! End-to-end endpoint behavior over an in-memory duplex channel.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value as JsonValue, json};
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf, duplex, split};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use verity_rpc::{
	AnyNotification, AnyRequest, AnyResponse, CANCEL_REQUEST_METHOD, Endpoint, Error, ErrorCode, Message, PeerSocket,
	RequestId, Router,
};
use verity_worker::WorkerPool;

enum Echo {}
impl lsp_types::request::Request for Echo {
	type Params = JsonValue;
	type Result = JsonValue;
	const METHOD: &'static str = "test/echo";
}

enum Block {}
impl lsp_types::request::Request for Block {
	type Params = JsonValue;
	type Result = JsonValue;
	const METHOD: &'static str = "test/block";
}

enum Marker {}
impl lsp_types::request::Request for Marker {
	type Params = JsonValue;
	type Result = JsonValue;
	const METHOD: &'static str = "test/marker";
}

enum Boom {}
impl lsp_types::request::Request for Boom {
	type Params = JsonValue;
	type Result = JsonValue;
	const METHOD: &'static str = "test/boom";
}

enum Ping {}
impl lsp_types::notification::Notification for Ping {
	type Params = JsonValue;
	const METHOD: &'static str = "test/ping";
}

enum SlowPing {}
impl lsp_types::notification::Notification for SlowPing {
	type Params = JsonValue;
	const METHOD: &'static str = "test/slowPing";
}

#[derive(Default)]
struct TestState {
	gate: Arc<Notify>,
	marker_ran: Arc<AtomicBool>,
	pings: Arc<AtomicUsize>,
}

struct Client {
	reader: BufReader<ReadHalf<DuplexStream>>,
	writer: WriteHalf<DuplexStream>,
}

impl Client {
	async fn send(&mut self, msg: Message) {
		msg.write(&mut self.writer).await.unwrap();
	}

	async fn request(&mut self, id: i64, method: &str, params: JsonValue) {
		self.send(Message::Request(AnyRequest {
			id: RequestId::Number(id),
			method: method.into(),
			params,
		}))
		.await;
	}

	async fn notify(&mut self, method: &str, params: JsonValue) {
		self.send(Message::Notification(AnyNotification {
			method: method.into(),
			params,
		}))
		.await;
	}

	async fn recv_response(&mut self) -> AnyResponse {
		match Message::read(&mut self.reader).await.unwrap() {
			Message::Response(resp) => resp,
			other => panic!("expected response, got {other:?}"),
		}
	}
}

fn build_router(state: TestState) -> Router<TestState> {
	let mut router = Router::new(state);
	router
		.request_sync::<Echo>(|_, params| Ok(params))
		.request_async::<Block, _>(|state, _params, _token| {
			let gate = state.gate.clone();
			async move {
				gate.notified().await;
				Ok(json!("unblocked"))
			}
		})
		.request_async::<Marker, _>(|state, _params, _token| {
			let ran = state.marker_ran.clone();
			async move {
				ran.store(true, Ordering::SeqCst);
				Ok(json!("ran"))
			}
		})
		.request_sync::<Boom>(|_, _params| -> Result<JsonValue, _> { panic!("boom handler fault") })
		.notification_sync::<Ping>(|state, _| {
			state.pings.fetch_add(1, Ordering::SeqCst);
			ControlFlow::Continue(())
		})
		.notification_async::<SlowPing, _>(|state, _| {
			let pings = state.pings.clone();
			async move {
				tokio::time::sleep(Duration::from_millis(10)).await;
				pings.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
		});
	router
}

fn start(pool: WorkerPool) -> (Client, TestState, PeerSocket, JoinHandle<verity_rpc::Result<()>>) {
	let state = TestState::default();
	let mirror = TestState {
		gate: state.gate.clone(),
		marker_ran: state.marker_ran.clone(),
		pings: state.pings.clone(),
	};
	let (endpoint, socket) = Endpoint::new(move |_socket| build_router(state));
	let endpoint = endpoint.with_pool(pool);

	let (client_io, server_io) = duplex(64 * 1024);
	let (server_read, server_write) = split(server_io);
	let server = tokio::spawn(endpoint.run_buffered(server_read, server_write));

	let (client_read, client_write) = split(client_io);
	let client = Client {
		reader: BufReader::new(client_read),
		writer: client_write,
	};
	(client, mirror, socket, server)
}

#[tokio::test]
async fn every_request_gets_exactly_one_response() {
	let (mut client, _state, _socket, server) = start(WorkerPool::new(4));

	client.request(1, "test/echo", json!({"a": 1})).await;
	client.request(2, "test/echo", json!({"b": 2})).await;

	let first = client.recv_response().await;
	let second = client.recv_response().await;
	assert_eq!(first.id, RequestId::Number(1));
	assert_eq!(first.result, Some(json!({"a": 1})));
	assert_eq!(second.id, RequestId::Number(2));
	assert_eq!(second.result, Some(json!({"b": 2})));

	drop(client);
	assert!(server.await.unwrap().is_ok());
}

#[tokio::test]
async fn notifications_never_produce_a_response() {
	let (mut client, state, _socket, _server) = start(WorkerPool::new(4));

	client.notify("test/ping", json!(null)).await;
	client.notify("test/slowPing", json!(null)).await;
	client.request(1, "test/echo", json!("after")).await;

	// The only message coming back is the echo response.
	let resp = client.recv_response().await;
	assert_eq!(resp.id, RequestId::Number(1));
	assert_eq!(state.pings.load(Ordering::SeqCst), 1);

	// The deferred notification completes without emitting anything.
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(state.pings.load(Ordering::SeqCst), 2);
	client.request(2, "test/echo", json!("still")).await;
	assert_eq!(client.recv_response().await.id, RequestId::Number(2));
}

#[tokio::test]
async fn cancel_before_start_skips_the_handler_body() {
	// One permit: the blocker occupies the pool while the marker queues.
	let (mut client, state, _socket, _server) = start(WorkerPool::new(1));

	client.request(10, "test/block", json!(null)).await;
	client.request(11, "test/marker", json!(null)).await;
	client.notify(CANCEL_REQUEST_METHOD, json!({"id": 11})).await;

	// An inline echo proves the reader has dispatched everything above,
	// including the cancellation, before the blocker is released.
	client.request(12, "test/echo", json!(null)).await;
	assert_eq!(client.recv_response().await.id, RequestId::Number(12));

	state.gate.notify_one();

	let unblocked = client.recv_response().await;
	assert_eq!(unblocked.id, RequestId::Number(10));
	assert_eq!(unblocked.result, Some(json!("unblocked")));

	let cancelled = client.recv_response().await;
	assert_eq!(cancelled.id, RequestId::Number(11));
	assert_eq!(cancelled.error.unwrap().code, ErrorCode::REQUEST_CANCELLED);
	assert!(!state.marker_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unknown_method_is_a_structured_error() {
	let (mut client, _state, _socket, _server) = start(WorkerPool::new(4));

	client.request(1, "no/such/method", json!(null)).await;
	let resp = client.recv_response().await;
	assert_eq!(resp.error.unwrap().code, ErrorCode::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn handler_panic_is_isolated() {
	let (mut client, _state, _socket, _server) = start(WorkerPool::new(4));

	client.request(1, "test/boom", json!(null)).await;
	let resp = client.recv_response().await;
	let err = resp.error.unwrap();
	assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
	assert!(err.message.contains("boom"));

	// The engine keeps serving after the fault.
	client.request(2, "test/echo", json!("alive")).await;
	assert_eq!(client.recv_response().await.result, Some(json!("alive")));
}

#[tokio::test]
async fn stray_response_is_dropped_nonfatally() {
	let (mut client, _state, _socket, _server) = start(WorkerPool::new(4));

	client
		.send(Message::Response(AnyResponse::ok(RequestId::Number(99), json!(1))))
		.await;
	client.request(1, "test/echo", json!("ok")).await;
	assert_eq!(client.recv_response().await.result, Some(json!("ok")));
}

#[tokio::test]
async fn outgoing_requests_correlate_by_id() {
	let (mut client, _state, socket, _server) = start(WorkerPool::new(4));

	let issued = tokio::spawn(async move { socket.request_raw("client/ping", json!({"n": 1})).await });

	let Message::Request(req) = Message::read(&mut client.reader).await.unwrap() else {
		panic!("expected outgoing request");
	};
	assert_eq!(req.method, "client/ping");
	client.send(Message::Response(AnyResponse::ok(req.id, json!(2)))).await;

	assert_eq!(issued.await.unwrap().unwrap(), json!(2));
}

#[tokio::test]
async fn channel_close_fails_pending_requests() {
	let (client, _state, socket, server) = start(WorkerPool::new(4));

	let issued = tokio::spawn({
		let socket = socket.clone();
		async move { socket.request_raw("client/never", json!(null)).await }
	});
	// Let the loop write the request out before the peer goes away.
	tokio::time::sleep(Duration::from_millis(50)).await;

	// Peer disconnects with the request still outstanding.
	drop(client);
	assert!(server.await.unwrap().is_ok());

	assert!(matches!(issued.await.unwrap(), Err(Error::ServiceStopped)));
	assert!(matches!(
		socket.request_raw("client/after", json!(null)).await,
		Err(Error::ServiceStopped)
	));
}
