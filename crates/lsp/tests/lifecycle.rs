//! Full session over an in-memory channel: initialize, edit, close, exit.

use serde_json::{Value as JsonValue, json};
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf, duplex, split};
use tokio::task::JoinHandle;
use verity_lsp::Server;
use verity_rpc::lsp_types::request::Request;
use verity_rpc::{AnyNotification, AnyRequest, AnyResponse, Endpoint, Message, RequestId, Router};

/// Debug/introspection request used by the editor's test harness.
enum DocumentText {}
impl verity_rpc::lsp_types::request::Request for DocumentText {
	type Params = verity_rpc::lsp_types::TextDocumentIdentifier;
	type Result = Option<String>;
	const METHOD: &'static str = "verity/documentText";
}

struct Editor {
	reader: BufReader<ReadHalf<DuplexStream>>,
	writer: WriteHalf<DuplexStream>,
}

impl Editor {
	async fn request(&mut self, id: i64, method: &str, params: JsonValue) -> AnyResponse {
		Message::Request(AnyRequest {
			id: RequestId::Number(id),
			method: method.into(),
			params,
		})
		.write(&mut self.writer)
		.await
		.unwrap();
		match Message::read(&mut self.reader).await.unwrap() {
			Message::Response(resp) => {
				assert_eq!(resp.id, RequestId::Number(id));
				resp
			}
			other => panic!("expected response, got {other:?}"),
		}
	}

	async fn notify(&mut self, method: &str, params: JsonValue) {
		Message::Notification(AnyNotification {
			method: method.into(),
			params,
		})
		.write(&mut self.writer)
		.await
		.unwrap();
	}

	async fn document_text(&mut self, id: i64, uri: &str) -> Option<String> {
		let resp = self.request(id, DocumentText::METHOD, json!({"uri": uri})).await;
		assert!(resp.error.is_none());
		// A null result may arrive as an absent field.
		resp.result.and_then(|value| serde_json::from_value(value).unwrap())
	}
}

fn start() -> (Editor, JoinHandle<verity_rpc::Result<()>>) {
	let (endpoint, _socket) = Endpoint::new(|socket| {
		let mut router: Router<Server> = Server::new_router(socket);
		router.request_sync::<DocumentText>(|server, params| {
			server.ensure_ready()?;
			Ok(server
				.workspace()
				.get_document(&params.uri, false)
				.and_then(|doc| doc.lock().text().map(str::to_owned)))
		});
		router
	});

	let (editor_io, server_io) = duplex(64 * 1024);
	let (server_read, server_write) = split(server_io);
	let server = tokio::spawn(endpoint.run_buffered(server_read, server_write));

	let (editor_read, editor_write) = split(editor_io);
	let editor = Editor {
		reader: BufReader::new(editor_read),
		writer: editor_write,
	};
	(editor, server)
}

#[tokio::test]
async fn session_lifecycle_end_to_end() {
	let (mut editor, server) = start();

	// Feature requests before initialize are refused with the protocol code.
	let early = editor.request(1, DocumentText::METHOD, json!({"uri": "mem://t/a"})).await;
	assert_eq!(early.error.unwrap().code, verity_rpc::ErrorCode::SERVER_NOT_INITIALIZED);

	let init = editor.request(2, "initialize", json!({"capabilities": {}})).await;
	let result = init.result.unwrap();
	assert_eq!(result["capabilities"]["textDocumentSync"]["change"], json!(2));
	assert_eq!(result["serverInfo"]["name"], json!("verity-ls"));
	editor.notify("initialized", json!({})).await;

	editor
		.notify(
			"textDocument/didOpen",
			json!({"textDocument": {"uri": "mem://t/a", "languageId": "verity", "version": 0, "text": "step one\n"}}),
		)
		.await;
	assert_eq!(editor.document_text(3, "mem://t/a").await.as_deref(), Some("step one\n"));

	// Incremental edit: replace "one" with "two".
	editor
		.notify(
			"textDocument/didChange",
			json!({
				"textDocument": {"uri": "mem://t/a", "version": 1},
				"contentChanges": [{
					"range": {"start": {"line": 0, "character": 5}, "end": {"line": 0, "character": 8}},
					"text": "two"
				}]
			}),
		)
		.await;
	assert_eq!(editor.document_text(4, "mem://t/a").await.as_deref(), Some("step two\n"));

	editor
		.notify("textDocument/didClose", json!({"textDocument": {"uri": "mem://t/a"}}))
		.await;
	assert_eq!(editor.document_text(5, "mem://t/a").await, None);

	let shutdown = editor.request(6, "shutdown", json!(null)).await;
	assert!(shutdown.error.is_none());
	editor.notify("exit", json!(null)).await;

	assert!(server.await.unwrap().is_ok());
}
