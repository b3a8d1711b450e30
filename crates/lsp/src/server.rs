//! Composition root: lifecycle and document-sync handlers wired into a
//! [`Router`].
//!
//! Every handler here registers as sync so workspace mutations happen in
//! strict arrival order on the reader path. Language features that defer work
//! to the pool register their own methods on the router returned by
//! [`Server::new_router`] before the endpoint starts.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use lsp_types::notification::{
	DidChangeTextDocument, DidChangeWorkspaceFolders, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
	Exit, Initialized, Notification,
};
use lsp_types::request::{Initialize, Shutdown};
use lsp_types::{
	DidChangeTextDocumentParams, DidChangeWorkspaceFoldersParams, DidCloseTextDocumentParams,
	DidOpenTextDocumentParams, DidSaveTextDocumentParams, InitializeParams, InitializeResult, InitializedParams,
	SaveOptions, ServerCapabilities, ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
	TextDocumentSyncOptions, TextDocumentSyncSaveOptions,
};
use tracing::{debug, error, info, warn};
use verity_rpc::{PeerSocket, ResponseError, Router};

use crate::document::Document;
use crate::path_to_uri;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Uninitialized,
	Ready,
	ShutDown,
}

/// State behind the language server's router.
pub struct Server {
	socket: PeerSocket,
	workspace: Arc<Workspace>,
	lifecycle: Lifecycle,
}

impl Server {
	/// Builds the router with the lifecycle and document-sync handlers
	/// registered. Callers add their language-feature methods on the returned
	/// router before handing it to the endpoint.
	#[must_use]
	pub fn new_router(socket: PeerSocket) -> Router<Self> {
		let server = Self {
			socket,
			workspace: Arc::new(Workspace::default()),
			lifecycle: Lifecycle::Uninitialized,
		};
		let mut router = Router::new(server);
		router
			.request_sync::<Initialize>(Self::initialize)
			.request_sync::<Shutdown>(Self::shutdown)
			.notification_sync::<Initialized>(Self::initialized)
			.notification_sync::<Exit>(Self::exit)
			.notification_sync::<DidOpenTextDocument>(Self::did_open)
			.notification_sync::<DidChangeTextDocument>(Self::did_change)
			.notification_sync::<DidCloseTextDocument>(Self::did_close)
			.notification_sync::<DidSaveTextDocument>(Self::did_save)
			.notification_sync::<DidChangeWorkspaceFolders>(Self::did_change_workspace_folders);
		router
	}

	/// The shared workspace, for feature handlers to read documents from.
	#[must_use]
	pub fn workspace(&self) -> Arc<Workspace> {
		self.workspace.clone()
	}

	/// Handle for pushing requests and notifications toward the editor.
	#[must_use]
	pub fn socket(&self) -> &PeerSocket {
		&self.socket
	}

	/// Guard for feature requests: before `initialize` the protocol demands a
	/// `SERVER_NOT_INITIALIZED` error, after `shutdown` an invalid-request
	/// error.
	pub fn ensure_ready(&self) -> Result<(), ResponseError> {
		match self.lifecycle {
			Lifecycle::Ready => Ok(()),
			Lifecycle::Uninitialized => Err(ResponseError::not_initialized()),
			Lifecycle::ShutDown => Err(ResponseError::invalid_request("server is shut down")),
		}
	}

	#[allow(deprecated, reason = "rootUri and rootPath are how older editors hand over the workspace root")]
	fn initialize(&mut self, params: InitializeParams) -> Result<InitializeResult, ResponseError> {
		if self.lifecycle != Lifecycle::Uninitialized {
			return Err(ResponseError::invalid_request("server is already initialized"));
		}
		let folders = params.workspace_folders.unwrap_or_default();
		let root = params
			.root_uri
			.or_else(|| folders.first().map(|folder| folder.uri.clone()))
			.or_else(|| params.root_path.as_deref().and_then(|p| path_to_uri(Path::new(p))));
		info!(
			root = root.as_ref().map(|uri| uri.as_str()),
			folders = folders.len(),
			client = params.client_info.as_ref().map(|c| c.name.as_str()),
			"server.initialize"
		);
		self.workspace.set_root(root);
		self.workspace.set_folders(folders);
		self.lifecycle = Lifecycle::Ready;
		Ok(InitializeResult {
			capabilities: Self::capabilities(),
			server_info: Some(ServerInfo {
				name: "verity-ls".into(),
				version: Some(env!("CARGO_PKG_VERSION").into()),
			}),
		})
	}

	fn capabilities() -> ServerCapabilities {
		ServerCapabilities {
			text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
				open_close: Some(true),
				change: Some(TextDocumentSyncKind::INCREMENTAL),
				save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
					include_text: Some(false),
				})),
				..TextDocumentSyncOptions::default()
			})),
			..ServerCapabilities::default()
		}
	}

	fn shutdown(&mut self, (): ()) -> Result<(), ResponseError> {
		self.ensure_ready()?;
		info!("server.shutdown");
		self.lifecycle = Lifecycle::ShutDown;
		Ok(())
	}

	fn initialized(&mut self, _params: InitializedParams) -> ControlFlow<verity_rpc::Result<()>> {
		debug!("server.ready");
		ControlFlow::Continue(())
	}

	fn exit(&mut self, (): ()) -> ControlFlow<verity_rpc::Result<()>> {
		if self.lifecycle != Lifecycle::ShutDown {
			warn!("server.exit.before_shutdown");
		}
		info!("server.exit");
		ControlFlow::Break(Ok(()))
	}

	fn did_open(&mut self, params: DidOpenTextDocumentParams) -> ControlFlow<verity_rpc::Result<()>> {
		if self.gate(DidOpenTextDocument::METHOD) {
			let item = params.text_document;
			debug!(uri = %item.uri.as_str(), version = item.version, "document.open");
			self.workspace.put_document(Document::open(item.uri, item.version, item.text));
		}
		ControlFlow::Continue(())
	}

	fn did_change(&mut self, params: DidChangeTextDocumentParams) -> ControlFlow<verity_rpc::Result<()>> {
		if self.gate(DidChangeTextDocument::METHOD) {
			let id = params.text_document;
			if let Err(err) = self.workspace.update_document(&id.uri, id.version, &params.content_changes) {
				// The edit addressed text we do not have; the document is now
				// suspect but the session survives.
				error!(uri = %id.uri.as_str(), error = %err, "document.change_failed");
			}
		}
		ControlFlow::Continue(())
	}

	fn did_close(&mut self, params: DidCloseTextDocumentParams) -> ControlFlow<verity_rpc::Result<()>> {
		if self.gate(DidCloseTextDocument::METHOD) {
			let uri = params.text_document.uri;
			if self.workspace.remove_document(&uri).is_none() {
				warn!(uri = %uri.as_str(), "document.close.unopened");
			} else {
				debug!(uri = %uri.as_str(), "document.close");
			}
		}
		ControlFlow::Continue(())
	}

	fn did_save(&mut self, params: DidSaveTextDocumentParams) -> ControlFlow<verity_rpc::Result<()>> {
		if self.gate(DidSaveTextDocument::METHOD) {
			let uri = params.text_document.uri;
			match self.workspace.get_document(&uri, false) {
				Some(doc) => {
					doc.lock().mark_saved();
					debug!(uri = %uri.as_str(), "document.save");
				}
				None => warn!(uri = %uri.as_str(), "document.save.unopened"),
			}
		}
		ControlFlow::Continue(())
	}

	fn did_change_workspace_folders(
		&mut self,
		params: DidChangeWorkspaceFoldersParams,
	) -> ControlFlow<verity_rpc::Result<()>> {
		if self.gate(DidChangeWorkspaceFolders::METHOD) {
			let event = params.event;
			debug!(added = event.added.len(), removed = event.removed.len(), "workspace.folders");
			self.workspace.apply_folder_change(&event.added, &event.removed);
		}
		ControlFlow::Continue(())
	}

	/// Notifications outside the `Ready` window are dropped with a warning;
	/// they have no response channel to carry an error.
	fn gate(&self, method: &'static str) -> bool {
		match self.lifecycle {
			Lifecycle::Ready => true,
			Lifecycle::Uninitialized => {
				warn!(method, "server.notification.before_initialize");
				false
			}
			Lifecycle::ShutDown => {
				warn!(method, "server.notification.after_shutdown");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use lsp_types::{TextDocumentContentChangeEvent, TextDocumentItem, Uri, VersionedTextDocumentIdentifier};
	use verity_rpc::{Endpoint, ErrorCode};

	use super::*;

	fn make_server() -> Server {
		// The endpoint is never run; the socket only needs to exist.
		let (_endpoint, socket) = Endpoint::new(|_| Router::new(()));
		Server {
			socket,
			workspace: Arc::new(Workspace::default()),
			lifecycle: Lifecycle::Uninitialized,
		}
	}

	fn init(server: &mut Server) {
		server.initialize(InitializeParams::default()).unwrap();
	}

	fn open(server: &mut Server, uri: &Uri, text: &str) {
		server.did_open(DidOpenTextDocumentParams {
			text_document: TextDocumentItem {
				uri: uri.clone(),
				language_id: "verity".into(),
				version: 0,
				text: text.into(),
			},
		});
	}

	#[test]
	fn double_initialize_is_rejected() {
		let mut server = make_server();
		init(&mut server);
		let err = server.initialize(InitializeParams::default()).unwrap_err();
		assert_eq!(err.code, ErrorCode::INVALID_REQUEST);
	}

	#[test]
	fn requests_are_gated_by_lifecycle() {
		let mut server = make_server();
		assert_eq!(server.ensure_ready().unwrap_err().code, ErrorCode::SERVER_NOT_INITIALIZED);

		init(&mut server);
		assert!(server.ensure_ready().is_ok());

		server.shutdown(()).unwrap();
		assert_eq!(server.ensure_ready().unwrap_err().code, ErrorCode::INVALID_REQUEST);
	}

	#[test]
	fn notifications_before_initialize_are_dropped() {
		let mut server = make_server();
		let uri = Uri::from_str("mem://t/a").unwrap();
		open(&mut server, &uri, "ignored");
		assert!(!server.workspace.is_open(&uri));
	}

	#[test]
	fn open_change_close_round_trip() {
		let mut server = make_server();
		init(&mut server);
		let uri = Uri::from_str("mem://t/a").unwrap();
		open(&mut server, &uri, "v0");

		server.did_change(DidChangeTextDocumentParams {
			text_document: VersionedTextDocumentIdentifier {
				uri: uri.clone(),
				version: 1,
			},
			content_changes: vec![TextDocumentContentChangeEvent {
				range: None,
				range_length: None,
				text: "v1".into(),
			}],
		});

		let doc = server.workspace.get_document(&uri, false).unwrap();
		assert_eq!(doc.lock().text(), Some("v1"));
		assert_eq!(doc.lock().version(), 1);
		drop(doc);

		server.did_close(DidCloseTextDocumentParams {
			text_document: lsp_types::TextDocumentIdentifier { uri: uri.clone() },
		});
		assert!(server.workspace.get_document(&uri, false).is_none());
	}

	#[test]
	fn exit_breaks_the_loop() {
		let mut server = make_server();
		init(&mut server);
		server.shutdown(()).unwrap();
		assert!(matches!(server.exit(()), ControlFlow::Break(Ok(()))));
	}
}
