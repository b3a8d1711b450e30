//! Workspace-wide document tracking.
//!
//! Two maps, keyed by URI string: documents the editor holds open (their text
//! is authoritative, disk is irrelevant until save) and disk shadows read
//! lazily for cross-file analysis. The open map always wins; a shadow is
//! evicted the moment its backing file can no longer be read.

use std::collections::HashMap;
use std::sync::Arc;

use lsp_types::{TextDocumentContentChangeEvent, Uri, WorkspaceFolder};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::document::{Document, DocumentError};

/// A document shared across handlers, guarded by its own lock.
pub type SharedDocument = Arc<Mutex<Document>>;

/// All documents the server knows about, plus the workspace roots.
#[derive(Debug, Default)]
pub struct Workspace {
	root: RwLock<Option<Uri>>,
	folders: RwLock<Vec<WorkspaceFolder>>,
	open: RwLock<HashMap<String, SharedDocument>>,
	shadow: RwLock<HashMap<String, SharedDocument>>,
}

impl Workspace {
	/// The primary workspace root, if the client reported one.
	#[must_use]
	pub fn root(&self) -> Option<Uri> {
		self.root.read().clone()
	}

	/// Sets the primary workspace root.
	pub fn set_root(&self, root: Option<Uri>) {
		*self.root.write() = root;
	}

	/// The workspace folders in the client's order.
	#[must_use]
	pub fn folders(&self) -> Vec<WorkspaceFolder> {
		self.folders.read().clone()
	}

	/// Replaces the folder list (from `initialize`).
	pub fn set_folders(&self, folders: Vec<WorkspaceFolder>) {
		*self.folders.write() = folders;
	}

	/// Applies a `workspace/didChangeWorkspaceFolders` event, preserving the
	/// order of the surviving folders.
	pub fn apply_folder_change(&self, added: &[WorkspaceFolder], removed: &[WorkspaceFolder]) {
		let mut folders = self.folders.write();
		folders.retain(|folder| !removed.iter().any(|r| r.uri == folder.uri));
		for folder in added {
			if !folders.iter().any(|f| f.uri == folder.uri) {
				folders.push(folder.clone());
			}
		}
	}

	/// Whether the editor currently holds this document open.
	#[must_use]
	pub fn is_open(&self, uri: &Uri) -> bool {
		self.open.read().contains_key(uri.as_str())
	}

	/// Looks up a document. Open documents always win; with
	/// `accept_from_disk`, a missing document is materialized as a disk
	/// shadow and synced against its backing file first.
	///
	/// Returns `None` when the document is neither open nor readable from
	/// disk; an unreadable shadow is evicted so a later call retries from
	/// scratch.
	#[must_use]
	pub fn get_document(&self, uri: &Uri, accept_from_disk: bool) -> Option<SharedDocument> {
		if let Some(doc) = self.open.read().get(uri.as_str()) {
			return Some(doc.clone());
		}
		if !accept_from_disk {
			return None;
		}
		let key = uri.as_str().to_owned();
		let doc = self
			.shadow
			.write()
			.entry(key.clone())
			.or_insert_with(|| Arc::new(Mutex::new(Document::shadow(uri.clone()))))
			.clone();
		let synced = doc.lock().sync();
		match synced {
			Ok(()) => Some(doc),
			Err(err) => {
				debug!(uri = %key, error = %err, "workspace.shadow.evicted");
				self.shadow.write().remove(&key);
				None
			}
		}
	}

	/// Registers an editor-owned document, displacing any shadow of the same
	/// URI.
	pub fn put_document(&self, doc: Document) -> SharedDocument {
		let key = doc.uri().as_str().to_owned();
		let shared = Arc::new(Mutex::new(doc));
		self.shadow.write().remove(&key);
		self.open.write().insert(key, shared.clone());
		shared
	}

	/// Drops an editor-owned document (`textDocument/didClose`). The file can
	/// reappear later as a shadow if something still refers to it.
	pub fn remove_document(&self, uri: &Uri) -> Option<SharedDocument> {
		self.open.write().remove(uri.as_str())
	}

	/// Applies a `textDocument/didChange` batch to an open document: every
	/// change event in arrival order, then the version stamp.
	///
	/// # Panics
	///
	/// Panics if the document is not open. A change for a document that was
	/// never opened means this process and the editor disagree about which
	/// text the edits address; continuing would corrupt every later edit.
	pub fn update_document(
		&self,
		uri: &Uri,
		version: i32,
		changes: &[TextDocumentContentChangeEvent],
	) -> Result<(), DocumentError> {
		let doc = self.open.read().get(uri.as_str()).cloned();
		let Some(doc) = doc else {
			panic!("protocol violation: change for document never opened: {}", uri.as_str());
		};
		let mut doc = doc.lock();
		for change in changes {
			doc.apply_change(change)?;
		}
		doc.update_version(version);
		Ok(())
	}
}
