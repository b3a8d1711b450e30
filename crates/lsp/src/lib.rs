//! Document synchronization model and composition root for the verity
//! language server.
//!
//! The editor owns the text of every open document and streams byte-exact
//! incremental edits over the wire; everything else is read lazily from disk.
//! [`Workspace`] keeps those two worlds apart (open documents vs. disk
//! shadows), [`Document`] applies the edits, and [`Server`] wires the
//! lifecycle and sync notifications into a [`verity_rpc::Router`].

#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::str::FromStr;

use lsp_types::Uri;

mod document;
mod server;
mod workspace;

pub use document::{Document, DocumentError};
pub use server::Server;
pub use workspace::{SharedDocument, Workspace};

/// Converts a `file://` URI to a filesystem path.
///
/// Returns `None` for non-file schemes (for example `mem://` scratch
/// documents, which exist only while the editor holds them open).
#[must_use]
pub fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
	let url = url::Url::from_str(uri.as_str()).ok()?;
	url.to_file_path().ok()
}

/// Converts a filesystem path to a `file://` URI.
#[must_use]
pub fn path_to_uri(path: &Path) -> Option<Uri> {
	let url = url::Url::from_file_path(path).ok()?;
	Uri::from_str(url.as_str()).ok()
}
