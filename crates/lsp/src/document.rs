//! A single text document: lazy disk loading, a cached line table and
//! byte-exact incremental edits.
//!
//! Text and line table are an all-or-nothing pair: a document either has no
//! text loaded yet, or it has text plus a line-start table built from exactly
//! that text. Positions on the wire count UTF-16 code units per the protocol
//! default; internally everything is a byte offset into the UTF-8 text.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use lsp_types::{Position, Range, TextDocumentContentChangeEvent, TextEdit, Uri};
use tracing::{debug, warn};

use crate::uri_to_path;

/// Errors from loading or editing a document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
	/// The document's URI does not name a filesystem file.
	#[error("document {uri} has no backing file")]
	NoBackingFile {
		/// The offending URI.
		uri: String,
	},
	/// Reading the backing file failed.
	#[error("failed to read {}: {source}", path.display())]
	Read {
		/// Path of the backing file.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: std::io::Error,
	},
	/// An edit was applied before any text was loaded.
	#[error("edit applied to a document with no text loaded")]
	Unloaded,
	/// An edit range does not describe a span of the current text.
	#[error("edit range {0:?} is outside the document")]
	InvalidRange(Range),
}

/// One text document, open in the editor or shadowed from disk.
#[derive(Debug, Clone)]
pub struct Document {
	uri: Uri,
	path: Option<PathBuf>,
	version: i32,
	/// Loaded text; `None` until first access for shadow documents.
	text: Option<String>,
	/// Byte offset of the start of each line. Empty iff `text` is `None`.
	line_starts: Vec<usize>,
	/// Modification time of the backing file when `text` was read from it.
	loaded_mtime: Option<SystemTime>,
}

impl Document {
	/// Creates a document whose text the editor owns (`textDocument/didOpen`).
	#[must_use]
	pub fn open(uri: Uri, version: i32, text: String) -> Self {
		let path = uri_to_path(&uri);
		let mut doc = Self {
			uri,
			path,
			version,
			text: None,
			line_starts: Vec::new(),
			loaded_mtime: None,
		};
		doc.set_text(text);
		doc
	}

	/// Creates a disk-backed shadow; text is read on first access.
	#[must_use]
	pub fn shadow(uri: Uri) -> Self {
		let path = uri_to_path(&uri);
		Self {
			uri,
			path,
			version: 0,
			text: None,
			line_starts: Vec::new(),
			loaded_mtime: None,
		}
	}

	/// The document's URI.
	#[must_use]
	pub fn uri(&self) -> &Uri {
		&self.uri
	}

	/// Filesystem path, if the URI has a `file://` scheme.
	#[must_use]
	pub fn path(&self) -> Option<&PathBuf> {
		self.path.as_ref()
	}

	/// The last version the editor reported.
	#[must_use]
	pub fn version(&self) -> i32 {
		self.version
	}

	/// The loaded text, or `None` if it was never read.
	#[must_use]
	pub fn text(&self) -> Option<&str> {
		self.text.as_deref()
	}

	/// The cached line table: byte offset of the start of each line.
	#[must_use]
	pub fn line_starts(&self) -> Option<&[usize]> {
		self.text.as_ref().map(|_| self.line_starts.as_slice())
	}

	/// The text, reading the backing file on first access.
	pub fn source(&mut self) -> Result<&str, DocumentError> {
		if self.text.is_none() {
			let path = self.backing_path()?;
			let mtime = modified_time(&path)?;
			let text = fs::read_to_string(&path).map_err(|source| DocumentError::Read { path, source })?;
			self.set_text(text);
			self.loaded_mtime = Some(mtime);
		}
		Ok(self.text.as_deref().unwrap_or_default())
	}

	/// Re-reads the backing file if it changed since the cached text was
	/// loaded, comparing modification times.
	pub fn sync(&mut self) -> Result<(), DocumentError> {
		let path = self.backing_path()?;
		let mtime = modified_time(&path)?;
		if self.text.is_none() || self.loaded_mtime != Some(mtime) {
			debug!(uri = %self.uri.as_str(), "document.reload");
			let text = fs::read_to_string(&path).map_err(|source| DocumentError::Read { path, source })?;
			self.set_text(text);
			self.loaded_mtime = Some(mtime);
		}
		Ok(())
	}

	/// Records the backing file's current mtime after the editor saved it, so
	/// the next [`Document::sync`] does not treat our own save as a
	/// concurrent disk change.
	pub fn mark_saved(&mut self) {
		if let Ok(path) = self.backing_path()
			&& let Ok(mtime) = modified_time(&path)
		{
			self.loaded_mtime = Some(mtime);
		}
	}

	/// Advances the version. A regression is a protocol anomaly: it is logged
	/// and ignored, the text already applied stays authoritative.
	pub fn update_version(&mut self, version: i32) {
		if version < self.version {
			warn!(
				uri = %self.uri.as_str(),
				current = self.version,
				reported = version,
				"document.version.regression"
			);
			return;
		}
		self.version = version;
	}

	/// Applies one incremental change event. A change without a range replaces
	/// the whole text.
	pub fn apply_change(&mut self, change: &TextDocumentContentChangeEvent) -> Result<(), DocumentError> {
		let Some(range) = change.range else {
			self.set_text(change.text.clone());
			return Ok(());
		};
		if self.text.is_none() {
			return Err(DocumentError::Unloaded);
		}
		let start = self.position_to_offset(range.start).ok_or(DocumentError::InvalidRange(range))?;
		let end = self.position_to_offset(range.end).ok_or(DocumentError::InvalidRange(range))?;
		if start > end {
			return Err(DocumentError::InvalidRange(range));
		}
		let mut text = self.text.take().ok_or(DocumentError::Unloaded)?;
		text.replace_range(start..end, &change.text);
		self.set_text(text);
		Ok(())
	}

	/// Applies a batch of text edits whose ranges all address the *original*
	/// text.
	///
	/// Every range is resolved to byte offsets against the unmodified text
	/// first, then the edits are applied in descending start order so earlier
	/// offsets stay valid while later spans are rewritten. The line table is
	/// rebuilt once at the end.
	pub fn apply_text_edits(&mut self, edits: &[TextEdit]) -> Result<(), DocumentError> {
		if self.text.is_none() {
			return Err(DocumentError::Unloaded);
		}
		let mut resolved = Vec::with_capacity(edits.len());
		for edit in edits {
			let start = self
				.position_to_offset(edit.range.start)
				.ok_or(DocumentError::InvalidRange(edit.range))?;
			let end = self
				.position_to_offset(edit.range.end)
				.ok_or(DocumentError::InvalidRange(edit.range))?;
			if start > end {
				return Err(DocumentError::InvalidRange(edit.range));
			}
			resolved.push((start, end, edit.new_text.as_str()));
		}
		resolved.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
		let mut text = self.text.take().ok_or(DocumentError::Unloaded)?;
		for (start, end, new_text) in resolved {
			text.replace_range(start..end, new_text);
		}
		self.set_text(text);
		Ok(())
	}

	/// Maps a byte offset to `(line, byte column)` via the cached line table.
	///
	/// Offsets past the end clamp to the last position. The exact inverse of
	/// the table: `offset_to_line_col(line_starts[l]) == (l, 0)`.
	#[must_use]
	pub fn offset_to_line_col(&self, offset: usize) -> Option<(usize, usize)> {
		let text = self.text.as_deref()?;
		let offset = offset.min(text.len());
		let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
		Some((line, offset - self.line_starts[line]))
	}

	/// Maps a wire position (line, UTF-16 column) to a byte offset.
	///
	/// Columns past the end of the line clamp to the end of the line content;
	/// lines past the end of the document clamp to the end of the text. The
	/// returned offset is always a char boundary.
	#[must_use]
	pub fn position_to_offset(&self, pos: Position) -> Option<usize> {
		let text = self.text.as_deref()?;
		let line = pos.line as usize;
		if line >= self.line_starts.len() {
			return Some(text.len());
		}
		let line_start = self.line_starts[line];
		let line_end = self.line_starts.get(line + 1).copied().unwrap_or(text.len());
		let content = text[line_start..line_end].trim_end_matches(['\n', '\r']);
		let mut units = 0u32;
		for (i, ch) in content.char_indices() {
			if units >= pos.character {
				return Some(line_start + i);
			}
			units += ch.len_utf16() as u32;
		}
		Some(line_start + content.len())
	}

	fn set_text(&mut self, text: String) {
		self.line_starts = line_starts_of(&text);
		self.text = Some(text);
	}

	fn backing_path(&self) -> Result<PathBuf, DocumentError> {
		self.path.clone().ok_or_else(|| DocumentError::NoBackingFile {
			uri: self.uri.as_str().to_owned(),
		})
	}
}

fn line_starts_of(text: &str) -> Vec<usize> {
	let mut starts = vec![0];
	for (i, byte) in text.bytes().enumerate() {
		if byte == b'\n' {
			starts.push(i + 1);
		}
	}
	starts
}

fn modified_time(path: &PathBuf) -> Result<SystemTime, DocumentError> {
	fs::metadata(path)
		.and_then(|meta| meta.modified())
		.map_err(|source| DocumentError::Read {
			path: path.clone(),
			source,
		})
}
