//! Caller-owned set of conversion results.

use std::fmt;

use crate::{
	handles::{HandleRegistry, ObjectHandle},
	source::SourceImage
};

/// Unique within the workspace that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultId(u64);

impl fmt::Display for ResultId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "r{:06}", self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
	Pending,
	/// PNG bytes of the converted image.
	Completed(Vec<u8>),
	/// Human-readable cause.
	Failed(String)
}

#[derive(Debug)]
pub struct ConversionResult {
	id: ResultId,
	source: SourceImage,
	preview: ObjectHandle,
	status: ConversionStatus
}

impl ConversionResult {
	pub fn id(&self) -> ResultId {
		self.id
	}

	pub fn source(&self) -> &SourceImage {
		&self.source
	}

	/// Handle URL of the original image for display.
	pub fn preview_url(&self) -> String {
		self.preview.url()
	}

	pub fn status(&self) -> &ConversionStatus {
		&self.status
	}

	pub fn is_pending(&self) -> bool {
		matches!(self.status, ConversionStatus::Pending)
	}

	/// The PNG output; `Some` only once completed.
	pub fn output(&self) -> Option<&[u8]> {
		match &self.status {
			ConversionStatus::Completed(png) => Some(png),
			_ => None
		}
	}

	/// Resolve a pending result. Resolved results are terminal and ignore further calls.
	pub(crate) fn resolve(&mut self, outcome: Result<Vec<u8>, String>) -> bool {
		if !self.is_pending() {
			return false;
		}
		self.status = match outcome {
			Ok(png) => ConversionStatus::Completed(png),
			Err(cause) => ConversionStatus::Failed(cause)
		};
		true
	}
}

#[derive(Debug)]
pub struct Workspace {
	handles: HandleRegistry,
	next_id: u64,
	entries: Vec<ConversionResult>
}

impl Workspace {
	pub fn new(handles: HandleRegistry) -> Self {
		Self {
			handles,
			next_id: 0,
			entries: Vec::new()
		}
	}

	/// Add a pending entry for `source`, holding a preview handle for it.
	pub fn enqueue(&mut self, source: SourceImage) -> ResultId {
		let id = ResultId(self.next_id);
		self.next_id += 1;
		let preview = self.handles.create(source.shared_bytes(), source.media_type().clone());
		self.entries.push(ConversionResult {
			id,
			source,
			preview,
			status: ConversionStatus::Pending
		});
		id
	}

	pub fn get(&self, id: ResultId) -> Option<&ConversionResult> {
		self.entries.iter().find(|e| e.id == id)
	}

	pub(crate) fn get_mut(&mut self, id: ResultId) -> Option<&mut ConversionResult> {
		self.entries.iter_mut().find(|e| e.id == id)
	}

	/// Remove an entry and release its preview handle.
	pub fn discard(&mut self, id: ResultId) -> bool {
		let before = self.entries.len();
		self.entries.retain(|e| e.id != id);
		self.entries.len() != before
	}

	pub fn results(&self) -> &[ConversionResult] {
		&self.entries
	}

	pub fn pending_ids(&self) -> Vec<ResultId> {
		self.entries.iter().filter(|e| e.is_pending()).map(|e| e.id).collect()
	}

	pub fn completed(&self) -> impl Iterator<Item = &ConversionResult> {
		self.entries.iter().filter(|e| e.output().is_some())
	}

	pub fn failed(&self) -> impl Iterator<Item = &ConversionResult> {
		self.entries.iter().filter(|e| matches!(e.status, ConversionStatus::Failed(_)))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
