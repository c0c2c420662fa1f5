//! Error types shared by the conversion pipeline.

use std::fmt;

use thiserror::Error;

use crate::engine::Backend;

/// Why one backend could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
	pub backend: Backend,
	pub reason: String
}

impl fmt::Display for BackendFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.backend, self.reason)
	}
}

/// Failure of a single conversion. Never crosses file boundaries.
#[derive(Debug, Error)]
pub enum ConvertError {
	#[error("cannot decode image: {0}")]
	Decode(#[source] image::ImageError),

	#[error("no segmentation backend available ({})", join_failures(.attempts))]
	SegmentationUnavailable { attempts: Vec<BackendFailure> },

	#[error("invalid segmentation result: {0}")]
	InvalidSegmentationResult(String),

	#[error("segmentation failed: {0}")]
	Inference(String),

	#[error("cannot encode image: {0}")]
	Encode(#[source] image::ImageError),

	#[error("conversion task was cancelled")]
	Interrupted
}

impl ConvertError {
	pub(crate) fn invalid_result<S: Into<String>>(msg: S) -> Self {
		Self::InvalidSegmentationResult(msg.into())
	}
}

fn join_failures(attempts: &[BackendFailure]) -> String {
	if attempts.is_empty() {
		return "not initialized".to_string();
	}
	attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A conversion failure tagged with the file it belongs to.
#[derive(Debug, Error)]
#[error("conversion of {file_name} failed: {cause}")]
pub struct ConversionFailed {
	pub file_name: String,
	#[source]
	pub cause: ConvertError
}

/// Building the batch archive failed. Recovered by the archiver, never returned.
#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("zip: {0}")]
	Zip(#[from] zip::result::ZipError),

	#[error("io: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Other(String)
}

/// The analytics sink could not accept an event. Always swallowed.
#[derive(Debug, Error)]
pub enum EventSinkError {
	#[error("analytics disabled")]
	Disabled,

	#[error("no async runtime to deliver event")]
	NoRuntime,

	#[error("encode event: {0}")]
	Encode(#[from] serde_json::Error)
}

/// The download target refused a file.
#[derive(Debug, Error)]
#[error("cannot deliver {name}: {source}")]
pub struct DeliveryError {
	pub name: String,
	#[source]
	pub source: std::io::Error
}
