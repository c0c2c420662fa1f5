use std::{fmt, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

/// Largest upload the page accepted.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
	Jpeg,
	Png,
	Webp,
	Bmp,
	Other(String)
}

impl MediaType {
	pub fn from_mime(mime: &str) -> Self {
		match mime.trim().to_ascii_lowercase().as_str() {
			"image/jpeg" | "image/jpg" => Self::Jpeg,
			"image/png" => Self::Png,
			"image/webp" => Self::Webp,
			"image/bmp" | "image/x-ms-bmp" => Self::Bmp,
			other => Self::Other(other.to_string())
		}
	}

	/// Guess from a file extension, the way a file picker labels a selection.
	pub fn from_extension(ext: &str) -> Self {
		match ext.to_ascii_lowercase().as_str() {
			"jpg" | "jpeg" => Self::Jpeg,
			"png" => Self::Png,
			"webp" => Self::Webp,
			"bmp" => Self::Bmp,
			other => Self::Other(format!("application/x-{other}"))
		}
	}

	pub fn mime(&self) -> &str {
		match self {
			Self::Jpeg => "image/jpeg",
			Self::Png => "image/png",
			Self::Webp => "image/webp",
			Self::Bmp => "image/bmp",
			Self::Other(m) => m
		}
	}

	pub fn is_supported(&self) -> bool {
		!matches!(self, Self::Other(_))
	}
}

impl fmt::Display for MediaType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.mime())
	}
}

/// An uploaded file. Never mutated once created.
#[derive(Debug, Clone)]
pub struct SourceImage {
	bytes: Arc<[u8]>,
	media_type: MediaType,
	name: String
}

impl SourceImage {
	pub fn new(name: impl Into<String>, media_type: MediaType, bytes: impl Into<Arc<[u8]>>) -> Self {
		Self {
			bytes: bytes.into(),
			media_type,
			name: name.into()
		}
	}

	/// Build from a path's file name and extension plus already-read bytes.
	pub fn from_path_bytes(path: &Path, bytes: Vec<u8>) -> Self {
		let name = path
			.file_name()
			.and_then(|s| s.to_str())
			.unwrap_or("image")
			.to_string();
		let media_type = path
			.extension()
			.and_then(|s| s.to_str())
			.map(MediaType::from_extension)
			.unwrap_or_else(|| MediaType::Other("application/octet-stream".to_string()));
		Self::new(name, media_type, bytes)
	}

	pub fn bytes(&self) -> &[u8] {
		&self.bytes
	}

	pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
		Arc::clone(&self.bytes)
	}

	pub fn media_type(&self) -> &MediaType {
		&self.media_type
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn size(&self) -> u64 {
		self.bytes.len() as u64
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
	UnsupportedType(MediaType),
	TooLarge { size: u64, limit: u64 }
}

impl fmt::Display for Rejection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::UnsupportedType(t) => write!(f, "unsupported type {t}"),
			Self::TooLarge { size, limit } => write!(f, "{size} bytes exceeds the {limit} byte limit")
		}
	}
}

/// Caller-side filter applied to a selection before it reaches the pipeline.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
	pub max_bytes: u64
}

impl Default for UploadPolicy {
	fn default() -> Self {
		Self { max_bytes: MAX_UPLOAD_BYTES }
	}
}

impl UploadPolicy {
	pub fn check(&self, source: &SourceImage) -> Result<(), Rejection> {
		if !source.media_type().is_supported() {
			return Err(Rejection::UnsupportedType(source.media_type().clone()));
		}
		if source.size() > self.max_bytes {
			return Err(Rejection::TooLarge {
				size: source.size(),
				limit: self.max_bytes
			});
		}
		Ok(())
	}

	/// Split a selection into accepted files and rejected `(name, reason)` pairs, keeping order.
	pub fn partition(&self, selection: Vec<SourceImage>) -> (Vec<SourceImage>, Vec<(String, Rejection)>) {
		let mut accepted = Vec::with_capacity(selection.len());
		let mut rejected = Vec::new();
		for source in selection {
			match self.check(&source) {
				Ok(()) => accepted.push(source),
				Err(r) => rejected.push((source.name().to_string(), r))
			}
		}
		(accepted, rejected)
	}
}
