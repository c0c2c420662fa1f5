//! Contract with the external segmentation engine.

use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Execution path an engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
	/// GPU execution provider.
	Accelerated,
	/// CPU execution, available everywhere the runtime loads.
	Portable
}

impl fmt::Display for Backend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Accelerated => f.write_str("accelerated"),
			Self::Portable => f.write_str("portable")
		}
	}
}

/// Per-pixel scores in `[0, 1]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
	pub width: u32,
	pub height: u32,
	pub values: Vec<f32>
}

impl SegmentationMask {
	pub fn pixel_count(&self) -> usize {
		self.values.len()
	}
}

/// One labelled entry of an engine response. `mask` may be missing in malformed responses.
#[derive(Debug, Clone)]
pub struct LabeledMask {
	pub label: String,
	pub score: Option<f32>,
	pub mask: Option<SegmentationMask>
}

/// The still image handed to the engine, already re-encoded.
#[derive(Debug, Clone)]
pub struct EncodedImage {
	pub bytes: Arc<[u8]>,
	pub width: u32,
	pub height: u32
}

impl EncodedImage {
	pub fn pixel_count(&self) -> usize {
		self.width as usize * self.height as usize
	}
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
	async fn infer(&self, image: &EncodedImage) -> Result<Vec<LabeledMask>>;
}

/// Creates engines on a given backend. Creation may be slow (model and runtime loading).
#[async_trait]
pub trait EngineFactory: Send + Sync {
	async fn create(&self, backend: Backend) -> Result<Arc<dyn InferenceEngine>>;
}
