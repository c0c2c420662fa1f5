//! Lazily acquired, shared segmentation engine.
//!
//! The client owns the only engine handle of a session. It is acquired on first
//! use by walking the backend strategy in order; the first backend that comes up
//! is cached for the rest of the client's life. A failed acquisition leaves the
//! slot empty, so a later [`SegmentationClient::ensure_ready`] starts over.
//! Inference calls are serialized through a gate: the engine never sees two
//! requests at once.

use std::{
	io::Cursor,
	sync::{Arc, Mutex}
};

use image::{ExtendedColorType, ImageEncoder, RgbaImage, codecs::jpeg::JpegEncoder};
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, info, warn};

use crate::{
	engine::{Backend, EncodedImage, EngineFactory, InferenceEngine, SegmentationMask},
	error::{BackendFailure, ConvertError}
};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// A ready engine and the backend it runs on.
#[derive(Clone)]
pub struct SegmenterHandle {
	pub backend: Backend,
	engine: Arc<dyn InferenceEngine>
}

impl std::fmt::Debug for SegmenterHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SegmenterHandle").field("backend", &self.backend).finish_non_exhaustive()
	}
}

pub struct SegmentationClient {
	factory: Arc<dyn EngineFactory>,
	strategy: Vec<Backend>,
	handle: OnceCell<SegmenterHandle>,
	last_failures: Mutex<Vec<BackendFailure>>,
	gate: AsyncMutex<()>
}

impl SegmentationClient {
	/// `strategy` is tried front to back. An empty strategy never becomes ready.
	pub fn new(factory: Arc<dyn EngineFactory>, strategy: Vec<Backend>) -> Self {
		Self {
			factory,
			strategy,
			handle: OnceCell::new(),
			last_failures: Mutex::new(Vec::new()),
			gate: AsyncMutex::new(())
		}
	}

	pub fn strategy(&self) -> &[Backend] {
		&self.strategy
	}

	pub fn is_ready(&self) -> bool {
		self.handle.initialized()
	}

	pub async fn ensure_ready(&self) -> Result<SegmenterHandle, ConvertError> {
		self.handle.get_or_try_init(|| self.acquire()).await.cloned()
	}

	/// Warm the engine ahead of the first conversion. Errors are only logged.
	pub async fn preload(&self) {
		if let Err(e) = self.ensure_ready().await {
			debug!("segmenter preload failed: {e}");
		}
	}

	async fn acquire(&self) -> Result<SegmenterHandle, ConvertError> {
		let mut attempts = Vec::new();
		for &backend in &self.strategy {
			match self.factory.create(backend).await {
				Ok(engine) => {
					info!(%backend, "segmentation engine ready");
					if let Ok(mut last) = self.last_failures.lock() {
						last.clear();
					}
					return Ok(SegmenterHandle { backend, engine });
				}
				Err(e) => {
					warn!(%backend, "segmentation engine unavailable: {e:#}");
					attempts.push(BackendFailure {
						backend,
						reason: format!("{e:#}")
					});
				}
			}
		}
		if let Ok(mut last) = self.last_failures.lock() {
			last.clone_from(&attempts);
		}
		Err(ConvertError::SegmentationUnavailable { attempts })
	}

	/// Run the engine on `image` and return the first result's mask.
	///
	/// Does not initialize the engine; call [`Self::ensure_ready`] first.
	pub async fn segment(&self, image: &EncodedImage) -> Result<SegmentationMask, ConvertError> {
		let Some(handle) = self.handle.get() else {
			let attempts = self.last_failures.lock().map(|l| l.clone()).unwrap_or_default();
			return Err(ConvertError::SegmentationUnavailable { attempts });
		};

		let results = {
			let _in_flight = self.gate.lock().await;
			handle
				.engine
				.infer(image)
				.await
				.map_err(|e| ConvertError::Inference(format!("{e:#}")))?
		};

		let first = results
			.into_iter()
			.next()
			.ok_or_else(|| ConvertError::invalid_result("empty result set"))?;
		let mask = first
			.mask
			.ok_or_else(|| ConvertError::invalid_result(format!("result {:?} has no mask", first.label)))?;
		if mask.pixel_count() != image.pixel_count() {
			return Err(ConvertError::invalid_result(format!(
				"mask has {} values, image has {} pixels",
				mask.pixel_count(),
				image.pixel_count()
			)));
		}
		debug!(label = %first.label, score = ?first.score, "segmented");
		Ok(mask)
	}
}

/// Lossy JPEG of the bitmap's colour channels, the only form the engine receives.
pub fn encode_for_segmentation(bitmap: &RgbaImage, quality: u8) -> Result<EncodedImage, ConvertError> {
	let rgb = image::DynamicImage::ImageRgba8(bitmap.clone()).to_rgb8();
	let mut buf = Cursor::new(Vec::new());
	JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
		.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
		.map_err(ConvertError::Encode)?;
	Ok(EncodedImage {
		bytes: Arc::from(buf.into_inner()),
		width: bitmap.width(),
		height: bitmap.height()
	})
}
