//! Per-file conversion pipeline.
//!
//! With background removal: decode, fit, JPEG re-encode, segment, apply mask, PNG.
//! Without: decode, fit, copy onto a transparent canvas, PNG.
//!
//! Conversions run one at a time per [`Converter`]. A failing file is recorded as
//! failed and the next one proceeds.

use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{Instrument, debug, info_span, warn};

use crate::{
	compose::{MaskPolarity, apply_mask, encode_png},
	decode::decode,
	error::{ConversionFailed, ConvertError},
	events::{Event, EventKind, EventSink, emit},
	handles::HandleRegistry,
	resize::{DEFAULT_MAX_DIMENSION, Resized, fit_within},
	segment::{DEFAULT_JPEG_QUALITY, SegmentationClient, encode_for_segmentation},
	source::SourceImage,
	workspace::Workspace
};

#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
	pub max_dimension: u32,
	pub jpeg_quality: u8,
	pub mask_polarity: MaskPolarity
}

impl Default for ConvertOptions {
	fn default() -> Self {
		Self {
			max_dimension: DEFAULT_MAX_DIMENSION,
			jpeg_quality: DEFAULT_JPEG_QUALITY,
			mask_polarity: MaskPolarity::default()
		}
	}
}

/// Outcome of [`Converter::process`].
#[derive(Debug, Default)]
pub struct BatchReport {
	pub completed: usize,
	pub failures: Vec<ConversionFailed>
}

pub struct Converter {
	options: ConvertOptions,
	segmenter: Arc<SegmentationClient>,
	events: Arc<dyn EventSink>,
	handles: HandleRegistry,
	turn: AsyncMutex<()>
}

impl Converter {
	pub fn new(options: ConvertOptions, segmenter: Arc<SegmentationClient>, events: Arc<dyn EventSink>, handles: HandleRegistry) -> Self {
		Self {
			options,
			segmenter,
			events,
			handles,
			turn: AsyncMutex::new(())
		}
	}

	pub fn options(&self) -> &ConvertOptions {
		&self.options
	}

	pub fn segmenter(&self) -> &Arc<SegmentationClient> {
		&self.segmenter
	}

	pub fn handles(&self) -> &HandleRegistry {
		&self.handles
	}

	/// Convert one file to PNG bytes. Waits for any conversion already running.
	pub async fn convert(&self, source: &SourceImage, remove_background: bool) -> Result<Vec<u8>, ConvertError> {
		let _turn = self.turn.lock().await;
		self.run(source, remove_background)
			.instrument(info_span!("convert", file = source.name(), remove_background))
			.await
	}

	async fn run(&self, source: &SourceImage, remove_background: bool) -> Result<Vec<u8>, ConvertError> {
		let opts = self.options;
		let handles = self.handles.clone();
		let src = source.clone();

		if !remove_background {
			return blocking(move || {
				let bitmap = fitted(&src, &handles, opts.max_dimension)?;
				encode_png(&onto_transparent_canvas(&bitmap))
			})
			.await;
		}

		let (bitmap, encoded) = blocking(move || {
			let bitmap = fitted(&src, &handles, opts.max_dimension)?;
			let encoded = encode_for_segmentation(&bitmap, opts.jpeg_quality)?;
			Ok((bitmap, encoded))
		})
		.await?;

		self.segmenter.ensure_ready().await?;
		let mask = self.segmenter.segment(&encoded).await?;
		drop(encoded);

		blocking(move || {
			let cutout = apply_mask(&bitmap, &mask, opts.mask_polarity)?;
			drop(bitmap);
			encode_png(&cutout)
		})
		.await
	}

	/// Convert every pending entry of `workspace`, in order, one at a time.
	pub async fn process(&self, workspace: &mut Workspace, remove_background: bool) -> BatchReport {
		let ids = workspace.pending_ids();
		let mut report = BatchReport::default();
		if ids.is_empty() {
			return report;
		}
		emit(&*self.events, Event::new(EventKind::ConvertStarted).with("count", ids.len()));

		for id in ids {
			let Some(source) = workspace.get(id).map(|r| r.source().clone()) else {
				continue;
			};
			let outcome = self.convert(&source, remove_background).await;
			let Some(entry) = workspace.get_mut(id) else {
				continue;
			};
			match outcome {
				Ok(png) => {
					entry.resolve(Ok(png));
					report.completed += 1;
				}
				Err(cause) => {
					warn!(file = source.name(), "conversion failed: {cause}");
					entry.resolve(Err(cause.to_string()));
					emit(&*self.events, Event::new(EventKind::ConvertError).with("name", source.name()));
					report.failures.push(ConversionFailed {
						file_name: source.name().to_string(),
						cause
					});
				}
			}
		}

		emit(
			&*self.events,
			Event::new(EventKind::ConvertSuccess)
				.with("count", report.completed)
				.with("failed", report.failures.len())
		);
		report
	}
}

fn fitted(source: &SourceImage, handles: &HandleRegistry, max_dimension: u32) -> Result<RgbaImage, ConvertError> {
	let decoded = decode(source, handles)?;
	let Resized { bitmap, was_resized } = fit_within(decoded, max_dimension);
	debug!(was_resized, width = bitmap.width(), height = bitmap.height(), "fitted");
	Ok(bitmap)
}

/// Fresh fully transparent canvas with `bitmap` drawn at the origin.
fn onto_transparent_canvas(bitmap: &RgbaImage) -> RgbaImage {
	let mut canvas = RgbaImage::new(bitmap.width(), bitmap.height());
	image::imageops::replace(&mut canvas, bitmap, 0, 0);
	canvas
}

async fn blocking<T, F>(f: F) -> Result<T, ConvertError>
where
	F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
	T: Send + 'static
{
	match tokio::task::spawn_blocking(f).await {
		Ok(res) => res,
		Err(e) => match e.try_into_panic() {
			Ok(payload) => std::panic::resume_unwind(payload),
			Err(_) => Err(ConvertError::Interrupted)
		}
	}
}
