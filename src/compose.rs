use std::io::Cursor;

use image::{
	ExtendedColorType, ImageEncoder, RgbaImage,
	codecs::png::{CompressionType, FilterType, PngEncoder}
};
use serde::{Deserialize, Serialize};

use crate::{engine::SegmentationMask, error::ConvertError};

/// How a mask score maps to subject opacity.
///
/// The default segformer model scores the region to cut away, so its mask is
/// inverted. Saliency models (u2net family) score the subject itself and need
/// `Direct`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskPolarity {
	/// `alpha = round((1 - score) * 255)`
	#[default]
	Inverted,
	/// `alpha = round(score * 255)`
	Direct
}

impl MaskPolarity {
	pub fn alpha(self, score: f32) -> u8 {
		let s = score.clamp(0.0, 1.0);
		let opacity = match self {
			Self::Inverted => 1.0 - s,
			Self::Direct => s
		};
		(opacity * 255.0).round() as u8
	}
}

/// Copy `bitmap` with its alpha channel replaced from `mask`. RGB is left untouched.
pub fn apply_mask(bitmap: &RgbaImage, mask: &SegmentationMask, polarity: MaskPolarity) -> Result<RgbaImage, ConvertError> {
	let pixels = bitmap.width() as usize * bitmap.height() as usize;
	if mask.pixel_count() != pixels {
		return Err(ConvertError::invalid_result(format!(
			"mask has {} values, bitmap has {pixels} pixels",
			mask.pixel_count()
		)));
	}

	let mut out = bitmap.clone();
	for (px, &score) in out.chunks_exact_mut(4).zip(&mask.values) {
		px[3] = polarity.alpha(score);
	}
	Ok(out)
}

/// Lossless RGBA PNG.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, ConvertError> {
	let mut buf = Cursor::new(Vec::new());
	PngEncoder::new_with_quality(&mut buf, CompressionType::Default, FilterType::Adaptive)
		.write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
		.map_err(ConvertError::Encode)?;
	Ok(buf.into_inner())
}
