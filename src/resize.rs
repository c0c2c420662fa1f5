//! Fit a bitmap inside a square bound, keeping its aspect ratio.

use image::{RgbaImage, imageops::FilterType};

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Result of [`fit_within`]. `was_resized` is false when the input already fit.
#[derive(Debug, Clone)]
pub struct Resized {
	pub bitmap: RgbaImage,
	pub was_resized: bool
}

/// Output dimensions for a `width x height` image bounded by `max`.
///
/// The longer side becomes `max`, the shorter one is scaled and rounded half up.
/// A square image takes the height branch. Neither side drops below 1.
pub fn target_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
	if width <= max && height <= max {
		return (width, height);
	}
	if width > height {
		(max, scale_round(height, max, width))
	} else {
		(scale_round(width, max, height), max)
	}
}

// round(short * max / long) in integers, half up like Math.round for positives.
fn scale_round(short: u32, max: u32, long: u32) -> u32 {
	let num = 2 * u64::from(short) * u64::from(max) + u64::from(long);
	let den = 2 * u64::from(long);
	((num / den) as u32).max(1)
}

pub fn fit_within(bitmap: RgbaImage, max: u32) -> Resized {
	let (w, h) = bitmap.dimensions();
	let (tw, th) = target_dimensions(w, h, max);
	if (tw, th) == (w, h) {
		return Resized {
			bitmap,
			was_resized: false
		};
	}
	Resized {
		bitmap: image::imageops::resize(&bitmap, tw, th, FilterType::Triangle),
		was_resized: true
	}
}
