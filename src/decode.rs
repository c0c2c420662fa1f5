use std::io::Cursor;

use image::{ImageReader, RgbaImage};
use tracing::debug;

use crate::{error::ConvertError, handles::HandleRegistry, source::SourceImage};

/// Decode an uploaded file into an RGBA bitmap at its natural size.
///
/// The container format is sniffed from the bytes; the declared media type
/// is only used to label the temporary handle held while decoding.
pub fn decode(source: &SourceImage, handles: &HandleRegistry) -> Result<RgbaImage, ConvertError> {
	let _temp = handles.create(source.shared_bytes(), source.media_type().clone());

	let reader = ImageReader::new(Cursor::new(source.bytes()))
		.with_guessed_format()
		.map_err(|e| ConvertError::Decode(image::ImageError::IoError(e)))?;
	let img = reader.decode().map_err(ConvertError::Decode)?;

	debug!(name = source.name(), width = img.width(), height = img.height(), "decoded");
	Ok(img.to_rgba8())
}
