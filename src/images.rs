//! Image units: one per file, embedded from the raw bytes.

use image::GenericImageView;

use crate::extract::ExtractError;
use crate::models::{ImageUnitMeta, ParsedUnit, UnitContent, UnitMeta, IMAGE_DOCUMENT_TEXT};

/// Decodes `bytes` to validate them and read format and dimensions.
pub fn image_unit(source_file: &str, bytes: Vec<u8>) -> Result<ParsedUnit, ExtractError> {
    let format = image::guess_format(&bytes).map_err(|e| ExtractError::Image(e.to_string()))?;
    let img = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| ExtractError::Image(e.to_string()))?;
    let (width, height) = img.dimensions();
    let format = format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{:?}", format).to_lowercase());

    Ok(ParsedUnit {
        index: 0,
        content: UnitContent::Image(bytes),
        document_text: IMAGE_DOCUMENT_TEXT.to_string(),
        meta: UnitMeta::Image(ImageUnitMeta {
            source_file: source_file.to_string(),
            format,
            width,
            height,
        }),
    })
}
