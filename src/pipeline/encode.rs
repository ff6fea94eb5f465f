//! Image encoding: `DynamicImage` → PNG bytes for snapshot uploads.
//!
//! PNG is lossless; JPEG artefacts on rendered text make dates and document
//! numbers harder for the model to read, and those are exactly the fields the
//! file name is built from.

use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const SNAPSHOT_MIME: &str = "image/png";

/// Encode a rendered page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} snapshot → {} bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}
