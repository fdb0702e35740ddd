//! Image encoding: `DynamicImage` → base64 PNG `data:` URI.
//!
//! Rendered PDF pages are embedded in their SVG wrapper as inline data URIs,
//! the same shape a vector PDF backend produces for embedded rasters. That
//! keeps the page markup self-contained until the import stage hands every
//! data URI to the blob cache. PNG is lossless, so text edges stay crisp.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as a `data:image/png;base64,…` URI.
pub fn png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(format!("data:image/png;base64,{b64}"))
}
