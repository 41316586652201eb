//! Uploaded image validation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::types::ImageAttachment;

/// Query used when the user sends an image without text.
pub const IMAGE_ONLY_QUERY: &str = "Please analyze this image and explain what you see";

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];

/// Detect PNG or JPEG from the leading bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else if bytes.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else {
        None
    }
}

/// Decode a base64 image (optionally a `data:<mime>;base64,` URL) and check
/// that it is a PNG or JPEG.
pub fn decode_image(input: &str) -> Result<ImageAttachment> {
    let payload = match input.trim().strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ClauseError::InvalidInput("Malformed data URL".into()))?,
        None => input.trim(),
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| ClauseError::InvalidInput(format!("Image is not valid base64: {e}")))?;
    image_from_bytes(&bytes)
}

/// Validate raw image bytes (CLI `--image FILE`).
pub fn image_from_bytes(bytes: &[u8]) -> Result<ImageAttachment> {
    let mime = sniff_mime(bytes).ok_or_else(|| {
        ClauseError::InvalidInput("Unsupported image type (only PNG and JPEG are accepted)".into())
    })?;
    Ok(ImageAttachment { mime_type: mime.to_string(), data_base64: STANDARD.encode(bytes) })
}
