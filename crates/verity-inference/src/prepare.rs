//! Image preparation for classifier submission.

use verity_core::{Error, PreparedImage, Result};

/// Validate downloaded bytes as an image and tag them with their MIME type.
///
/// The type is detected from magic bytes, never from the file name.
pub fn prepare_image(name: &str, data: Vec<u8>) -> Result<PreparedImage> {
    if data.is_empty() {
        return Err(Error::InvalidInput(format!("Image {} is empty", name)));
    }

    let kind = infer::get(&data)
        .ok_or_else(|| Error::InvalidInput(format!("Image {} has unknown format", name)))?;
    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(Error::InvalidInput(format!(
            "{} is not an image (detected {})",
            name,
            kind.mime_type()
        )));
    }

    Ok(PreparedImage {
        name: name.to_string(),
        mime_type: kind.mime_type().to_string(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn test_png_detected() {
        let image = prepare_image("a.png", PNG_HEADER.to_vec()).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.name, "a.png");
    }

    #[test]
    fn test_jpeg_detected_regardless_of_name() {
        let image = prepare_image("photo.png", JPEG_HEADER.to_vec()).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[test]
    fn test_pdf_rejected() {
        let err = prepare_image("doc.png", b"%PDF-1.4\n".to_vec()).unwrap_err();
        assert!(err.to_string().contains("not an image"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(prepare_image("x.png", b"hello world".to_vec()).is_err());
        assert!(prepare_image("x.png", Vec::new()).is_err());
    }
}
