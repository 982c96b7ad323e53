//! LDR image decoding (PNG, JPEG).

use ::image::RgbaImage;

use crate::error::LoadError;

/// Decode an encoded image into 8-bit RGBA, rows top first.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    let image = ::image::load_from_memory(bytes)?;
    log::debug!("Image: decoded {}x{}", image.width(), image.height());
    Ok(image.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{ImageOutputFormat, Rgba};
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let mut source = RgbaImage::new(2, 1);
        source.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        source.put_pixel(1, 0, Rgba([0, 0, 255, 128]));
        let mut bytes = Vec::new();
        source
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(1, 0), &Rgba([0, 0, 255, 128]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode(b"not an image").unwrap_err();
        assert!(matches!(err, LoadError::Image(_)));
    }
}
