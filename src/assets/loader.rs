use std::path::Path;

use image::{imageops, RgbaImage};

use crate::engine::DecodeError;

/// A decoded source image, centered on a transparent square raster.
#[derive(Clone)]
pub struct DecodedFace {
    /// Width of the source image
    pub image_width: u32,
    /// Height of the source image
    pub image_height: u32,
    /// Side of the square working raster, `max(image_width, image_height)`
    pub side: u32,
    /// Square RGBA8 raster of `side x side` pixels
    pub pixels: RgbaImage,
}

impl DecodedFace {
    /// Offset of the source image inside the square raster.
    pub fn content_offset(&self) -> (u32, u32) {
        (
            (self.side - self.image_width) / 2,
            (self.side - self.image_height) / 2,
        )
    }
}

impl std::fmt::Debug for DecodedFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFace")
            .field("image_width", &self.image_width)
            .field("image_height", &self.image_height)
            .field("side", &self.side)
            .finish()
    }
}

/// Decodes images into [`DecodedFace`] rasters. Side-effect free, safe to run on any thread.
pub struct TextureLoader;

impl TextureLoader {
    pub fn load_path(path: &Path) -> Result<DecodedFace, DecodeError> {
        let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::load_bytes(&bytes, &path.display().to_string())
    }

    /// Decode an in-memory image. `origin` only names the source in errors.
    pub fn load_bytes(bytes: &[u8], origin: &str) -> Result<DecodedFace, DecodeError> {
        let decoded = image::load_from_memory(bytes).map_err(|source| DecodeError::Format {
            origin: origin.to_string(),
            source,
        })?;

        let source = decoded.into_rgba8();
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty {
                origin: origin.to_string(),
            });
        }

        Ok(Self::square(source))
    }

    /// Center an RGBA raster on a transparent square of side `max(width, height)`.
    pub fn square(source: RgbaImage) -> DecodedFace {
        let (width, height) = source.dimensions();
        let side = width.max(height);

        let pixels = if width == height {
            source
        } else {
            let mut square = RgbaImage::new(side, side);
            imageops::replace(
                &mut square,
                &source,
                ((side - width) / 2) as i64,
                ((side - height) / 2) as i64,
            );
            square
        };

        DecodedFace {
            image_width: width,
            image_height: height,
            side,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encode_png, solid};

    #[test]
    fn wide_image_is_centered_vertically() {
        let bytes = encode_png(&solid(6, 2, [255, 0, 0, 255]));
        let face = TextureLoader::load_bytes(&bytes, "wide").unwrap();

        assert_eq!(face.side, 6);
        assert_eq!((face.image_width, face.image_height), (6, 2));
        assert_eq!(face.content_offset(), (0, 2));
        assert_eq!(face.pixels.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(face.pixels.get_pixel(0, 2).0, [255, 0, 0, 255]);
        assert_eq!(face.pixels.get_pixel(5, 3).0, [255, 0, 0, 255]);
        assert_eq!(face.pixels.get_pixel(5, 4).0, [0, 0, 0, 0]);
    }

    #[test]
    fn tall_image_is_centered_horizontally() {
        let face = TextureLoader::square(solid(3, 7, [0, 255, 0, 255]));
        assert_eq!(face.side, 7);
        assert_eq!(face.content_offset(), (2, 0));
        assert_eq!(face.pixels.get_pixel(1, 3).0[3], 0);
        assert_eq!(face.pixels.get_pixel(2, 3).0, [0, 255, 0, 255]);
    }

    #[test]
    fn garbage_bytes_fail_with_format_error() {
        let err = TextureLoader::load_bytes(b"definitely not a png", "junk").unwrap_err();
        assert!(matches!(err, DecodeError::Format { .. }));
    }

    #[test]
    fn missing_file_fails_with_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TextureLoader::load_path(&dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }
}
