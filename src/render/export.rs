//! Exporter: encodes a canvas readback to PNG or TIFF.
//!
//! The destination is only created once the whole image has been encoded: data goes to a
//! temporary file next to the destination which is then renamed over it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tempfile::NamedTempFile;

use crate::engine::ExportError;
use crate::render::backend::PixelBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Tiff,
}

impl ExportFormat {
    /// Infer the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("png") => Ok(ExportFormat::Png),
            Some("tif") | Some("tiff") => Ok(ExportFormat::Tiff),
            _ => Err(ExportError::UnknownFormat(path.to_path_buf())),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Png => write!(f, "PNG"),
            ExportFormat::Tiff => write!(f, "TIFF"),
        }
    }
}

/// Encode `buffer` and atomically place it at `path`.
pub fn write_snapshot(buffer: &PixelBuffer, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;

    let rows = buffer.tight_rows();
    {
        let mut w = BufWriter::new(tmp.as_file_mut());
        match format {
            ExportFormat::Png => encode_png(&mut w, &rows, buffer.width, buffer.height)?,
            ExportFormat::Tiff => {
                TiffEncoder::new(&mut w).write_image(
                    &rows,
                    buffer.width,
                    buffer.height,
                    ExtendedColorType::Rgba8,
                )?;
            }
        }
        w.flush().map_err(io_err)?;
    }

    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    log::info!(
        "Export: wrote {}x{} {} to {}",
        buffer.width,
        buffer.height,
        format,
        path.display()
    );
    Ok(())
}

fn encode_png(w: &mut BufWriter<&mut File>, rows: &[u8], width: u32, height: u32) -> Result<(), ExportError> {
    let mut encoder = png::Encoder::new(w, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(rows)?;
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::PixelFormat;

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8 * 10, y as u8 * 20, 7, 200 + x as u8]);
            }
        }
        PixelBuffer::from_raw(pixels, width, height, width * 4, PixelFormat::Rgba8).unwrap()
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a/b.PNG")).unwrap(), ExportFormat::Png);
        assert_eq!(ExportFormat::from_path(Path::new("x.tif")).unwrap(), ExportFormat::Tiff);
        assert_eq!(ExportFormat::from_path(Path::new("x.tiff")).unwrap(), ExportFormat::Tiff);
        assert!(matches!(
            ExportFormat::from_path(Path::new("x.jpg")),
            Err(ExportError::UnknownFormat(_))
        ));
        assert!(ExportFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn png_roundtrip_keeps_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let buf = gradient(5, 3);

        write_snapshot(&buf, &path, ExportFormat::Png).unwrap();
        let decoded = image::open(&path).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(decoded.into_raw(), buf.pixels);
    }

    #[test]
    fn tiff_roundtrip_keeps_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tiff");
        let buf = gradient(4, 4);

        write_snapshot(&buf, &path, ExportFormat::Tiff).unwrap();
        let decoded = image::open(&path).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (4, 4));
        assert_eq!(decoded.into_raw(), buf.pixels);
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.png");

        let err = write_snapshot(&gradient(2, 2), &path, ExportFormat::Png).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
        assert!(!path.exists());
    }
}
