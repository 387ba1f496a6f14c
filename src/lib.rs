pub mod assets;
pub mod engine;
pub mod render;

pub use engine::*;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    use image::RgbaImage;

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, image::Rgba(rgba))
    }

    pub fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    pub fn write_solid_png(dir: &Path, name: &str, width: u32, height: u32, rgba: [u8; 4]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, encode_png(&solid(width, height, rgba))).unwrap();
        path
    }
}
